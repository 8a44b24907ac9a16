//! Chunk-pair driver for a single step: runs the blocking join and field
//! matcher over every (left chunk, right chunk) combination in order, and
//! folds each surviving batch into the growing matched-pairs file with a
//! two-way streaming merge.
//!
//! The merge walks the current matched file and the new sorted batch in
//! lock-step, so memory use is bounded by one row per stream regardless
//! of how large the matched file grows. Chunk pairs must be processed in
//! order; each merge runs against the file state left by the previous one.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::algorithms::AlgorithmRegistry;
use crate::config::StepConfig;
use crate::engine::blocking::{pair_records, BlockingSpec, PairBatch};
use crate::engine::chunk::ChunkReader;
use crate::engine::matcher::{match_records, LinkingSpec};
use crate::engine::{LEFT_PREFIX, RIGHT_PREFIX};
use crate::error::Result;
use crate::models::{Header, NumKey};
use crate::util::files::{replace_file, WorkDir};

pub struct MatchParams<'a> {
    pub registry: &'a AlgorithmRegistry,
    pub step: &'a StepConfig,
    pub dedup: bool,
    pub left_path: &'a Path,
    pub right_path: &'a Path,
    pub left_index: &'a str,
    pub right_index: &'a str,
    pub chunk_size: usize,
    pub work: &'a WorkDir,
}

pub struct StepMatchOutcome {
    /// Rows in the matched-pairs file after this step's chunk pairs.
    pub total_pairs: u64,
    /// Rows excluded from this step's candidates for blank blocking keys.
    pub blocking_excluded: u64,
}

fn resolve_blocking<'a>(
    params: &MatchParams<'a>,
) -> std::result::Result<BlockingSpec<'a>, crate::error::ConfigError> {
    let schema = &params.step.blocking_schema;
    let right_cols = if schema.right.is_empty() {
        schema.left.clone()
    } else {
        schema.right.clone()
    };
    let mut encodings = Vec::with_capacity(schema.left.len());
    if schema.transformations.is_empty() {
        for _ in &schema.left {
            encodings.push(params.registry.encoding("EXACT")?);
        }
    } else {
        for name in &schema.transformations {
            encodings.push(params.registry.encoding(name)?);
        }
    }
    Ok(BlockingSpec {
        left_cols: schema.left.clone(),
        right_cols,
        encodings,
    })
}

fn resolve_linking<'a>(
    params: &MatchParams<'a>,
) -> std::result::Result<LinkingSpec<'a>, crate::error::ConfigError> {
    let schema = &params.step.linking_schema;
    let right_cols = if schema.right.is_empty() {
        schema.left.clone()
    } else {
        schema.right.clone()
    };
    let mut comparisons = Vec::with_capacity(schema.comparisons.len());
    for spec in &schema.comparisons {
        comparisons.push((params.registry.comparator(&spec.name)?, spec.args.clone()));
    }
    Ok(LinkingSpec {
        left_cols: schema.left.clone(),
        right_cols,
        comparisons,
    })
}

/// Find this step's matched pairs and fold them into `matched_path`.
pub fn pair_and_match(params: &MatchParams<'_>, matched_path: &Path) -> Result<StepMatchOutcome> {
    let blocking = resolve_blocking(params)?;
    let linking = resolve_linking(params)?;
    let left_key_col = format!("{}{}", LEFT_PREFIX, params.left_index);
    let right_key_col = format!("{}{}", RIGHT_PREFIX, params.right_index);

    let left_label = params.left_path.display().to_string();
    let right_label = params.right_path.display().to_string();

    let mut excluded = 0u64;
    let mut last_total: Option<u64> = None;

    log::info!("Reading input data file chunk by chunk");
    let mut left_reader = ChunkReader::open(params.left_path, params.chunk_size)?;
    let mut left_no = 0usize;
    while let Some(left_chunk) = left_reader.next_chunk()? {
        let mut right_reader = ChunkReader::open(params.right_path, params.chunk_size)?;
        let mut right_no = 0usize;
        while let Some(right_chunk) = right_reader.next_chunk()? {
            // A DEDUP self-join is symmetric; a chunk only needs to be
            // joined against itself and later chunks.
            if params.dedup && left_no > right_no {
                right_no += 1;
                continue;
            }
            log::debug!(
                "Finding record pairs for left block {} and right block {}",
                left_no,
                right_no
            );
            let outcome = pair_records(
                &left_chunk,
                &right_chunk,
                &left_label,
                &right_label,
                params.left_index,
                params.right_index,
                &blocking,
                params.dedup,
            )?;
            if params.dedup {
                if right_no == left_no {
                    excluded += outcome.left_excluded;
                }
            } else {
                if right_no == 0 {
                    excluded += outcome.left_excluded;
                }
                if left_no == 0 {
                    excluded += outcome.right_excluded;
                }
            }
            if outcome.batch.is_empty() {
                right_no += 1;
                continue;
            }
            let matched = match_records(
                outcome.batch,
                &linking,
                params.step.seq,
                &left_key_col,
                &right_key_col,
            )?;
            if !matched.is_empty() {
                log::debug!("Merging chunk result into the matched records file.");
                last_total = Some(merge_batch(
                    matched_path,
                    &matched,
                    &left_key_col,
                    &right_key_col,
                    params.work,
                )?);
            }
            right_no += 1;
        }
        left_no += 1;
    }

    let total_pairs = match last_total {
        Some(n) => n,
        None => count_rows(matched_path)?,
    };
    Ok(StepMatchOutcome {
        total_pairs,
        blocking_excluded: excluded,
    })
}

type FileRow = Option<(csv::StringRecord, (NumKey, NumKey))>;

fn next_file_row(
    rows: &mut csv::StringRecordsIntoIter<File>,
    left_pos: usize,
    right_pos: usize,
    left_key_col: &str,
    right_key_col: &str,
) -> Result<FileRow> {
    match rows.next() {
        Some(record) => {
            let record = record?;
            let key = (
                NumKey::parse(left_key_col, record.get(left_pos).unwrap_or(""))?,
                NumKey::parse(right_key_col, record.get(right_pos).unwrap_or(""))?,
            );
            Ok(Some((record, key)))
        }
        None => Ok(None),
    }
}

/// Two-way streaming merge of the sorted matched file and a sorted batch.
/// Equal composite keys are emitted once, so a pair matched in an earlier
/// step is never duplicated. The merged file atomically replaces the old
/// one only after it is fully written.
fn merge_batch(
    matched_path: &Path,
    batch: &PairBatch,
    left_key_col: &str,
    right_key_col: &str,
    work: &WorkDir,
) -> Result<u64> {
    let staged = work.file("matched_temp.csv");

    let existing = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(matched_path)?;
    let mut existing_rows = existing.into_records();
    let existing_header = match existing_rows.next() {
        Some(record) => Some(record?),
        None => None,
    };

    let header = match &existing_header {
        Some(record) => Header::from_record(record),
        None => batch.header.clone(),
    };
    let matched_label = matched_path.display().to_string();
    let left_pos = header.position(left_key_col, &matched_label)?;
    let right_pos = header.position(right_key_col, &matched_label)?;
    let batch_left_pos = batch.header.position(left_key_col, "batch")?;
    let batch_right_pos = batch.header.position(right_key_col, "batch")?;

    let batch_keys: Vec<(NumKey, NumKey)> = batch
        .rows
        .iter()
        .map(|row| {
            Ok((
                NumKey::parse(left_key_col, &row[batch_left_pos])?,
                NumKey::parse(right_key_col, &row[batch_right_pos])?,
            ))
        })
        .collect::<Result<_>>()?;

    let file = File::create(&staged)?;
    let mut writer = csv::WriterBuilder::new().from_writer(BufWriter::with_capacity(512 * 1024, file));
    writer.write_record(header.columns())?;

    let mut count = 0u64;
    let mut b = 0usize;
    let mut file_row = next_file_row(
        &mut existing_rows,
        left_pos,
        right_pos,
        left_key_col,
        right_key_col,
    )?;

    loop {
        let advance_file = match (&file_row, batch_keys.get(b)) {
            (Some((record, file_key)), Some(batch_key)) => {
                if file_key < batch_key {
                    writer.write_record(record)?;
                    count += 1;
                    true
                } else if file_key > batch_key {
                    writer.write_record(&batch.rows[b])?;
                    count += 1;
                    b += 1;
                    false
                } else {
                    writer.write_record(record)?;
                    count += 1;
                    b += 1;
                    true
                }
            }
            (Some((record, _)), None) => {
                writer.write_record(record)?;
                count += 1;
                true
            }
            (None, Some(_)) => {
                writer.write_record(&batch.rows[b])?;
                count += 1;
                b += 1;
                false
            }
            (None, None) => break,
        };
        if advance_file {
            file_row = next_file_row(
                &mut existing_rows,
                left_pos,
                right_pos,
                left_key_col,
                right_key_col,
            )?;
        }
    }
    writer.flush()?;
    replace_file(&staged, matched_path)?;
    Ok(count)
}

/// Number of data rows in a delimited file; zero for a file with no
/// header yet.
pub fn count_rows(path: &Path) -> Result<u64> {
    let reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
    let mut total = 0u64;
    for record in reader.into_records() {
        record?;
        total += 1;
    }
    Ok(total.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::files::truncate_file;

    fn batch(rows: &[(&str, &str)]) -> PairBatch {
        PairBatch {
            header: Header::new(vec![
                "LEFT_id".into(),
                "RIGHT_id".into(),
                "STEP".into(),
            ]),
            rows: rows
                .iter()
                .map(|(l, r)| vec![l.to_string(), r.to_string(), "1".to_string()])
                .collect(),
        }
    }

    fn keys_in(path: &Path) -> Vec<(String, String)> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| {
                let r = r.unwrap();
                (r[0].to_string(), r[1].to_string())
            })
            .collect()
    }

    #[test]
    fn merge_keeps_file_sorted_and_dedups_equal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::create(dir.path(), "merge").unwrap();
        let matched = dir.path().join("matched_records.csv");
        truncate_file(&matched).unwrap();

        let n1 = merge_batch(
            &matched,
            &batch(&[("1", "5"), ("3", "4")]),
            "LEFT_id",
            "RIGHT_id",
            &work,
        )
        .unwrap();
        assert_eq!(n1, 2);

        let n2 = merge_batch(
            &matched,
            &batch(&[("1", "5"), ("2", "9"), ("10", "11")]),
            "LEFT_id",
            "RIGHT_id",
            &work,
        )
        .unwrap();
        assert_eq!(n2, 4);

        assert_eq!(
            keys_in(&matched),
            vec![
                ("1".to_string(), "5".to_string()),
                ("2".to_string(), "9".to_string()),
                ("3".to_string(), "4".to_string()),
                ("10".to_string(), "11".to_string())
            ]
        );
    }

    #[test]
    fn merge_orders_keys_numerically_not_lexically() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::create(dir.path(), "merge").unwrap();
        let matched = dir.path().join("matched_records.csv");
        truncate_file(&matched).unwrap();

        merge_batch(&matched, &batch(&[("9", "1")]), "LEFT_id", "RIGHT_id", &work).unwrap();
        merge_batch(&matched, &batch(&[("10", "1")]), "LEFT_id", "RIGHT_id", &work).unwrap();
        let keys = keys_in(&matched);
        assert_eq!(keys[0].0, "9");
        assert_eq!(keys[1].0, "10");
    }

    #[test]
    fn count_rows_ignores_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.csv");
        std::fs::write(&path, "a,b\n1,2\n3,4\n").unwrap();
        assert_eq!(count_rows(&path).unwrap(), 2);
        truncate_file(&path).unwrap();
        assert_eq!(count_rows(&path).unwrap(), 0);
    }
}

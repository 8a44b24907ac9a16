//! Blocking join: candidate pair generation over two chunks.
//!
//! Records only pair within a shared block, i.e. when their encoded
//! blocking keys are equal on every blocking column. Rows with a blank
//! blocking value cannot be blocked; they are excluded from the step's
//! candidate set (and counted), not from the dataset.

use std::collections::HashMap;

use crate::algorithms::Encoding;
use crate::engine::chunk::Frame;
use crate::engine::{LEFT_PREFIX, RIGHT_PREFIX};
use crate::error::Result;
use crate::models::{Header, NumKey};

pub struct BlockingSpec<'a> {
    pub left_cols: Vec<String>,
    pub right_cols: Vec<String>,
    pub encodings: Vec<&'a dyn Encoding>,
}

/// A batch of candidate pairs with the composite `(LEFT_*, RIGHT_*)` key
/// in the first two columns.
#[derive(Debug, Clone)]
pub struct PairBatch {
    pub header: Header,
    pub rows: Vec<Vec<String>>,
}

impl PairBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug)]
pub struct PairOutcome {
    pub batch: PairBatch,
    pub left_excluded: u64,
    pub right_excluded: u64,
}

/// Encoded blocking key of one row, or `None` when any blocking value is
/// blank or has no usable encoding.
fn block_key(
    row: &[String],
    positions: &[usize],
    encodings: &[&dyn Encoding],
) -> Option<Vec<String>> {
    let mut key = Vec::with_capacity(positions.len());
    for (pos, encoding) in positions.iter().zip(encodings) {
        let value = row.get(*pos).map(String::as_str).unwrap_or("");
        if value.trim().is_empty() {
            return None;
        }
        key.push(encoding.encode(value)?);
    }
    Some(key)
}

pub fn pair_records(
    left: &Frame,
    right: &Frame,
    left_label: &str,
    right_label: &str,
    left_index: &str,
    right_index: &str,
    spec: &BlockingSpec<'_>,
    dedup: bool,
) -> Result<PairOutcome> {
    let left_idx = left.header.position(left_index, left_label)?;
    let right_idx = right.header.position(right_index, right_label)?;

    let mut left_positions = Vec::with_capacity(spec.left_cols.len());
    for col in &spec.left_cols {
        left_positions.push(left.header.position(col, left_label)?);
    }
    let mut right_positions = Vec::with_capacity(spec.right_cols.len());
    for col in &spec.right_cols {
        right_positions.push(right.header.position(col, right_label)?);
    }

    // Build the pair header: composite key first, then both sides'
    // remaining columns under their prefixes.
    let mut columns = Vec::with_capacity(left.header.len() + right.header.len());
    columns.push(format!("{}{}", LEFT_PREFIX, left_index));
    columns.push(format!("{}{}", RIGHT_PREFIX, right_index));
    let left_rest: Vec<usize> = (0..left.header.len()).filter(|&p| p != left_idx).collect();
    let right_rest: Vec<usize> = (0..right.header.len()).filter(|&p| p != right_idx).collect();
    for &p in &left_rest {
        columns.push(format!("{}{}", LEFT_PREFIX, left.header.columns()[p]));
    }
    for &p in &right_rest {
        columns.push(format!("{}{}", RIGHT_PREFIX, right.header.columns()[p]));
    }
    let header = Header::new(columns);

    // Index the right chunk by encoded blocking key.
    let mut right_blocks: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    let mut right_excluded = 0u64;
    for (row_no, row) in right.rows.iter().enumerate() {
        match block_key(row, &right_positions, &spec.encodings) {
            Some(key) => right_blocks.entry(key).or_default().push(row_no),
            None => right_excluded += 1,
        }
    }

    let mut rows = Vec::new();
    let mut left_excluded = 0u64;
    for left_row in &left.rows {
        let Some(key) = block_key(left_row, &left_positions, &spec.encodings) else {
            left_excluded += 1;
            continue;
        };
        let Some(partners) = right_blocks.get(&key) else {
            continue;
        };
        let left_key = NumKey::parse(left_index, &left_row[left_idx])?;
        for &row_no in partners {
            let right_row = &right.rows[row_no];
            if dedup {
                // Undirected self-join: keep each unordered pair once and
                // never pair a record with itself.
                let right_key = NumKey::parse(right_index, &right_row[right_idx])?;
                if left_key >= right_key {
                    continue;
                }
            }
            let mut out = Vec::with_capacity(header.len());
            out.push(left_row[left_idx].clone());
            out.push(right_row[right_idx].clone());
            for &p in &left_rest {
                out.push(left_row[p].clone());
            }
            for &p in &right_rest {
                out.push(right_row[p].clone());
            }
            rows.push(out);
        }
    }

    Ok(PairOutcome {
        batch: PairBatch { header, rows },
        left_excluded,
        right_excluded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::AlgorithmRegistry;

    fn frame(header: &[&str], rows: &[&[&str]]) -> Frame {
        Frame {
            header: Header::new(header.iter().map(|s| s.to_string()).collect()),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    fn spec<'a>(registry: &'a AlgorithmRegistry, cols: &[&str], encodings: &[&str]) -> BlockingSpec<'a> {
        BlockingSpec {
            left_cols: cols.iter().map(|s| s.to_string()).collect(),
            right_cols: cols.iter().map(|s| s.to_string()).collect(),
            encodings: encodings
                .iter()
                .map(|n| registry.encoding(n).unwrap())
                .collect(),
        }
    }

    #[test]
    fn joins_only_equal_encoded_keys() {
        let registry = AlgorithmRegistry::with_builtins();
        let left = frame(
            &["rec_id", "last"],
            &[&["1", "Smith"], &["2", "Jones"], &["3", ""]],
        );
        let right = frame(&["rec_id", "last"], &[&["10", "Smyth"], &["11", "Brown"]]);
        let out = pair_records(
            &left,
            &right,
            "left.csv",
            "right.csv",
            "rec_id",
            "rec_id",
            &spec(&registry, &["last"], &["SOUNDEX"]),
            false,
        )
        .unwrap();
        // Smith/Smyth share a soundex block; Jones and Brown do not pair.
        assert_eq!(out.batch.len(), 1);
        assert_eq!(out.batch.rows[0][0], "1");
        assert_eq!(out.batch.rows[0][1], "10");
        assert_eq!(out.left_excluded, 1);
        assert_eq!(out.right_excluded, 0);
    }

    #[test]
    fn dedup_emits_each_unordered_pair_once() {
        let registry = AlgorithmRegistry::with_builtins();
        let chunk = frame(
            &["rec_id", "last"],
            &[&["1", "Smith"], &["2", "Smith"], &["3", "Smith"]],
        );
        let out = pair_records(
            &chunk,
            &chunk,
            "work.csv",
            "work.csv",
            "rec_id",
            "rec_id",
            &spec(&registry, &["last"], &["EXACT"]),
            true,
        )
        .unwrap();
        let pairs: Vec<(String, String)> = out
            .batch
            .rows
            .iter()
            .map(|r| (r[0].clone(), r[1].clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("1".into(), "2".into()),
                ("1".into(), "3".into()),
                ("2".into(), "3".into())
            ]
        );
    }

    #[test]
    fn pair_header_prefixes_both_sides() {
        let registry = AlgorithmRegistry::with_builtins();
        let left = frame(&["rec_id", "last"], &[&["1", "Lee"]]);
        let right = frame(&["rec_id", "surname"], &[&["9", "Lee"]]);
        let mut blocking = spec(&registry, &["last"], &["EXACT"]);
        blocking.right_cols = vec!["surname".into()];
        let out = pair_records(
            &left,
            &right,
            "l.csv",
            "r.csv",
            "rec_id",
            "rec_id",
            &blocking,
            false,
        )
        .unwrap();
        assert_eq!(
            out.batch.header.columns(),
            &["LEFT_rec_id", "RIGHT_rec_id", "LEFT_last", "RIGHT_surname"]
        );
    }

    #[test]
    fn missing_blocking_column_is_schema_error() {
        let registry = AlgorithmRegistry::with_builtins();
        let left = frame(&["rec_id", "last"], &[&["1", "Lee"]]);
        let err = pair_records(
            &left,
            &left,
            "work.csv",
            "work.csv",
            "rec_id",
            "rec_id",
            &spec(&registry, &["nope"], &["EXACT"]),
            true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}

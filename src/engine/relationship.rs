//! Relationship-constraint resolution for LINK projects.
//!
//! A single streaming pass over the matched pairs, sorted by
//! `(group column, filter column)`: consecutive rows sharing the group
//! value form a group, and a group is linked only when its filter value
//! never changes. One-to-one runs the pass twice, once per direction,
//! with the second pass restricted to the first pass's survivors.

use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::Path;

use crate::config::RelationshipType;
use crate::engine::external_sort::{sort_file, SortColumn};
use crate::engine::LINK_ID_COLUMN;
use crate::error::Result;
use crate::models::{Header, IdAllocator};
use crate::util::files::WorkDir;

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkPassStats {
    /// Link groups that satisfied the constraint (LINK_IDs assigned).
    pub total_linked: u64,
    /// Rows discarded to the matched-not-linked output.
    pub total_filtered: u64,
    /// Rows written to the linked output.
    pub total_records_linked: u64,
}

fn open_not_linked_writer(
    path: &Path,
    header: &Header,
) -> Result<csv::Writer<BufWriter<std::fs::File>>> {
    let is_empty = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().from_writer(BufWriter::new(file));
    if is_empty {
        writer.write_record(header.columns())?;
    }
    Ok(writer)
}

/// One resolver pass. Groups `input` rows by `group_col` and keeps only
/// the groups whose `filter_col` value is constant, assigning a fresh
/// link id per kept group when `assign_ids` is set.
pub fn groupby_unique_filter(
    input: &Path,
    group_col: &str,
    filter_col: &str,
    not_linked: &Path,
    assign_ids: bool,
    output: &Path,
    alloc: &mut IdAllocator,
    chunk_size: usize,
    work: &WorkDir,
) -> Result<LinkPassStats> {
    let sorted = work.file("temp_link_file.csv");
    sort_file(
        input,
        &sorted,
        &[
            SortColumn::numeric(group_col),
            SortColumn::numeric(filter_col),
        ],
        chunk_size,
        work.path(),
    )?;

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&sorted)?;
    let label = input.display().to_string();
    let header = Header::from_record(&reader.headers()?.clone());
    let group_pos = header.position(group_col, &label)?;
    let filter_pos = header.position(filter_col, &label)?;

    let file = std::fs::File::create(output)?;
    let mut linked_writer =
        csv::WriterBuilder::new().from_writer(BufWriter::with_capacity(512 * 1024, file));
    if assign_ids {
        log::info!("Assigning link id to the selected subset of record pairs.");
        let mut columns = vec![LINK_ID_COLUMN.to_string()];
        columns.extend(header.columns().iter().cloned());
        linked_writer.write_record(&columns)?;
    } else {
        linked_writer.write_record(header.columns())?;
    }
    let mut not_linked_writer = open_not_linked_writer(not_linked, &header)?;

    let mut stats = LinkPassStats::default();
    let mut buffer: Vec<csv::StringRecord> = Vec::new();
    let mut current_group: Option<String> = None;
    let mut first_filter = String::new();
    let mut filter_changed = false;

    let mut flush = |buffer: &mut Vec<csv::StringRecord>,
                     changed: bool,
                     stats: &mut LinkPassStats,
                     alloc: &mut IdAllocator,
                     linked_writer: &mut csv::Writer<_>,
                     not_linked_writer: &mut csv::Writer<_>|
     -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        if !changed {
            let link_id = if assign_ids {
                stats.total_linked += 1;
                Some(alloc.next_id().to_string())
            } else {
                None
            };
            for row in buffer.iter() {
                match &link_id {
                    Some(id) => {
                        let mut out = vec![id.as_str()];
                        out.extend(row.iter());
                        linked_writer.write_record(&out)?;
                    }
                    None => linked_writer.write_record(row)?,
                }
                stats.total_records_linked += 1;
            }
        } else {
            for row in buffer.iter() {
                not_linked_writer.write_record(row)?;
                stats.total_filtered += 1;
            }
        }
        buffer.clear();
        Ok(())
    };

    for record in reader.records() {
        let record = record?;
        let group_id = record.get(group_pos).unwrap_or("").to_string();
        if current_group.as_deref() != Some(group_id.as_str()) {
            flush(
                &mut buffer,
                filter_changed,
                &mut stats,
                alloc,
                &mut linked_writer,
                &mut not_linked_writer,
            )?;
            filter_changed = false;
            current_group = Some(group_id);
            first_filter = record.get(filter_pos).unwrap_or("").to_string();
        }
        if record.get(filter_pos).unwrap_or("") != first_filter {
            filter_changed = true;
        }
        buffer.push(record);
    }
    flush(
        &mut buffer,
        filter_changed,
        &mut stats,
        alloc,
        &mut linked_writer,
        &mut not_linked_writer,
    )?;

    linked_writer.flush()?;
    not_linked_writer.flush()?;
    Ok(stats)
}

/// Resolve the matched pairs of one step against the project's
/// relationship type, writing the surviving rows (with LINK_ID) to
/// `linked_out` and the rest to the matched-not-linked file.
pub fn resolve_links(
    matched: &Path,
    relationship: RelationshipType,
    left_entity_col: &str,
    right_entity_col: &str,
    not_linked: &Path,
    linked_out: &Path,
    alloc: &mut IdAllocator,
    chunk_size: usize,
    work: &WorkDir,
) -> Result<LinkPassStats> {
    log::info!(
        "Linking the record pairs based on the relationship type: {}",
        relationship.label()
    );
    // The grouping side holds the "many" end of the relationship; the
    // filter side must stay constant within a group.
    let (mut group_col, mut filter_col) = (right_entity_col, left_entity_col);
    if relationship == RelationshipType::ManyToOne {
        std::mem::swap(&mut group_col, &mut filter_col);
    }

    match relationship {
        RelationshipType::OneToMany | RelationshipType::ManyToOne => groupby_unique_filter(
            matched,
            group_col,
            filter_col,
            not_linked,
            true,
            linked_out,
            alloc,
            chunk_size,
            work,
        ),
        RelationshipType::OneToOne => {
            // Two passes, one per direction; ids are assigned on the
            // second pass, over the first pass's surviving subset.
            let filtered = work.file("filtered_records.csv");
            let first = groupby_unique_filter(
                matched,
                group_col,
                filter_col,
                not_linked,
                false,
                &filtered,
                alloc,
                chunk_size,
                work,
            )?;
            let mut second = groupby_unique_filter(
                &filtered,
                filter_col,
                group_col,
                not_linked,
                true,
                linked_out,
                alloc,
                chunk_size,
                work,
            )?;
            second.total_filtered += first.total_filtered;
            Ok(second)
        }
    }
}

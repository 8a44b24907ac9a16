//! Removal of resolved records from the working datasets.
//!
//! After a grouped step resolves entities or links, every record that now
//! belongs to a resolved group is pulled out of the working file, so the
//! next step only searches the remaining records. Both passes are
//! streaming merge-joins over files pre-sorted on the join key.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::engine::external_sort::{sort_file, SortColumn};
use crate::engine::{ENTITY_ID_COLUMN, REC_ID_COLUMN};
use crate::error::Result;
use crate::models::{Header, NumKey};
use crate::util::files::{replace_file, WorkDir};

fn make_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path)?;
    Ok(csv::WriterBuilder::new().from_writer(BufWriter::with_capacity(512 * 1024, file)))
}

/// DEDUP extraction: split the index-sorted working file against the
/// record-id-sorted entity index. Records found in the index go to
/// `selected_out` as `index, ENTITY_ID, rest`; the remainder becomes the
/// new working file.
pub fn extract_dedup_rows(
    data_path: &Path,
    index_field: &str,
    entity_index: &Path,
    selected_out: &Path,
    work: &WorkDir,
) -> Result<()> {
    log::info!("Removing all linked records from the input data file.");
    let data_label = data_path.display().to_string();
    let mut data_reader = csv::ReaderBuilder::new().has_headers(true).from_path(data_path)?;
    let data_header = Header::from_record(&data_reader.headers()?.clone());
    let data_idx = data_header.position(index_field, &data_label)?;

    let index_label = entity_index.display().to_string();
    let mut index_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(entity_index)?;
    let index_header = Header::from_record(&index_reader.headers()?.clone());
    let rec_pos = index_header.position(REC_ID_COLUMN, &index_label)?;
    let entity_pos = index_header.position(ENTITY_ID_COLUMN, &index_label)?;

    let remained_path = work.file("remained_rows.csv");
    let mut remained = make_writer(&remained_path)?;
    remained.write_record(data_header.columns())?;

    let mut selected = make_writer(selected_out)?;
    let mut selected_columns = vec![index_field.to_string(), ENTITY_ID_COLUMN.to_string()];
    selected_columns.extend(
        data_header
            .columns()
            .iter()
            .enumerate()
            .filter(|(p, _)| *p != data_idx)
            .map(|(_, c)| c.clone()),
    );
    selected.write_record(&selected_columns)?;

    let mut write_selected = |row: &csv::StringRecord, entity_id: &str| -> Result<()> {
        let mut out = Vec::with_capacity(selected_columns.len());
        out.push(row.get(data_idx).unwrap_or(""));
        out.push(entity_id);
        for (p, cell) in row.iter().enumerate() {
            if p != data_idx {
                out.push(cell);
            }
        }
        selected.write_record(&out)?;
        Ok(())
    };

    let mut index_rows = index_reader.into_records();
    let mut index_cur: Option<(NumKey, String)> = match index_rows.next() {
        Some(record) => {
            let record = record?;
            Some((
                NumKey::parse(REC_ID_COLUMN, record.get(rec_pos).unwrap_or(""))?,
                record.get(entity_pos).unwrap_or("").to_string(),
            ))
        }
        None => None,
    };

    for record in data_reader.records() {
        let record = record?;
        let data_key = NumKey::parse(index_field, record.get(data_idx).unwrap_or(""))?;
        // Skip index entries below the current data row; both streams
        // ascend, so anything smaller can never match again.
        while let Some((index_key, _)) = &index_cur {
            if *index_key >= data_key {
                break;
            }
            index_cur = match index_rows.next() {
                Some(next) => {
                    let next = next?;
                    Some((
                        NumKey::parse(REC_ID_COLUMN, next.get(rec_pos).unwrap_or(""))?,
                        next.get(entity_pos).unwrap_or("").to_string(),
                    ))
                }
                None => None,
            };
        }
        match &index_cur {
            Some((index_key, entity_id)) if *index_key == data_key => {
                write_selected(&record, entity_id)?;
            }
            _ => remained.write_record(&record)?,
        }
    }
    remained.flush()?;
    selected.flush()?;

    replace_file(&remained_path, data_path)?;
    Ok(())
}

/// LINK extraction for one side: drop every working row whose entity
/// value appears in this step's linked file. The linked file is left
/// sorted by `(entity, index)` for that side; the working file must
/// already be sorted the same way.
pub fn extract_linked_rows(
    linked_path: &Path,
    data_path: &Path,
    prefix: &str,
    entity_field: &str,
    index_field: &str,
    chunk_size: usize,
    work: &WorkDir,
) -> Result<()> {
    log::info!("Removing all linked records from the {} input data file.", prefix);
    let linked_entity_col = format!("{}{}", prefix, entity_field);
    let linked_index_col = format!("{}{}", prefix, index_field);

    let sorted_linked = work.file("temp_link_sorted.csv");
    sort_file(
        linked_path,
        &sorted_linked,
        &[
            SortColumn::numeric(linked_entity_col.clone()),
            SortColumn::numeric(linked_index_col),
        ],
        chunk_size,
        work.path(),
    )?;

    let linked_label = sorted_linked.display().to_string();
    let mut linked_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(&sorted_linked)?;
    let linked_header = Header::from_record(&linked_reader.headers()?.clone());
    let linked_entity_pos = linked_header.position(&linked_entity_col, &linked_label)?;

    let data_label = data_path.display().to_string();
    let mut data_reader = csv::ReaderBuilder::new().has_headers(true).from_path(data_path)?;
    let data_header = Header::from_record(&data_reader.headers()?.clone());
    let data_entity_pos = data_header.position(entity_field, &data_label)?;

    let remained_path = work.file("temp_linking_data.csv");
    let mut remained = make_writer(&remained_path)?;
    remained.write_record(data_header.columns())?;

    let mut linked_rows = linked_reader.into_records();
    let mut linked_cur: Option<NumKey> = match linked_rows.next() {
        Some(record) => Some(NumKey::parse(
            &linked_entity_col,
            record?.get(linked_entity_pos).unwrap_or(""),
        )?),
        None => None,
    };

    for record in data_reader.records() {
        let record = record?;
        let data_key = NumKey::parse(entity_field, record.get(data_entity_pos).unwrap_or(""))?;
        while let Some(linked_key) = &linked_cur {
            if *linked_key >= data_key {
                break;
            }
            linked_cur = match linked_rows.next() {
                Some(next) => Some(NumKey::parse(
                    &linked_entity_col,
                    next?.get(linked_entity_pos).unwrap_or(""),
                )?),
                None => None,
            };
        }
        match &linked_cur {
            Some(linked_key) if *linked_key == data_key => {
                // Resolved entity: the record leaves the working dataset.
            }
            _ => remained.write_record(&record)?,
        }
    }
    remained.flush()?;

    replace_file(&remained_path, data_path)?;
    replace_file(&sorted_linked, linked_path)?;
    Ok(())
}

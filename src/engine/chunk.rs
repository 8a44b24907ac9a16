//! Chunked reading of delimited files and dataset staging.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::config::ColumnType;
use crate::error::{Result, SchemaError};
use crate::models::Header;

/// A bounded slice of a dataset held in memory.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub rows: Vec<Vec<String>>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reads a delimited file `chunk_size` rows at a time.
pub struct ChunkReader {
    reader: csv::Reader<File>,
    header: Header,
    chunk_size: usize,
    label: String,
}

impl ChunkReader {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let label = path.display().to_string();
        let header_record = reader.headers()?.clone();
        if header_record.is_empty() || (header_record.len() == 1 && header_record[0].is_empty()) {
            return Err(SchemaError::EmptyFile { file: label }.into());
        }
        Ok(Self {
            reader,
            header: Header::from_record(&header_record),
            chunk_size,
            label,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn next_chunk(&mut self) -> Result<Option<Frame>> {
        let mut rows = Vec::with_capacity(self.chunk_size.min(1024));
        for record in self.reader.records().take(self.chunk_size) {
            let record = record?;
            rows.push(record.iter().map(|s| s.to_string()).collect());
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame {
            header: self.header.clone(),
            rows,
        }))
    }
}

/// Copy the selected columns of a source file into a working file, moving
/// `front_cols` to the front. The source is never touched again after
/// staging. Cells of columns hinted Integer/Real must parse as numbers;
/// a violation is reported at load, not discovered mid-run.
pub fn import_dataset(
    src: &Path,
    dest: &Path,
    columns: &[String],
    front_cols: &[String],
    data_types: Option<&HashMap<String, ColumnType>>,
) -> Result<u64> {
    log::info!("Importing datafile {}...", src.display());
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(src)?;
    let src_label = src.display().to_string();
    let header = Header::from_record(&reader.headers()?.clone());

    let mut ordered: Vec<&String> = front_cols.iter().collect();
    for col in columns {
        if !front_cols.contains(col) {
            ordered.push(col);
        }
    }

    let mut projection = Vec::with_capacity(ordered.len());
    let mut numeric_checks = Vec::new();
    for (out_pos, col) in ordered.iter().enumerate() {
        let pos = header.position(col, &src_label)?;
        projection.push(pos);
        if let Some(types) = data_types {
            if types.get(col.as_str()).map_or(false, |t| t.is_numeric()) {
                numeric_checks.push((out_pos, col.to_string()));
            }
        }
    }

    let file = File::create(dest)?;
    let mut writer = csv::WriterBuilder::new().from_writer(BufWriter::with_capacity(512 * 1024, file));
    writer.write_record(ordered.iter().map(|c| c.as_str()))?;

    let mut total = 0u64;
    for record in reader.records() {
        let record = record?;
        let row: Vec<&str> = projection.iter().map(|&p| record.get(p).unwrap_or("")).collect();
        for (out_pos, col) in &numeric_checks {
            let cell = row[*out_pos].trim();
            if !cell.is_empty() && cell.parse::<f64>().is_err() {
                return Err(SchemaError::NonNumericKey {
                    column: col.clone(),
                    value: cell.to_string(),
                }
                .into());
            }
        }
        writer.write_record(&row)?;
        total += 1;
    }
    writer.flush()?;
    log::info!("Datafile {} imported successfully.", src.display());
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_reading_covers_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut body = String::from("rec_id,name\n");
        for i in 0..7 {
            body.push_str(&format!("{},n{}\n", i, i));
        }
        std::fs::write(&path, body).unwrap();

        let mut reader = ChunkReader::open(&path, 3).unwrap();
        let mut seen = 0;
        let mut chunks = 0;
        while let Some(chunk) = reader.next_chunk().unwrap() {
            assert!(chunk.len() <= 3);
            seen += chunk.len();
            chunks += 1;
        }
        assert_eq!(seen, 7);
        assert_eq!(chunks, 3);
    }

    #[test]
    fn import_moves_front_columns_and_projects() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.csv");
        let dest = dir.path().join("work.csv");
        std::fs::write(&src, "name,rec_id,dob,junk\nann, 1 ,1990,x\nbob,2,1991,y\n").unwrap();

        let total = import_dataset(
            &src,
            &dest,
            &["name".into(), "dob".into()],
            &["rec_id".into()],
            None,
        )
        .unwrap();
        assert_eq!(total, 2);
        let body = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(body, "rec_id,name,dob\n1,ann,1990\n2,bob,1991\n");
    }

    #[test]
    fn import_rejects_non_numeric_hinted_column() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.csv");
        let dest = dir.path().join("work.csv");
        std::fs::write(&src, "rec_id,dob\n1,abc\n").unwrap();
        let mut types = HashMap::new();
        types.insert("dob".to_string(), ColumnType::Integer);

        let err = import_dataset(&src, &dest, &["dob".into()], &["rec_id".into()], Some(&types))
            .unwrap_err();
        assert!(err.to_string().contains("dob"));
    }

    #[test]
    fn import_fails_on_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.csv");
        std::fs::write(&src, "rec_id,name\n1,ann\n").unwrap();
        let err = import_dataset(
            &src,
            &dir.path().join("work.csv"),
            &["nope".into()],
            &["rec_id".into()],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}

//! Disk-based stable sort of a delimited file by an arbitrary column list.
//!
//! The input is split into bounded runs, each run is sorted in memory and
//! spilled to disk, and the runs are combined with a k-way merge. Equal
//! keys preserve their original relative order. The sorted output is
//! staged under a temporary name and renamed into place, so `output` may
//! safely be the input file itself.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::error::{Result, SchemaError};
use crate::models::{Header, NumKey};
use crate::util::files::{replace_file, WorkDir};

#[derive(Debug, Clone)]
pub struct SortColumn {
    pub name: String,
    pub numeric: bool,
}

impl SortColumn {
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            numeric: true,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            numeric: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyPart {
    Num(NumKey),
    Text(String),
}

type SortKey = Vec<KeyPart>;

fn row_key(row: &csv::StringRecord, columns: &[(usize, &SortColumn)]) -> Result<SortKey> {
    let mut key = Vec::with_capacity(columns.len());
    for (pos, column) in columns {
        let cell = row.get(*pos).unwrap_or("");
        if column.numeric {
            key.push(KeyPart::Num(NumKey::parse(&column.name, cell)?));
        } else {
            key.push(KeyPart::Text(cell.to_string()));
        }
    }
    Ok(key)
}

struct RunCursor {
    reader: csv::Reader<File>,
}

impl RunCursor {
    fn next(&mut self, columns: &[(usize, &SortColumn)]) -> Result<Option<(SortKey, csv::StringRecord)>> {
        let mut record = csv::StringRecord::new();
        if self.reader.read_record(&mut record)? {
            let key = row_key(&record, columns)?;
            Ok(Some((key, record)))
        } else {
            Ok(None)
        }
    }
}

struct HeapEntry {
    key: SortKey,
    run: usize,
    record: csv::StringRecord,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.run == other.run
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the smallest key first; ties go
        // to the earlier run, which keeps the sort stable.
        (&other.key, other.run).cmp(&(&self.key, self.run))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn make_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path)?;
    Ok(csv::WriterBuilder::new().from_writer(BufWriter::with_capacity(512 * 1024, file)))
}

/// Sort `input` by `columns` into `output` using at most `chunk_size` rows
/// of memory at a time. Scratch runs live under `work_base` for the
/// duration of the call.
pub fn sort_file(
    input: &Path,
    output: &Path,
    columns: &[SortColumn],
    chunk_size: usize,
    work_base: &Path,
) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(input)?;
    let input_label = input.display().to_string();
    let header_record = reader.headers()?.clone();
    if header_record.is_empty() {
        return Err(SchemaError::EmptyFile { file: input_label }.into());
    }
    let header = Header::from_record(&header_record);

    let mut resolved: Vec<(usize, &SortColumn)> = Vec::with_capacity(columns.len());
    for column in columns {
        resolved.push((header.position(&column.name, &input_label)?, column));
    }

    let work = WorkDir::create(work_base, "sort")?;

    // Split into sorted runs.
    let mut run_paths: Vec<PathBuf> = Vec::new();
    loop {
        let mut buffer: Vec<(SortKey, csv::StringRecord)> = Vec::with_capacity(chunk_size.min(4096));
        for record in reader.records().take(chunk_size) {
            let record = record?;
            let key = row_key(&record, &resolved)?;
            buffer.push((key, record));
        }
        if buffer.is_empty() {
            break;
        }
        buffer.par_sort_by(|a, b| a.0.cmp(&b.0));

        let run_path = work.file(&format!("run_{}.csv", run_paths.len()));
        let mut writer = make_writer(&run_path)?;
        writer.write_record(&header_record)?;
        for (_, record) in &buffer {
            writer.write_record(record)?;
        }
        writer.flush()?;
        run_paths.push(run_path);
    }

    // Merge runs into the staged output.
    let staged = work.file("sorted.csv");
    let mut writer = make_writer(&staged)?;
    writer.write_record(&header_record)?;

    let mut cursors = Vec::with_capacity(run_paths.len());
    for path in &run_paths {
        let run_reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        cursors.push(RunCursor { reader: run_reader });
    }

    let mut heap = BinaryHeap::new();
    for (run, cursor) in cursors.iter_mut().enumerate() {
        if let Some((key, record)) = cursor.next(&resolved)? {
            heap.push(HeapEntry { key, run, record });
        }
    }
    while let Some(entry) = heap.pop() {
        writer.write_record(&entry.record)?;
        if let Some((key, record)) = cursors[entry.run].next(&resolved)? {
            heap.push(HeapEntry {
                key,
                run: entry.run,
                record,
            });
        }
    }
    writer.flush()?;

    replace_file(&staged, output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_csv(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn sorts_numeric_column_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");
        write_csv(&input, "id,name\n10,j\n2,b\n30,c\n1,a\n25,y\n3,d\n");

        sort_file(&input, &output, &[SortColumn::numeric("id")], 2, dir.path()).unwrap();
        let lines = read_lines(&output);
        assert_eq!(
            lines,
            vec!["id,name", "1,a", "2,b", "3,d", "10,j", "25,y", "30,c"]
        );
    }

    #[test]
    fn stable_for_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        write_csv(&input, "k,tag\n2,first\n1,x\n2,second\n1,y\n2,third\n");

        sort_file(&input, &input, &[SortColumn::numeric("k")], 2, dir.path()).unwrap();
        let lines = read_lines(&input);
        assert_eq!(
            lines,
            vec!["k,tag", "1,x", "1,y", "2,first", "2,second", "2,third"]
        );
    }

    #[test]
    fn sorts_by_two_columns_mixed_types() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");
        write_csv(&input, "grp,id\nb,2\na,10\nb,1\na,2\n");

        sort_file(
            &input,
            &output,
            &[SortColumn::text("grp"), SortColumn::numeric("id")],
            10,
            dir.path(),
        )
        .unwrap();
        let lines = read_lines(&output);
        assert_eq!(lines, vec!["grp,id", "a,2", "a,10", "b,1", "b,2"]);
    }

    #[test]
    fn missing_sort_column_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        write_csv(&input, "id,name\n1,a\n");
        let err = sort_file(
            &input,
            &dir.path().join("out.csv"),
            &[SortColumn::numeric("missing")],
            10,
            dir.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn non_numeric_key_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        write_csv(&input, "id,name\nten,a\n");
        let err = sort_file(
            &input,
            &dir.path().join("out.csv"),
            &[SortColumn::numeric("id")],
            10,
            dir.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn empty_data_keeps_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");
        write_csv(&input, "id,name\n");
        sort_file(&input, &output, &[SortColumn::numeric("id")], 10, dir.path()).unwrap();
        assert_eq!(read_lines(&output), vec!["id,name"]);
    }
}

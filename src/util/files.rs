//! Scoped working directories and file-lifecycle helpers.
//!
//! Temporary files are step- or run-scoped and must disappear on every
//! exit path; a `WorkDir` deletes its whole tree on drop. Outputs that
//! replace a prior valid file are staged under a temporary name and
//! renamed into place only on full success.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

/// A private scratch directory removed on drop, including error paths.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn create(base: &Path, label: &str) -> io::Result<Self> {
        let path = base.join(format!(
            "{}_{}_{}",
            label,
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Move `src` over `dest`, falling back to copy+delete when rename fails
/// (e.g. across filesystems).
pub fn replace_file(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dest)?;
            fs::remove_file(src)
        }
    }
}

/// Create `path` as an empty file, truncating any existing content.
pub fn truncate_file(path: &Path) -> io::Result<()> {
    File::create(path)?;
    Ok(())
}

/// Append the data rows of `source` to `append_path`. On the first batch
/// the source simply becomes the target, header included; afterwards the
/// source's header row is skipped.
pub fn append_rows(append_path: &Path, source: &Path, first_batch: bool) -> crate::error::Result<()> {
    if first_batch {
        replace_file(source, append_path)?;
        return Ok(());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(source)?;
    let file = OpenOptions::new().append(true).open(append_path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for record in reader.records() {
        writer.write_record(&record?)?;
    }
    writer.flush()?;
    fs::remove_file(source)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workdir_is_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let kept;
        {
            let work = WorkDir::create(base.path(), "step").unwrap();
            kept = work.path().to_path_buf();
            fs::write(work.file("scratch.csv"), "a,b\n").unwrap();
            assert!(kept.exists());
        }
        assert!(!kept.exists());
    }

    #[test]
    fn append_rows_skips_header_after_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("all.csv");
        let part1 = dir.path().join("p1.csv");
        let part2 = dir.path().join("p2.csv");
        fs::write(&part1, "id,name\n1,a\n").unwrap();
        fs::write(&part2, "id,name\n2,b\n").unwrap();

        append_rows(&target, &part1, true).unwrap();
        append_rows(&target, &part2, false).unwrap();

        let body = fs::read_to_string(&target).unwrap();
        assert_eq!(body, "id,name\n1,a\n2,b\n");
        assert!(!part2.exists());
    }
}

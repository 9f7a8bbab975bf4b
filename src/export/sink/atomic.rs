//! All-or-nothing CSV file writer
//!
//! Rows go to a temporary file in the destination directory, which is
//! renamed onto the final path by [`AtomicCsvWriter::finish`]. Dropping the
//! writer before `finish` deletes the temporary file, so a reader never sees
//! a partial artifact.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use crate::error::SinkError;

/// Buffer size for artifact files
const BUFFER_SIZE: usize = 1024 * 1024;

pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    /// Create a writer whose output lands on `final_path`
    ///
    /// The parent directory must exist.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let final_path = final_path.as_ref().to_path_buf();
        let parent = match final_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let temp = tempfile::Builder::new()
            .prefix(".bqpull-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|e| SinkError::CreateFailed {
                path: final_path.clone(),
                message: e.to_string(),
            })?;

        let writer = Writer::from_writer(BufWriter::with_capacity(BUFFER_SIZE, temp));
        Ok(Self { writer, final_path })
    }

    pub fn write_record<I, T>(&mut self, record: I) -> Result<(), SinkError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(record)
            .map_err(|e| write_failed(&self.final_path, e))
    }

    pub fn write_byte_record(&mut self, record: &csv::ByteRecord) -> Result<(), SinkError> {
        self.writer
            .write_byte_record(record)
            .map_err(|e| write_failed(&self.final_path, e))
    }

    /// Flush and atomically move the file onto its final path
    pub fn finish(self) -> Result<PathBuf, SinkError> {
        let Self { writer, final_path } = self;

        let buffered = writer.into_inner().map_err(|e| SinkError::WriteFailed {
            path: final_path.clone(),
            message: e.error().to_string(),
        })?;
        let temp = buffered.into_inner().map_err(|e| SinkError::WriteFailed {
            path: final_path.clone(),
            message: e.error().to_string(),
        })?;
        temp.as_file()
            .sync_all()
            .map_err(|e| write_failed(&final_path, e))?;

        temp.persist(&final_path)
            .map_err(|e| SinkError::PersistFailed {
                path: final_path.clone(),
                message: e.error.to_string(),
            })?;

        Ok(final_path)
    }
}

fn write_failed(path: &Path, err: impl std::fmt::Display) -> SinkError {
    SinkError::WriteFailed {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_finish_persists_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch_0000_2_rows.csv");

        let mut writer = AtomicCsvWriter::new(&path).unwrap();
        writer.write_record(["cep", "latitude"]).unwrap();
        writer.write_record(["01001000", "-23.55"]).unwrap();
        writer.write_record(["01002000", ""]).unwrap();
        assert_eq!(writer.finish().unwrap(), path);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "cep,latitude\n01001000,-23.55\n01002000,\n");
    }

    #[test]
    fn test_drop_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.csv");

        {
            let mut writer = AtomicCsvWriter::new(&path).unwrap();
            writer.write_record(["cep"]).unwrap();
        }

        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_finish_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("all_data_combined.csv");
        fs::write(&path, "stale\n").unwrap();

        let mut writer = AtomicCsvWriter::new(&path).unwrap();
        writer.write_record(["cep"]).unwrap();
        writer.finish().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "cep\n");
    }

    #[test]
    fn test_missing_directory_fails_on_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope").join("x.csv");
        assert!(matches!(
            AtomicCsvWriter::new(&path),
            Err(SinkError::CreateFailed { .. })
        ));
    }
}

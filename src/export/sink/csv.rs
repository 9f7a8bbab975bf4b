//! CSV file sink
//!
//! Layout inside the output directory:
//!
//! - `batch_{index:04}_{rows}_rows.csv` per window (zero-based index)
//! - combined file, `all_data_combined.csv` by default
//! - sample file, `sample.csv` by default
//!
//! Every file is UTF-8, comma separated, with a single header row. All file
//! I/O runs on the blocking pool.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ::csv::{ByteRecord, ReaderBuilder};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::error::{ExtractError, Result, SinkError};
use crate::source::Schema;

use super::atomic::AtomicCsvWriter;
use super::{ChunkArtifact, ChunkResult, Sink};

/// Sink writing one CSV file per chunk
pub struct CsvSink {
    directory: PathBuf,
    combined_file_name: String,
    sample_file_name: String,
    /// Column list pinned by the first chunk written
    schema: Mutex<Option<Schema>>,
    written: Mutex<BTreeMap<usize, ChunkArtifact>>,
}

impl CsvSink {
    /// Create a sink writing into `directory` (created on first write)
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            combined_file_name: "all_data_combined.csv".to_string(),
            sample_file_name: "sample.csv".to_string(),
            schema: Mutex::new(None),
            written: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(&config.output_directory)
            .with_file_names(&config.combined_file_name, &config.sample_file_name)
    }

    pub fn with_file_names(mut self, combined: &str, sample: &str) -> Self {
        self.combined_file_name = combined.to_string();
        self.sample_file_name = sample.to_string();
        self
    }

    pub fn combined_path(&self) -> PathBuf {
        self.directory.join(&self.combined_file_name)
    }

    pub fn sample_path(&self) -> PathBuf {
        self.directory.join(&self.sample_file_name)
    }

    /// Pin the run schema on first use, reject any other column list after
    async fn pin_schema(&self, index: usize, schema: &Schema) -> Result<()> {
        let mut pinned = self.schema.lock().await;
        match pinned.as_ref() {
            None => {
                debug!("Pinned schema: [{}]", schema.columns().join(", "));
                *pinned = Some(schema.clone());
                Ok(())
            }
            Some(expected) if expected == schema => Ok(()),
            Some(expected) => Err(SinkError::SchemaMismatch {
                index,
                expected: expected.columns().to_vec(),
                found: schema.columns().to_vec(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl Sink for CsvSink {
    async fn write_chunk(&self, chunk: ChunkResult) -> Result<ChunkArtifact> {
        let index = chunk.window.index;
        let fetch_duration = chunk.fetch_duration;
        self.pin_schema(index, &chunk.schema).await?;

        let directory = self.directory.clone();
        let artifact = run_blocking(move || write_chunk_file(&directory, chunk)).await?;

        debug!(
            "Chunk {} written to {} ({} rows, fetched in {:?})",
            index,
            artifact.path.display(),
            artifact.rows,
            fetch_duration
        );
        self.written.lock().await.insert(index, artifact.clone());
        Ok(artifact)
    }

    async fn merge_all(
        &self,
        artifacts: &[ChunkArtifact],
        expected_chunks: usize,
    ) -> Result<PathBuf> {
        let by_index: BTreeMap<usize, ChunkArtifact> = artifacts
            .iter()
            .filter(|a| a.index < expected_chunks)
            .map(|a| (a.index, a.clone()))
            .collect();
        let target = self.combined_path();

        info!(
            "Merging {} chunk files into {}",
            by_index.len(),
            target.display()
        );
        run_blocking(move || merge_chunk_files(&target, by_index, expected_chunks)).await
    }

    async fn write_sample(&self, n: usize) -> Result<Option<PathBuf>> {
        let first = self.written.lock().await.get(&0).cloned();
        let Some(first) = first else {
            debug!("Window 0 was never written, skipping sample");
            return Ok(None);
        };

        let target = self.sample_path();
        let path = run_blocking(move || write_sample_file(&first.path, &target, n)).await?;
        info!("Sample written to {}", path.display());
        Ok(Some(path))
    }
}

/// Name of the artifact for window `index` holding `rows` rows
pub fn chunk_file_name(index: usize, rows: u64) -> String {
    format!("batch_{index:04}_{rows}_rows.csv")
}

/// Inverse of [`chunk_file_name`]
pub fn parse_chunk_file_name(name: &str) -> Option<(usize, u64)> {
    let rest = name.strip_prefix("batch_")?.strip_suffix("_rows.csv")?;
    let (index, rows) = rest.split_once('_')?;
    Some((index.parse().ok()?, rows.parse().ok()?))
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SinkError::TaskFailed(e.to_string()))?
}

fn write_chunk_file(directory: &Path, chunk: ChunkResult) -> Result<ChunkArtifact> {
    fs::create_dir_all(directory).map_err(|e| SinkError::CreateFailed {
        path: directory.to_path_buf(),
        message: e.to_string(),
    })?;

    let index = chunk.window.index;
    let rows = chunk.rows.len() as u64;
    let mut writer = AtomicCsvWriter::new(directory.join(chunk_file_name(index, rows)))?;

    writer.write_record(chunk.schema.columns())?;
    let mut record = ByteRecord::with_capacity(256, chunk.schema.len());
    for row in &chunk.rows {
        record.clear();
        for value in row.values() {
            record.push_field(value.as_field().as_bytes());
        }
        writer.write_byte_record(&record)?;
    }
    drop(chunk);

    let path = writer.finish()?;
    remove_stale_chunks(directory, index, &path);

    Ok(ChunkArtifact { index, rows, path })
}

/// Delete artifacts of `index` left by an earlier write with another row count
fn remove_stale_chunks(directory: &Path, index: usize, keep: &Path) {
    let Ok(entries) = fs::read_dir(directory) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_stale = entry
            .file_name()
            .to_str()
            .and_then(parse_chunk_file_name)
            .is_some_and(|(i, _)| i == index)
            && path != keep;
        if is_stale {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed stale chunk file {}", path.display()),
                Err(e) => warn!("Failed to remove stale chunk file {}: {}", path.display(), e),
            }
        }
    }
}

fn merge_chunk_files(
    target: &Path,
    artifacts: BTreeMap<usize, ChunkArtifact>,
    expected_chunks: usize,
) -> Result<PathBuf> {
    let missing: Vec<usize> = (0..expected_chunks)
        .filter(|i| artifacts.get(i).is_none_or(|a| !a.path.is_file()))
        .collect();
    if !missing.is_empty() {
        return Err(ExtractError::IncompleteChunks { missing });
    }

    let mut writer = AtomicCsvWriter::new(target)?;
    let mut header: Option<ByteRecord> = None;
    let mut record = ByteRecord::new();

    for artifact in artifacts.values() {
        let read_failed = |e: ::csv::Error| SinkError::ReadFailed {
            path: artifact.path.clone(),
            message: e.to_string(),
        };
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&artifact.path)
            .map_err(read_failed)?;

        let chunk_header = reader.byte_headers().map_err(read_failed)?.clone();
        match &header {
            None => {
                writer.write_byte_record(&chunk_header)?;
                header = Some(chunk_header);
            }
            Some(first) if *first != chunk_header => {
                return Err(SinkError::HeaderMismatch {
                    path: artifact.path.clone(),
                }
                .into());
            }
            Some(_) => {}
        }

        while reader.read_byte_record(&mut record).map_err(read_failed)? {
            writer.write_byte_record(&record)?;
        }
    }

    Ok(writer.finish()?)
}

fn write_sample_file(source: &Path, target: &Path, n: usize) -> Result<PathBuf> {
    let read_failed = |e: ::csv::Error| SinkError::ReadFailed {
        path: source.to_path_buf(),
        message: e.to_string(),
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(source)
        .map_err(read_failed)?;

    let mut writer = AtomicCsvWriter::new(target)?;
    writer.write_byte_record(reader.byte_headers().map_err(read_failed)?)?;

    let mut record = ByteRecord::new();
    let mut taken = 0;
    while taken < n && reader.read_byte_record(&mut record).map_err(read_failed)? {
        writer.write_byte_record(&record)?;
        taken += 1;
    }

    Ok(writer.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::planner::ChunkWindow;
    use crate::source::{Record, Value};
    use std::time::Duration;
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new(vec!["cep".into(), "latitude".into(), "longitude".into()])
    }

    fn chunk(index: usize, ceps: &[&str]) -> ChunkResult {
        let rows = ceps
            .iter()
            .map(|cep| {
                Record::new(vec![
                    Value::Text(cep.to_string()),
                    Value::Float(-23.55),
                    Value::Null,
                ])
            })
            .collect();
        ChunkResult {
            window: ChunkWindow {
                index,
                offset: index as u64 * 10,
                limit: 10,
            },
            schema: schema(),
            rows,
            fetch_duration: Duration::from_millis(5),
        }
    }

    fn data_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_chunk_file_name_round_trip() {
        assert_eq!(chunk_file_name(3, 50_000), "batch_0003_50000_rows.csv");
        assert_eq!(parse_chunk_file_name("batch_0003_50000_rows.csv"), Some((3, 50_000)));
        assert_eq!(parse_chunk_file_name("all_data_combined.csv"), None);
        assert_eq!(parse_chunk_file_name("batch_x_1_rows.csv"), None);
    }

    #[tokio::test]
    async fn test_write_chunk_layout() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path().join("batch_data"));

        let artifact = sink.write_chunk(chunk(0, &["01001000", "01002000"])).await.unwrap();

        assert_eq!(artifact.index, 0);
        assert_eq!(artifact.rows, 2);
        assert_eq!(
            artifact.path,
            dir.path().join("batch_data").join("batch_0000_2_rows.csv")
        );
        assert_eq!(
            fs::read_to_string(&artifact.path).unwrap(),
            "cep,latitude,longitude\n01001000,-23.55,\n01002000,-23.55,\n"
        );
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path());

        let first = sink.write_chunk(chunk(1, &["a", "b", "c"])).await.unwrap();
        let bytes = fs::read(&first.path).unwrap();
        let second = sink.write_chunk(chunk(1, &["a", "b", "c"])).await.unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(fs::read(&second.path).unwrap(), bytes);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_with_other_row_count_replaces_artifact() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path());

        let old = sink.write_chunk(chunk(2, &["a", "b", "c"])).await.unwrap();
        let new = sink.write_chunk(chunk(2, &["a", "b"])).await.unwrap();

        assert!(!old.path.exists());
        assert!(new.path.ends_with("batch_0002_2_rows.csv"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_schema_drift_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path());
        sink.write_chunk(chunk(0, &["a"])).await.unwrap();

        let mut drifted = chunk(1, &["b"]);
        drifted.schema = Schema::new(vec!["cep".into(), "lat".into(), "lon".into()]);
        let err = sink.write_chunk(drifted).await.unwrap_err();

        assert!(matches!(
            err,
            ExtractError::Sink(SinkError::SchemaMismatch { index: 1, .. })
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_merge_in_window_order() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path());

        let mut artifacts = Vec::new();
        artifacts.push(sink.write_chunk(chunk(2, &["e"])).await.unwrap());
        artifacts.push(sink.write_chunk(chunk(0, &["a", "b"])).await.unwrap());
        artifacts.push(sink.write_chunk(chunk(1, &["c", "d"])).await.unwrap());

        let merged = sink.merge_all(&artifacts, 3).await.unwrap();
        assert_eq!(merged, dir.path().join("all_data_combined.csv"));

        let content = fs::read_to_string(&merged).unwrap();
        assert_eq!(content.matches("cep,latitude,longitude").count(), 1);
        let ceps: Vec<String> = data_lines(&merged)
            .iter()
            .map(|l| l.split(',').next().unwrap().to_string())
            .collect();
        assert_eq!(ceps, ["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_merge_reports_missing_windows() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path());

        let a0 = sink.write_chunk(chunk(0, &["a"])).await.unwrap();
        let a2 = sink.write_chunk(chunk(2, &["c"])).await.unwrap();
        fs::remove_file(&a2.path).unwrap();

        match sink.merge_all(&[a0, a2], 3).await {
            Err(ExtractError::IncompleteChunks { missing }) => assert_eq!(missing, vec![1, 2]),
            other => panic!("expected incomplete chunks, got {other:?}"),
        }
        assert!(!sink.combined_path().exists());
    }

    #[tokio::test]
    async fn test_merge_rejects_header_mismatch() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path());

        let p0 = dir.path().join(chunk_file_name(0, 1));
        let p1 = dir.path().join(chunk_file_name(1, 1));
        fs::write(&p0, "cep,latitude\na,1\n").unwrap();
        fs::write(&p1, "cep,lat\nb,2\n").unwrap();
        let artifacts = [
            ChunkArtifact { index: 0, rows: 1, path: p0 },
            ChunkArtifact { index: 1, rows: 1, path: p1.clone() },
        ];

        match sink.merge_all(&artifacts, 2).await {
            Err(ExtractError::Sink(SinkError::HeaderMismatch { path })) => assert_eq!(path, p1),
            other => panic!("expected header mismatch, got {other:?}"),
        }
        assert!(!sink.combined_path().exists());
    }

    #[tokio::test]
    async fn test_sample_is_bounded_by_window_zero() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path()).with_file_names("all.csv", "preview.csv");

        sink.write_chunk(chunk(0, &["a", "b", "c"])).await.unwrap();
        sink.write_chunk(chunk(1, &["d", "e", "f"])).await.unwrap();

        let path = sink.write_sample(5).await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("preview.csv"));
        assert_eq!(data_lines(&path).len(), 3);

        let path = sink.write_sample(2).await.unwrap().unwrap();
        let lines = data_lines(&path);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("a,"));
    }

    #[tokio::test]
    async fn test_sample_without_window_zero() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path());
        sink.write_chunk(chunk(1, &["d"])).await.unwrap();

        assert_eq!(sink.write_sample(10).await.unwrap(), None);
        assert!(!sink.sample_path().exists());
    }
}

//! Batch extraction pipeline
//!
//! # Architecture
//!
//! 1. **Planner**: splits the probed row count into offset/limit windows
//! 2. **BatchExecutor**: fetches windows from a [`RowSource`](crate::source::RowSource)
//!    and hands each one to the sink, sequentially or with bounded concurrency
//! 3. **Sink**: writes one artifact per window, then merges and samples them
//! 4. **ProgressReporter**: observes the run through [`ProgressEvent`]s
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bqpull::export::{BatchExecutor, CsvSink, ExportOptions};
//! use bqpull::source::{BigQuerySource, QuerySpec};
//!
//! # async fn demo(config: &bqpull::config::Config) -> bqpull::error::Result<()> {
//! let source = Arc::new(BigQuerySource::from_config(&config.source)?);
//! let sink = Arc::new(CsvSink::from_config(&config.export));
//! let executor = BatchExecutor::new(source, sink, ExportOptions::from(&config.export));
//!
//! let query = QuerySpec::new("SELECT cep FROM `dataset.table`", "table");
//! let summary = executor.execute(&query).await;
//! println!("{} rows written", summary.total_rows_written);
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod planner;
pub mod progress;
pub mod sink;
pub mod summary;

pub use coordinator::{BatchExecutor, ExportOptions};
pub use planner::{ChunkWindow, plan};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, ProgressTracker};
pub use sink::{ChunkArtifact, ChunkResult, CsvSink, Sink};
pub use summary::{RunOutcome, RunSummary};

//! Chunk sinks
//!
//! A sink durably stores one artifact per chunk window, keyed by window
//! index so chunks may arrive out of order. After all windows are written it
//! can merge them into a combined artifact and cut a preview sample from
//! window 0.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::source::{Record, Schema};

use super::planner::ChunkWindow;

pub mod atomic;
pub mod csv;

pub use atomic::AtomicCsvWriter;
pub use csv::CsvSink;

/// Rows fetched for one window, owned by the executor until written
#[derive(Debug)]
pub struct ChunkResult {
    pub window: ChunkWindow,
    pub schema: Schema,
    pub rows: Vec<Record>,
    pub fetch_duration: Duration,
}

/// A chunk artifact on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkArtifact {
    pub index: usize,
    pub rows: u64,
    pub path: PathBuf,
}

/// Destination for chunk data
#[async_trait]
pub trait Sink: Send + Sync {
    /// Durably write one chunk
    ///
    /// Writing the same window index again replaces the previous artifact.
    ///
    /// # Arguments
    /// * `chunk` - Rows of one window; consumed so memory is released on return
    ///
    /// # Returns
    /// * `Result<ChunkArtifact>` - The written artifact
    async fn write_chunk(&self, chunk: ChunkResult) -> Result<ChunkArtifact>;

    /// Concatenate chunk artifacts in window-index order
    ///
    /// # Arguments
    /// * `artifacts` - Artifacts written during the run, in any order
    /// * `expected_chunks` - Number of planned windows
    ///
    /// # Returns
    /// * `Result<PathBuf>` - Path of the combined artifact, or
    ///   `IncompleteChunks` listing windows without an artifact
    async fn merge_all(&self, artifacts: &[ChunkArtifact], expected_chunks: usize)
    -> Result<PathBuf>;

    /// Write a preview of the first `n` rows of window 0
    ///
    /// # Returns
    /// * `Result<Option<PathBuf>>` - Sample path, `None` if window 0 was never written
    async fn write_sample(&self, n: usize) -> Result<Option<PathBuf>>;
}

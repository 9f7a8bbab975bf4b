//! Batch executor driving an extraction run
//!
//! A run moves through `Planning -> Executing(i) -> Finalizing -> Done`, or
//! ends early in `Failed` or `Cancelled`. Windows are fetched with at most
//! `concurrency` in flight and handed to the sink as they complete. The
//! first failing window stops new windows from starting; windows already in
//! flight are drained and their artifacts kept.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ExportConfig;
use crate::error::{ExtractError, Phase, RunFailure};
use crate::source::{QuerySpec, RowSource};

use super::planner::{ChunkWindow, plan};
use super::progress::{NoopReporter, ProgressEvent, ProgressReporter};
use super::sink::{ChunkArtifact, ChunkResult, Sink};
use super::summary::{RunOutcome, RunSummary};

/// Options controlling one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub chunk_size: u64,
    pub combine_output: bool,
    /// Rows in the preview sample (0 disables it)
    pub sample_size: usize,
    /// Maximum windows in flight
    pub concurrency: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ExportOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            combine_output: config.combine_output,
            sample_size: config.sample_size,
            concurrency: config.concurrency,
        }
    }
}

/// Executor state, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Planning,
    Executing(usize),
    Finalizing,
    Done,
    Failed(Option<usize>, Phase),
    Cancelled(Option<usize>),
}

/// A window that made it to disk
struct WindowDone {
    artifact: ChunkArtifact,
    elapsed: Duration,
}

/// Coordinator for extraction runs
///
/// Orchestrates the row source, the sink and progress reporting. Holds no
/// state between runs.
pub struct BatchExecutor {
    source: Arc<dyn RowSource>,
    sink: Arc<dyn Sink>,
    reporter: Arc<dyn ProgressReporter>,
    options: ExportOptions,
    cancel_token: CancellationToken,
}

impl BatchExecutor {
    /// Create a new executor
    pub fn new(source: Arc<dyn RowSource>, sink: Arc<dyn Sink>, options: ExportOptions) -> Self {
        Self {
            source,
            sink,
            reporter: Arc::new(NoopReporter),
            options,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Set cancellation token for this run
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Execute one run
    ///
    /// Never returns an error: failures and cancellation are reported in
    /// [`RunSummary::outcome`], together with every artifact written so far.
    ///
    /// # Arguments
    /// * `query` - What to extract
    ///
    /// # Returns
    /// * `RunSummary` - Final state of the run
    pub async fn execute(&self, query: &QuerySpec) -> RunSummary {
        let start_time = Instant::now();
        let mut summary = RunSummary::start(query.target());
        info!("Starting run {} for '{}'", summary.run_id, query.target());

        // Planning
        self.transition(RunState::Planning);
        let (total_rows, windows) = match self.plan(query).await {
            Ok(planned) => planned,
            Err(failure) => return self.end_early(summary, failure, None, start_time),
        };
        summary.total_rows_requested = total_rows;
        summary.chunk_count = windows.len();

        info!(
            "{} rows to extract in {} chunks of up to {} rows",
            total_rows,
            windows.len(),
            self.options.chunk_size
        );
        self.reporter.report(&ProgressEvent::RunStarted {
            run_id: summary.run_id,
            target: summary.target.clone(),
            total_rows,
            chunk_count: windows.len(),
        });

        // Executing
        let (artifacts, stopped) = self.execute_windows(query, &windows).await;
        summary.total_rows_written = artifacts.values().map(|a| a.rows).sum();
        summary.chunks_written = artifacts.len();
        summary.artifact_paths = artifacts.values().map(|a| a.path.clone()).collect();

        if let Some((failure, cancelled_at)) = stopped {
            return self.end_early(summary, failure, cancelled_at, start_time);
        }

        // Finalizing
        self.transition(RunState::Finalizing);
        if !windows.is_empty() {
            let written: Vec<ChunkArtifact> = artifacts.into_values().collect();
            if let Err(failure) = self.finalize(&mut summary, &written, windows.len()).await {
                return self.end_early(summary, failure, None, start_time);
            }
        } else {
            debug!("No rows to extract, nothing to finalize");
        }

        summary.elapsed = start_time.elapsed();
        summary.outcome = RunOutcome::Completed;
        self.transition(RunState::Done);
        info!(
            "Run completed: {} rows in {} chunks, {} ms",
            summary.total_rows_written,
            summary.chunks_written,
            summary.elapsed.as_millis()
        );
        self.reporter.report(&ProgressEvent::RunFinished {
            summary: Box::new(summary.clone()),
        });
        summary
    }

    /// Probe the row count and plan the windows
    async fn plan(&self, query: &QuerySpec) -> Result<(u64, Vec<ChunkWindow>), RunFailure> {
        let total_rows = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(ExtractError::Cancelled),
            count = self.source.count(query) => count,
        }
        .map_err(|e| RunFailure::new(Phase::Plan, None, e))?;

        let windows = plan(total_rows, self.options.chunk_size)
            .map_err(|e| RunFailure::new(Phase::Plan, None, e))?;
        Ok((total_rows, windows))
    }

    /// Run every window, returning the artifacts written and, if the run
    /// stopped early, the failure plus the cancellation point.
    async fn execute_windows(
        &self,
        query: &QuerySpec,
        windows: &[ChunkWindow],
    ) -> (
        BTreeMap<usize, ChunkArtifact>,
        Option<(RunFailure, Option<usize>)>,
    ) {
        let concurrency = self.options.concurrency.max(1);
        let total = windows.len();
        let mut pending = windows.iter().copied();
        let mut in_flight = FuturesUnordered::new();
        let mut artifacts = BTreeMap::new();
        let mut first_failure: Option<RunFailure> = None;
        let mut cancelled_at: Option<usize> = None;

        loop {
            while first_failure.is_none() && cancelled_at.is_none() && in_flight.len() < concurrency
            {
                let Some(window) = pending.next() else {
                    break;
                };
                if self.cancel_token.is_cancelled() {
                    cancelled_at = Some(window.index);
                    break;
                }
                self.transition(RunState::Executing(window.index));
                self.reporter.report(&ProgressEvent::ChunkStarted {
                    index: window.index,
                    offset: window.offset,
                    limit: window.limit,
                });
                in_flight.push(self.run_window(query, window));
            }

            let Some(result) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(done) => {
                    let WindowDone { artifact, elapsed } = done;
                    info!(
                        "Chunk {}/{} written: {} rows in {} ms",
                        artifact.index + 1,
                        total,
                        artifact.rows,
                        elapsed.as_millis()
                    );
                    self.reporter.report(&ProgressEvent::ChunkFinished {
                        index: artifact.index,
                        rows: artifact.rows,
                        duration: elapsed,
                    });
                    artifacts.insert(artifact.index, artifact);
                }
                Err(failure) if matches!(failure.cause, ExtractError::Cancelled) => {
                    debug!("Window {:?} aborted by cancellation", failure.window);
                    cancelled_at = min_index(cancelled_at, failure.window);
                }
                Err(failure) => {
                    error!("{}", failure);
                    let lower = match &first_failure {
                        None => true,
                        Some(existing) => failure.window < existing.window,
                    };
                    if lower {
                        first_failure = Some(failure);
                    }
                }
            }
        }

        let stopped = match (first_failure, cancelled_at) {
            (Some(failure), _) => Some((failure, None)),
            (None, Some(index)) => Some((
                RunFailure::new(Phase::Fetch, Some(index), ExtractError::Cancelled),
                Some(index),
            )),
            (None, None) => None,
        };
        (artifacts, stopped)
    }

    /// Fetch one window and move its rows into the sink
    async fn run_window(
        &self,
        query: &QuerySpec,
        window: ChunkWindow,
    ) -> Result<WindowDone, RunFailure> {
        let started = Instant::now();
        let index = Some(window.index);
        debug!(
            "Fetching window {} (offset {}, limit {})",
            window.index, window.offset, window.limit
        );

        let page = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(ExtractError::Cancelled),
            page = self.source.fetch(query, window.offset, window.limit) => page,
        }
        .map_err(|e| RunFailure::new(Phase::Fetch, index, e))?;
        let fetch_duration = started.elapsed();

        let mut rows = page.rows;
        if rows.len() as u64 > window.limit {
            warn!(
                "Window {} returned {} rows, more than its limit of {}; truncating",
                window.index,
                rows.len(),
                window.limit
            );
            rows.truncate(window.limit as usize);
        } else if page.end_of_data && (rows.len() as u64) < window.limit {
            warn!(
                "Window {} returned {} of {} rows; the source ran out of data",
                window.index,
                rows.len(),
                window.limit
            );
        }

        let chunk = ChunkResult {
            window,
            schema: page.schema,
            rows,
            fetch_duration,
        };
        let artifact = self
            .sink
            .write_chunk(chunk)
            .await
            .map_err(|e| RunFailure::new(Phase::Write, index, e))?;

        Ok(WindowDone {
            artifact,
            elapsed: started.elapsed(),
        })
    }

    /// Merge chunk files and cut the sample
    async fn finalize(
        &self,
        summary: &mut RunSummary,
        artifacts: &[ChunkArtifact],
        expected_chunks: usize,
    ) -> Result<(), RunFailure> {
        let finalize_failed = |e| RunFailure::new(Phase::Finalize, None, e);

        if self.options.combine_output {
            let path = self
                .sink
                .merge_all(artifacts, expected_chunks)
                .await
                .map_err(finalize_failed)?;
            info!("Combined file written to {}", path.display());
            summary.combined_path = Some(path);
        }

        if self.options.sample_size > 0 {
            summary.sample_path = self
                .sink
                .write_sample(self.options.sample_size)
                .await
                .map_err(finalize_failed)?;
        }

        Ok(())
    }

    /// Close a run that did not complete
    fn end_early(
        &self,
        mut summary: RunSummary,
        failure: RunFailure,
        cancelled_at: Option<usize>,
        start_time: Instant,
    ) -> RunSummary {
        summary.elapsed = start_time.elapsed();

        if matches!(failure.cause, ExtractError::Cancelled) {
            let window = cancelled_at.or(failure.window);
            self.transition(RunState::Cancelled(window));
            warn!(
                "Run cancelled; {} chunks written are kept on disk",
                summary.chunks_written
            );
            summary.outcome = RunOutcome::Cancelled { window };
            self.reporter.report(&ProgressEvent::RunCancelled { window });
        } else {
            self.transition(RunState::Failed(failure.window, failure.phase));
            error!("Run failed: {}", failure);
            summary.outcome = RunOutcome::from(&failure);
            self.reporter.report(&ProgressEvent::RunFailed {
                window: failure.window,
                phase: failure.phase,
                cause: failure.cause.to_string(),
            });
        }
        summary
    }

    fn transition(&self, state: RunState) {
        debug!("Run state: {:?}", state);
    }
}

fn min_index(current: Option<usize>, candidate: Option<usize>) -> Option<usize> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

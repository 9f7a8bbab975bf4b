//! Progress reporting for extraction runs
//!
//! The executor emits [`ProgressEvent`]s to a [`ProgressReporter`]; reporters
//! never influence the run. [`ProgressTracker`] renders a console progress
//! bar with row throughput.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Phase;
use crate::utils::convert::format_count;
use crate::utils::time::rate_per_sec;

use super::summary::RunSummary;

/// Lifecycle events of one run
///
/// `RunStarted` carries the probed row count, so it is only emitted once
/// planning succeeds. A run that fails or is cancelled while counting emits
/// `RunFailed`/`RunCancelled` with no preceding `RunStarted`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Emitted once the row count is known and windows are planned
    RunStarted {
        run_id: Uuid,
        target: String,
        total_rows: u64,
        chunk_count: usize,
    },
    ChunkStarted {
        index: usize,
        offset: u64,
        limit: u64,
    },
    ChunkFinished {
        index: usize,
        rows: u64,
        duration: Duration,
    },
    RunFinished {
        summary: Box<RunSummary>,
    },
    RunFailed {
        window: Option<usize>,
        phase: Phase,
        cause: String,
    },
    RunCancelled {
        window: Option<usize>,
    },
}

/// Observer of run progress
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Reporter that ignores every event
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Console progress bar over rows written
///
/// The bar length is set from `RunStarted`; chunk completions advance it by
/// the rows written and refresh the throughput message.
pub struct ProgressTracker {
    /// Start time of the operation
    start_time: Instant,
    bar: ProgressBar,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `enable_bar` - Whether to draw the bar (hidden otherwise)
    ///
    /// # Returns
    /// * `Self` - New progress tracker instance
    pub fn new(enable_bar: bool) -> Self {
        let bar = if enable_bar {
            let bar = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} rows {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            start_time: Instant::now(),
            bar,
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressReporter for ProgressTracker {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                total_rows,
                chunk_count,
                ..
            } => {
                self.bar.set_length(*total_rows);
                self.bar.set_position(0);
                self.bar.set_message(format!("(0/{chunk_count} chunks)"));
            }
            ProgressEvent::ChunkStarted { .. } => self.bar.tick(),
            ProgressEvent::ChunkFinished { rows, .. } => {
                self.bar.inc(*rows);
                let speed = rate_per_sec(self.bar.position(), self.start_time.elapsed());
                self.bar.set_message(format!("({:.0} rows/sec)", speed));
            }
            ProgressEvent::RunFinished { summary } => {
                self.bar.finish_and_clear();
                self.bar.println(format!(
                    "Extracted {} rows in {} chunks",
                    format_count(summary.total_rows_written),
                    summary.chunks_written
                ));
            }
            ProgressEvent::RunFailed { .. } | ProgressEvent::RunCancelled { .. } => {
                self.bar.abandon();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts_rows() {
        let tracker = ProgressTracker::new(false);
        tracker.report(&ProgressEvent::RunStarted {
            run_id: Uuid::new_v4(),
            target: "t".into(),
            total_rows: 250,
            chunk_count: 3,
        });
        for (index, rows) in [(0, 100), (1, 100), (2, 50)] {
            tracker.report(&ProgressEvent::ChunkFinished {
                index,
                rows,
                duration: Duration::from_millis(10),
            });
        }
        assert_eq!(tracker.position(), 250);
    }

    #[test]
    fn test_event_json_shape() {
        let event = ProgressEvent::RunFailed {
            window: Some(1),
            phase: Phase::Fetch,
            cause: "Source unavailable: HTTP 503".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "run_failed");
        assert_eq!(json["phase"], "fetch");
        assert_eq!(json["window"], 1);
    }
}

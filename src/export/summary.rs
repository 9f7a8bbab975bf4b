//! Run summary returned by the executor

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::{ExtractError, Phase, Result, RunFailure};
use crate::utils::convert::format_count;
use crate::utils::time::format_duration;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed {
        phase: Phase,
        window: Option<usize>,
        kind: String,
        cause: String,
    },
    /// Interrupted before `window` was written
    Cancelled { window: Option<usize> },
}

impl From<&RunFailure> for RunOutcome {
    fn from(failure: &RunFailure) -> Self {
        RunOutcome::Failed {
            phase: failure.phase,
            window: failure.window,
            kind: failure.cause.kind().to_string(),
            cause: failure.cause.to_string(),
        }
    }
}

/// Final state of one extraction run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub total_rows_requested: u64,
    pub total_rows_written: u64,
    pub chunk_count: usize,
    pub chunks_written: usize,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub artifact_paths: Vec<PathBuf>,
    pub combined_path: Option<PathBuf>,
    pub sample_path: Option<PathBuf>,
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub(crate) fn start(target: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target: target.to_string(),
            started_at: Utc::now(),
            total_rows_requested: 0,
            total_rows_written: 0,
            chunk_count: 0,
            chunks_written: 0,
            elapsed: Duration::ZERO,
            artifact_paths: Vec::new(),
            combined_path: None,
            sample_path: None,
            outcome: RunOutcome::Completed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, RunOutcome::Cancelled { .. })
    }

    /// Pretty JSON for `--json` output
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ExtractError::Io(e.into()))
    }

    /// Key/value rows for console rendering
    pub fn rows(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("Run".to_string(), self.run_id.to_string()),
            ("Target".to_string(), self.target.clone()),
            (
                "Started".to_string(),
                self.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ),
            (
                "Rows".to_string(),
                format!(
                    "{} of {}",
                    format_count(self.total_rows_written),
                    format_count(self.total_rows_requested)
                ),
            ),
            (
                "Chunks".to_string(),
                format!("{} of {}", self.chunks_written, self.chunk_count),
            ),
            (
                "Elapsed".to_string(),
                format_duration(self.elapsed),
            ),
        ];
        if let Some(path) = &self.combined_path {
            rows.push(("Combined".to_string(), path.display().to_string()));
        }
        if let Some(path) = &self.sample_path {
            rows.push(("Sample".to_string(), path.display().to_string()));
        }
        let status = match &self.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Failed {
                phase,
                window: Some(w),
                cause,
                ..
            } => format!("failed in {phase} at window {w}: {cause}"),
            RunOutcome::Failed { phase, cause, .. } => format!("failed in {phase}: {cause}"),
            RunOutcome::Cancelled { window: Some(w) } => format!("cancelled before window {w}"),
            RunOutcome::Cancelled { window: None } => "cancelled".to_string(),
        };
        rows.push(("Status".to_string(), status));
        rows
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_json() {
        let mut summary = RunSummary::start("cadastro_enderecos");
        summary.total_rows_requested = 250_000;
        summary.total_rows_written = 100_000;
        summary.elapsed = Duration::from_millis(1500);
        let failure = RunFailure::new(
            Phase::Fetch,
            Some(1),
            ExtractError::SourceUnavailable("HTTP 503".into()),
        );
        summary.outcome = RunOutcome::from(&failure);

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["target"], "cadastro_enderecos");
        assert_eq!(json["elapsed_secs"], 1.5);
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["phase"], "fetch");
        assert_eq!(json["outcome"]["window"], 1);
        assert_eq!(json["outcome"]["kind"], "source_unavailable");
        assert!(!summary.is_success());
    }

    #[test]
    fn test_rows_show_status() {
        let mut summary = RunSummary::start("t");
        summary.outcome = RunOutcome::Cancelled { window: Some(2) };
        let rows = summary.rows();
        assert_eq!(
            rows.last().unwrap(),
            &("Status".to_string(), "cancelled before window 2".to_string())
        );
        assert!(summary.is_cancelled());
    }
}

//! Error handling module for extraction runs.
//!
//! This module provides:
//! - The run failure taxonomy (`ExtractError`) and its sub-kinds
//! - Phase attribution for failures (`Phase`, `RunFailure`)
//! - Classification of BigQuery API error bodies into query vs. service errors
//!
//! # Example
//!
//! ```rust
//! use bqpull::error::{ExtractError, Phase, RunFailure};
//!
//! let failure = RunFailure::new(
//!     Phase::Fetch,
//!     Some(1),
//!     ExtractError::SourceUnavailable("connection reset".into()),
//! );
//! assert_eq!(failure.to_string(), "[fetch window 1] Source unavailable: connection reset");
//! ```

pub mod bigquery;
pub mod kinds;

// Re-export commonly used types
pub use bigquery::{ErrorInfo, ErrorResponse, classify_error_response};
pub use kinds::{ConfigError, ExtractError, Phase, Result, RunFailure, SinkError};

use std::path::PathBuf;
use std::{fmt, io};

use serde::{Deserialize, Serialize};

/// Crate-wide `Result` type using [`ExtractError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Top-level error type for extraction runs.
///
/// Variants follow the run's failure taxonomy: configuration problems are
/// raised before any I/O, source and sink failures are fatal to the run but
/// leave already written chunks on disk.
#[derive(Debug)]
pub enum ExtractError {
    /// Bad chunk size, bad paths, missing query text, unreadable config.
    InvalidConfiguration(ConfigError),

    /// Auth, network or timeout failure against the remote engine.
    SourceUnavailable(String),

    /// Malformed query or unknown table, message passed through verbatim.
    Query(String),

    /// Disk full, permission denied, schema drift between chunks.
    Sink(SinkError),

    /// Merge requested but some window artifacts are missing.
    IncompleteChunks { missing: Vec<usize> },

    /// The run was interrupted by the user.
    Cancelled,

    /// I/O errors outside the sink (reading a SQL file, spawning gcloud).
    Io(io::Error),
}

/// Configuration-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Sink-specific errors.
#[derive(Debug)]
pub enum SinkError {
    /// Output directory or temporary file could not be created.
    CreateFailed { path: PathBuf, message: String },

    /// Writing or flushing rows failed.
    WriteFailed { path: PathBuf, message: String },

    /// The temporary file could not be renamed onto its final path.
    PersistFailed { path: PathBuf, message: String },

    /// A chunk artifact could not be read back.
    ReadFailed { path: PathBuf, message: String },

    /// A chunk carried a column list different from the pinned schema.
    SchemaMismatch {
        index: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A chunk file's header differs from the first chunk's header.
    HeaderMismatch { path: PathBuf },

    /// The blocking writer task panicked or was aborted.
    TaskFailed(String),
}

/// Pipeline phase a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Fetch,
    Write,
    Finalize,
}

/// A run failure attributed to a phase and, when applicable, a window.
#[derive(Debug)]
pub struct RunFailure {
    pub phase: Phase,
    pub window: Option<usize>,
    pub cause: ExtractError,
}

impl ExtractError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::InvalidConfiguration(_) => "invalid_configuration",
            ExtractError::SourceUnavailable(_) => "source_unavailable",
            ExtractError::Query(_) => "query_error",
            ExtractError::Sink(_) => "sink_error",
            ExtractError::IncompleteChunks { .. } => "incomplete_chunks",
            ExtractError::Cancelled => "cancelled",
            ExtractError::Io(_) => "io_error",
        }
    }

    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractError::SourceUnavailable(_))
    }

    /// Shorthand for an invalid configuration value.
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        ExtractError::InvalidConfiguration(ConfigError::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        })
    }
}

impl RunFailure {
    pub fn new(phase: Phase, window: Option<usize>, cause: ExtractError) -> Self {
        Self {
            phase,
            window,
            cause,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::InvalidConfiguration(e) => write!(f, "Invalid configuration: {e}"),
            ExtractError::SourceUnavailable(msg) => write!(f, "Source unavailable: {msg}"),
            ExtractError::Query(msg) => write!(f, "Query error: {msg}"),
            ExtractError::Sink(e) => write!(f, "Sink error: {e}"),
            ExtractError::IncompleteChunks { missing } => {
                let list: Vec<String> = missing.iter().map(|i| i.to_string()).collect();
                write!(f, "Incomplete chunks: missing windows [{}]", list.join(", "))
            }
            ExtractError::Cancelled => write!(f, "Run cancelled by user"),
            ExtractError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => write!(f, "Invalid value '{value}' for field '{field}': {reason}"),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::CreateFailed { path, message } => {
                write!(f, "Failed to create {}: {message}", path.display())
            }
            SinkError::WriteFailed { path, message } => {
                write!(f, "Failed to write {}: {message}", path.display())
            }
            SinkError::PersistFailed { path, message } => {
                write!(f, "Failed to persist {}: {message}", path.display())
            }
            SinkError::ReadFailed { path, message } => {
                write!(f, "Failed to read {}: {message}", path.display())
            }
            SinkError::SchemaMismatch {
                index,
                expected,
                found,
            } => write!(
                f,
                "Chunk {index} has columns [{}], expected [{}]",
                found.join(", "),
                expected.join(", ")
            ),
            SinkError::HeaderMismatch { path } => {
                write!(f, "Header of {} does not match the first chunk", path.display())
            }
            SinkError::TaskFailed(msg) => write!(f, "Writer task failed: {msg}"),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Plan => "plan",
            Phase::Fetch => "fetch",
            Phase::Write => "write",
            Phase::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.window {
            Some(index) => write!(f, "[{} window {index}] {}", self.phase, self.cause),
            None => write!(f, "[{}] {}", self.phase, self.cause),
        }
    }
}

impl std::error::Error for ExtractError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for SinkError {}
impl std::error::Error for RunFailure {}

/* ========================= Conversions to ExtractError ========================= */

impl From<io::Error> for ExtractError {
    fn from(err: io::Error) -> Self {
        ExtractError::Io(err)
    }
}

impl From<ConfigError> for ExtractError {
    fn from(err: ConfigError) -> Self {
        ExtractError::InvalidConfiguration(err)
    }
}

impl From<SinkError> for ExtractError {
    fn from(err: SinkError) -> Self {
        ExtractError::Sink(err)
    }
}

impl From<RunFailure> for ExtractError {
    fn from(failure: RunFailure) -> Self {
        failure.cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ExtractError::Cancelled.kind(), "cancelled");
        assert_eq!(
            ExtractError::SourceUnavailable("down".into()).kind(),
            "source_unavailable"
        );
        assert_eq!(
            ExtractError::IncompleteChunks { missing: vec![1] }.kind(),
            "incomplete_chunks"
        );
    }

    #[test]
    fn test_only_source_unavailable_is_transient() {
        assert!(ExtractError::SourceUnavailable("timeout".into()).is_transient());
        assert!(!ExtractError::Query("Syntax error".into()).is_transient());
        assert!(!ExtractError::Cancelled.is_transient());
    }

    #[test]
    fn test_run_failure_display() {
        let failure = RunFailure::new(
            Phase::Fetch,
            Some(1),
            ExtractError::SourceUnavailable("connection reset".into()),
        );
        assert_eq!(
            failure.to_string(),
            "[fetch window 1] Source unavailable: connection reset"
        );

        let failure = RunFailure::new(
            Phase::Finalize,
            None,
            ExtractError::IncompleteChunks { missing: vec![2, 4] },
        );
        assert_eq!(
            failure.to_string(),
            "[finalize] Incomplete chunks: missing windows [2, 4]"
        );
    }

    #[test]
    fn test_invalid_value_shorthand() {
        let err = ExtractError::invalid_value("chunk_size", 0, "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Invalid value '0' for field 'chunk_size': must be positive"
        );
    }
}

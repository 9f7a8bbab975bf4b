//! bqpull library
//!
//! Core functionality for extracting large BigQuery query results in
//! fixed-size chunks. The pipeline can be driven from the `bqpull` binary or
//! embedded with any [`source::RowSource`] and [`export::Sink`] implementation.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `error`: Error types and handling
//! - `export`: Chunk planning, batch execution, CSV sink and progress reporting
//! - `formatter`: Console tables for previews and run summaries
//! - `source`: Row source abstraction and the BigQuery REST client
//! - `utils`: Utility functions and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bqpull::export::{BatchExecutor, CsvSink, ExportOptions};
//! use bqpull::source::BigQuerySource;
//! use bqpull::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::load_from_file(None)?;
//!     config.apply_env()?;
//!     config.validate()?;
//!
//!     let executor = BatchExecutor::new(
//!         Arc::new(BigQuerySource::from_config(&config.source)?),
//!         Arc::new(CsvSink::from_config(&config.export)),
//!         ExportOptions::from(&config.export),
//!     );
//!
//!     let summary = executor.execute(&config.query.to_spec()).await;
//!     println!("{}", summary.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod formatter;
pub mod source;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{ExtractError, Result};
pub use export::{BatchExecutor, RunSummary};
pub use source::{QuerySpec, RowSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

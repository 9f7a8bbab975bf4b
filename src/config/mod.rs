//! Configuration management for bqpull
//!
//! This module handles loading, parsing, and managing configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables (prefixed with `BQPULL_`)
//! - Command-line arguments (applied by the `cli` module)
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ExtractError, Result};
use crate::source::QuerySpec;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Query to extract
    #[serde(default)]
    pub query: QueryConfig,

    /// Chunking and artifact layout
    #[serde(default)]
    pub export: ExportConfig,

    /// Remote engine settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query definition, opaque to the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryConfig {
    /// Standard SQL query text
    #[serde(default)]
    pub sql: String,

    /// Identifier of the dataset being extracted (used in logs and summaries)
    #[serde(default)]
    pub target: String,

    /// Columns giving the result a deterministic order for pagination
    #[serde(default)]
    pub order_by: Vec<String>,
}

/// Chunking and artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    /// Rows per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Directory receiving chunk, combined and sample files
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Merge chunk files into one combined file after the run
    #[serde(default = "default_combine_output")]
    pub combine_output: bool,

    /// File name of the combined artifact
    #[serde(default = "default_combined_file_name")]
    pub combined_file_name: String,

    /// Rows in the preview sample (0 disables the sample)
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// File name of the sample artifact
    #[serde(default = "default_sample_file_name")]
    pub sample_file_name: String,

    /// Number of chunks fetched in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// BigQuery connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Project billed for the queries
    #[serde(default)]
    pub project_id: Option<String>,

    /// Dataset location (e.g. "US", "southamerica-east1")
    #[serde(default)]
    pub location: Option<String>,

    /// REST endpoint root
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Deadline for one count or fetch call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Rows requested per result page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Attempts per source call (1 disables retries)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Upper bound for retry delays in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_chunk_size() -> u64 {
    100_000
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("batch_data")
}

fn default_combine_output() -> bool {
    true
}

fn default_combined_file_name() -> String {
    "all_data_combined.csv".to_string()
}

fn default_sample_size() -> usize {
    10_000
}

fn default_sample_file_name() -> String {
    "sample.csv".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_api_base_url() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_page_size() -> u32 {
    10_000
}

fn default_retry_attempts() -> u32 {
    1
}

fn default_retry_initial_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            output_directory: default_output_directory(),
            combine_output: default_combine_output(),
            combined_file_name: default_combined_file_name(),
            sample_size: default_sample_size(),
            sample_file_name: default_sample_file_name(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: None,
            api_base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration from a file
    ///
    /// An explicitly given path must exist. When no path is given the default
    /// location is tried and defaults are used if it does not exist.
    ///
    /// # Arguments
    /// * `path` - Optional path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_config_path(), false),
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigError::FileNotFound(path.display().to_string()).into());
            }
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::InvalidFormat(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Get the default configuration file path (`~/.bqpull/config.toml`)
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bqpull")
            .join("config.toml")
    }

    /// Apply `BQPULL_*` environment variables on top of this configuration
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides using the given variable lookup
    ///
    /// `GOOGLE_CLOUD_PROJECT` is used as the billing project when neither the
    /// file nor `BQPULL_PROJECT_ID` set one.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(sql) = lookup("BQPULL_SQL") {
            self.query.sql = sql;
        }
        if let Some(target) = lookup("BQPULL_TARGET") {
            self.query.target = target;
        }
        if let Some(order_by) = lookup("BQPULL_ORDER_BY") {
            self.query.order_by = split_list(&order_by);
        }
        if let Some(v) = lookup("BQPULL_CHUNK_SIZE") {
            self.export.chunk_size = parse_env("BQPULL_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("BQPULL_OUTPUT_DIR") {
            self.export.output_directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("BQPULL_COMBINE_OUTPUT") {
            self.export.combine_output = parse_env("BQPULL_COMBINE_OUTPUT", &v)?;
        }
        if let Some(v) = lookup("BQPULL_SAMPLE_SIZE") {
            self.export.sample_size = parse_env("BQPULL_SAMPLE_SIZE", &v)?;
        }
        if let Some(v) = lookup("BQPULL_CONCURRENCY") {
            self.export.concurrency = parse_env("BQPULL_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("BQPULL_PROJECT_ID") {
            self.source.project_id = Some(v);
        } else if self.source.project_id.is_none() {
            self.source.project_id = lookup("GOOGLE_CLOUD_PROJECT");
        }
        if let Some(v) = lookup("BQPULL_LOCATION") {
            self.source.location = Some(v);
        }
        if let Some(v) = lookup("BQPULL_TIMEOUT_SECS") {
            self.source.timeout_secs = parse_env("BQPULL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("BQPULL_RETRY_ATTEMPTS") {
            self.source.retry_attempts = parse_env("BQPULL_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("BQPULL_LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&v).ok_or_else(|| {
                ExtractError::invalid_value("BQPULL_LOG_LEVEL", &v, "unknown log level")
            })?;
        }
        Ok(())
    }

    /// Validate the configuration
    ///
    /// Runs before any I/O so that a bad run fails fast.
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, `InvalidConfiguration` otherwise
    pub fn validate(&self) -> Result<()> {
        if self.query.sql.trim().is_empty() {
            return Err(ConfigError::MissingField("query.sql".to_string()).into());
        }
        if self.query.order_by.iter().any(|c| c.trim().is_empty()) {
            return Err(ExtractError::invalid_value(
                "query.order_by",
                self.query.order_by.join(","),
                "column names must not be empty",
            ));
        }
        self.validate_export()?;
        self.validate_source()
    }

    /// Validate the export section only (used by commands that never query)
    pub fn validate_export(&self) -> Result<()> {
        let export = &self.export;
        if export.chunk_size == 0 {
            return Err(ExtractError::invalid_value(
                "export.chunk_size",
                export.chunk_size,
                "must be a positive integer",
            ));
        }
        if export.concurrency == 0 {
            return Err(ExtractError::invalid_value(
                "export.concurrency",
                export.concurrency,
                "must be at least 1",
            ));
        }
        if export.output_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("export.output_directory".to_string()).into());
        }
        if export.output_directory.is_file() {
            return Err(ExtractError::invalid_value(
                "export.output_directory",
                export.output_directory.display(),
                "path exists and is a file",
            ));
        }
        for (field, name) in [
            ("export.combined_file_name", &export.combined_file_name),
            ("export.sample_file_name", &export.sample_file_name),
        ] {
            if !is_plain_file_name(name) {
                return Err(ExtractError::invalid_value(
                    field,
                    name,
                    "must be a plain file name without directories",
                ));
            }
        }
        if export.combined_file_name == export.sample_file_name {
            return Err(ExtractError::invalid_value(
                "export.sample_file_name",
                &export.sample_file_name,
                "must differ from the combined file name",
            ));
        }
        Ok(())
    }

    fn validate_source(&self) -> Result<()> {
        let source = &self.source;
        if source.timeout_secs == 0 {
            return Err(ExtractError::invalid_value(
                "source.timeout_secs",
                source.timeout_secs,
                "must be positive",
            ));
        }
        if source.page_size == 0 {
            return Err(ExtractError::invalid_value(
                "source.page_size",
                source.page_size,
                "must be positive",
            ));
        }
        if source.retry_attempts == 0 {
            return Err(ExtractError::invalid_value(
                "source.retry_attempts",
                source.retry_attempts,
                "must be at least 1",
            ));
        }
        if !source.api_base_url.starts_with("http://") && !source.api_base_url.starts_with("https://")
        {
            return Err(ExtractError::invalid_value(
                "source.api_base_url",
                &source.api_base_url,
                "must be an http(s) URL",
            ));
        }
        Ok(())
    }

    /// Serialize the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }
}

impl SourceConfig {
    /// Deadline for a single BigQuery API call
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl QueryConfig {
    /// Build the immutable query spec handed to the pipeline
    pub fn to_spec(&self) -> QuerySpec {
        let target = if self.target.trim().is_empty() {
            "query".to_string()
        } else {
            self.target.trim().to_string()
        };
        QuerySpec::new(self.sql.trim(), target).with_order_by(self.order_by.clone())
    }
}

impl LogLevel {
    /// Parse a level name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ExtractError::invalid_value(key, value, "cannot be parsed"))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_plain_file_name(name: &str) -> bool {
    !name.trim().is_empty()
        && Path::new(name).file_name().is_some_and(|f| f == name)
        && name != "."
        && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.query.sql = "SELECT cep FROM `basedosdados.br_ibge_censo_2022.cadastro_enderecos`".into();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.export.chunk_size, 100_000);
        assert_eq!(config.export.output_directory, PathBuf::from("batch_data"));
        assert!(config.export.combine_output);
        assert_eq!(config.export.sample_size, 10_000);
        assert_eq!(config.export.concurrency, 1);
        assert_eq!(config.source.retry_attempts, 1);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [query]
            sql = "SELECT 1"
            order_by = ["cep", "latitude"]

            [export]
            chunk_size = 50000
            "#,
        )
        .unwrap();

        assert_eq!(config.query.sql, "SELECT 1");
        assert_eq!(config.query.order_by, vec!["cep", "latitude"]);
        assert_eq!(config.export.chunk_size, 50_000);
        assert_eq!(config.export.sample_size, 10_000);
        assert_eq!(config.source.page_size, 10_000);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[export]\nchunk_size = \"many\"").unwrap_err();
        assert!(matches!(
            err,
            ExtractError::InvalidConfiguration(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_toml_round_trip_through_show() {
        let config = valid_config();
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_explicit_missing_file() {
        let err = Config::load_from_file(Some(Path::new("/nonexistent/bqpull.toml"))).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::InvalidConfiguration(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[export]\nconcurrency = 4\n").unwrap();
        let config = Config::load_from_file(Some(&path)).unwrap();
        assert_eq!(config.export.concurrency, 4);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BQPULL_SQL", "SELECT 2"),
            ("BQPULL_ORDER_BY", "cep, latitude ,longitude"),
            ("BQPULL_CHUNK_SIZE", "250000"),
            ("BQPULL_COMBINE_OUTPUT", "false"),
            ("BQPULL_LOG_LEVEL", "DEBUG"),
            ("GOOGLE_CLOUD_PROJECT", "my-project"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_with(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.query.sql, "SELECT 2");
        assert_eq!(config.query.order_by, vec!["cep", "latitude", "longitude"]);
        assert_eq!(config.export.chunk_size, 250_000);
        assert!(!config.export.combine_output);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.source.project_id.as_deref(), Some("my-project"));
    }

    #[test]
    fn test_env_project_does_not_override_file_project() {
        let mut config = Config::default();
        config.source.project_id = Some("from-file".into());
        config
            .apply_env_with(|k| (k == "GOOGLE_CLOUD_PROJECT").then(|| "from-env".to_string()))
            .unwrap();
        assert_eq!(config.source.project_id.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_env_parse_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_with(|k| (k == "BQPULL_CHUNK_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_sql() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(
            err,
            ExtractError::InvalidConfiguration(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = valid_config();
        config.export.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ExtractError::InvalidConfiguration(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = valid_config();
        config.export.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nested_file_names() {
        let mut config = valid_config();
        config.export.combined_file_name = "../all.csv".into();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.export.sample_file_name = config.export.combined_file_name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_query_spec_default_target() {
        let config = valid_config();
        let spec = config.query.to_spec();
        assert_eq!(spec.target(), "query");
        assert!(spec.order_by().is_empty());
    }

    #[test]
    fn test_call_timeout() {
        let config = Config::default();
        assert_eq!(config.source.call_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
    }
}

//! Command-line interface for bqpull
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading (file, then `BQPULL_*` environment, then flags)
//! - Utility subcommands (config, completion, version)

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, LogLevel};
use crate::error::{ExtractError, Result};

pub mod completion;

/// Sample size used by `import` when none is given
pub const IMPORT_SAMPLE_SIZE: usize = 1_000;

/// Batch extraction of BigQuery query results to CSV
#[derive(Parser, Debug)]
#[command(
    name = "bqpull",
    version,
    about = "Batch extraction of BigQuery query results to CSV",
    long_about = "Runs a query against BigQuery, splits the result into fixed-size chunks,
writes each chunk to its own CSV file, then merges them into a combined file
and cuts a preview sample."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Billing project for BigQuery jobs
    #[arg(long, value_name = "PROJECT", global = true)]
    pub project: Option<String>,

    /// Quiet mode (errors only, no progress bar)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Query selection flags shared by the pipeline commands
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Query text (standard SQL)
    #[arg(long, value_name = "SQL", conflicts_with = "sql_file")]
    pub sql: Option<String>,

    /// Read the query text from a file
    #[arg(long, value_name = "FILE")]
    pub sql_file: Option<PathBuf>,

    /// Dataset name used in logs and the run summary
    #[arg(long, value_name = "NAME")]
    pub target: Option<String>,

    /// Deterministic ordering key, comma separated
    #[arg(long, value_name = "COLUMNS", value_delimiter = ',')]
    pub order_by: Vec<String>,
}

/// Output flags shared by `run` and `import`
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Directory receiving the CSV files
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Rows in the preview sample (0 disables it)
    #[arg(long, value_name = "ROWS")]
    pub sample_size: Option<usize>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// Subcommands for bqpull
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract the query result in chunks
    Run {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Rows per chunk
        #[arg(long, value_name = "ROWS")]
        chunk_size: Option<u64>,

        /// Keep chunk files only, skip the combined file
        #[arg(long)]
        no_combine: bool,

        /// Chunks fetched in parallel
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Attempts per BigQuery call for transient failures
        #[arg(long, value_name = "N")]
        retries: Option<u32>,
    },

    /// Extract the whole result as a single chunk
    Import {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Check connectivity by fetching a few rows
    Check {
        #[command(flatten)]
        query: QueryArgs,

        /// Rows to fetch
        #[arg(long, value_name = "ROWS", default_value_t = 5)]
        limit: u64,
    },

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },

    /// Generate shell completion script
    Completion {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        #[arg(value_name = "SHELL")]
        shell: String,
    },

    /// Show version information
    Version,
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Effective configuration
    config: Config,
}

impl CliInterface {
    /// Create a new CLI interface from the process arguments
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build the interface from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mut config = Config::load_from_file(args.config_file.as_deref())?;
        config.apply_env()?;
        Self::apply_args_to_config(&mut config, &args)?;
        Ok(Self { args, config })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Whether a console progress bar should be drawn
    pub fn progress_enabled(&self) -> bool {
        use std::io::IsTerminal;
        !self.args.quiet && std::io::stderr().is_terminal()
    }

    /// Whether the summary goes to stdout as JSON
    pub fn json_output(&self) -> bool {
        match &self.args.command {
            Commands::Run { output, .. } | Commands::Import { output, .. } => output.json,
            _ => false,
        }
    }

    /// Apply CLI arguments to configuration
    ///
    /// Overrides configuration values with CLI arguments where provided
    ///
    /// # Arguments
    /// * `config` - Configuration to modify
    /// * `args` - Parsed arguments
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) -> Result<()> {
        Self::apply_logging_args(config, args);
        if let Some(project) = &args.project {
            config.source.project_id = Some(project.clone());
        }

        match &args.command {
            Commands::Run {
                query,
                output,
                chunk_size,
                no_combine,
                concurrency,
                retries,
            } => {
                Self::apply_query_args(config, query)?;
                Self::apply_output_args(config, output);
                if let Some(size) = chunk_size {
                    config.export.chunk_size = *size;
                }
                if *no_combine {
                    config.export.combine_output = false;
                }
                if let Some(n) = concurrency {
                    config.export.concurrency = *n;
                }
                if let Some(n) = retries {
                    config.source.retry_attempts = *n;
                }
            }
            Commands::Import { query, output } => {
                Self::apply_query_args(config, query)?;
                Self::apply_output_args(config, output);
                config.export.chunk_size = u64::MAX;
                config.export.combine_output = false;
                config.export.concurrency = 1;
                config.export.sample_size = output.sample_size.unwrap_or(IMPORT_SAMPLE_SIZE);
            }
            Commands::Check { query, .. } => Self::apply_query_args(config, query)?,
            Commands::Config { .. } | Commands::Completion { .. } | Commands::Version => {}
        }
        Ok(())
    }

    /// Apply logging-related CLI arguments to configuration
    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    fn apply_query_args(config: &mut Config, query: &QueryArgs) -> Result<()> {
        if let Some(sql) = &query.sql {
            config.query.sql = sql.clone();
        } else if let Some(path) = &query.sql_file {
            config.query.sql = std::fs::read_to_string(path).map_err(|e| {
                ExtractError::invalid_value("--sql-file", path.display(), e.to_string())
            })?;
        }
        if let Some(target) = &query.target {
            config.query.target = target.clone();
        }
        if !query.order_by.is_empty() {
            config.query.order_by = query
                .order_by
                .iter()
                .map(|c| c.trim().to_string())
                .collect();
        }
        Ok(())
    }

    fn apply_output_args(config: &mut Config, output: &OutputArgs) {
        if let Some(dir) = &output.output_dir {
            config.export.output_directory = crate::utils::fs::expand_home(dir);
        }
        if let Some(n) = output.sample_size {
            config.export.sample_size = n;
        }
    }

    /// Handle the utility subcommands
    ///
    /// # Returns
    /// * `Result<bool>` - True if a subcommand was handled, false for pipeline commands
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Commands::Version => {
                self.show_version();
                Ok(true)
            }
            Commands::Completion { shell } => {
                completion::generate_completion(shell)?;
                Ok(true)
            }
            Commands::Config { show, validate } => {
                self.handle_config_command(*show, *validate)?;
                Ok(true)
            }
            Commands::Run { .. } | Commands::Import { .. } | Commands::Check { .. } => Ok(false),
        }
    }

    /// Show version information
    fn show_version(&self) {
        println!("bqpull version {}", env!("CARGO_PKG_VERSION"));
        println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
    }

    /// Handle config subcommand
    ///
    /// With neither flag set, the effective configuration is shown.
    fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config()?;
        }

        if show || !validate {
            self.show_config()?;
        }

        Ok(())
    }

    /// Validate the effective configuration, failing on the first problem
    fn validate_config(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("Validating configuration: {}", path.display());

        self.config.validate()?;
        println!("Configuration is valid");
        Ok(())
    }

    /// Show effective configuration
    fn show_config(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("# Configuration file: {}", path.display());
        println!("# Effective configuration (file < environment < flags)");
        println!();
        println!("{}", self.config.to_toml_string()?);
        Ok(())
    }

    /// Get configuration file path (from args or default)
    fn get_config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_config_path)
    }
}

//! bqpull - batch extraction of BigQuery query results to CSV
//!
//! Splits a large query result into fixed-size chunks, writes each chunk to
//! its own CSV file and merges them into a combined file plus a small sample.
//!
//! # Usage
//!
//! ```bash
//! # Chunked extraction
//! bqpull run --sql-file query.sql --target enderecos --order-by cep -o output/
//!
//! # Single-file import
//! bqpull import --sql "SELECT * FROM dataset.table" -o output/
//!
//! # Connectivity check
//! bqpull check --sql "SELECT * FROM dataset.table" --limit 5
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bqpull::cli::{CliInterface, Commands};
use bqpull::error::{ExtractError, Result};
use bqpull::export::{BatchExecutor, CsvSink, ExportOptions, ProgressTracker, RunSummary};
use bqpull::formatter::TableFormatter;
use bqpull::source::{BigQuerySource, RetryPolicy, RetryingSource, RowSource};

/// Exit status for an interrupted run
const EXIT_CANCELLED: u8 = 130;

/// Application entry point
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle utility subcommands or run the pipeline
///
/// # Returns
/// * `Result<ExitCode>` - Process exit status or error
async fn run() -> Result<ExitCode> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(ExitCode::SUCCESS);
    }

    match &cli.args().command {
        Commands::Run { .. } | Commands::Import { .. } => run_extraction(&cli).await,
        Commands::Check { limit, .. } => run_check(&cli, *limit).await,
        _ => Ok(ExitCode::SUCCESS),
    }
}

/// Build the BigQuery source with retries from configuration
fn build_source(cli: &CliInterface) -> Result<Arc<dyn RowSource>> {
    let config = &cli.config().source;
    let source = BigQuerySource::from_config(config)?;
    Ok(Arc::new(RetryingSource::new(
        source,
        RetryPolicy::from_config(config),
    )))
}

/// Run a chunked extraction (`run`) or single-chunk import (`import`)
async fn run_extraction(cli: &CliInterface) -> Result<ExitCode> {
    let config = cli.config();
    config.validate()?;

    let source = build_source(cli)?;
    let sink = Arc::new(CsvSink::from_config(&config.export));
    let tracker = Arc::new(ProgressTracker::new(
        cli.progress_enabled() && !cli.json_output(),
    ));

    let cancel_token = CancellationToken::new();
    let ctrl_c_handle = spawn_ctrl_c_listener(cancel_token.clone());

    let executor = BatchExecutor::new(source, sink, ExportOptions::from(&config.export))
        .with_reporter(tracker)
        .with_cancellation(cancel_token);

    let summary = executor.execute(&config.query.to_spec()).await;
    ctrl_c_handle.abort();

    display_summary(cli, &summary)?;

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else if summary.is_cancelled() {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::FAILURE
    })
}

/// Print the run summary as a table or as JSON
fn display_summary(cli: &CliInterface, summary: &RunSummary) -> Result<()> {
    if cli.json_output() {
        println!("{}", summary.to_json()?);
    } else {
        println!("{}", TableFormatter::new().format_pairs(&summary.rows()));
    }
    Ok(())
}

/// Fetch the first rows of the query and print them
async fn run_check(cli: &CliInterface, limit: u64) -> Result<ExitCode> {
    let config = cli.config();
    config.validate()?;
    let query = config.query.to_spec();

    println!("Testing BigQuery connection...");
    let page = match build_source(cli) {
        Ok(source) => source.fetch(&query, 0, limit).await,
        Err(e) => Err(e),
    };

    match page {
        Ok(page) => {
            println!("Connection OK");
            println!("Columns: {}", page.schema.columns().join(", "));
            println!(
                "{}",
                TableFormatter::new().format_rows(&page.schema, &page.rows)
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            print_troubleshooting(&e);
            Err(e)
        }
    }
}

/// Hints for the usual causes of a failed check
fn print_troubleshooting(error: &ExtractError) {
    eprintln!("Connection check failed ({})", error.kind());
    eprintln!("Possible fixes:");
    eprintln!("  1. Authenticate: gcloud auth application-default login");
    eprintln!("  2. Enable the BigQuery API for the project");
    eprintln!("  3. Check that the account can run jobs and read the table");
    eprintln!("  4. Set the billing project with --project or BQPULL_PROJECT_ID");
}

/// Cancel the token on the first Ctrl+C
fn spawn_ctrl_c_listener(cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupt received, cancelling run");
                cancel_token.cancel();
            }
            Err(err) => {
                eprintln!("Failed to listen for Ctrl+C: {}", err);
            }
        }
    })
}

/// Initialize logging system from the effective configuration
///
/// Logs go to stderr so stdout stays clean for `--json` output.
///
/// # Arguments
/// * `cli` - CLI interface with the resolved logging settings
fn initialize_logging(cli: &CliInterface) {
    let level = cli.config().logging.level.to_tracing_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}

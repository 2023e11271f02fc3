//! Geoshard CLI - sharded geo-bbox ingestion and hotspot summarization tool.

use anyhow::Result;
use clap::{Parser, Subcommand};
use geoshard_core::config::LogFormat;
use geoshard_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, invalid selection policy)
    ConfigError = 1,
    /// Relational store error (connection, insert, query)
    StoreError = 2,
    /// Partition routing or unified view error
    PartitionError = 3,
    /// Progress ledger error (lock held, corruption)
    LedgerError = 4,
    /// Manifest error
    ManifestError = 5,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Convert an error to an exit code by inspecting the error message.
    fn from_error(error: &anyhow::Error) -> Self {
        let error_str = error.to_string().to_lowercase();

        if error_str.contains("interrupted") {
            ExitCode::SignalInterrupt
        } else if error_str.contains("config")
            || error_str.contains("toml")
            || error_str.contains("top_n")
            || error_str.contains("top_percent")
        {
            ExitCode::ConfigError
        } else if error_str.contains("partition") || error_str.contains("view") {
            ExitCode::PartitionError
        } else if error_str.contains("ledger") || error_str.contains("lock") {
            ExitCode::LedgerError
        } else if error_str.contains("manifest") {
            ExitCode::ManifestError
        } else if error_str.contains("store")
            || error_str.contains("connection")
            || error_str.contains("insert")
            || error_str.contains("query")
        {
            ExitCode::StoreError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "geoshard")]
#[command(about = "Sharded geo-bbox ingestion and hotspot summarization CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest/write pipeline over a manifest
    Ingest {
        /// Manifest file (JSONL, one item per line)
        #[arg(long)]
        manifest: PathBuf,

        /// Override records per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override rows per INSERT statement
        #[arg(long)]
        insert_batch_size: Option<usize>,

        /// Process only items previously marked failed in the ledger
        #[arg(long)]
        retry_failed: bool,

        /// Rebuild the unified view after writing
        #[arg(long)]
        maintain_view: bool,

        /// Override the working directory for the progress ledger
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Override worker count for per-partition parallelism
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Create or refresh the unified view over all partitions
    View {
        /// Override the view name
        #[arg(long)]
        name: Option<String>,
    },

    /// List partitions
    Partitions {
        /// Include row counts
        #[arg(long)]
        counts: bool,
    },

    /// Run the hotspot extraction
    Extract {
        /// Output table name
        #[arg(long)]
        output_table: String,

        /// Select the first N ranks per group
        #[arg(long)]
        top_n: Option<u64>,

        /// Select the top percentage of ranks per group
        #[arg(long)]
        top_percent: Option<f64>,

        /// Dry run: report candidate groups and expected rows only
        #[arg(long)]
        inspect: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Try to load config for log format settings (optional - falls back to text)
    let log_format = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring.log_format)
        .unwrap_or(LogFormat::Text);

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    let result = execute_command(cli).await;

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            manifest,
            batch_size,
            insert_batch_size,
            retry_failed,
            maintain_view,
            workdir,
            workers,
        } => {
            commands::ingest::run(
                config,
                commands::ingest::IngestArgs {
                    manifest,
                    batch_size,
                    insert_batch_size,
                    retry_failed,
                    maintain_view,
                    workdir,
                    workers,
                },
            )
            .await?;
        }

        Commands::View { name } => {
            commands::view::run(config, name).await?;
        }

        Commands::Partitions { counts } => {
            commands::partitions::run(config, counts).await?;
        }

        Commands::Extract {
            output_table,
            top_n,
            top_percent,
            inspect,
        } => {
            commands::extract::run(config, output_table, top_n, top_percent, inspect).await?;
        }

        Commands::Validate => {
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));

    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

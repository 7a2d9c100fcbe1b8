//! Rainfields storage administration.
//!
//! Initialises indexes, registers domains, manages configuration documents
//! and reads or writes individual grid records.

mod commands;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use grid_store::StoreConfig;
use rainfields_common::{GridError, RawGridKey, RawTime, RecordKind};

#[derive(Parser, Debug)]
#[command(name = "rainfields-admin")]
#[command(about = "Administration of rainfields grid storage")]
struct Args {
    /// Configuration file path (environment variables are used when absent)
    #[arg(short, long, env = "RAINFIELDS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables and compound indexes
    Init,

    /// Domain registry
    #[command(subcommand)]
    Domain(DomainCommand),

    /// Configuration documents
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Store a record
    Put {
        #[command(flatten)]
        key: KeyArgs,

        #[arg(short, long, default_value = "rain")]
        kind: RecordKind,

        /// Payload file (rain and state records)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Metadata as a JSON object
        #[arg(short, long, default_value = "{}")]
        metadata: String,
    },

    /// Fetch a record
    Get {
        #[command(flatten)]
        key: KeyArgs,

        #[arg(short, long, default_value = "rain")]
        kind: RecordKind,

        /// Write the payload here instead of printing metadata only
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List records matching a partial key
    Ls {
        #[arg(short, long)]
        domain: Option<String>,

        #[arg(short, long)]
        product: Option<String>,

        #[arg(short, long, default_value = "rain")]
        kind: RecordKind,

        /// Inclusive valid time range, "start/end"
        #[arg(long)]
        valid: Option<String>,

        /// Only records without a base time
        #[arg(long)]
        analyses: bool,

        #[arg(long)]
        desc: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a record and its payload
    Rm {
        #[command(flatten)]
        key: KeyArgs,

        #[arg(short, long, default_value = "rain")]
        kind: RecordKind,
    },

    /// Most recent forecast run usable for a valid time
    LatestBase {
        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        product: String,

        #[arg(short, long)]
        valid_time: String,
    },
}

#[derive(Subcommand, Debug)]
enum DomainCommand {
    /// Register a domain from a YAML or JSON file
    Put { file: PathBuf },
    Get { id: String },
    List,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Append a configuration revision from a YAML or JSON file
    Write { name: String, file: PathBuf },
    Get { name: String },
    List,
}

#[derive(ClapArgs, Debug)]
struct KeyArgs {
    #[arg(short, long)]
    domain: String,

    #[arg(short, long)]
    product: String,

    /// Valid time (RFC 3339 or "YYYY-MM-DD HH:MM:SS" UTC)
    #[arg(short, long)]
    valid_time: String,

    /// Forecast base time; omit for analyses
    #[arg(short, long)]
    base_time: Option<String>,

    /// Ensemble member; omit for deterministic fields
    #[arg(short, long)]
    ensemble: Option<i64>,
}

impl From<KeyArgs> for RawGridKey {
    fn from(args: KeyArgs) -> Self {
        RawGridKey {
            domain: Some(args.domain),
            product: Some(args.product),
            valid_time: Some(RawTime::Text(args.valid_time)),
            base_time: args.base_time.map(RawTime::Text),
            ensemble: args.ensemble,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => StoreConfig::from_yaml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::from_env().context("loading configuration from environment")?,
    };
    info!(policy = ?config.conflict_policy, "Loaded configuration");

    let result = commands::run(args.command, &config).await;
    if let Err(e) = &result {
        if let Some(grid) = e.downcast_ref::<GridError>() {
            error!(code = grid.error_code(), retryable = grid.is_retryable(), error = %grid, "Command failed");
        }
    }
    result
}

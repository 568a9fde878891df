//! Propsync: differential synchronization of real-estate XML feeds into a
//! content datastore.

use anyhow::Result;
use clap::{Parser, Subcommand};
use propsync::config::{Config, LogFormat, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

#[derive(Parser)]
#[command(name = "propsync")]
#[command(about = "Differential real-estate feed synchronization")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Data directory override
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and create the data directory
    Init {
        /// Directory to place the configuration file in
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run a synchronization against a feed
    Sync {
        /// Feed file (.xml or .xml.gz); falls back to [feed].path
        feed: Option<PathBuf>,

        /// Decide and map but write to a throwaway in-memory target
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many records (skips deletion reconciliation)
        #[arg(long)]
        limit: Option<usize>,

        /// Override the configured chunk size
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Suppress the progress bar and summary
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show tracking statistics and the last run report
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config when present; init must work without one
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    if let Some(data_dir) = cli.data_dir {
        config.sync.data_dir = data_dir;
    }

    // -v flags win over the configured level
    let log_level = match cli.verbose {
        0 => config.logging.level.to_tracing(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false);
    match config.logging.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
    }

    match cli.command {
        Commands::Init { path } => commands::init::init_config(path).await,
        Commands::Sync {
            feed,
            dry_run,
            limit,
            chunk_size,
            quiet,
        } => commands::sync::run_sync(config, feed, dry_run, limit, chunk_size, quiet).await,
        Commands::Status => commands::status::show_status(config).await,
    }
}

//! raftkv CLI - offline tools for raftkv node data directories.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// raftkv - inspect and operate on a node's data directory.
#[derive(Parser)]
#[command(name = "raftkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the log segments and snapshots of a data directory
    Inspect {
        /// Node data directory
        data_dir: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the key-value map from disk and print it
    Dump {
        /// Node data directory
        data_dir: PathBuf,

        /// Print only this key
        #[arg(short, long)]
        key: Option<String>,

        /// Print JSON instead of plain lines
        #[arg(long)]
        json: bool,
    },

    /// Write one key through a local single-node cluster
    Put {
        /// Node data directory
        data_dir: PathBuf,

        /// Key to write
        key: String,

        /// Value to write
        value: String,

        /// Node ID
        #[arg(long, default_value = "1")]
        node_id: u64,
    },
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // RUST_LOG wins over -v
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Inspect { data_dir, json } => commands::inspect::run(&data_dir, json),
        Commands::Dump {
            data_dir,
            key,
            json,
        } => commands::dump::run(&data_dir, key.as_deref(), json),
        Commands::Put {
            data_dir,
            key,
            value,
            node_id,
        } => commands::put::run(&data_dir, node_id, &key, &value).await,
    }
}

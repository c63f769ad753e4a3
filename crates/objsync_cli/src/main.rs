//! obj-sync CLI
//!
//! Command-line tools for exercising the obj-sync engine.
//!
//! # Commands
//!
//! - `run` - Replay an invocation script against an in-memory engine
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// obj-sync command-line tools.
#[derive(Parser)]
#[command(name = "objsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an invocation script and print every push as a JSON line
    Run {
        /// Path to the script (a JSON array of steps)
        script: PathBuf,

        /// Connections fetched per page during broadcast and cleanup
        #[arg(long, default_value_t = objsync_server::DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Append attempts before giving up on store contention
        #[arg(long, default_value = "3")]
        retries: u32,

        /// Fold the log into the state once it reaches this length
        #[arg(long)]
        merge_threshold: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            script,
            page_size,
            retries,
            merge_threshold,
        } => {
            let options = commands::run::RunOptions {
                page_size,
                retries,
                merge_threshold,
            };
            commands::run::run(&script, &options)?;
        }
        Commands::Version => {
            println!("obj-sync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

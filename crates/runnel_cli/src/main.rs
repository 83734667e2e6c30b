//! Runnel CLI
//!
//! Command-line tools for Runnel logs.
//!
//! # Commands
//!
//! - `demo` - Run concurrent writers and readers against one log
//! - `inspect` - Display the header of a log
//! - `dump` - Print published records
//! - `remove` - Delete the files of a log

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Runnel command-line log tools.
#[derive(Parser)]
#[command(name = "runnel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the log files (defaults to the OS temp directory)
    #[arg(global = true, short, long)]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent writers and readers against one log
    Demo {
        /// Log id (recreated from scratch)
        #[arg(short, long, default_value = "demo")]
        id: String,

        /// Number of writer threads
        #[arg(short, long, default_value = "10")]
        writers: usize,

        /// Number of reader threads
        #[arg(long, default_value = "10")]
        readers: usize,

        /// Records written by each writer
        #[arg(short, long, default_value = "10000")]
        count: usize,

        /// Skip flushing after every write
        #[arg(long)]
        no_flush: bool,
    },

    /// Display the header of a log
    Inspect {
        /// Log id
        id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print published records as 64-bit integers
    Dump {
        /// Log id
        id: String,

        /// Start from this byte offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete the data and header files of a log
    Remove {
        /// Log id
        id: String,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let root = cli.root.as_deref();
    match cli.command {
        Commands::Demo {
            id,
            writers,
            readers,
            count,
            no_flush,
        } => {
            commands::demo::run(root, &id, writers, readers, count, !no_flush)?;
        }
        Commands::Inspect { id, format } => {
            commands::inspect::run(root, &id, &format)?;
        }
        Commands::Dump {
            id,
            offset,
            limit,
            format,
        } => {
            commands::dump::run(root, &id, offset, limit, &format)?;
        }
        Commands::Remove { id } => {
            commands::remove::run(root, &id)?;
        }
        Commands::Version => {
            println!("Runnel CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Runnel Core v{}", runnel_core::VERSION);
        }
    }

    Ok(())
}

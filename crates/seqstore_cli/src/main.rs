//! SeqStore CLI
//!
//! Command-line tools for SeqStore maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and segment layout
//! - `export` - Write all live records to a portable export file
//! - `import` - Add the records of an export file with fresh keys
//! - `compact` - Merge segments and drop deleted records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SeqStore command-line tools.
#[derive(Parser)]
#[command(name = "seqstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Show one line per segment
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Export live records in key order
    Export {
        /// Destination file
        file: PathBuf,
    },

    /// Import records from an export file
    Import {
        /// Source file
        file: PathBuf,
    },

    /// Merge all segments into one, dropping deleted records
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
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

    match cli.command {
        Commands::Inspect { segments, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, segments, &format)?;
        }
        Commands::Export { file } => {
            let path = cli.path.ok_or("Store path required for export")?;
            commands::export::run(&path, &file)?;
        }
        Commands::Import { file } => {
            let path = cli.path.ok_or("Store path required for import")?;
            commands::import::run(&path, &file)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("SeqStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SeqStore Core v{}", seqstore_core::VERSION);
        }
    }

    Ok(())
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Inspect and operate the tandem sync queue and mappings")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the tandem database (defaults to TANDEM_DB_PATH, then tandem.db)
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show queue counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List failed operations, newest first
    Failed {
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one queued operation
    Show {
        /// Operation ID
        id: String,
    },
    /// Move failed operations back to pending
    RetryFailed {
        /// Only requeue operations requeued fewer than this many times
        #[arg(long, default_value = "3")]
        max_retries: u32,
    },
    /// Delete failed operations older than a number of days
    Cleanup {
        /// Minimum age in days
        #[arg(long, default_value = "7")]
        days: u32,
    },
    /// Remove every operation from the queue
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Manage mapping documents
    Mappings {
        #[command(subcommand)]
        command: MappingCommands,
    },
    /// Process pending operations against the live systems
    Drain {
        /// Maximum number of operations to process
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum MappingCommands {
    /// List mapping names with their doctype and table
    List,
    /// Print one mapping document
    Show {
        name: String,
    },
    /// Import a JSON object of named mapping documents
    Import {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Delete a mapping
    Delete {
        name: String,
    },
}

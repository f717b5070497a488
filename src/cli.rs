//! CLI definitions for incidentd.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// incidentd CLI.
#[derive(Parser)]
#[command(name = "incidentd")]
#[command(about = "Durable task queue and watcher for incident workflows")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        env = "INCIDENTD_CONFIG",
        default_value = "config/incidentd.toml",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the watcher loop in the foreground (default)
    Watch,

    /// Enqueue a batch of tasks
    Enqueue {
        /// Task tag; repeat to enqueue several tasks
        #[arg(long = "task", required = true)]
        tasks: Vec<String>,

        /// JSON data for the task at the same position (defaults to `{}`)
        #[arg(long = "data")]
        data: Vec<String>,

        /// Stop at the first failed insert
        #[arg(long)]
        fail_fast: bool,
    },

    /// Show task counts per status
    Stats,

    /// List tasks with a given status
    List {
        /// pending, processed or failed
        #[arg(long, default_value = "pending")]
        status: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a single task
    Show {
        /// Task ID
        id: String,
    },

    /// List recorded notifications
    Notifications {
        /// pending, sent, failed or retry
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

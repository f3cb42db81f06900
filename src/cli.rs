//! CLI argument parsing for flowline.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fl",
    about = "Exhibition flows with timeline lanes and paged listings",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/flowline/logs/flowline.log"
)]
pub struct Cli {
    /// Path to the config file (default: $FLOWLINE_CONFIG or ~/.config/flowline/config.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Act as this user for local commands
    #[arg(short, long, global = true, default_value = "local")]
    pub user: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database
    Init,

    /// Create or overwrite a flow
    Save {
        /// Flow title
        title: String,

        /// Flow ID (generated when omitted)
        #[arg(short, long)]
        id: Option<String>,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Event type (exhibition, research, curation)
        #[arg(short = 't', long = "type")]
        category: Option<String>,

        /// Start (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Only write if the stored version matches (0: must not exist)
        #[arg(long)]
        expect_version: Option<u64>,
    },

    /// Show a flow
    Get {
        /// Flow ID
        id: String,

        /// Look up regardless of owner
        #[arg(short, long)]
        public: bool,
    },

    /// List your flows
    List {
        /// Page size
        #[arg(short, long)]
        limit: Option<usize>,

        /// Continue from a cursor
        #[arg(long)]
        cursor: Option<String>,

        /// Follow cursors to the end
        #[arg(short, long)]
        all: bool,
    },

    /// List everyone's flows, newest first
    Public {
        /// Page size
        #[arg(short, long)]
        limit: Option<usize>,

        /// Continue from a cursor
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Delete a flow
    Delete {
        /// Flow ID
        id: String,
    },

    /// Draw dated flows as timeline lanes
    Timeline {
        /// Include everyone's flows
        #[arg(short, long)]
        public: bool,

        /// Width of the bar area in characters
        #[arg(short, long, default_value = "60")]
        width: usize,
    },

    /// Run the HTTP server in foreground
    Serve,

    /// Check server status
    ServerStatus,

    /// Stop the running server
    ServerStop,
}

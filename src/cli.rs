//! CLI argument parsing for trace.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trace::{EdgeKind, Status};

#[derive(Parser)]
#[command(
    name = "trc",
    about = "Distributed issue tracker with git-friendly JSONL logs",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/trace/logs/trace.log"
)]
pub struct Cli {
    /// Collection directory (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register the directory as a collection
    Init {
        /// Display name (default: directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Create a new issue
    Create {
        /// Issue title
        title: String,

        /// Priority (0=critical, 4=backlog)
        #[arg(short, long, default_value = "2")]
        priority: u8,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Parent issue ID
        #[arg(long)]
        parent: Option<String>,
    },

    /// List issues
    List {
        /// Filter by status (open, in_progress, blocked, closed)
        #[arg(short, long)]
        status: Option<Status>,

        /// Include every collection
        #[arg(long)]
        all: bool,
    },

    /// Show issues that are ready to work on
    Ready {
        /// Include every collection
        #[arg(long)]
        all: bool,
    },

    /// Show blocked issues
    Blocked {
        /// Include every collection
        #[arg(long)]
        all: bool,
    },

    /// Show an issue with its edges and comments
    Show {
        /// Issue ID
        id: String,
    },

    /// Show an issue's subtree
    Tree {
        /// Issue ID
        id: String,
    },

    /// Update an issue's fields
    Update {
        /// Issue ID
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short = 'D', long)]
        description: Option<String>,

        #[arg(short, long)]
        priority: Option<u8>,
    },

    /// Start working on an issue (set status to in_progress)
    Start {
        /// Issue ID
        id: String,
    },

    /// Reopen a closed issue
    Reopen {
        /// Issue ID
        id: String,
    },

    /// Close one or more issues
    Close {
        /// Issue IDs
        #[arg(required = true)]
        ids: Vec<String>,

        /// Close even if children are still open
        #[arg(short, long)]
        force: bool,
    },

    /// Add a blocking dependency
    Block {
        /// Issue that is blocked
        blocked_id: String,

        /// Issue that is blocking (must be closed first)
        blocker_id: String,
    },

    /// Link two related issues
    Relate {
        from_id: String,
        to_id: String,
    },

    /// Change an issue's parent
    Reparent {
        /// Issue ID
        id: String,

        /// New parent ID
        #[arg(required_unless_present = "none")]
        parent: Option<String>,

        /// Make the issue top level
        #[arg(long, conflicts_with = "parent")]
        none: bool,
    },

    /// Remove an edge
    Unlink {
        from_id: String,
        to_id: String,

        /// Edge kind (parent, blocks, related)
        #[arg(short, long, default_value = "blocks")]
        kind: EdgeKind,
    },

    /// Move an issue to another collection
    Move {
        /// Issue ID
        id: String,

        /// Target collection directory
        target: PathBuf,

        /// Move the whole subtree
        #[arg(long)]
        with_children: bool,
    },

    /// Add a comment to an issue
    Comment {
        /// Issue ID
        id: String,

        /// Comment text
        text: String,

        #[arg(long, default_value = "user")]
        source: String,
    },

    /// Import and export every registered collection
    Sync,

    /// Hand issues whose id prefix does not match their collection to the
    /// collection owning that prefix
    Repair {
        /// Report without changing anything
        #[arg(long)]
        dry_run: bool,
    },
}

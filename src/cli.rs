//! CLI argument parsing for tg.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskgraph::{DependencyId, DependencyType, OwnerId, TaskId};

#[derive(Parser)]
#[command(
    name = "tg",
    about = "Task hierarchy and dependency graph engine",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/taskgraph/logs/taskgraph.log"
)]
pub struct Cli {
    /// Directory holding the .taskgraph store (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Owner whose graph to operate on
    #[arg(short = 'o', long, global = true, default_value = "1")]
    pub owner: OwnerId,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new store in the current directory
    Init,

    /// Create a new task
    Create {
        /// Task title
        title: String,

        /// Parent task ID
        #[arg(short, long)]
        parent: Option<TaskId>,
    },

    /// List tasks
    List {
        /// Include soft-deleted tasks
        #[arg(short, long)]
        all: bool,
    },

    /// Get a task by ID
    Get {
        /// Task ID
        id: TaskId,
    },

    /// Record progress on a task (0-100)
    Progress {
        /// Task ID
        id: TaskId,

        /// Completion percentage
        percentage: u8,
    },

    /// Mark a task 100% complete
    Complete {
        /// Task ID
        id: TaskId,
    },

    /// Move a task under another parent
    Move {
        /// Task ID
        id: TaskId,

        /// New parent (omit to move to the top level)
        #[arg(short, long)]
        parent: Option<TaskId>,
    },

    /// Show the direct children of a task
    Children {
        /// Task ID
        id: TaskId,
    },

    /// Soft-delete a task and its subtasks
    Delete {
        /// Task ID
        id: TaskId,
    },

    /// Make a task wait on another
    Depend {
        /// Task that waits
        dependent_id: TaskId,

        /// Task it waits on
        prerequisite_id: TaskId,

        /// Dependency type: fs, ss, ff, sf
        #[arg(short = 't', long = "type", default_value = "fs")]
        dependency_type: DependencyType,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,
    },

    /// Change a dependency's type or description
    Retype {
        /// Dependency ID
        id: DependencyId,

        /// New dependency type: fs, ss, ff, sf
        #[arg(short = 't', long = "type")]
        dependency_type: Option<DependencyType>,

        /// New description
        #[arg(short = 'D', long, conflicts_with = "clear_description")]
        description: Option<String>,

        /// Remove the description
        #[arg(long)]
        clear_description: bool,
    },

    /// Remove a dependency
    Undepend {
        /// Dependency ID
        id: DependencyId,
    },

    /// Show a task's prerequisites and dependents
    Deps {
        /// Task ID
        id: TaskId,
    },

    /// Show whether a task can start and finish
    Status {
        /// Task ID
        id: TaskId,
    },

    /// Run the daemon in foreground
    Daemon,

    /// Stop the running daemon
    DaemonStop,

    /// Check daemon status
    DaemonStatus,
}

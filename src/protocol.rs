//! IPC protocol types for daemon communication.
//!
//! Every graph request names the owner whose graph it touches.

use crate::store::StoreError;
use crate::types::{Dependency, DependencyId, DependencyType, OwnerId, Readiness, Task, TaskId};
use serde::{Deserialize, Serialize};

/// Request sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Create a task, optionally under a parent.
    CreateTask {
        owner: OwnerId,
        title: String,
        parent_id: Option<TaskId>,
    },

    /// Get a task by ID.
    GetTask { owner: OwnerId, id: TaskId },

    /// List an owner's tasks.
    ListTasks { owner: OwnerId, include_inactive: bool },

    /// Record progress on a task.
    SetCompletion {
        owner: OwnerId,
        id: TaskId,
        percentage: u8,
    },

    /// Move a task under another parent, or to the top level.
    SetParent {
        owner: OwnerId,
        id: TaskId,
        parent_id: Option<TaskId>,
    },

    /// Active direct children of a task.
    ListChildren { owner: OwnerId, id: TaskId },

    /// Active descendants of a task.
    CountDescendants { owner: OwnerId, id: TaskId },

    /// Ancestors of a task, nearest first.
    Ancestors { owner: OwnerId, id: TaskId },

    /// Soft-delete a task and its subtree.
    SoftDelete { owner: OwnerId, id: TaskId },

    /// Add a dependency edge.
    CreateDependency {
        owner: OwnerId,
        dependent_id: TaskId,
        prerequisite_id: TaskId,
        dependency_type: DependencyType,
        description: Option<String>,
    },

    /// Change an edge's type and/or description.
    ///
    /// `description` replaces the text when present; `clear_description`
    /// removes it and wins over `description`.
    UpdateDependency {
        owner: OwnerId,
        id: DependencyId,
        dependency_type: Option<DependencyType>,
        description: Option<String>,
        #[serde(default)]
        clear_description: bool,
    },

    /// Remove an edge.
    DeleteDependency { owner: OwnerId, id: DependencyId },

    /// Edges on which other tasks wait for this one.
    ListDependents { owner: OwnerId, id: TaskId },

    /// Edges on which this task waits.
    ListPrerequisites { owner: OwnerId, id: TaskId },

    /// Start and finish readiness of a task.
    Readiness { owner: OwnerId, id: TaskId },

    /// Shutdown the daemon.
    Shutdown,

    /// Ping to check if daemon is alive.
    Ping,
}

/// Response sent from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Single task response.
    Task { task: Task },

    /// Multiple tasks response.
    Tasks { tasks: Vec<Task> },

    /// Single dependency response.
    Dependency { dependency: Dependency },

    /// Multiple dependencies response.
    Dependencies { dependencies: Vec<Dependency> },

    /// Readiness of one task.
    Readiness { readiness: Readiness },

    /// Ids deactivated by a soft delete.
    Deleted { ids: Vec<TaskId> },

    /// A count.
    Count { count: usize },

    /// A yes/no answer.
    Bool { value: bool },

    /// Task not found.
    NotFound { id: TaskId },

    /// Operation succeeded.
    Ok,

    /// Pong response to ping.
    Pong,

    /// Error response. `code` is the store error code, or `INTERNAL`.
    Error { code: String, message: String },
}

impl Response {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            code: "INTERNAL".to_string(),
            message: message.into(),
        }
    }

    /// Error response carrying the store error code when there is one.
    pub fn from_report(report: &eyre::Report) -> Self {
        match StoreError::of(report) {
            Some(e) => Self::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            },
            None => Self::error(format!("{:#}", report)),
        }
    }
}

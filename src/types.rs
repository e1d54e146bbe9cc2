//! Core data types for the task graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Row id of a task.
pub type TaskId = i64;

/// Row id of a dependency edge.
pub type DependencyId = i64;

/// User id that scopes every graph query and mutation.
pub type OwnerId = i64;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 500;

/// Maximum dependency description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// A node of both the hierarchy and the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier, assigned by the store.
    pub id: TaskId,

    /// Owning user.
    pub owner_id: OwnerId,

    /// Parent in the subtask tree (same owner).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,

    /// Short description of the work
    pub title: String,

    /// Progress 0-100
    pub completion_percentage: u8,

    /// True iff completion_percentage == 100
    pub is_completed: bool,

    /// Soft-delete flag
    pub is_active: bool,

    /// When created
    pub created_at: DateTime<Utc>,

    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether work on the task has begun.
    ///
    /// Soft-deleted tasks never count as started, nor as completed.
    pub fn has_started(&self) -> bool {
        self.is_active && (self.is_completed || self.completion_percentage > 0)
    }

    /// Completion as seen by the readiness gates.
    pub fn has_finished(&self) -> bool {
        self.is_active && self.is_completed
    }

    /// Check whether this task satisfies a prerequisite condition.
    pub fn satisfies(&self, condition: Condition) -> bool {
        match condition {
            Condition::Completed => self.has_finished(),
            Condition::Started => self.has_started(),
        }
    }

    /// Validate the task's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;
        validate_completion(self.completion_percentage)?;
        if self.is_completed != (self.completion_percentage == 100) {
            return Err(ValidationError::CompletionMismatch);
        }
        if self.updated_at < self.created_at {
            return Err(ValidationError::InvalidTimestamp);
        }
        Ok(())
    }
}

/// Title: required, 1-500 chars, no control characters.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong);
    }
    if title.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

/// Completion: 0-100.
pub fn validate_completion(percentage: u8) -> Result<(), ValidationError> {
    if percentage > 100 {
        return Err(ValidationError::InvalidCompletion(percentage));
    }
    Ok(())
}

/// Description: at most 1000 chars.
pub fn validate_description(description: Option<&str>) -> Result<(), ValidationError> {
    match description {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LEN => Err(ValidationError::DescriptionTooLong),
        _ => Ok(()),
    }
}

/// A prerequisite relationship between two tasks of the same owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    /// Unique identifier, assigned by the store.
    pub id: DependencyId,

    /// Owner of both endpoint tasks.
    pub owner_id: OwnerId,

    /// The task that is blocked
    pub dependent_task_id: TaskId,

    /// The task that must satisfy a condition first
    pub prerequisite_task_id: TaskId,

    /// How the prerequisite gates the dependent
    pub dependency_type: DependencyType,

    /// Optional free text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// When the edge was created
    pub created_at: DateTime<Utc>,

    /// Last modification
    pub updated_at: DateTime<Utc>,
}

/// Scheduling relationship carried by a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Dependent can't start until the prerequisite finishes.
    #[default]
    FinishToStart,

    /// Dependent can't start until the prerequisite starts.
    StartToStart,

    /// Dependent can't finish until the prerequisite finishes.
    FinishToFinish,

    /// Dependent can't finish until the prerequisite starts.
    StartToFinish,
}

/// Which transition of the dependent task an edge gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Start,
    Finish,
}

/// What the prerequisite must have reached for the gate to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Started,
    Completed,
}

impl DependencyType {
    pub const ALL: [DependencyType; 4] = [
        DependencyType::FinishToStart,
        DependencyType::StartToStart,
        DependencyType::FinishToFinish,
        DependencyType::StartToFinish,
    ];

    /// The dependent-side transition this edge gates.
    pub fn gate(&self) -> Gate {
        match self {
            DependencyType::FinishToStart | DependencyType::StartToStart => Gate::Start,
            DependencyType::FinishToFinish | DependencyType::StartToFinish => Gate::Finish,
        }
    }

    /// The prerequisite-side state required to open the gate.
    pub fn condition(&self) -> Condition {
        match self {
            DependencyType::FinishToStart | DependencyType::FinishToFinish => Condition::Completed,
            DependencyType::StartToStart | DependencyType::StartToFinish => Condition::Started,
        }
    }

    /// Database / CLI representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::FinishToStart => "finish_to_start",
            DependencyType::StartToStart => "start_to_start",
            DependencyType::FinishToFinish => "finish_to_finish",
            DependencyType::StartToFinish => "start_to_finish",
        }
    }
}

impl FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "finish_to_start" | "fs" | "finishtostart" => Ok(DependencyType::FinishToStart),
            "start_to_start" | "ss" | "starttostart" => Ok(DependencyType::StartToStart),
            "finish_to_finish" | "ff" | "finishtofinish" => Ok(DependencyType::FinishToFinish),
            "start_to_finish" | "sf" | "starttofinish" => Ok(DependencyType::StartToFinish),
            other => Err(format!("unknown dependency type '{}'", other)),
        }
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Combined readiness snapshot of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub task_id: TaskId,
    pub can_start: bool,
    pub can_finish: bool,
}

/// Validation errors for tasks and dependencies.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTitle,
    TitleTooLong,
    InvalidCharacters,
    InvalidCompletion(u8),
    CompletionMismatch,
    DescriptionTooLong,
    InvalidTimestamp,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyTitle => write!(f, "title cannot be empty"),
            ValidationError::TitleTooLong => write!(f, "title exceeds {} characters", MAX_TITLE_LEN),
            ValidationError::InvalidCharacters => write!(f, "title contains control characters"),
            ValidationError::InvalidCompletion(p) => {
                write!(f, "completion percentage must be 0-100, got {}", p)
            }
            ValidationError::CompletionMismatch => {
                write!(f, "is_completed must be set exactly when completion is 100%")
            }
            ValidationError::DescriptionTooLong => {
                write!(f, "description exceeds {} characters", MAX_DESCRIPTION_LEN)
            }
            ValidationError::InvalidTimestamp => write!(f, "updated_at cannot be before created_at"),
        }
    }
}

impl std::error::Error for ValidationError {}

//! High-level store API for the task graph.

use crate::cascade::Cascade;
use crate::config::Config;
use crate::dependency::Dependencies;
use crate::hierarchy::Hierarchy;
use crate::locks::OwnerLocks;
use crate::readiness::ReadinessEvaluator;
use crate::storage::{GraphTx, Storage, is_busy, store_dir};
use crate::types::{
    Dependency, DependencyId, DependencyType, OwnerId, Readiness, Task, TaskId, ValidationError, validate_completion,
    validate_title,
};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Task missing or not owned by the caller.
    TaskNotFound(TaskId),
    /// Dependency missing or not owned by the caller.
    DependencyNotFound(DependencyId),
    /// A task cannot be its own parent or prerequisite.
    SelfReference,
    /// The new parent is a descendant of the task.
    CircularReference { task_id: TaskId, parent_id: TaskId },
    /// Adding this edge would create a cycle.
    CircularDependency { dependent_id: TaskId, prerequisite_id: TaskId },
    /// The hierarchy would grow deeper than allowed.
    DepthExceeded { max_depth: usize },
    /// The ordered pair already has an edge.
    DuplicateDependency { dependent_id: TaskId, prerequisite_id: TaskId },
    /// A bounded traversal ran past its bound.
    GraphCorruption(String),
    /// The write kept colliding with other writers.
    Conflict { attempts: u32 },
    /// Validation error.
    Validation(ValidationError),
}

impl StoreError {
    /// Find the store error inside a report, if there is one.
    pub fn of(report: &eyre::Report) -> Option<&StoreError> {
        report.chain().find_map(|cause| cause.downcast_ref::<StoreError>())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::TaskNotFound(_) | StoreError::DependencyNotFound(_) => "NOT_FOUND",
            StoreError::SelfReference => "SELF_REFERENCE",
            StoreError::CircularReference { .. } => "CIRCULAR_REFERENCE",
            StoreError::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            StoreError::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            StoreError::DuplicateDependency { .. } => "DUPLICATE_DEPENDENCY",
            StoreError::GraphCorruption(_) => "GRAPH_CORRUPTION",
            StoreError::Conflict { .. } => "CONFLICT",
            StoreError::Validation(_) => "VALIDATION",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::TaskNotFound(id) => write!(f, "task not found: {}", id),
            StoreError::DependencyNotFound(id) => write!(f, "dependency not found: {}", id),
            StoreError::SelfReference => write!(f, "a task cannot reference itself"),
            StoreError::CircularReference { task_id, parent_id } => write!(
                f,
                "task {} is an ancestor of {}; moving it there would create a cycle",
                task_id, parent_id
            ),
            StoreError::CircularDependency {
                dependent_id,
                prerequisite_id,
            } => write!(
                f,
                "task {} already (transitively) depends on {}; this edge would create a cycle",
                prerequisite_id, dependent_id
            ),
            StoreError::DepthExceeded { max_depth } => {
                write!(f, "subtasks cannot be nested more than {} levels deep", max_depth)
            }
            StoreError::DuplicateDependency {
                dependent_id,
                prerequisite_id,
            } => write!(
                f,
                "task {} already depends on task {}",
                dependent_id, prerequisite_id
            ),
            StoreError::GraphCorruption(detail) => write!(f, "task graph is corrupted: {}", detail),
            StoreError::Conflict { attempts } => {
                write!(f, "write conflicted with concurrent updates {} time(s); try again", attempts)
            }
            StoreError::Validation(e) => write!(f, "validation error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

fn validation(e: ValidationError) -> eyre::Report {
    eyre::eyre!(StoreError::Validation(e))
}

/// The main task graph store.
///
/// Cheap to clone; clones share the connection pool and the owner locks,
/// so one store can serve many threads.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    config: Config,
    pool: Mutex<Vec<Storage>>,
    locks: OwnerLocks,
}

impl Store {
    /// Initialize a new store in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let dir = store_dir(root);
        fs::create_dir_all(&dir).context("Failed to create .taskgraph directory")?;
        let config = Config::load(&dir)?;
        Self::init_with_config(root, config)
    }

    /// Initialize a new store with explicit settings.
    pub fn init_with_config(root: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Storage::init(root, &config)?;
        Ok(Self::with_storage(root, config, storage))
    }

    /// Open an existing store, reading `.taskgraph/config.yaml` if present.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(&store_dir(root))?;
        Self::open_with_config(root, config)
    }

    /// Open an existing store with explicit settings.
    pub fn open_with_config(root: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(root, &config)?;
        Ok(Self::with_storage(root, config, storage))
    }

    fn with_storage(root: &Path, config: Config, storage: Storage) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                config,
                pool: Mutex::new(vec![storage]),
                locks: OwnerLocks::new(),
            }),
        }
    }

    /// Directory the store was opened from.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // ---------------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------------

    /// Create an active task, optionally under a parent.
    pub fn create_task(&self, owner: OwnerId, title: &str, parent_id: Option<TaskId>) -> Result<Task> {
        validate_title(title).map_err(validation)?;
        let limits = self.inner.config.limits();

        let task = self.write(owner, "create_task", |tx, now| {
            if let Some(parent_id) = parent_id {
                Hierarchy::new(tx, owner, limits).check_placement(None, parent_id, 0)?;
            }
            tx.insert_task(owner, parent_id, title, now)
        })?;

        log::debug!("Created task {} for owner {} (parent {:?})", task.id, owner, parent_id);
        Ok(task)
    }

    /// Get a task by id; soft-deleted tasks are included.
    pub fn get_task(&self, owner: OwnerId, id: TaskId) -> Result<Option<Task>> {
        self.read(|tx| tx.task(owner, id))
    }

    /// List an owner's tasks in creation order.
    pub fn list_tasks(&self, owner: OwnerId, include_inactive: bool) -> Result<Vec<Task>> {
        self.read(|tx| tx.tasks(owner, include_inactive))
    }

    /// Record progress. 100% marks the task completed, anything less reopens it.
    pub fn set_completion(&self, owner: OwnerId, id: TaskId, percentage: u8) -> Result<Task> {
        validate_completion(percentage).map_err(validation)?;
        let limits = self.inner.config.limits();

        self.write(owner, "set_completion", |tx, now| {
            let task = Hierarchy::new(tx, owner, limits).active_task(id)?;
            tx.update_completion(id, percentage, now)?;
            Ok(Task {
                completion_percentage: percentage,
                is_completed: percentage == 100,
                updated_at: now,
                ..task
            })
        })
    }

    /// Mark a task 100% complete.
    pub fn complete(&self, owner: OwnerId, id: TaskId) -> Result<Task> {
        self.set_completion(owner, id, 100)
    }

    // ---------------------------------------------------------------------
    // Hierarchy
    // ---------------------------------------------------------------------

    /// Move a task under a new parent, or detach it with `None`.
    pub fn set_parent(&self, owner: OwnerId, task_id: TaskId, parent_id: Option<TaskId>) -> Result<Task> {
        let limits = self.inner.config.limits();
        let task = self.write(owner, "set_parent", |tx, now| {
            Hierarchy::new(tx, owner, limits).set_parent(task_id, parent_id, now)
        })?;

        log::debug!("Task {} of owner {} now has parent {:?}", task_id, owner, parent_id);
        Ok(task)
    }

    /// Active direct children of a task.
    pub fn list_children(&self, owner: OwnerId, task_id: TaskId) -> Result<Vec<Task>> {
        let limits = self.inner.config.limits();
        self.read(|tx| Hierarchy::new(tx, owner, limits).list_children(task_id))
    }

    /// Active descendants of a task at every level.
    pub fn count_descendants(&self, owner: OwnerId, task_id: TaskId) -> Result<usize> {
        let limits = self.inner.config.limits();
        self.read(|tx| Hierarchy::new(tx, owner, limits).count_descendants(task_id))
    }

    /// Ancestors of a task, nearest first.
    pub fn ancestors(&self, owner: OwnerId, task_id: TaskId) -> Result<Vec<Task>> {
        let limits = self.inner.config.limits();
        self.read(|tx| Hierarchy::new(tx, owner, limits).ancestors(task_id))
    }

    // ---------------------------------------------------------------------
    // Dependencies
    // ---------------------------------------------------------------------

    /// Make `dependent_id` wait on `prerequisite_id`.
    pub fn create_dependency(
        &self,
        owner: OwnerId,
        dependent_id: TaskId,
        prerequisite_id: TaskId,
        dependency_type: DependencyType,
        description: Option<&str>,
    ) -> Result<Dependency> {
        let dependency = self.write(owner, "create_dependency", |tx, now| {
            Dependencies::new(tx, owner).create(dependent_id, prerequisite_id, dependency_type, description, now)
        })?;

        log::debug!(
            "Created dependency {} for owner {}: {} waits on {} ({})",
            dependency.id,
            owner,
            dependent_id,
            prerequisite_id,
            dependency_type
        );
        Ok(dependency)
    }

    /// Change an edge's type and/or description; `None` keeps the current value.
    pub fn update_dependency(
        &self,
        owner: OwnerId,
        id: DependencyId,
        dependency_type: Option<DependencyType>,
        description: Option<Option<&str>>,
    ) -> Result<Dependency> {
        self.write(owner, "update_dependency", |tx, now| {
            Dependencies::new(tx, owner).update(id, dependency_type, description, now)
        })
    }

    /// Remove an edge. Returns false when there was nothing of the caller's to remove.
    pub fn delete_dependency(&self, owner: OwnerId, id: DependencyId) -> Result<bool> {
        let removed = self.write(owner, "delete_dependency", |tx, _| Dependencies::new(tx, owner).delete(id))?;
        if removed {
            log::debug!("Deleted dependency {} for owner {}", id, owner);
        }
        Ok(removed)
    }

    /// Get an edge by id.
    pub fn get_dependency(&self, owner: OwnerId, id: DependencyId) -> Result<Option<Dependency>> {
        self.read(|tx| tx.dependency(owner, id))
    }

    /// Edges on which other tasks wait for `task_id`.
    pub fn list_dependents(&self, owner: OwnerId, task_id: TaskId) -> Result<Vec<Dependency>> {
        self.read(|tx| Dependencies::new(tx, owner).list_dependents(task_id))
    }

    /// Edges on which `task_id` waits.
    pub fn list_prerequisites(&self, owner: OwnerId, task_id: TaskId) -> Result<Vec<Dependency>> {
        self.read(|tx| Dependencies::new(tx, owner).list_prerequisites(task_id))
    }

    // ---------------------------------------------------------------------
    // Readiness
    // ---------------------------------------------------------------------

    pub fn is_blocked(&self, owner: OwnerId, task_id: TaskId) -> Result<bool> {
        self.read(|tx| ReadinessEvaluator::new(tx, owner).is_blocked(task_id))
    }

    pub fn can_start(&self, owner: OwnerId, task_id: TaskId) -> Result<bool> {
        self.read(|tx| ReadinessEvaluator::new(tx, owner).can_start(task_id))
    }

    pub fn is_finish_blocked(&self, owner: OwnerId, task_id: TaskId) -> Result<bool> {
        self.read(|tx| ReadinessEvaluator::new(tx, owner).is_finish_blocked(task_id))
    }

    pub fn can_finish(&self, owner: OwnerId, task_id: TaskId) -> Result<bool> {
        self.read(|tx| ReadinessEvaluator::new(tx, owner).can_finish(task_id))
    }

    /// Both gates at once.
    pub fn readiness(&self, owner: OwnerId, task_id: TaskId) -> Result<Readiness> {
        self.read(|tx| ReadinessEvaluator::new(tx, owner).readiness(task_id))
    }

    // ---------------------------------------------------------------------
    // Cascade
    // ---------------------------------------------------------------------

    /// Soft-delete a task and its whole active subtree.
    pub fn soft_delete(&self, owner: OwnerId, task_id: TaskId) -> Result<Vec<TaskId>> {
        let limits = self.inner.config.limits();
        self.write(owner, "soft_delete", |tx, now| {
            Cascade::new(tx, owner, limits).soft_delete(task_id, now)
        })
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    /// Run a read against a consistent snapshot.
    fn read<T>(&self, f: impl FnOnce(&GraphTx<'_>) -> Result<T>) -> Result<T> {
        let mut storage = self.checkout()?;
        let result = storage.read(f);
        self.checkin(storage);
        result
    }

    /// Run a mutation for `owner` atomically.
    ///
    /// The owner's lock is held throughout, so the validation inside `f` and
    /// its write can't interleave with another mutation of the same graph.
    /// A locked database (another owner's writer, another process) is
    /// retried with backoff and reported as `Conflict` once attempts run out.
    fn write<T>(&self, owner: OwnerId, op: &str, f: impl Fn(&GraphTx<'_>, DateTime<Utc>) -> Result<T>) -> Result<T> {
        let config = &self.inner.config;
        let lock = self.inner.locks.lock_for(owner);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut storage = self.checkout()?;
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let now = Utc::now();
            match storage.write(|tx| f(tx, now)) {
                Err(e) if is_busy(&e) => {
                    if attempt >= config.max_write_attempts {
                        log::warn!("{} for owner {}: giving up after {} attempt(s)", op, owner, attempt);
                        break Err(eyre::eyre!(StoreError::Conflict { attempts: attempt }));
                    }
                    log::warn!(
                        "{} for owner {}: database busy (attempt {}/{}), retrying",
                        op,
                        owner,
                        attempt,
                        config.max_write_attempts
                    );
                    thread::sleep(config.retry_backoff(attempt));
                }
                other => break other,
            }
        };

        self.checkin(storage);
        result
    }

    fn checkout(&self) -> Result<Storage> {
        let pooled = self.inner.pool.lock().unwrap_or_else(PoisonError::into_inner).pop();
        match pooled {
            Some(storage) => Ok(storage),
            None => Storage::attach(&self.inner.root, &self.inner.config).context("Failed to open connection"),
        }
    }

    fn checkin(&self, storage: Storage) {
        let mut pool = self.inner.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < self.inner.config.pool_size {
            pool.push(storage);
        }
    }
}

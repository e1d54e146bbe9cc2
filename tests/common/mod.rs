//! Shared test infrastructure for taskgraph integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use taskgraph::{Dependency, DependencyType, OwnerId, Store, StoreError, Task, TaskId};
use tempfile::TempDir;

/// Owner used by tests that only need one graph.
pub const OWNER: OwnerId = 1;

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        Self { temp_dir, store }
    }

    /// Create a top-level task.
    pub fn create_task(&self, title: &str) -> Task {
        self.store.create_task(OWNER, title, None).expect("Failed to create task")
    }

    /// Create a subtask.
    pub fn create_child(&self, title: &str, parent: &Task) -> Task {
        self.store
            .create_task(OWNER, title, Some(parent.id))
            .expect("Failed to create subtask")
    }

    /// Create a chain of `len` tasks, each the child of the previous one.
    /// The first task is at depth 0.
    pub fn create_chain(&self, len: usize) -> Vec<Task> {
        let mut chain: Vec<Task> = Vec::with_capacity(len);
        for i in 0..len {
            let parent = chain.last().map(|t| t.id);
            let task = self
                .store
                .create_task(OWNER, &format!("Level {}", i), parent)
                .expect("Failed to create chain task");
            chain.push(task);
        }
        chain
    }

    /// `dependent` waits on `prerequisite`.
    pub fn depend(&self, dependent: &Task, prerequisite: &Task, kind: DependencyType) -> Dependency {
        self.store
            .create_dependency(OWNER, dependent.id, prerequisite.id, kind, None)
            .expect("Failed to create dependency")
    }

    pub fn progress(&self, task: &Task, percentage: u8) -> Task {
        self.store
            .set_completion(OWNER, task.id, percentage)
            .expect("Failed to set completion")
    }

    pub fn complete(&self, task: &Task) -> Task {
        self.store.complete(OWNER, task.id).expect("Failed to complete task")
    }

    /// Reload a task, including soft-deleted ones.
    pub fn reload(&self, task: &Task) -> Task {
        self.store
            .get_task(OWNER, task.id)
            .expect("Failed to get task")
            .expect("Task vanished")
    }

    /// Number of parent links between a task and its root.
    pub fn depth(&self, id: TaskId) -> usize {
        self.store.ancestors(OWNER, id).expect("Failed to walk ancestors").len()
    }

    pub fn assert_can_start(&self, task: &Task) {
        assert!(
            self.store.can_start(OWNER, task.id).expect("Failed to evaluate readiness"),
            "Expected task {} to be able to start",
            task.id
        );
    }

    pub fn assert_blocked(&self, task: &Task) {
        assert!(
            self.store.is_blocked(OWNER, task.id).expect("Failed to evaluate readiness"),
            "Expected task {} to be blocked from starting",
            task.id
        );
    }

    pub fn assert_can_finish(&self, task: &Task) {
        assert!(
            self.store.can_finish(OWNER, task.id).expect("Failed to evaluate readiness"),
            "Expected task {} to be able to finish",
            task.id
        );
    }

    pub fn assert_finish_blocked(&self, task: &Task) {
        assert!(
            self.store
                .is_finish_blocked(OWNER, task.id)
                .expect("Failed to evaluate readiness"),
            "Expected task {} to be blocked from finishing",
            task.id
        );
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// The typed store error behind a failed result.
pub fn store_error<T: std::fmt::Debug>(result: eyre::Result<T>) -> StoreError {
    let report = result.expect_err("Expected an error");
    StoreError::of(&report)
        .cloned()
        .unwrap_or_else(|| panic!("Expected a StoreError, got: {:#}", report))
}

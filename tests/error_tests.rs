//! Integration tests for error handling.
//!
//! Tests that each rejected operation reports the invariant it violated
//! and leaves the graph untouched.

mod common;

use common::{OWNER, TestEnv, store_error};
use std::fs;
use taskgraph::{Config, DependencyType, MAX_TITLE_LEN, Store, StoreError, ValidationError};
use tempfile::TempDir;

// =============================================================================
// Not Found Tests
// =============================================================================

#[test]
fn test_get_nonexistent_task_returns_none() {
    let env = TestEnv::new();
    assert!(env.store.get_task(OWNER, 404).unwrap().is_none());
    assert!(env.store.get_dependency(OWNER, 404).unwrap().is_none());
}

#[test]
fn test_mutating_nonexistent_task_fails() {
    let env = TestEnv::new();

    assert_eq!(store_error(env.store.complete(OWNER, 404)), StoreError::TaskNotFound(404));
    assert_eq!(store_error(env.store.set_parent(OWNER, 404, None)), StoreError::TaskNotFound(404));
    assert_eq!(store_error(env.store.soft_delete(OWNER, 404)), StoreError::TaskNotFound(404));
    assert_eq!(
        store_error(env.store.update_dependency(OWNER, 404, None, None)),
        StoreError::DependencyNotFound(404)
    );
}

#[test]
fn test_edge_to_nonexistent_task_fails() {
    let env = TestEnv::new();
    let task = env.create_task("Real task");

    assert_eq!(
        store_error(
            env.store
                .create_dependency(OWNER, task.id, 404, DependencyType::FinishToStart, None)
        ),
        StoreError::TaskNotFound(404)
    );
    assert_eq!(
        store_error(
            env.store
                .create_dependency(OWNER, 404, task.id, DependencyType::FinishToStart, None)
        ),
        StoreError::TaskNotFound(404)
    );
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_create_empty_title_fails() {
    let env = TestEnv::new();
    assert_eq!(
        store_error(env.store.create_task(OWNER, "", None)),
        StoreError::Validation(ValidationError::EmptyTitle)
    );
}

#[test]
fn test_create_title_too_long_fails() {
    let env = TestEnv::new();
    let title = "a".repeat(MAX_TITLE_LEN + 1);
    assert_eq!(
        store_error(env.store.create_task(OWNER, &title, None)),
        StoreError::Validation(ValidationError::TitleTooLong)
    );

    let title = "a".repeat(MAX_TITLE_LEN);
    assert!(env.store.create_task(OWNER, &title, None).is_ok());
}

#[test]
fn test_create_control_chars_in_title_fails() {
    let env = TestEnv::new();
    assert_eq!(
        store_error(env.store.create_task(OWNER, "line\nbreak", None)),
        StoreError::Validation(ValidationError::InvalidCharacters)
    );
}

#[test]
fn test_unicode_title_is_accepted() {
    let env = TestEnv::new();
    let task = env.create_task("Ship it 🚀 发布");
    assert_eq!(env.reload(&task).title, "Ship it 🚀 发布");
}

#[test]
fn test_completion_over_100_fails() {
    let env = TestEnv::new();
    let task = env.create_task("Task");
    assert_eq!(
        store_error(env.store.set_completion(OWNER, task.id, 101)),
        StoreError::Validation(ValidationError::InvalidCompletion(101))
    );
    assert_eq!(env.reload(&task).completion_percentage, 0);
}

// =============================================================================
// Error Reporting Tests
// =============================================================================

#[test]
fn test_codes_are_stable() {
    let cases = [
        (StoreError::TaskNotFound(1), "NOT_FOUND"),
        (StoreError::DependencyNotFound(1), "NOT_FOUND"),
        (StoreError::SelfReference, "SELF_REFERENCE"),
        (
            StoreError::CircularReference {
                task_id: 1,
                parent_id: 2,
            },
            "CIRCULAR_REFERENCE",
        ),
        (
            StoreError::CircularDependency {
                dependent_id: 1,
                prerequisite_id: 2,
            },
            "CIRCULAR_DEPENDENCY",
        ),
        (StoreError::DepthExceeded { max_depth: 5 }, "DEPTH_EXCEEDED"),
        (
            StoreError::DuplicateDependency {
                dependent_id: 1,
                prerequisite_id: 2,
            },
            "DUPLICATE_DEPENDENCY",
        ),
        (StoreError::GraphCorruption("loop".to_string()), "GRAPH_CORRUPTION"),
        (StoreError::Conflict { attempts: 3 }, "CONFLICT"),
        (StoreError::Validation(ValidationError::EmptyTitle), "VALIDATION"),
    ];

    for (err, code) in cases {
        assert_eq!(err.code(), code);
    }
}

#[test]
fn test_messages_name_the_invariant() {
    let env = TestEnv::new();
    let chain = env.create_chain(6);

    let report = env
        .store
        .create_task(OWNER, "Too deep", Some(chain[5].id))
        .unwrap_err();
    assert!(report.to_string().contains("5 levels"), "message was: {}", report);

    let a = env.create_task("A");
    let b = env.create_task("B");
    env.depend(&a, &b, DependencyType::FinishToStart);
    let report = env
        .store
        .create_dependency(OWNER, b.id, a.id, DependencyType::FinishToStart, None)
        .unwrap_err();
    assert!(report.to_string().contains("cycle"), "message was: {}", report);
}

// =============================================================================
// Storage Tests
// =============================================================================

#[test]
fn test_init_creates_store_directory() {
    let temp = TempDir::new().unwrap();
    Store::init(temp.path()).unwrap();

    assert!(temp.path().join(".taskgraph").exists());
    assert!(temp.path().join(".taskgraph/taskgraph.db").exists());
}

#[test]
fn test_open_existing_store() {
    let temp = TempDir::new().unwrap();

    {
        let store = Store::init(temp.path()).unwrap();
        store.create_task(OWNER, "Test task", None).unwrap();
    }

    {
        let store = Store::open(temp.path()).unwrap();
        let tasks = store.list_tasks(OWNER, false).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Test task");
    }
}

#[test]
fn test_open_nonexistent_store_fails() {
    let temp = TempDir::new().unwrap();
    let result = Store::open(temp.path());
    assert!(result.is_err());
}

#[test]
fn test_config_file_overrides_depth() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join(".taskgraph")).unwrap();
    fs::write(temp.path().join(".taskgraph/config.yaml"), "max_depth: 2\n").unwrap();

    let store = Store::init(temp.path()).unwrap();
    assert_eq!(store.config().max_depth, 2);

    let root = store.create_task(OWNER, "Root", None).unwrap();
    let child = store.create_task(OWNER, "Child", Some(root.id)).unwrap();
    let grandchild = store.create_task(OWNER, "Grandchild", Some(child.id)).unwrap();
    assert_eq!(
        store_error(store.create_task(OWNER, "Too deep", Some(grandchild.id))),
        StoreError::DepthExceeded { max_depth: 2 }
    );
}

#[test]
fn test_invalid_config_file_fails() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join(".taskgraph")).unwrap();
    fs::write(temp.path().join(".taskgraph/config.yaml"), "max_dept: 2\n").unwrap();

    assert!(Store::init(temp.path()).is_err());
}

#[test]
fn test_open_with_explicit_config() {
    let temp = TempDir::new().unwrap();
    Store::init(temp.path()).unwrap();

    let config = Config {
        max_depth: 1,
        ancestor_walk_cap: 4,
        ..Config::default()
    };
    let store = Store::open_with_config(temp.path(), config).unwrap();
    let root = store.create_task(OWNER, "Root", None).unwrap();
    let child = store.create_task(OWNER, "Child", Some(root.id)).unwrap();
    assert_eq!(
        store_error(store.create_task(OWNER, "Grandchild", Some(child.id))),
        StoreError::DepthExceeded { max_depth: 1 }
    );
}

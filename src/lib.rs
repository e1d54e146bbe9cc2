//! Taskgraph: a per-owner task graph with hierarchy and prerequisite edges.
//!
//! Tasks form a bounded-depth subtask tree. Separately, typed dependency
//! edges form an acyclic graph that decides whether a task may start or
//! finish. State lives in SQLite under `.taskgraph/`, and every mutation
//! validates and writes inside one transaction.
//!
//! # Example
//!
//! ```no_run
//! use taskgraph::{DependencyType, Store};
//! use std::path::Path;
//!
//! let store = Store::init(Path::new(".")).unwrap();
//! let owner = 1;
//!
//! // A small plan
//! let design = store.create_task(owner, "Design schema", None).unwrap();
//! let build = store.create_task(owner, "Build API", None).unwrap();
//! store.create_task(owner, "Write handlers", Some(build.id)).unwrap();
//!
//! // Building waits on the design being finished
//! store
//!     .create_dependency(owner, build.id, design.id, DependencyType::FinishToStart, None)
//!     .unwrap();
//! assert!(store.is_blocked(owner, build.id).unwrap());
//!
//! store.complete(owner, design.id).unwrap();
//! assert!(store.can_start(owner, build.id).unwrap());
//! ```

mod cascade;
mod dependency;
mod hierarchy;
mod locks;
mod readiness;
mod storage;
mod store;
mod types;

pub mod client;
pub mod config;
pub mod daemon;
pub mod protocol;

// Re-export public API
pub use client::Client;
pub use config::Config;
pub use daemon::{Daemon, DaemonConfig, is_daemon_running, start_daemon};
pub use protocol::{Request, Response};
pub use storage::{DB_FILE, TASKGRAPH_DIR};
pub use store::{Store, StoreError};
pub use types::{
    Dependency, DependencyId, DependencyType, OwnerId, Readiness, Task, TaskId, ValidationError, MAX_DESCRIPTION_LEN,
    MAX_TITLE_LEN,
};

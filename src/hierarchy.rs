//! Hierarchy manager: the single-parent subtask tree.
//!
//! The tree is a derived view over `tasks.parent_id`. Every walk over it is
//! bounded by [`Limits::walk_cap`] so a corrupted store yields
//! [`StoreError::GraphCorruption`] instead of an endless loop.

use crate::config::Limits;
use crate::storage::GraphTx;
use crate::store::StoreError;
use crate::types::{OwnerId, Task, TaskId};
use chrono::{DateTime, Utc};
use eyre::Result;

/// Tree operations for one owner within one transaction.
pub struct Hierarchy<'a, 'tx> {
    tx: &'a GraphTx<'tx>,
    owner: OwnerId,
    limits: Limits,
}

impl<'a, 'tx> Hierarchy<'a, 'tx> {
    pub fn new(tx: &'a GraphTx<'tx>, owner: OwnerId, limits: Limits) -> Self {
        Self { tx, owner, limits }
    }

    /// A task owned by the caller, active or not.
    pub fn owned_task(&self, id: TaskId) -> Result<Task> {
        self.tx
            .task(self.owner, id)?
            .ok_or_else(|| eyre::eyre!(StoreError::TaskNotFound(id)))
    }

    /// A task owned by the caller that has not been soft-deleted.
    pub fn active_task(&self, id: TaskId) -> Result<Task> {
        match self.tx.task(self.owner, id)? {
            Some(task) if task.is_active => Ok(task),
            _ => Err(eyre::eyre!(StoreError::TaskNotFound(id))),
        }
    }

    /// Ancestors of a task, nearest first.
    pub fn ancestors(&self, id: TaskId) -> Result<Vec<Task>> {
        let task = self.owned_task(id)?;
        let mut chain = Vec::new();
        let mut next = task.parent_id;

        while let Some(parent_id) = next {
            if chain.len() >= self.limits.walk_cap {
                return Err(self.corruption(format!(
                    "ancestor chain of task {} exceeds {} links",
                    id, self.limits.walk_cap
                )));
            }
            let parent = self.tx.task(self.owner, parent_id)?.ok_or_else(|| {
                self.corruption(format!("task {} references missing parent {}", id, parent_id))
            })?;
            next = parent.parent_id;
            chain.push(parent);
        }

        Ok(chain)
    }

    /// Number of parent links between a task and its root.
    pub fn depth_of(&self, id: TaskId) -> Result<usize> {
        Ok(self.ancestors(id)?.len())
    }

    /// Levels of active descendants below a task (0 for a leaf).
    pub fn subtree_height(&self, id: TaskId) -> Result<usize> {
        let mut frontier = vec![id];
        let mut height = 0;

        loop {
            let next = self.tx.child_ids(self.owner, &frontier)?;
            if next.is_empty() {
                return Ok(height);
            }
            height += 1;
            if height > self.limits.walk_cap {
                return Err(self.corruption(format!(
                    "subtree of task {} is deeper than {} levels",
                    id, self.limits.walk_cap
                )));
            }
            frontier = next;
        }
    }

    /// Check that a subtree of the given height may hang under `parent_id`.
    ///
    /// `child` is the task being moved, or `None` for a task not yet created.
    /// A cycle is reported in preference to a depth violation.
    pub fn check_placement(&self, child: Option<TaskId>, parent_id: TaskId, height: usize) -> Result<()> {
        if child == Some(parent_id) {
            return Err(eyre::eyre!(StoreError::SelfReference));
        }

        let parent = self.active_task(parent_id)?;
        let mut links = 0;
        let mut current = parent;

        loop {
            if Some(current.id) == child {
                return Err(eyre::eyre!(StoreError::CircularReference {
                    task_id: current.id,
                    parent_id,
                }));
            }
            let Some(next) = current.parent_id else {
                break;
            };
            links += 1;
            if links > self.limits.walk_cap {
                return Err(self.corruption(format!(
                    "ancestor chain of task {} exceeds {} links",
                    parent_id, self.limits.walk_cap
                )));
            }
            current = self.tx.task(self.owner, next)?.ok_or_else(|| {
                self.corruption(format!(
                    "task {} references missing parent {}",
                    current.id, next
                ))
            })?;
        }

        // `links` is the parent's depth; the new subtree starts one below it
        if links + 1 + height > self.limits.max_depth {
            return Err(eyre::eyre!(StoreError::DepthExceeded {
                max_depth: self.limits.max_depth
            }));
        }

        Ok(())
    }

    /// Re-parent a task, or detach it with `None`.
    pub fn set_parent(&self, task_id: TaskId, new_parent: Option<TaskId>, now: DateTime<Utc>) -> Result<Task> {
        if new_parent == Some(task_id) {
            return Err(eyre::eyre!(StoreError::SelfReference));
        }

        let task = self.active_task(task_id)?;

        if let Some(parent_id) = new_parent {
            let height = self.subtree_height(task_id)?;
            self.check_placement(Some(task_id), parent_id, height)?;
        }

        self.tx.update_parent(task_id, new_parent, now)?;

        Ok(Task {
            parent_id: new_parent,
            updated_at: now,
            ..task
        })
    }

    /// Active direct children of a task.
    pub fn list_children(&self, id: TaskId) -> Result<Vec<Task>> {
        self.owned_task(id)?;
        self.tx.children(self.owner, id)
    }

    /// Active descendants of a task at any level.
    pub fn count_descendants(&self, id: TaskId) -> Result<usize> {
        self.owned_task(id)?;
        match self.tx.count_descendants(self.owner, id, self.limits.walk_cap)? {
            Some(count) => Ok(count),
            None => Err(self.corruption(format!(
                "subtree of task {} is deeper than {} levels",
                id, self.limits.walk_cap
            ))),
        }
    }

    fn corruption(&self, detail: String) -> eyre::Report {
        log::error!("Graph corruption for owner {}: {}", self.owner, detail);
        eyre::eyre!(StoreError::GraphCorruption(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Storage;
    use tempfile::TempDir;

    const OWNER: OwnerId = 3;

    fn setup() -> (TempDir, Storage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::init(temp_dir.path(), &Config::default()).unwrap();
        (temp_dir, storage)
    }

    /// Insert a chain root -> ... of `len` tasks, returning ids from the root down.
    fn chain(storage: &mut Storage, len: usize) -> Vec<TaskId> {
        storage
            .write(|tx| {
                let mut ids = Vec::new();
                let mut parent = None;
                for i in 0..len {
                    let task = tx.insert_task(OWNER, parent, &format!("Level {}", i), Utc::now())?;
                    parent = Some(task.id);
                    ids.push(task.id);
                }
                Ok(ids)
            })
            .unwrap()
    }

    fn err_of(report: eyre::Report) -> StoreError {
        StoreError::of(&report).cloned().expect("expected a StoreError")
    }

    #[test]
    fn test_depth_and_ancestors() {
        let (_temp_dir, mut storage) = setup();
        let ids = chain(&mut storage, 4);

        storage
            .read(|tx| {
                let h = Hierarchy::new(tx, OWNER, Limits::default());
                assert_eq!(h.depth_of(ids[0])?, 0);
                assert_eq!(h.depth_of(ids[3])?, 3);
                let ancestors: Vec<TaskId> = h.ancestors(ids[3])?.iter().map(|t| t.id).collect();
                assert_eq!(ancestors, vec![ids[2], ids[1], ids[0]]);
                assert_eq!(h.subtree_height(ids[0])?, 3);
                assert_eq!(h.subtree_height(ids[3])?, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_placement_depth_boundary() {
        let (_temp_dir, mut storage) = setup();
        // Depths 0..=5
        let ids = chain(&mut storage, 6);

        storage
            .read(|tx| {
                let h = Hierarchy::new(tx, OWNER, Limits::default());
                // Child of depth 4 lands at depth 5: allowed
                assert!(h.check_placement(None, ids[4], 0).is_ok());
                // Child of depth 5 would land at depth 6
                let err = err_of(h.check_placement(None, ids[5], 0).unwrap_err());
                assert_eq!(err, StoreError::DepthExceeded { max_depth: 5 });
                // Subtree height counts too
                let err = err_of(h.check_placement(None, ids[3], 2).unwrap_err());
                assert_eq!(err, StoreError::DepthExceeded { max_depth: 5 });
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_placement_under_descendant_is_circular() {
        let (_temp_dir, mut storage) = setup();
        let ids = chain(&mut storage, 3);

        storage
            .read(|tx| {
                let h = Hierarchy::new(tx, OWNER, Limits::default());
                let err = err_of(h.check_placement(Some(ids[0]), ids[2], 2).unwrap_err());
                assert!(matches!(err, StoreError::CircularReference { .. }));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_corrupted_cycle_is_bounded() {
        let (_temp_dir, mut storage) = setup();
        let ids = chain(&mut storage, 2);

        // Forge a two-node parent cycle behind the manager's back
        storage
            .write(|tx| {
                tx.update_parent(ids[0], Some(ids[1]), Utc::now())?;
                Ok(())
            })
            .unwrap();

        let outsider = storage
            .write(|tx| tx.insert_task(OWNER, None, "Outsider", Utc::now()))
            .unwrap();

        storage
            .read(|tx| {
                let h = Hierarchy::new(tx, OWNER, Limits::default());
                let err = err_of(h.ancestors(ids[1]).unwrap_err());
                assert!(matches!(err, StoreError::GraphCorruption(_)));
                let err = err_of(h.check_placement(Some(outsider.id), ids[0], 0).unwrap_err());
                assert!(matches!(err, StoreError::GraphCorruption(_)));
                let err = err_of(h.subtree_height(ids[0]).unwrap_err());
                assert!(matches!(err, StoreError::GraphCorruption(_)));
                let err = err_of(h.count_descendants(ids[0]).unwrap_err());
                assert!(matches!(err, StoreError::GraphCorruption(_)));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_set_parent_and_detach() {
        let (_temp_dir, mut storage) = setup();
        let ids = chain(&mut storage, 2);
        let loose = storage
            .write(|tx| tx.insert_task(OWNER, None, "Loose", Utc::now()))
            .unwrap();

        let moved = storage
            .write(|tx| Hierarchy::new(tx, OWNER, Limits::default()).set_parent(loose.id, Some(ids[1]), Utc::now()))
            .unwrap();
        assert_eq!(moved.parent_id, Some(ids[1]));

        let detached = storage
            .write(|tx| Hierarchy::new(tx, OWNER, Limits::default()).set_parent(loose.id, None, Utc::now()))
            .unwrap();
        assert_eq!(detached.parent_id, None);

        let stored = storage.read(|tx| tx.task(OWNER, loose.id)).unwrap().unwrap();
        assert_eq!(stored.parent_id, None);
    }
}

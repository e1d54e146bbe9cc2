//! Cascading soft-delete through the subtask tree.

use crate::config::Limits;
use crate::hierarchy::Hierarchy;
use crate::storage::GraphTx;
use crate::store::StoreError;
use crate::types::{OwnerId, TaskId};
use chrono::{DateTime, Utc};
use eyre::Result;

/// Soft-delete executor for one owner within one transaction.
pub struct Cascade<'a, 'tx> {
    tx: &'a GraphTx<'tx>,
    hierarchy: Hierarchy<'a, 'tx>,
    owner: OwnerId,
    limits: Limits,
}

impl<'a, 'tx> Cascade<'a, 'tx> {
    pub fn new(tx: &'a GraphTx<'tx>, owner: OwnerId, limits: Limits) -> Self {
        Self {
            tx,
            hierarchy: Hierarchy::new(tx, owner, limits),
            owner,
            limits,
        }
    }

    /// Deactivate a task and all of its active descendants, parents before children.
    ///
    /// Dependency edges are left in place. Returns the ids that were deactivated.
    pub fn soft_delete(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Vec<TaskId>> {
        self.hierarchy.active_task(task_id)?;

        let mut deleted = Vec::new();
        self.delete_subtree(task_id, 0, now, &mut deleted)?;

        log::info!(
            "Soft-deleted task {} for owner {} ({} task(s) deactivated)",
            task_id,
            self.owner,
            deleted.len()
        );
        Ok(deleted)
    }

    fn delete_subtree(&self, task_id: TaskId, level: usize, now: DateTime<Utc>, deleted: &mut Vec<TaskId>) -> Result<()> {
        if level > self.limits.walk_cap {
            let detail = format!("subtree below task {} is deeper than {} levels", task_id, self.limits.walk_cap);
            log::error!("Graph corruption for owner {}: {}", self.owner, detail);
            return Err(eyre::eyre!(StoreError::GraphCorruption(detail)));
        }

        if self.tx.deactivate(task_id, now)? {
            deleted.push(task_id);
        }

        for child in self.hierarchy.list_children(task_id)? {
            self.delete_subtree(child.id, level + 1, now, deleted)?;
        }

        Ok(())
    }
}

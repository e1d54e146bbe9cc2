//! Readiness evaluation: may a task start, may it finish?
//!
//! Readiness is one hop deep. Each check loads the task's incoming edges
//! together with the current state of their prerequisites and nothing else;
//! a prerequisite that is itself blocked does not block its dependents
//! beyond the direct edge.

use crate::storage::GraphTx;
use crate::store::StoreError;
use crate::types::{Dependency, Gate, OwnerId, Readiness, Task, TaskId};
use eyre::Result;

/// Gate checks for one owner within one transaction.
pub struct ReadinessEvaluator<'a, 'tx> {
    tx: &'a GraphTx<'tx>,
    owner: OwnerId,
}

impl<'a, 'tx> ReadinessEvaluator<'a, 'tx> {
    pub fn new(tx: &'a GraphTx<'tx>, owner: OwnerId) -> Self {
        Self { tx, owner }
    }

    /// True if any start-gating edge has an unsatisfied prerequisite.
    pub fn is_blocked(&self, task_id: TaskId) -> Result<bool> {
        let edges = self.incoming(task_id)?;
        Ok(blocks(&edges, Gate::Start))
    }

    pub fn can_start(&self, task_id: TaskId) -> Result<bool> {
        Ok(!self.is_blocked(task_id)?)
    }

    /// True if any finish-gating edge has an unsatisfied prerequisite.
    pub fn is_finish_blocked(&self, task_id: TaskId) -> Result<bool> {
        let edges = self.incoming(task_id)?;
        Ok(blocks(&edges, Gate::Finish))
    }

    pub fn can_finish(&self, task_id: TaskId) -> Result<bool> {
        Ok(!self.is_finish_blocked(task_id)?)
    }

    /// Both gates from a single load of the incoming edges.
    pub fn readiness(&self, task_id: TaskId) -> Result<Readiness> {
        let edges = self.incoming(task_id)?;
        Ok(Readiness {
            task_id,
            can_start: !blocks(&edges, Gate::Start),
            can_finish: !blocks(&edges, Gate::Finish),
        })
    }

    fn incoming(&self, task_id: TaskId) -> Result<Vec<(Dependency, Task)>> {
        if self.tx.task(self.owner, task_id)?.is_none() {
            return Err(eyre::eyre!(StoreError::TaskNotFound(task_id)));
        }
        self.tx.incoming_with_prerequisites(self.owner, task_id)
    }
}

/// Stops at the first edge of `gate` whose prerequisite falls short.
///
/// Soft-deleted prerequisites satisfy no condition, so they keep blocking.
fn blocks(edges: &[(Dependency, Task)], gate: Gate) -> bool {
    edges
        .iter()
        .filter(|(dependency, _)| dependency.dependency_type.gate() == gate)
        .any(|(dependency, prerequisite)| !prerequisite.satisfies(dependency.dependency_type.condition()))
}

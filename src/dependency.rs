//! Dependency manager: the prerequisite DAG.

use crate::storage::GraphTx;
use crate::store::StoreError;
use crate::types::{Dependency, DependencyId, DependencyType, OwnerId, Task, TaskId, validate_description};
use chrono::{DateTime, Utc};
use eyre::Result;
use std::collections::{HashSet, VecDeque};

/// Edge operations for one owner within one transaction.
pub struct Dependencies<'a, 'tx> {
    tx: &'a GraphTx<'tx>,
    owner: OwnerId,
}

impl<'a, 'tx> Dependencies<'a, 'tx> {
    pub fn new(tx: &'a GraphTx<'tx>, owner: OwnerId) -> Self {
        Self { tx, owner }
    }

    /// Add an edge: `dependent_id` waits on `prerequisite_id`.
    pub fn create(
        &self,
        dependent_id: TaskId,
        prerequisite_id: TaskId,
        dependency_type: DependencyType,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Dependency> {
        validate_description(description).map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;

        // No self-referential edges
        if dependent_id == prerequisite_id {
            return Err(eyre::eyre!(StoreError::SelfReference));
        }

        // Both tasks must exist, be active and belong to the caller
        self.active_task(dependent_id)?;
        self.active_task(prerequisite_id)?;

        if self.tx.find_dependency(dependent_id, prerequisite_id)?.is_some() {
            return Err(eyre::eyre!(StoreError::DuplicateDependency {
                dependent_id,
                prerequisite_id,
            }));
        }

        // The edge closes a cycle iff the dependent is already (transitively)
        // a prerequisite of the new prerequisite. Type is irrelevant here.
        if self.reaches(prerequisite_id, dependent_id)? {
            return Err(eyre::eyre!(StoreError::CircularDependency {
                dependent_id,
                prerequisite_id,
            }));
        }

        self.tx
            .insert_dependency(self.owner, dependent_id, prerequisite_id, dependency_type, description, now)
    }

    /// Change the type and/or description of an edge. `None` leaves a field as is.
    pub fn update(
        &self,
        id: DependencyId,
        dependency_type: Option<DependencyType>,
        description: Option<Option<&str>>,
        now: DateTime<Utc>,
    ) -> Result<Dependency> {
        if let Some(d) = description {
            validate_description(d).map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;
        }

        let existing = self.get(id)?;
        let updated = Dependency {
            dependency_type: dependency_type.unwrap_or(existing.dependency_type),
            description: match description {
                Some(d) => d.map(String::from),
                None => existing.description,
            },
            updated_at: now,
            ..existing
        };

        self.tx.update_dependency(&updated)?;
        Ok(updated)
    }

    /// Remove an edge. Returns false if it doesn't exist or isn't the caller's.
    pub fn delete(&self, id: DependencyId) -> Result<bool> {
        self.tx.delete_dependency(self.owner, id)
    }

    /// An edge owned by the caller.
    pub fn get(&self, id: DependencyId) -> Result<Dependency> {
        self.tx
            .dependency(self.owner, id)?
            .ok_or_else(|| eyre::eyre!(StoreError::DependencyNotFound(id)))
    }

    /// Edges on which other tasks wait for `task_id`.
    pub fn list_dependents(&self, task_id: TaskId) -> Result<Vec<Dependency>> {
        self.owned_task(task_id)?;
        self.tx.outgoing(self.owner, task_id)
    }

    /// Edges on which `task_id` waits.
    pub fn list_prerequisites(&self, task_id: TaskId) -> Result<Vec<Dependency>> {
        self.owned_task(task_id)?;
        self.tx.incoming(self.owner, task_id)
    }

    /// Breadth-first search from `from` through prerequisite links, looking for `target`.
    ///
    /// Only edges between active tasks are followed. The walk may examine at
    /// most as many edges as the owner has; more means the store is corrupt.
    fn reaches(&self, from: TaskId, target: TaskId) -> Result<bool> {
        let bound = self.tx.active_edge_count(self.owner)?;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);
        let mut examined = 0usize;

        while let Some(node) = queue.pop_front() {
            if node == target {
                return Ok(true);
            }
            if !visited.insert(node) {
                continue;
            }
            for next in self.tx.active_prerequisite_ids(self.owner, node)? {
                examined += 1;
                if examined > bound {
                    let detail = format!(
                        "dependency walk from task {} examined more than {} edges",
                        from, bound
                    );
                    log::error!("Graph corruption for owner {}: {}", self.owner, detail);
                    return Err(eyre::eyre!(StoreError::GraphCorruption(detail)));
                }
                if !visited.contains(&next) {
                    queue.push_back(next);
                }
            }
        }

        Ok(false)
    }

    fn owned_task(&self, id: TaskId) -> Result<Task> {
        self.tx
            .task(self.owner, id)?
            .ok_or_else(|| eyre::eyre!(StoreError::TaskNotFound(id)))
    }

    fn active_task(&self, id: TaskId) -> Result<Task> {
        match self.tx.task(self.owner, id)? {
            Some(task) if task.is_active => Ok(task),
            _ => Err(eyre::eyre!(StoreError::TaskNotFound(id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Storage;
    use tempfile::TempDir;

    const OWNER: OwnerId = 5;

    fn setup(n: usize) -> (TempDir, Storage, Vec<TaskId>) {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = Storage::init(temp_dir.path(), &Config::default()).unwrap();
        let ids = storage
            .write(|tx| {
                (0..n)
                    .map(|i| tx.insert_task(OWNER, None, &format!("Task {}", i), Utc::now()).map(|t| t.id))
                    .collect()
            })
            .unwrap();
        (temp_dir, storage, ids)
    }

    fn add(storage: &mut Storage, dependent: TaskId, prerequisite: TaskId, kind: DependencyType) -> Result<Dependency> {
        storage.write(|tx| Dependencies::new(tx, OWNER).create(dependent, prerequisite, kind, None, Utc::now()))
    }

    fn err_of(report: eyre::Report) -> StoreError {
        StoreError::of(&report).cloned().expect("expected a StoreError")
    }

    #[test]
    fn test_reaches_follows_prerequisites_transitively() {
        let (_temp_dir, mut storage, ids) = setup(3);
        // 0 waits on 1, 1 waits on 2
        add(&mut storage, ids[0], ids[1], DependencyType::FinishToStart).unwrap();
        add(&mut storage, ids[1], ids[2], DependencyType::FinishToStart).unwrap();

        storage
            .read(|tx| {
                let deps = Dependencies::new(tx, OWNER);
                assert!(deps.reaches(ids[0], ids[2])?);
                assert!(!deps.reaches(ids[2], ids[0])?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_cycle_rejected_for_every_type() {
        for kind in DependencyType::ALL {
            let (_temp_dir, mut storage, ids) = setup(3);
            add(&mut storage, ids[0], ids[1], kind).unwrap();
            add(&mut storage, ids[1], ids[2], kind).unwrap();

            let err = err_of(add(&mut storage, ids[2], ids[0], kind).unwrap_err());
            assert_eq!(
                err,
                StoreError::CircularDependency {
                    dependent_id: ids[2],
                    prerequisite_id: ids[0],
                }
            );
        }
    }

    #[test]
    fn test_mixed_types_share_one_graph() {
        let (_temp_dir, mut storage, ids) = setup(2);
        add(&mut storage, ids[0], ids[1], DependencyType::StartToStart).unwrap();

        let err = err_of(add(&mut storage, ids[1], ids[0], DependencyType::FinishToFinish).unwrap_err());
        assert!(matches!(err, StoreError::CircularDependency { .. }));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let (_temp_dir, mut storage, ids) = setup(4);
        // 3 waits on 1 and 2, both wait on 0
        add(&mut storage, ids[1], ids[0], DependencyType::FinishToStart).unwrap();
        add(&mut storage, ids[2], ids[0], DependencyType::FinishToStart).unwrap();
        add(&mut storage, ids[3], ids[1], DependencyType::FinishToStart).unwrap();
        assert!(add(&mut storage, ids[3], ids[2], DependencyType::FinishToStart).is_ok());
        // Redundant shortcut is fine too
        assert!(add(&mut storage, ids[3], ids[0], DependencyType::FinishToStart).is_ok());
    }

    #[test]
    fn test_inactive_task_breaks_cycle_path() {
        let (_temp_dir, mut storage, ids) = setup(3);
        add(&mut storage, ids[0], ids[1], DependencyType::FinishToStart).unwrap();
        add(&mut storage, ids[1], ids[2], DependencyType::FinishToStart).unwrap();

        storage.write(|tx| tx.deactivate(ids[1], Utc::now())).unwrap();

        // Path 0 -> 1 -> 2 is inert once 1 is gone
        assert!(add(&mut storage, ids[2], ids[0], DependencyType::FinishToStart).is_ok());
    }

    #[test]
    fn test_foreign_edges_are_not_followed() {
        let (_temp_dir, mut storage, ids) = setup(2);

        // 1 waits on 0, but the row belongs to another owner
        storage
            .write(|tx| {
                tx.insert_dependency(OWNER + 1, ids[1], ids[0], DependencyType::FinishToStart, None, Utc::now())?;
                Ok(())
            })
            .unwrap();

        storage
            .read(|tx| {
                assert!(!Dependencies::new(tx, OWNER).reaches(ids[1], ids[0])?);
                assert!(Dependencies::new(tx, OWNER + 1).reaches(ids[1], ids[0])?);
                Ok(())
            })
            .unwrap();
        assert!(add(&mut storage, ids[0], ids[1], DependencyType::FinishToStart).is_ok());
    }

    #[test]
    fn test_update_is_partial() {
        let (_temp_dir, mut storage, ids) = setup(2);
        let dep = storage
            .write(|tx| {
                Dependencies::new(tx, OWNER).create(ids[0], ids[1], DependencyType::FinishToStart, Some("first"), Utc::now())
            })
            .unwrap();

        let updated = storage
            .write(|tx| Dependencies::new(tx, OWNER).update(dep.id, Some(DependencyType::StartToStart), None, Utc::now()))
            .unwrap();
        assert_eq!(updated.dependency_type, DependencyType::StartToStart);
        assert_eq!(updated.description.as_deref(), Some("first"));

        let cleared = storage
            .write(|tx| Dependencies::new(tx, OWNER).update(dep.id, None, Some(None), Utc::now()))
            .unwrap();
        assert_eq!(cleared.dependency_type, DependencyType::StartToStart);
        assert_eq!(cleared.description, None);
        assert_eq!(cleared.dependent_task_id, ids[0]);
        assert_eq!(cleared.prerequisite_task_id, ids[1]);
    }

    #[test]
    fn test_corrupted_edge_set_is_bounded() {
        let (_temp_dir, mut storage, ids) = setup(3);
        add(&mut storage, ids[0], ids[1], DependencyType::FinishToStart).unwrap();
        add(&mut storage, ids[1], ids[2], DependencyType::FinishToStart).unwrap();

        // Forge a cycle directly in the table, bypassing the checks
        storage
            .write(|tx| {
                tx.insert_dependency(OWNER, ids[2], ids[0], DependencyType::FinishToStart, None, Utc::now())?;
                Ok(())
            })
            .unwrap();

        let other = storage
            .write(|tx| tx.insert_task(OWNER, None, "Other", Utc::now()))
            .unwrap();

        // The walk from 0 loops 0 -> 1 -> 2 -> 0 but terminates through the visited set
        assert!(add(&mut storage, other.id, ids[0], DependencyType::FinishToStart).is_ok());
    }
}

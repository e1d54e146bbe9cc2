//! Storage layer for the task graph: SQLite tables for tasks and dependency edges.

use crate::config::Config;
use crate::types::{Dependency, DependencyId, DependencyType, OwnerId, Task, TaskId};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use std::fs;
use std::path::{Path, PathBuf};

/// Storage directory name.
pub const TASKGRAPH_DIR: &str = ".taskgraph";

/// SQLite database file.
pub const DB_FILE: &str = "taskgraph.db";

/// Schema version recorded in the meta table.
const SCHEMA_VERSION: i64 = 1;

const TASK_COLUMNS: &str =
    "t.id, t.owner_id, t.parent_id, t.title, t.completion_percentage, t.is_completed, t.is_active, t.created_at, t.updated_at";

const DEPENDENCY_COLUMNS: &str = "d.id, d.owner_id, d.dependent_task_id, d.prerequisite_task_id, d.dependency_type, d.description, d.created_at, d.updated_at";

/// Path of the `.taskgraph` directory under a root.
pub fn store_dir(root: &Path) -> PathBuf {
    root.join(TASKGRAPH_DIR)
}

/// A single connection to the graph database.
pub struct Storage {
    db: Connection,
}

impl Storage {
    /// Initialize storage in the given directory.
    pub fn init(root: &Path, config: &Config) -> Result<Self> {
        let dir = store_dir(root);
        fs::create_dir_all(&dir).context("Failed to create .taskgraph directory")?;

        let storage = Self::connect(&dir.join(DB_FILE), config)?;
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open existing storage.
    pub fn open(root: &Path, config: &Config) -> Result<Self> {
        let dir = store_dir(root);
        if !dir.exists() {
            eyre::bail!("No .taskgraph directory found. Run 'tg init' first.");
        }

        let storage = Self::connect(&dir.join(DB_FILE), config)?;
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open another connection to a store whose schema is already in place.
    pub fn attach(root: &Path, config: &Config) -> Result<Self> {
        Self::connect(&store_dir(root).join(DB_FILE), config)
    }

    fn connect(db_path: &Path, config: &Config) -> Result<Self> {
        let db = Connection::open(db_path).context("Failed to open SQLite database")?;

        // WAL lets readers proceed while a writer holds the lock
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;",
        )
        .context("Failed to configure SQLite connection")?;
        db.busy_timeout(config.busy_timeout())
            .context("Failed to set busy timeout")?;

        Ok(Self { db })
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    parent_id INTEGER REFERENCES tasks(id),
                    title TEXT NOT NULL,
                    completion_percentage INTEGER NOT NULL DEFAULT 0 CHECK (completion_percentage BETWEEN 0 AND 100),
                    is_completed INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    CHECK (parent_id IS NULL OR parent_id != id)
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);

                CREATE TABLE IF NOT EXISTS dependencies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    dependent_task_id INTEGER NOT NULL REFERENCES tasks(id),
                    prerequisite_task_id INTEGER NOT NULL REFERENCES tasks(id),
                    dependency_type TEXT NOT NULL CHECK (dependency_type IN
                        ('finish_to_start', 'start_to_start', 'finish_to_finish', 'start_to_finish')),
                    description TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (dependent_task_id, prerequisite_task_id),
                    CHECK (dependent_task_id != prerequisite_task_id)
                );
                CREATE INDEX IF NOT EXISTS idx_dependencies_prerequisite ON dependencies(prerequisite_task_id);
                CREATE INDEX IF NOT EXISTS idx_dependencies_owner ON dependencies(owner_id);

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .context("Failed to initialize schema")?;

        self.db.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        Ok(())
    }

    /// Run `f` inside a deferred transaction so it sees one consistent snapshot.
    pub fn read<T>(&mut self, f: impl FnOnce(&GraphTx<'_>) -> Result<T>) -> Result<T> {
        let tx = self
            .db
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .context("Failed to begin read transaction")?;
        let value = f(&GraphTx::new(&tx))?;
        tx.commit().context("Failed to end read transaction")?;
        Ok(value)
    }

    /// Run `f` inside an immediate transaction, committing only if it succeeds.
    ///
    /// The database write lock is taken before `f` runs, so every check `f`
    /// performs is isolated from other writers until the commit.
    pub fn write<T>(&mut self, f: impl FnOnce(&GraphTx<'_>) -> Result<T>) -> Result<T> {
        let tx = self
            .db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin write transaction")?;
        let value = f(&GraphTx::new(&tx))?;
        tx.commit().context("Failed to commit write transaction")?;
        Ok(value)
    }
}

/// True if the report was caused by another connection holding the write lock.
pub fn is_busy(report: &eyre::Report) -> bool {
    report.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    })
}

/// Query and mutation primitives over one open transaction.
pub struct GraphTx<'a> {
    conn: &'a Connection,
}

impl<'a> GraphTx<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ---------------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------------

    /// Get a task owned by `owner`, active or not.
    pub fn task(&self, owner: OwnerId, id: TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks t WHERE t.id = ? AND t.owner_id = ?", TASK_COLUMNS);
        let task = self
            .conn
            .query_row(&sql, params![id, owner], row_to_task)
            .optional()?;
        Ok(task)
    }

    /// List an owner's tasks in creation order.
    pub fn tasks(&self, owner: OwnerId, include_inactive: bool) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks t WHERE t.owner_id = ? AND (? OR t.is_active = 1) ORDER BY t.id",
            TASK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params![owner, include_inactive], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Insert a new active task at 0% completion.
    pub fn insert_task(&self, owner: OwnerId, parent_id: Option<TaskId>, title: &str, now: DateTime<Utc>) -> Result<Task> {
        self.conn.execute(
            r#"
            INSERT INTO tasks (owner_id, parent_id, title, completion_percentage, is_completed, is_active, created_at, updated_at)
            VALUES (?, ?, ?, 0, 0, 1, ?, ?)
            "#,
            params![owner, parent_id, title, now.to_rfc3339(), now.to_rfc3339()],
        )?;

        Ok(Task {
            id: self.conn.last_insert_rowid(),
            owner_id: owner,
            parent_id,
            title: title.to_string(),
            completion_percentage: 0,
            is_completed: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_parent(&self, id: TaskId, parent_id: Option<TaskId>, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE tasks SET parent_id = ?, updated_at = ? WHERE id = ?",
            params![parent_id, now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn update_completion(&self, id: TaskId, percentage: u8, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE tasks SET completion_percentage = ?, is_completed = ?, updated_at = ? WHERE id = ?",
            params![percentage, percentage == 100, now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Clear the active flag. Returns false if the task was already inactive.
    pub fn deactivate(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE tasks SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
            params![now.to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    /// Active direct children of a task.
    pub fn children(&self, owner: OwnerId, id: TaskId) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks t WHERE t.parent_id = ? AND t.owner_id = ? AND t.is_active = 1 ORDER BY t.id",
            TASK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let children = stmt
            .query_map(params![id, owner], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(children)
    }

    /// Ids of active direct children of every task in `ids`.
    pub fn child_ids(&self, owner: OwnerId, ids: &[TaskId]) -> Result<Vec<TaskId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM tasks WHERE parent_id = ? AND owner_id = ? AND is_active = 1 ORDER BY id")?;
        let mut out = Vec::new();
        for id in ids {
            let rows = stmt
                .query_map(params![id, owner], |row| row.get::<_, TaskId>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    /// Active descendants of a task, following at most `max_levels` levels.
    ///
    /// `None` when the subtree goes deeper than `max_levels`, which a sound
    /// hierarchy never does.
    pub fn count_descendants(&self, owner: OwnerId, id: TaskId, max_levels: usize) -> Result<Option<usize>> {
        let (count, deepest): (i64, i64) = self.conn.query_row(
            r#"
            WITH RECURSIVE sub(id, level) AS (
                SELECT id, 1 FROM tasks WHERE parent_id = ?1 AND owner_id = ?2 AND is_active = 1
                UNION ALL
                SELECT t.id, sub.level + 1 FROM tasks t JOIN sub ON t.parent_id = sub.id
                WHERE t.owner_id = ?2 AND t.is_active = 1 AND sub.level <= ?3
            )
            SELECT COALESCE(SUM(level <= ?3), 0), COALESCE(MAX(level), 0) FROM sub
            "#,
            params![id, owner, max_levels as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if deepest as usize > max_levels {
            return Ok(None);
        }
        Ok(Some(count as usize))
    }

    // ---------------------------------------------------------------------
    // Dependencies
    // ---------------------------------------------------------------------

    /// Get a dependency whose endpoints belong to `owner`.
    pub fn dependency(&self, owner: OwnerId, id: DependencyId) -> Result<Option<Dependency>> {
        let sql = format!(
            "SELECT {} FROM dependencies d WHERE d.id = ? AND d.owner_id = ?",
            DEPENDENCY_COLUMNS
        );
        let dependency = self
            .conn
            .query_row(&sql, params![id, owner], row_to_dependency)
            .optional()?;
        Ok(dependency)
    }

    /// Find the edge for an ordered (dependent, prerequisite) pair.
    pub fn find_dependency(&self, dependent_id: TaskId, prerequisite_id: TaskId) -> Result<Option<Dependency>> {
        let sql = format!(
            "SELECT {} FROM dependencies d WHERE d.dependent_task_id = ? AND d.prerequisite_task_id = ?",
            DEPENDENCY_COLUMNS
        );
        let dependency = self
            .conn
            .query_row(&sql, params![dependent_id, prerequisite_id], row_to_dependency)
            .optional()?;
        Ok(dependency)
    }

    pub fn insert_dependency(
        &self,
        owner: OwnerId,
        dependent_id: TaskId,
        prerequisite_id: TaskId,
        dependency_type: DependencyType,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Dependency> {
        self.conn.execute(
            r#"
            INSERT INTO dependencies (owner_id, dependent_task_id, prerequisite_task_id, dependency_type, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                owner,
                dependent_id,
                prerequisite_id,
                dependency_type.as_str(),
                description,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Dependency {
            id: self.conn.last_insert_rowid(),
            owner_id: owner,
            dependent_task_id: dependent_id,
            prerequisite_task_id: prerequisite_id,
            dependency_type,
            description: description.map(String::from),
            created_at: now,
            updated_at: now,
        })
    }

    /// Persist the mutable fields of an edge.
    pub fn update_dependency(&self, dependency: &Dependency) -> Result<()> {
        self.conn.execute(
            "UPDATE dependencies SET dependency_type = ?, description = ?, updated_at = ? WHERE id = ?",
            params![
                dependency.dependency_type.as_str(),
                dependency.description,
                dependency.updated_at.to_rfc3339(),
                dependency.id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_dependency(&self, owner: OwnerId, id: DependencyId) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM dependencies WHERE id = ? AND owner_id = ?",
            params![id, owner],
        )?;
        Ok(removed > 0)
    }

    /// Edges where `task` is the dependent.
    pub fn incoming(&self, owner: OwnerId, task: TaskId) -> Result<Vec<Dependency>> {
        let sql = format!(
            "SELECT {} FROM dependencies d WHERE d.dependent_task_id = ? AND d.owner_id = ? ORDER BY d.id",
            DEPENDENCY_COLUMNS
        );
        self.dependencies_by(&sql, owner, task)
    }

    /// Edges where `task` is the prerequisite.
    pub fn outgoing(&self, owner: OwnerId, task: TaskId) -> Result<Vec<Dependency>> {
        let sql = format!(
            "SELECT {} FROM dependencies d WHERE d.prerequisite_task_id = ? AND d.owner_id = ? ORDER BY d.id",
            DEPENDENCY_COLUMNS
        );
        self.dependencies_by(&sql, owner, task)
    }

    fn dependencies_by(&self, sql: &str, owner: OwnerId, task: TaskId) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(sql)?;
        let deps = stmt
            .query_map(params![task, owner], row_to_dependency)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(deps)
    }

    /// Incoming edges of `task` joined with their prerequisite's current state.
    pub fn incoming_with_prerequisites(&self, owner: OwnerId, task: TaskId) -> Result<Vec<(Dependency, Task)>> {
        let sql = format!(
            r#"
            SELECT {}, {}
            FROM dependencies d
            JOIN tasks t ON t.id = d.prerequisite_task_id
            WHERE d.dependent_task_id = ? AND d.owner_id = ?
            ORDER BY d.id
            "#,
            DEPENDENCY_COLUMNS, TASK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![task, owner], |row| {
                let dependency = row_to_dependency(row)?;
                let prerequisite = task_from_offset(row, 8)?;
                Ok((dependency, prerequisite))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Prerequisites of `task` along `owner`'s edges whose both endpoints are active.
    pub fn active_prerequisite_ids(&self, owner: OwnerId, task: TaskId) -> Result<Vec<TaskId>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT d.prerequisite_task_id
            FROM dependencies d
            JOIN tasks dep ON dep.id = d.dependent_task_id
            JOIN tasks pre ON pre.id = d.prerequisite_task_id
            WHERE d.dependent_task_id = ? AND d.owner_id = ? AND dep.is_active = 1 AND pre.is_active = 1
            ORDER BY d.prerequisite_task_id
            "#,
        )?;
        let ids = stmt
            .query_map(params![task, owner], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Number of edges of `owner` whose both endpoints are active.
    pub fn active_edge_count(&self, owner: OwnerId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM dependencies d
            JOIN tasks dep ON dep.id = d.dependent_task_id
            JOIN tasks pre ON pre.id = d.prerequisite_task_id
            WHERE d.owner_id = ? AND dep.is_active = 1 AND pre.is_active = 1
            "#,
            params![owner],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Convert a database row to a Task.
fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    task_from_offset(row, 0)
}

fn task_from_offset(row: &rusqlite::Row, at: usize) -> rusqlite::Result<Task> {
    let created_at: String = row.get(at + 7)?;
    let updated_at: String = row.get(at + 8)?;

    Ok(Task {
        id: row.get(at)?,
        owner_id: row.get(at + 1)?,
        parent_id: row.get(at + 2)?,
        title: row.get(at + 3)?,
        completion_percentage: row.get(at + 4)?,
        is_completed: row.get(at + 5)?,
        is_active: row.get(at + 6)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Convert a database row to a Dependency.
fn row_to_dependency(row: &rusqlite::Row) -> rusqlite::Result<Dependency> {
    let kind: String = row.get(4)?;
    let dependency_type = kind.parse::<DependencyType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(Dependency {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        dependent_task_id: row.get(2)?,
        prerequisite_task_id: row.get(3)?,
        dependency_type,
        description: row.get(5)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

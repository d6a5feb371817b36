use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use loom_core::{ExecutionLogEntry, Goal, MemoryItem, PendingExecutionError, ReasoningStep, Task};

use crate::database::Database;
use crate::error::StoreError;
use crate::rows::RowReader;
use crate::store::StateStore;

/// SQLite-backed state store. Entities keep their insertion order via `position`.
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert or replace a task, keeping its original position on replace.
    pub fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (identifier, heading, content, notes, status, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, (SELECT COALESCE(MAX(position), -1) + 1 FROM tasks))
                 ON CONFLICT(identifier) DO UPDATE SET
                     heading = excluded.heading,
                     content = excluded.content,
                     notes = excluded.notes,
                     status = excluded.status",
                params![
                    task.identifier,
                    task.heading,
                    task.content,
                    task.notes,
                    task.status.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn upsert_goal(&self, goal: &Goal) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO goals (identifier, heading, content, notes, position)
                 VALUES (?1, ?2, ?3, ?4, (SELECT COALESCE(MAX(position), -1) + 1 FROM goals))
                 ON CONFLICT(identifier) DO UPDATE SET
                     heading = excluded.heading,
                     content = excluded.content,
                     notes = excluded.notes",
                params![goal.identifier, goal.heading, goal.content, goal.notes],
            )?;
            Ok(())
        })
    }

    pub fn upsert_memory(&self, item: &MemoryItem) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memory_items (identifier, heading, content, notes, important, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, (SELECT COALESCE(MAX(position), -1) + 1 FROM memory_items))
                 ON CONFLICT(identifier) DO UPDATE SET
                     heading = excluded.heading,
                     content = excluded.content,
                     notes = excluded.notes,
                     important = excluded.important",
                params![
                    item.identifier,
                    item.heading,
                    item.content,
                    item.notes,
                    item.important,
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_vault_summary(&self, summary: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vault (id, summary) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET summary = excluded.summary",
                [summary],
            )?;
            Ok(())
        })
    }
}

fn insert_reasoning(conn: &rusqlite::Connection, step: &ReasoningStep) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO reasoning_log (timestamp, content, operation) VALUES (?1, ?2, ?3)",
        params![step.timestamp.to_rfc3339(), step.content, step.operation],
    )?;
    Ok(())
}

fn insert_execution(
    conn: &rusqlite::Connection,
    entry: &ExecutionLogEntry,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO execution_log (timestamp, source, success, result, error)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.timestamp.to_rfc3339(),
            entry.source,
            entry.success,
            entry.result,
            entry.error,
        ],
    )?;
    Ok(())
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<Task, StoreError> {
    let r = RowReader::new(row, "tasks");
    Ok(Task {
        identifier: r.col(0, "identifier")?,
        heading: r.col(1, "heading")?,
        content: r.col(2, "content")?,
        notes: r.col(3, "notes")?,
        status: r.variant(4, "status")?,
    })
}

fn row_to_goal(row: &rusqlite::Row<'_>) -> Result<Goal, StoreError> {
    let r = RowReader::new(row, "goals");
    Ok(Goal {
        identifier: r.col(0, "identifier")?,
        heading: r.col(1, "heading")?,
        content: r.col(2, "content")?,
        notes: r.col(3, "notes")?,
    })
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> Result<MemoryItem, StoreError> {
    let r = RowReader::new(row, "memory_items");
    Ok(MemoryItem {
        identifier: r.col(0, "identifier")?,
        heading: r.col(1, "heading")?,
        content: r.col(2, "content")?,
        notes: r.col(3, "notes")?,
        important: r.col(4, "important")?,
    })
}

fn row_to_reasoning(row: &rusqlite::Row<'_>) -> Result<ReasoningStep, StoreError> {
    let r = RowReader::new(row, "reasoning_log");
    Ok(ReasoningStep {
        timestamp: r.timestamp(0, "timestamp")?,
        content: r.col(1, "content")?,
        operation: r.col(2, "operation")?,
    })
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> Result<ExecutionLogEntry, StoreError> {
    let r = RowReader::new(row, "execution_log");
    Ok(ExecutionLogEntry {
        timestamp: r.timestamp(0, "timestamp")?,
        source: r.col(1, "source")?,
        success: r.col(2, "success")?,
        result: r.col(3, "result")?,
        error: r.col(4, "error")?,
    })
}

/// Run a SELECT and map each row with a fallible row mapper.
fn select_all<T>(
    db: &Database,
    sql: &str,
    map: fn(&rusqlite::Row<'_>) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map(row)?);
        }
        Ok(out)
    })
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        select_all(
            &self.db,
            "SELECT identifier, heading, content, notes, status FROM tasks ORDER BY position",
            row_to_task,
        )
    }

    async fn load_goals(&self) -> Result<Vec<Goal>, StoreError> {
        select_all(
            &self.db,
            "SELECT identifier, heading, content, notes FROM goals ORDER BY position",
            row_to_goal,
        )
    }

    async fn load_memory(&self) -> Result<Vec<MemoryItem>, StoreError> {
        select_all(
            &self.db,
            "SELECT identifier, heading, content, notes, important FROM memory_items ORDER BY position",
            row_to_memory,
        )
    }

    async fn load_reasoning_log(&self) -> Result<Vec<ReasoningStep>, StoreError> {
        select_all(
            &self.db,
            "SELECT timestamp, content, operation FROM reasoning_log ORDER BY seq",
            row_to_reasoning,
        )
    }

    async fn load_execution_log(&self) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        select_all(
            &self.db,
            "SELECT timestamp, source, success, result, error FROM execution_log ORDER BY seq",
            row_to_execution,
        )
    }

    async fn load_vault_summary(&self) -> Result<String, StoreError> {
        self.db.with_conn(|conn| {
            let summary: Option<String> = conn
                .query_row("SELECT summary FROM vault WHERE id = 1", [], |row| row.get(0))
                .optional()?;
            Ok(summary.unwrap_or_default())
        })
    }

    async fn load_pending_error(&self) -> Result<Option<PendingExecutionError>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT payload FROM pending_error WHERE id = 1")?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => RowReader::new(row, "pending_error").json(0, "payload").map(Some),
                None => Ok(None),
            }
        })
    }

    async fn save_pending_error(
        &self,
        record: Option<PendingExecutionError>,
    ) -> Result<(), StoreError> {
        let payload = record
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| StoreError::Encode {
                what: "pending error",
                source,
            })?;
        self.db.with_conn(|conn| {
            match payload {
                Some(json) => conn.execute(
                    "INSERT INTO pending_error (id, payload) VALUES (1, ?1)
                     ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
                    [json],
                )?,
                None => conn.execute("DELETE FROM pending_error WHERE id = 1", [])?,
            };
            Ok(())
        })
    }

    async fn save_reasoning_log(&self, entries: Vec<ReasoningStep>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM reasoning_log", [])?;
            for step in &entries {
                insert_reasoning(&tx, step)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn save_execution_log(
        &self,
        entries: Vec<ExecutionLogEntry>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM execution_log", [])?;
            for entry in &entries {
                insert_execution(&tx, entry)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn append_reasoning(&self, step: ReasoningStep) -> Result<(), StoreError> {
        self.db.with_conn(|conn| insert_reasoning(conn, &step))
    }

    async fn append_execution(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        self.db.with_conn(|conn| insert_execution(conn, &entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::TaskStatus;

    fn store() -> SqliteStore {
        SqliteStore::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn empty_database_loads_empty() {
        let store = store();
        assert!(store.load_tasks().await.unwrap().is_empty());
        assert!(store.load_goals().await.unwrap().is_empty());
        assert!(store.load_memory().await.unwrap().is_empty());
        assert!(store.load_reasoning_log().await.unwrap().is_empty());
        assert!(store.load_execution_log().await.unwrap().is_empty());
        assert_eq!(store.load_vault_summary().await.unwrap(), "");
        assert!(store.load_pending_error().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tasks_keep_insertion_order_and_update_in_place() {
        let store = store();
        store.upsert_task(&Task::new("b", "Second")).unwrap();
        store.upsert_task(&Task::new("a", "First")).unwrap();
        store
            .upsert_task(&Task::new("b", "Second, renamed").with_status(TaskStatus::Done))
            .unwrap();

        let tasks = store.load_tasks().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].identifier, "b");
        assert_eq!(tasks[0].heading, "Second, renamed");
        assert_eq!(tasks[0].status, TaskStatus::Done);
        assert_eq!(tasks[1].identifier, "a");
    }

    #[tokio::test]
    async fn memory_important_flag_roundtrips() {
        let store = store();
        store
            .upsert_memory(&MemoryItem::new("m1", "Key", "value").important())
            .unwrap();
        let memory = store.load_memory().await.unwrap();
        assert!(memory[0].important);
    }

    #[tokio::test]
    async fn pending_error_save_load_clear() {
        let store = store();
        let pending = PendingExecutionError::new("x()", "x is not defined", 4)
            .with_references(vec!["vault:api_key".into()]);
        store.save_pending_error(Some(pending.clone())).await.unwrap();
        assert_eq!(store.load_pending_error().await.unwrap(), Some(pending));

        store.save_pending_error(None).await.unwrap();
        assert!(store.load_pending_error().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbled_pending_error_is_reported_not_dropped() {
        let store = store();
        store
            .database()
            .with_conn(|conn| {
                conn.execute("INSERT INTO pending_error (id, payload) VALUES (1, '{oops')", [])?;
                Ok(())
            })
            .unwrap();
        let err = store.load_pending_error().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Malformed {
                table: "pending_error",
                column: "payload",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn save_reasoning_log_replaces_contents() {
        let store = store();
        for i in 0..5 {
            store
                .append_reasoning(ReasoningStep::new(format!("step {i}")))
                .await
                .unwrap();
        }
        let mut log = store.load_reasoning_log().await.unwrap();
        assert_eq!(log.len(), 5);

        log.drain(..3);
        store.save_reasoning_log(log).await.unwrap();
        let after = store.load_reasoning_log().await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].content, "step 3");
    }

    #[tokio::test]
    async fn execution_log_roundtrip() {
        let store = store();
        store
            .append_execution(ExecutionLogEntry::failure("runner", "boom"))
            .await
            .unwrap();
        store
            .append_execution(ExecutionLogEntry::success("runner", "42"))
            .await
            .unwrap();
        let log = store.load_execution_log().await.unwrap();
        assert!(!log[0].success);
        assert_eq!(log[0].error.as_deref(), Some("boom"));
        assert_eq!(log[1].result.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn vault_summary_upsert() {
        let store = store();
        store.set_vault_summary("3 entries").unwrap();
        store.set_vault_summary("4 entries").unwrap();
        assert_eq!(store.load_vault_summary().await.unwrap(), "4 entries");
    }
}

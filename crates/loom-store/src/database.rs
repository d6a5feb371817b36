use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema::{CREATE_TABLES, PRAGMAS, SCHEMA_VERSION};

/// Shared handle to the state database.
///
/// rusqlite connections are `Send` but not `Sync`, so every caller goes
/// through one mutex. Clones share the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open (creating parent directories and tables as needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| setup_error(path, "create directory", e))?;
        }
        let conn = Connection::open(path).map_err(|e| setup_error(path, "open", e))?;
        let db = Self::prepare(conn, path.to_owned())?;
        info!(path = %path.display(), "state database ready");
        Ok(db)
    }

    /// A private database that disappears when the last clone is dropped.
    pub fn in_memory() -> Result<Self, StoreError> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| setup_error(&path, "open", e))?;
        Self::prepare(conn, path)
    }

    fn prepare(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| setup_error(&path, "pragmas", e))?;

        let found: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| setup_error(&path, "read version", e))?;
        if found > SCHEMA_VERSION {
            return Err(setup_error(
                &path,
                "read version",
                format!("schema v{found} is newer than supported v{SCHEMA_VERSION}"),
            ));
        }
        if found < SCHEMA_VERSION {
            conn.execute_batch(CREATE_TABLES)
                .map_err(|e| setup_error(&path, "schema", e))?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| setup_error(&path, "write version", e))?;
            debug!(path = %path.display(), from = found, to = SCHEMA_VERSION, "schema applied");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Run `f` while holding the connection lock.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        f(&mut self.conn.lock())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn setup_error(path: &Path, step: &'static str, reason: impl ToString) -> StoreError {
    StoreError::Setup {
        path: path.to_owned(),
        step,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_version(db: &Database) -> u32 {
        db.with_conn(|conn| Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn in_memory_is_stamped_with_current_version() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
        assert_eq!(user_version(&db), SCHEMA_VERSION);
    }

    #[test]
    fn every_state_table_exists() {
        let db = Database::in_memory().unwrap();
        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                Ok(names)
            })
            .unwrap();
        for expected in [
            "tasks",
            "goals",
            "memory_items",
            "reasoning_log",
            "execution_log",
            "vault",
            "pending_error",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn reopening_a_file_keeps_its_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("loom.db");

        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO vault (id, summary) VALUES (1, 'kept')", [])?;
            Ok(())
        })
        .unwrap();
        drop(db);

        let db = Database::open(&path).unwrap();
        let summary: String = db
            .with_conn(|conn| Ok(conn.query_row("SELECT summary FROM vault", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(summary, "kept");
        assert_eq!(user_version(&db), SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        }
        match Database::open(&path) {
            Err(StoreError::Setup { step, reason, .. }) => {
                assert_eq!(step, "read version");
                assert!(reason.contains("newer"));
            }
            Err(other) => panic!("expected setup error, got {other}"),
            Ok(_) => panic!("expected setup error"),
        }
    }
}

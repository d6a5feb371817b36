use std::path::PathBuf;

/// Failures surfaced by a [`StateStore`](crate::StateStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file could not be created or brought to the current schema.
    #[error("cannot prepare {} ({step}): {reason}", path.display())]
    Setup {
        path: PathBuf,
        step: &'static str,
        reason: String,
    },

    /// A stored value no longer decodes into its domain type.
    #[error("{table}.{column} holds an unreadable value: {reason}")]
    Malformed {
        table: &'static str,
        column: &'static str,
        reason: String,
    },

    #[error("cannot encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// For stores outside this crate that are not backed by SQLite.
    #[error("state backend unavailable: {0}")]
    Backend(String),
}

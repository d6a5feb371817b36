use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::FromSql;
use rusqlite::Row;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Reads typed columns out of one row of `table`, attributing any decode
/// failure to the offending column.
pub(crate) struct RowReader<'r, 's> {
    row: &'r Row<'s>,
    table: &'static str,
}

impl<'r, 's> RowReader<'r, 's> {
    pub(crate) fn new(row: &'r Row<'s>, table: &'static str) -> Self {
        Self { row, table }
    }

    fn malformed(&self, column: &'static str, reason: impl Display) -> StoreError {
        StoreError::Malformed {
            table: self.table,
            column,
            reason: reason.to_string(),
        }
    }

    /// Nullable columns read as `Option<T>`.
    pub(crate) fn col<T: FromSql>(&self, idx: usize, column: &'static str) -> Result<T, StoreError> {
        self.row.get(idx).map_err(|e| self.malformed(column, e))
    }

    /// RFC 3339 text, normalized to UTC.
    pub(crate) fn timestamp(
        &self,
        idx: usize,
        column: &'static str,
    ) -> Result<DateTime<Utc>, StoreError> {
        let raw: String = self.col(idx, column)?;
        decode_timestamp(&raw).map_err(|e| self.malformed(column, e))
    }

    pub(crate) fn variant<T>(&self, idx: usize, column: &'static str) -> Result<T, StoreError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw: String = self.col(idx, column)?;
        raw.parse().map_err(|e| self.malformed(column, e))
    }

    pub(crate) fn json<T: DeserializeOwned>(
        &self,
        idx: usize,
        column: &'static str,
    ) -> Result<T, StoreError> {
        let raw: String = self.col(idx, column)?;
        serde_json::from_str(&raw).map_err(|e| self.malformed(column, e))
    }
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use loom_core::TaskStatus;
    use rusqlite::Connection;

    use super::*;

    fn read_one<T>(
        select: &str,
        f: impl FnOnce(&RowReader<'_, '_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare(select).unwrap();
        let mut rows = stmt.query([]).unwrap();
        let row = rows.next().unwrap().unwrap();
        f(&RowReader::new(row, "scratch"))
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let ts = read_one("SELECT '2026-01-01T02:00:00+02:00'", |r| r.timestamp(0, "at")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn bad_timestamp_is_attributed_to_its_column() {
        let err = read_one("SELECT 'yesterday'", |r| r.timestamp(0, "at")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Malformed {
                table: "scratch",
                column: "at",
                ..
            }
        ));
    }

    #[test]
    fn unknown_variant_keeps_the_parse_message() {
        let ok: TaskStatus = read_one("SELECT 'done'", |r| r.variant(0, "status")).unwrap();
        assert_eq!(ok, TaskStatus::Done);
        let err = read_one("SELECT 'archived'", |r| r.variant::<TaskStatus>(0, "status")).unwrap_err();
        assert!(err.to_string().contains("unknown task status: archived"));
    }

    #[test]
    fn null_reads_as_none_but_not_as_text() {
        let none: Option<String> = read_one("SELECT NULL", |r| r.col(0, "notes")).unwrap();
        assert_eq!(none, None);
        assert!(read_one("SELECT NULL", |r| r.col::<String>(0, "heading")).is_err());
    }
}

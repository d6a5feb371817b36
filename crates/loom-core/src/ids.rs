use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one call to the executor, across all of its attempts.
///
/// `exec_` followed by a UUID v7, so ids sort by creation time.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

const PREFIX: &str = "exec_";

impl ExecutionId {
    pub fn new() -> Self {
        Self(format!("{PREFIX}{}", Uuid::now_v7()))
    }

    /// Wrap an id read back from storage or logs. Not validated.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Milliseconds since the Unix epoch encoded in the id, if it is a
    /// well-formed v7 id.
    pub fn created_at_ms(&self) -> Option<u64> {
        let uuid = Uuid::parse_str(self.0.strip_prefix(PREFIX)?).ok()?;
        let (secs, nanos) = uuid.get_timestamp()?.to_unix();
        Some(secs * 1000 + u64::from(nanos) / 1_000_000)
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

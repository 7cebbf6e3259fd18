//! Student-module history: row model, the compaction sweep, and the
//! cleaner that drives it against the store.

pub mod cleaner;
pub mod compact;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of one history row. Unique, not ordered.
pub type RowId = i64;

/// The grouping key for history rows: one student's state on one module.
/// Compaction never crosses grouping keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentModuleId(pub i64);

impl fmt::Display for StudentModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One audit row: an id and the timestamp it was written.
///
/// Rows are read-only input to the compactor; classification never
/// mutates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRow {
    pub id: RowId,
    pub created: DateTime<Utc>,
}

impl HistoryRow {
    #[must_use]
    pub const fn new(id: RowId, created: DateTime<Utc>) -> Self {
        Self { id, created }
    }
}

//! Orchestrates the compaction sweep against the store.
//!
//! The cleaner owns no storage and prints nothing itself: the store and
//! the reporting sink are both injected, so tests substitute them without
//! subclassing and the CLI decides where report lines go.

use anyhow::Result;
use chrono::Duration;
use tracing::debug;

use super::compact::{default_delete_gap, redundant_rows};
use super::{HistoryRow, RowId, StudentModuleId};

/// Storage collaborator for history rows.
///
/// `fetch_rows` must return rows ordered ascending by `created`; the
/// cleaner validates but never sorts. Transactional guarantees are the
/// implementor's problem.
pub trait HistoryStore {
    /// Every grouping key that has history rows.
    fn group_keys(&self) -> Result<Vec<StudentModuleId>>;

    /// All history rows for one grouping key, ordered ascending by `created`.
    fn fetch_rows(&self, key: StudentModuleId) -> Result<Vec<HistoryRow>>;

    /// Delete the given rows. Returns the number of rows removed.
    fn delete_rows(&self, ids: &[RowId]) -> Result<usize>;
}

/// Line-oriented reporting sink: one message per grouping key processed.
pub type Say<'a> = &'a mut dyn FnMut(&str);

/// What happened for one grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanOutcome {
    /// No rows exist for the key. Nothing to do; not an error.
    NoHistory,
    /// Rows were present; `deleted` of `total` were (or would have been)
    /// removed.
    Cleaned { deleted: usize, total: usize },
}

/// Drives the compaction sweep over one or more grouping keys.
pub struct HistoryCleaner<'a, S: HistoryStore> {
    store: &'a S,
    dry_run: bool,
    verbosity: u8,
    gap: Duration,
}

impl<'a, S: HistoryStore> HistoryCleaner<'a, S> {
    #[must_use]
    pub fn new(store: &'a S, dry_run: bool, verbosity: u8) -> Self {
        Self {
            store,
            dry_run,
            verbosity,
            gap: default_delete_gap(),
        }
    }

    /// Override the redundancy gap (default 500ms).
    #[must_use]
    pub fn with_gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    /// Clean one grouping key's worth of history.
    ///
    /// Storage failures propagate unmodified; dry-run mode never reaches
    /// the delete path.
    pub fn clean_one(&self, key: StudentModuleId, say: Say<'_>) -> Result<CleanOutcome> {
        let history = self.store.fetch_rows(key)?;
        if history.is_empty() {
            say(&format!("No history for student_module_id {key}"));
            return Ok(CleanOutcome::NoHistory);
        }

        let doomed = redundant_rows(&history, self.gap)?;

        let verb = if self.dry_run {
            "Would have deleted"
        } else {
            "Deleting"
        };
        say(&format!(
            "{verb} {to_delete} rows of {total} for student_module_id {key}",
            to_delete = doomed.len(),
            total = history.len(),
        ));

        if !self.dry_run && !doomed.is_empty() {
            self.store.delete_rows(&doomed)?;
        }

        Ok(CleanOutcome::Cleaned {
            deleted: doomed.len(),
            total: history.len(),
        })
    }

    /// Clean every grouping key in the store, sequentially.
    ///
    /// Returns per-key outcomes in key order. Keys share no mutable
    /// state; the first storage failure aborts the run.
    pub fn clean_all(&self, say: Say<'_>) -> Result<Vec<(StudentModuleId, CleanOutcome)>> {
        let keys = self.store.group_keys()?;
        debug!(
            keys = keys.len(),
            dry_run = self.dry_run,
            verbosity = self.verbosity,
            "starting history sweep"
        );

        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.clean_one(key, say)?;
            outcomes.push((key, outcome));
        }
        Ok(outcomes)
    }
}

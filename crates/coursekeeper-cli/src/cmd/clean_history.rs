//! `ck clean-history` — prune redundant rows from the history table.
//!
//! When every field modification wrote its own history row, the table
//! filled with near-duplicates. This command runs the compaction sweep
//! over one, several, or all student modules.

use std::path::Path;

use anyhow::Result;
use chrono::Duration;
use clap::Args;
use coursekeeper_core::history::StudentModuleId;
use coursekeeper_core::history::cleaner::{CleanOutcome, HistoryCleaner};
use coursekeeper_core::store::SqliteStore;
use serde::Serialize;

use crate::output::{OutputMode, render};

/// Arguments for `ck clean-history`.
#[derive(Args, Debug)]
pub struct CleanHistoryArgs {
    /// Don't change the database, just show what would be done.
    #[arg(long)]
    pub dry_run: bool,

    /// Redundancy gap in milliseconds (default from config, 500).
    #[arg(long)]
    pub gap_ms: Option<i64>,

    /// student_module_ids to clean; every module with history when omitted.
    #[arg(value_name = "MODULE_ID")]
    pub module_ids: Vec<i64>,
}

/// Per-key summary for `--json` output.
#[derive(Debug, Serialize)]
pub struct KeySummary {
    pub student_module_id: i64,
    pub total: usize,
    pub deleted: usize,
    pub no_history: bool,
}

/// Output payload for `ck clean-history --json`.
#[derive(Debug, Serialize)]
pub struct CleanHistoryOutput {
    pub dry_run: bool,
    pub keys: Vec<KeySummary>,
}

/// Execute `ck clean-history`.
pub fn run_clean_history(
    args: &CleanHistoryArgs,
    mode: OutputMode,
    db_path: &Path,
    default_gap_ms: i64,
    verbosity: u8,
) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    let gap = Duration::milliseconds(args.gap_ms.unwrap_or(default_gap_ms));
    let cleaner = HistoryCleaner::new(&store, args.dry_run, verbosity).with_gap(gap);

    // In human mode the report lines *are* the output; in JSON mode they
    // are folded into the summary instead. Quiet runs suppress them.
    let human = !mode.is_json() && verbosity > 0;
    let mut say = |msg: &str| {
        if human {
            println!("{msg}");
        }
    };

    let outcomes = if args.module_ids.is_empty() {
        cleaner.clean_all(&mut say)?
    } else {
        let mut outcomes = Vec::with_capacity(args.module_ids.len());
        for &id in &args.module_ids {
            let key = StudentModuleId(id);
            outcomes.push((key, cleaner.clean_one(key, &mut say)?));
        }
        outcomes
    };

    if mode.is_json() {
        let keys = outcomes
            .iter()
            .map(|&(key, outcome)| match outcome {
                CleanOutcome::NoHistory => KeySummary {
                    student_module_id: key.0,
                    total: 0,
                    deleted: 0,
                    no_history: true,
                },
                CleanOutcome::Cleaned { deleted, total } => KeySummary {
                    student_module_id: key.0,
                    total,
                    deleted,
                    no_history: false,
                },
            })
            .collect();
        let out = CleanHistoryOutput {
            dry_run: args.dry_run,
            keys,
        };
        render(mode, &out, |_, _| Ok(()))?;
    }

    Ok(())
}

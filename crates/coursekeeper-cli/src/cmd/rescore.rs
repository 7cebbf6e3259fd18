//! `ck rescore` — drive one task entry's rescoring sweep synchronously.
//!
//! The task queue normally runs these; this command exists for operators
//! who need to replay a stuck entry against the store directly. The
//! entry's `task_input` decides the sweep shape: a `problem_url` scopes
//! it to one problem's student modules, otherwise every enrolled student
//! in the course is visited. Each visit stamps `last_rescore_us` on the
//! affected student-module rows.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use coursekeeper_core::store::SqliteStore;
use coursekeeper_core::task::runner::{
    perform_enrolled_student_update, perform_module_state_update, run_update_task,
};
use coursekeeper_core::task::{TaskError, TaskProgress, TaskStore};
use rusqlite::{Connection, params};

use crate::output::{OutputMode, render};

/// Arguments for `ck rescore`.
#[derive(Args, Debug)]
pub struct RescoreArgs {
    /// Task entry id to drive.
    #[arg(long)]
    pub task: i64,

    /// Task id to run as; defaults to the entry's own. A mismatch is
    /// recorded as a failure, same as in the queue.
    #[arg(long)]
    pub as_task: Option<String>,
}

/// Execute `ck rescore`.
pub fn run_rescore(args: &RescoreArgs, mode: OutputMode, db_path: &Path) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    let entry = store.get_entry(args.task)?;
    let running_task_id = args
        .as_task
        .clone()
        .unwrap_or_else(|| entry.task_id.clone());
    let now_us = Utc::now().timestamp_micros();

    let progress = run_update_task(&store, args.task, &running_task_id, |entry, report| {
        match entry.task_input.problem_url.as_deref() {
            Some(problem) => perform_module_state_update(
                &store,
                &entry.course_id,
                problem,
                entry.task_input.student.as_deref(),
                "rescored",
                None,
                &mut |module| stamp_module(store.connection(), module.id, now_us),
                report,
            ),
            None => perform_enrolled_student_update(
                &store,
                &entry.course_id,
                None,
                entry.task_input.student.as_deref(),
                "rescored",
                None,
                &mut |student| {
                    stamp_student_modules(store.connection(), &entry.course_id, student.id, now_us)
                },
                report,
            ),
        }
    })?;

    render(mode, &progress, |progress: &TaskProgress, w| {
        writeln!(
            w,
            "{}: {} updated of {} ({} attempted) in {}ms",
            progress.action_name,
            progress.updated,
            progress.total,
            progress.attempted,
            progress.duration_ms
        )
    })
}

fn stamp_module(conn: &Connection, module_id: i64, now_us: i64) -> Result<bool, TaskError> {
    let changed = conn
        .execute(
            "UPDATE student_modules SET last_rescore_us = ?1 WHERE id = ?2",
            params![now_us, module_id],
        )
        .map_err(|err| TaskError::UpdateFailed {
            subject: format!("student_module {module_id}"),
            message: err.to_string(),
        })?;
    Ok(changed > 0)
}

fn stamp_student_modules(
    conn: &Connection,
    course_id: &str,
    student_id: i64,
    now_us: i64,
) -> Result<bool, TaskError> {
    let changed = conn
        .execute(
            "UPDATE student_modules SET last_rescore_us = ?1
             WHERE course_id = ?2 AND student_id = ?3",
            params![now_us, course_id, student_id],
        )
        .map_err(|err| TaskError::UpdateFailed {
            subject: format!("student {student_id}"),
            message: err.to_string(),
        })?;
    Ok(changed > 0)
}

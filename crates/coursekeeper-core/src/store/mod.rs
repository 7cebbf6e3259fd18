//! Sqlite store.
//!
//! Runtime defaults are intentionally conservative:
//! - `journal_mode = WAL` to allow concurrent readers while writers work
//! - `busy_timeout = 5s` to reduce transient lock failures under contention
//! - `foreign_keys = ON` to protect relational integrity
//!
//! [`SqliteStore`] implements every storage collaborator the library
//! defines: [`HistoryStore`], [`TaskStore`], and [`EnrollmentStore`].
//! Timestamps are stored as integer microseconds since the epoch
//! (`*_us` columns).

pub mod schema;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, params_from_iter};

use crate::history::cleaner::HistoryStore;
use crate::history::{HistoryRow, RowId, StudentModuleId};
use crate::task::{
    EnrollmentStore, Student, StudentModule, TaskEntry, TaskInput, TaskState, TaskStore,
};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the store database, apply runtime pragmas, and
/// migrate the schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open store database {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    schema::migrate(&mut conn).context("apply store migrations")?;

    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Convert a stored microsecond timestamp back to a [`DateTime`].
fn datetime_from_us(us: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).ok_or_else(|| anyhow!("timestamp out of range: {us}us"))
}

/// Convert a [`DateTime`] to the stored microsecond representation.
#[must_use]
pub fn datetime_to_us(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// The concrete store handle, passed explicitly to every orchestrator.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the database at `path`, migrating if needed.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self { conn: open(path)? })
    }

    /// Wrap an already-configured connection (tests, in-memory use).
    pub fn from_connection(mut conn: Connection) -> Result<Self> {
        schema::migrate(&mut conn).context("apply store migrations")?;
        Ok(Self { conn })
    }

    /// Direct access for callers that need ad-hoc queries.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl HistoryStore for SqliteStore {
    fn group_keys(&self) -> Result<Vec<StudentModuleId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT student_module_id FROM student_module_history
                 ORDER BY student_module_id",
            )
            .context("prepare group_keys")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .context("query group_keys")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read group_keys")?;
        Ok(keys.into_iter().map(StudentModuleId).collect())
    }

    fn fetch_rows(&self, key: StudentModuleId) -> Result<Vec<HistoryRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, created_us FROM student_module_history
                 WHERE student_module_id = ?1
                 ORDER BY created_us, id",
            )
            .context("prepare fetch_rows")?;
        let rows = stmt
            .query_map(params![key.0], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })
            .context("query fetch_rows")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read fetch_rows")?;

        rows.into_iter()
            .map(|(id, us)| Ok(HistoryRow::new(id, datetime_from_us(us)?)))
            .collect()
    }

    fn delete_rows(&self, ids: &[RowId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM student_module_history WHERE id IN ({placeholders})");
        let deleted = self
            .conn
            .execute(&sql, params_from_iter(ids.iter()))
            .context("delete history rows")?;
        Ok(deleted)
    }
}

impl TaskStore for SqliteStore {
    fn get_entry(&self, entry_id: i64) -> Result<TaskEntry> {
        let (id, task_id, course_id, task_input): (i64, String, String, String) = self
            .conn
            .query_row(
                "SELECT id, task_id, course_id, task_input FROM instructor_tasks WHERE id = ?1",
                params![entry_id],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                },
            )
            .with_context(|| format!("load task entry {entry_id}"))?;

        let task_input: TaskInput = serde_json::from_str(&task_input)
            .with_context(|| format!("parse task_input for entry {entry_id}"))?;

        Ok(TaskEntry {
            id,
            task_id,
            course_id,
            task_input,
        })
    }

    fn update_state(
        &self,
        entry_id: i64,
        state: TaskState,
        output: &serde_json::Value,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE instructor_tasks SET task_state = ?1, task_output = ?2 WHERE id = ?3",
                params![state.as_str(), output.to_string(), entry_id],
            )
            .with_context(|| format!("update task entry {entry_id}"))?;
        if changed == 0 {
            anyhow::bail!("no task entry with id {entry_id}");
        }
        Ok(())
    }
}

impl EnrollmentStore for SqliteStore {
    fn enrolled_students(&self, course_id: &str) -> Result<Vec<Student>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.username, u.email
                 FROM users u
                 JOIN course_enrollments ce ON ce.user_id = u.id
                 WHERE ce.course_id = ?1
                 ORDER BY u.username",
            )
            .context("prepare enrolled_students")?;
        let students = stmt
            .query_map(params![course_id], |row| {
                Ok(Student {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                })
            })
            .context("query enrolled_students")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read enrolled_students")?;
        Ok(students)
    }

    fn find_student(&self, identifier: &str) -> Result<Option<Student>> {
        let column = if identifier.contains('@') {
            "email"
        } else {
            "username"
        };
        let sql = format!("SELECT id, username, email FROM users WHERE {column} = ?1");
        let found = self
            .conn
            .query_row(&sql, params![identifier], |row| {
                Ok(Student {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                })
            })
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .with_context(|| format!("look up student {identifier}"))?;
        Ok(found)
    }

    fn student_modules(
        &self,
        course_id: &str,
        module_state_key: &str,
    ) -> Result<Vec<StudentModule>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, student_id, module_state_key
                 FROM student_modules
                 WHERE course_id = ?1 AND module_state_key = ?2
                 ORDER BY id",
            )
            .context("prepare student_modules")?;
        let modules = stmt
            .query_map(params![course_id, module_state_key], |row| {
                Ok(StudentModule {
                    id: row.get(0)?,
                    student_id: row.get(1)?,
                    module_state_key: row.get(2)?,
                })
            })
            .context("query student_modules")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read student_modules")?;
        Ok(modules)
    }
}

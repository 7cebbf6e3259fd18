//! Canonical sqlite schema for the coursekeeper store.
//!
//! Normalized for queryability:
//! - `student_module_history` is the audit table the compaction sweep
//!   prunes; `created_us` is the ordering key
//! - `users` / `user_preferences` back the read-only API
//! - `course_enrollments` and `student_modules` feed the update sweeps
//! - `instructor_tasks` holds task entries and their persisted outcomes
//! - `store_meta` tracks the schema version

use anyhow::{Context, Result, bail};
use rusqlite::Connection;

/// Latest schema version written to `store_meta`.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

/// Migration v1: the full initial schema.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE CHECK (length(trim(username)) > 0),
    email TEXT NOT NULL UNIQUE CHECK (email LIKE '%@%')
);

CREATE TABLE IF NOT EXISTS user_preferences (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    key TEXT NOT NULL CHECK (length(trim(key)) > 0),
    value TEXT NOT NULL,
    UNIQUE (user_id, key)
);

CREATE TABLE IF NOT EXISTS course_enrollments (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    course_id TEXT NOT NULL,
    PRIMARY KEY (user_id, course_id)
);

CREATE TABLE IF NOT EXISTS student_modules (
    id INTEGER PRIMARY KEY,
    course_id TEXT NOT NULL,
    module_state_key TEXT NOT NULL,
    student_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    last_rescore_us INTEGER
);

CREATE INDEX IF NOT EXISTS idx_student_modules_course_problem
    ON student_modules(course_id, module_state_key);

CREATE TABLE IF NOT EXISTS student_module_history (
    id INTEGER PRIMARY KEY,
    student_module_id INTEGER NOT NULL,
    created_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_module_created
    ON student_module_history(student_module_id, created_us);

CREATE TABLE IF NOT EXISTS instructor_tasks (
    id INTEGER PRIMARY KEY,
    task_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    task_input TEXT NOT NULL DEFAULT '{}',
    task_state TEXT,
    task_output TEXT
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
"#;

/// Read the schema version recorded in `store_meta` (0 when the table
/// does not exist yet).
pub fn current_schema_version(conn: &Connection) -> Result<u32> {
    let has_meta: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'store_meta')",
            [],
            |row| row.get(0),
        )
        .context("probe store_meta")?;
    if !has_meta {
        return Ok(0);
    }
    conn.query_row("SELECT schema_version FROM store_meta WHERE id = 1", [], |row| {
        row.get(0)
    })
    .context("read schema_version")
}

/// Migrate the database to [`LATEST_SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let version = current_schema_version(conn)?;
    if version > LATEST_SCHEMA_VERSION {
        bail!("database schema v{version} is newer than this build (v{LATEST_SCHEMA_VERSION})");
    }
    if version < 1 {
        let tx = conn.transaction().context("begin migration v1")?;
        tx.execute_batch(MIGRATION_V1_SQL)
            .context("apply migration v1")?;
        tx.commit().context("commit migration v1")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().expect("open");
        migrate(&mut conn).expect("first migrate");
        migrate(&mut conn).expect("second migrate");
        assert_eq!(
            current_schema_version(&conn).expect("version"),
            LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn fresh_database_reports_version_zero() {
        let conn = Connection::open_in_memory().expect("open");
        assert_eq!(current_schema_version(&conn).expect("version"), 0);
    }
}

//! Background-task module for grading/rescoring sweeps.
//!
//! The task queue itself (scheduling, retries, worker processes) is
//! external infrastructure. This module owns what runs *inside* one
//! task: visiting course enrollment data with an update function while
//! recording progress, and persisting the terminal state.
//!
//! Failures are values, not ambient exceptions: a sweep that aborts
//! produces a [`TaskFailure`] (kind + message + context) which the
//! runner persists before handing the error back to the queue layer.

pub mod runner;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted lifecycle states for a task entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Progress,
    Success,
    Failure,
}

impl TaskState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

/// Progress snapshot pushed to the task store after every visited item,
/// and persisted as the task output on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// User-visible verb for status messages, past tense ("rescored").
    pub action_name: String,
    /// Number of items visited so far.
    pub attempted: usize,
    /// Number of visits that performed some work.
    pub updated: usize,
    /// Number of items eligible for this sweep.
    pub total: usize,
    /// How long the sweep has (or had) been running.
    pub duration_ms: u64,
}

/// Structured failure payload persisted when a sweep aborts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Stable failure kind for machine handling.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
    /// Task/course/problem identifiers for the log trail.
    pub context: String,
}

impl TaskFailure {
    #[must_use]
    pub fn from_error(err: &TaskError, context: impl Into<String>) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            context: context.into(),
        }
    }
}

/// Errors surfaced by the update sweep.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A whole-course sweep was handed a problem_url it cannot use.
    #[error("value for problem_url not expected")]
    UnexpectedProblemUrl,

    #[error("student not found: {identifier}")]
    StudentNotFound { identifier: String },

    /// The entry's task id does not match the task actually running.
    #[error("requested task {requested} did not match running task {running}")]
    TaskIdMismatch { requested: String, running: String },

    /// The update function reported a fatal condition; no further items
    /// are attempted.
    #[error("update failed on {subject}: {message}")]
    UpdateFailed { subject: String, message: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TaskError {
    /// Stable kind identifier used in persisted [`TaskFailure`] payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnexpectedProblemUrl => "unexpected_problem_url",
            Self::StudentNotFound { .. } => "student_not_found",
            Self::TaskIdMismatch { .. } => "task_id_mismatch",
            Self::UpdateFailed { .. } => "update_failed",
            Self::Storage(_) => "storage",
        }
    }
}

/// One enrolled student, as the sweep sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// One student-module row eligible for a per-problem sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentModule {
    pub id: i64,
    pub student_id: i64,
    pub module_state_key: String,
}

/// Parsed `task_input` JSON carried by a task entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInput {
    /// Problem to restrict the sweep to; absent for whole-course sweeps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_url: Option<String>,
    /// Username or email of a single student to restrict the sweep to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<String>,
}

/// One row of the `instructor_tasks` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub id: i64,
    /// Queue-assigned task id; must match the task actually running.
    pub task_id: String,
    pub course_id: String,
    pub task_input: TaskInput,
}

/// Persistence collaborator for task entries.
pub trait TaskStore {
    fn get_entry(&self, entry_id: i64) -> Result<TaskEntry>;

    /// Record the task's state and its JSON output payload.
    fn update_state(&self, entry_id: i64, state: TaskState, output: &serde_json::Value)
        -> Result<()>;
}

/// Read collaborator for course enrollment data.
pub trait EnrollmentStore {
    /// Students enrolled in the course, ordered by username.
    fn enrolled_students(&self, course_id: &str) -> Result<Vec<Student>>;

    /// Look up a student by identifier: an identifier containing `@` is
    /// an email address, anything else a username.
    fn find_student(&self, identifier: &str) -> Result<Option<Student>>;

    /// Student-module rows matching a course and problem.
    fn student_modules(&self, course_id: &str, module_state_key: &str)
        -> Result<Vec<StudentModule>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_input_roundtrips_and_omits_absent_fields() {
        let input = TaskInput {
            problem_url: None,
            student: Some("kim@example.com".to_string()),
        };
        let json = serde_json::to_string(&input).expect("serialize");
        assert_eq!(json, r#"{"student":"kim@example.com"}"#);

        let parsed: TaskInput = serde_json::from_str("{}").expect("parse empty");
        assert_eq!(parsed, TaskInput::default());
    }

    #[test]
    fn failure_captures_kind_message_and_context() {
        let err = TaskError::StudentNotFound {
            identifier: "ghost".to_string(),
        };
        let failure = TaskFailure::from_error(&err, "task t-1 course c-1");
        assert_eq!(failure.kind, "student_not_found");
        assert_eq!(failure.message, "student not found: ghost");
        assert_eq!(failure.context, "task t-1 course c-1");
    }

    #[test]
    fn task_states_serialize_uppercase() {
        let json = serde_json::to_string(&TaskState::Progress).expect("serialize");
        assert_eq!(json, r#""PROGRESS""#);
        assert_eq!(TaskState::Failure.as_str(), "FAILURE");
    }
}

//! Update-sweep runner.
//!
//! Two visitors cover the sweep shapes the platform needs: one over
//! every enrolled student in a course (whole-course regrades), one over
//! the student-module rows of a single problem (per-problem rescores).
//! [`run_update_task`] wraps either visitor with task-entry bookkeeping:
//! it loads the entry, streams progress into the task store, and
//! persists the terminal state before returning.

use std::time::Instant;

use tracing::{error, info, warn};

use super::{
    EnrollmentStore, Student, StudentModule, TaskEntry, TaskError, TaskFailure, TaskProgress,
    TaskState, TaskStore,
};

/// Progress sink: invoked with a fresh snapshot after every visited item.
pub type Report<'a> = &'a mut dyn FnMut(&TaskProgress);

fn snapshot(
    action_name: &str,
    attempted: usize,
    updated: usize,
    total: usize,
    started: Instant,
) -> TaskProgress {
    TaskProgress {
        action_name: action_name.to_string(),
        attempted,
        updated,
        total,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

/// Visit every enrolled student in `course_id` with `update_fcn`.
///
/// `student_identifier` restricts the sweep to one student (email when
/// it contains `@`, username otherwise). `filter_fcn` may narrow the
/// candidate list further. A `problem_url` is rejected outright: it is
/// meaningless for a whole-course sweep.
///
/// The update function returns `true` when it performed some work;
/// logging of per-item failures it chooses to tolerate is its own
/// business. An `Err` aborts the sweep and no further students are
/// attempted.
#[allow(clippy::too_many_arguments)]
pub fn perform_enrolled_student_update<E: EnrollmentStore>(
    enrollments: &E,
    course_id: &str,
    problem_url: Option<&str>,
    student_identifier: Option<&str>,
    action_name: &str,
    filter_fcn: Option<&dyn Fn(Vec<Student>) -> Vec<Student>>,
    update_fcn: &mut dyn FnMut(&Student) -> Result<bool, TaskError>,
    report: Report<'_>,
) -> Result<TaskProgress, TaskError> {
    if problem_url.is_some() {
        return Err(TaskError::UnexpectedProblemUrl);
    }

    let started = Instant::now();
    let mut students = enrollments.enrolled_students(course_id)?;

    if let Some(identifier) = student_identifier {
        let student = find_required_student(enrollments, identifier)?;
        students.retain(|s| s.id == student.id);
    }

    if let Some(filter) = filter_fcn {
        students = filter(students);
    }

    let total = students.len();
    let mut attempted = 0;
    let mut updated = 0;

    report(&snapshot(action_name, attempted, updated, total, started));
    for student in &students {
        attempted += 1;
        if update_fcn(student)? {
            updated += 1;
        }
        report(&snapshot(action_name, attempted, updated, total, started));
    }

    Ok(snapshot(action_name, attempted, updated, total, started))
}

/// Visit the student-module rows matching `course_id` and
/// `module_state_key` with `update_fcn`.
///
/// Same contract as [`perform_enrolled_student_update`], scoped to one
/// problem instead of the whole course.
#[allow(clippy::too_many_arguments)]
pub fn perform_module_state_update<E: EnrollmentStore>(
    enrollments: &E,
    course_id: &str,
    module_state_key: &str,
    student_identifier: Option<&str>,
    action_name: &str,
    filter_fcn: Option<&dyn Fn(Vec<StudentModule>) -> Vec<StudentModule>>,
    update_fcn: &mut dyn FnMut(&StudentModule) -> Result<bool, TaskError>,
    report: Report<'_>,
) -> Result<TaskProgress, TaskError> {
    let started = Instant::now();
    let mut modules = enrollments.student_modules(course_id, module_state_key)?;

    if let Some(identifier) = student_identifier {
        let student = find_required_student(enrollments, identifier)?;
        modules.retain(|m| m.student_id == student.id);
    }

    if let Some(filter) = filter_fcn {
        modules = filter(modules);
    }

    let total = modules.len();
    let mut attempted = 0;
    let mut updated = 0;

    report(&snapshot(action_name, attempted, updated, total, started));
    for module in &modules {
        attempted += 1;
        if update_fcn(module)? {
            updated += 1;
        }
        report(&snapshot(action_name, attempted, updated, total, started));
    }

    Ok(snapshot(action_name, attempted, updated, total, started))
}

fn find_required_student<E: EnrollmentStore>(
    enrollments: &E,
    identifier: &str,
) -> Result<Student, TaskError> {
    enrollments
        .find_student(identifier)?
        .ok_or_else(|| TaskError::StudentNotFound {
            identifier: identifier.to_string(),
        })
}

/// Run one task entry to completion.
///
/// Loads the entry, verifies it names the task actually running, streams
/// progress snapshots into the task store, and persists the terminal
/// state: `SUCCESS` with the final [`TaskProgress`], or `FAILURE` with a
/// [`TaskFailure`] payload. The error is then returned to the queue
/// layer, which applies its own failure bookkeeping.
pub fn run_update_task<T: TaskStore>(
    tasks: &T,
    entry_id: i64,
    running_task_id: &str,
    visit: impl FnOnce(&TaskEntry, Report<'_>) -> Result<TaskProgress, TaskError>,
) -> Result<TaskProgress, TaskError> {
    let entry = tasks.get_entry(entry_id)?;
    let task_info = format!(
        "task \"{}\": course \"{}\" problem \"{}\"",
        entry.task_id,
        entry.course_id,
        entry.task_input.problem_url.as_deref().unwrap_or(""),
    );
    info!("Starting update (nothing done yet): {task_info}");

    if entry.task_id != running_task_id {
        let err = TaskError::TaskIdMismatch {
            requested: entry.task_id.clone(),
            running: running_task_id.to_string(),
        };
        persist_failure(tasks, entry_id, &err, &task_info);
        return Err(err);
    }

    let mut report = |progress: &TaskProgress| {
        let payload = match serde_json::to_value(progress) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("could not serialize progress for {task_info}: {err}");
                return;
            }
        };
        if let Err(err) = tasks.update_state(entry_id, TaskState::Progress, &payload) {
            // Progress updates are advisory; the terminal state is what
            // must land.
            warn!("could not record progress for {task_info}: {err}");
        }
    };

    match visit(&entry, &mut report) {
        Ok(progress) => {
            let payload = serde_json::to_value(&progress)
                .map_err(|err| TaskError::Storage(err.into()))?;
            tasks.update_state(entry_id, TaskState::Success, &payload)?;
            info!(
                attempted = progress.attempted,
                updated = progress.updated,
                total = progress.total,
                "Finished update: {task_info}"
            );
            Ok(progress)
        }
        Err(err) => {
            error!("Update failed: {task_info}: {err}");
            persist_failure(tasks, entry_id, &err, &task_info);
            Err(err)
        }
    }
}

fn persist_failure<T: TaskStore>(tasks: &T, entry_id: i64, err: &TaskError, task_info: &str) {
    let failure = TaskFailure::from_error(err, task_info);
    match serde_json::to_value(&failure) {
        Ok(payload) => {
            if let Err(store_err) = tasks.update_state(entry_id, TaskState::Failure, &payload) {
                error!("could not record failure for {task_info}: {store_err}");
            }
        }
        Err(ser_err) => error!("could not serialize failure for {task_info}: {ser_err}"),
    }
}

//! coursekeeper-core library.
//!
//! Operational logic for a courseware platform's backing store: the
//! history-compaction sweep and its orchestrator, the sqlite store, and
//! the update-sweep runner used for grading/rescoring tasks.
//!
//! Conventions: `thiserror` enums at the error seams with
//! `anyhow::Result` for orchestration-level return types, and `tracing`
//! for logging throughout.

pub mod config;
pub mod error;
pub mod history;
pub mod store;
pub mod task;

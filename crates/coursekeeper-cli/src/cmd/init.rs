//! `ck init` — create or migrate the store database.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use coursekeeper_core::store;
use serde::Serialize;

use crate::output::{OutputMode, render};

#[derive(Args, Debug)]
pub struct InitArgs {}

/// Output payload for `ck init`.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub db_path: String,
    pub schema_version: u32,
}

/// Execute `ck init`. Opening the database applies pragmas and migrates
/// the schema, so this is safe to re-run.
pub fn run_init(_args: &InitArgs, mode: OutputMode, db_path: &Path) -> Result<()> {
    let conn = store::open(db_path)?;
    let schema_version = store::schema::current_schema_version(&conn)?;

    let out = InitOutput {
        db_path: db_path.display().to_string(),
        schema_version,
    };
    render(mode, &out, |out, w| {
        writeln!(
            w,
            "Initialized coursekeeper database at {} (schema v{})",
            out.db_path, out.schema_version
        )
    })
}

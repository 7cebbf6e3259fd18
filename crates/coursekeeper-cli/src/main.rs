#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use coursekeeper_core::config;
use coursekeeper_core::error::ErrorCode;
use coursekeeper_core::history::compact::OrderingError;
use coursekeeper_core::task::TaskError;
use output::{CliError, OutputMode, render_error};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "coursekeeper: operational tooling for the courseware store",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress per-key report lines; errors still print.
    #[arg(short, long)]
    quiet: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Path to the store database (overrides coursekeeper.toml).
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Derive the output mode from flags.
    fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Create or migrate the store database",
        after_help = "EXAMPLES:\n    # Initialize the default database\n    ck init\n\n    # Initialize at an explicit path\n    ck --db /var/lib/ck/store.sqlite3 init"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        about = "Delete unneeded rows from the student-module history table",
        long_about = "Delete unneeded rows from the student-module history table.\n\nA row is unneeded when a later row for the same student module exists\nwithin the redundancy gap (default 500ms).",
        after_help = "EXAMPLES:\n    # Show what would be deleted, touching nothing\n    ck clean-history --dry-run\n\n    # Clean two specific student modules\n    ck clean-history 11 22\n\n    # Emit machine-readable output\n    ck clean-history --json"
    )]
    CleanHistory(cmd::clean_history::CleanHistoryArgs),

    #[command(
        about = "Drive one rescoring task entry synchronously",
        after_help = "EXAMPLES:\n    # Replay task entry 7 against the store\n    ck rescore --task 7\n\n    # Emit machine-readable output\n    ck rescore --task 7 --json"
    )]
    Rescore(cmd::rescore::RescoreArgs),

    #[command(about = "Generate shell completion scripts")]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "coursekeeper=debug,info"
        } else {
            "coursekeeper=info,warn"
        })
    });

    let format = env::var("CK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mode = cli.output_mode();
    let config = config::load(Path::new("."))?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());
    let verbosity = if cli.quiet {
        0
    } else if cli.verbose {
        2
    } else {
        1
    };
    tracing::debug!(db = %db_path.display(), "using store database");

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, mode, &db_path),
        Commands::CleanHistory(args) => cmd::clean_history::run_clean_history(
            args,
            mode,
            &db_path,
            config.history.gap_ms,
            verbosity,
        ),
        Commands::Rescore(args) => cmd::rescore::run_rescore(args, mode, &db_path),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}

/// Map a failure to its stable operator-facing code.
fn classify(err: &anyhow::Error) -> ErrorCode {
    if let Some(task_err) = err.downcast_ref::<TaskError>() {
        return match task_err {
            TaskError::UnexpectedProblemUrl => ErrorCode::UnexpectedProblemUrl,
            TaskError::StudentNotFound { .. } => ErrorCode::StudentNotFound,
            TaskError::TaskIdMismatch { .. } => ErrorCode::TaskIdMismatch,
            TaskError::UpdateFailed { .. } | TaskError::Storage(_) => ErrorCode::StorageFailure,
        };
    }
    if err.downcast_ref::<OrderingError>().is_some() {
        return ErrorCode::RowsOutOfOrder;
    }
    if err.downcast_ref::<config::ConfigParseError>().is_some() {
        return ErrorCode::ConfigParseError;
    }
    if let Some(sql_err) = err.downcast_ref::<rusqlite::Error>() {
        // A no-rows read reaching the top level is a missing task entry;
        // every other lookup converts it before it propagates.
        return if matches!(sql_err, rusqlite::Error::QueryReturnedNoRows) {
            ErrorCode::TaskEntryNotFound
        } else {
            ErrorCode::StorageFailure
        };
    }
    ErrorCode::InternalUnexpected
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let mode = cli.output_mode();

    if let Err(err) = run(&cli) {
        let code = classify(&err);
        let cli_err = CliError {
            message: format!("{err:#}"),
            suggestion: code.hint().map(ToString::to_string),
            error_code: Some(code.code().to_string()),
        };
        let _ = render_error(mode, &cli_err);
        std::process::exit(1);
    }
}

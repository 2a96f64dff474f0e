//! Command-line entry point for the app generation engine.
//!
//! `run` admits and drives one task in-process; `show` and `list` read the
//! record store. Records are printed as JSON on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use appforge::bootstrap::Project;
use appforge::core::error::AdmissionError;
use appforge::core::types::TaskStatus;
use appforge::exit_codes;
use appforge::io::paths::{InitOptions, init_project};
use appforge::lifecycle::AdmissionRequest;
use appforge::logging;

#[derive(Parser)]
#[command(
    name = "appforge",
    version,
    about = "Turn a feature request into a generated app with a sandboxed coding agent"
)]
struct Cli {
    /// Project directory holding `.appforge/`.
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.appforge/config.toml` with defaults.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Admit a task and run it to completion.
    Run {
        prompt: String,
        /// Reuse this record id instead of creating a new record.
        #[arg(long)]
        record_id: Option<String>,
        /// Rate-limit identity (defaults to `rate_limit.default_client_id`).
        #[arg(long)]
        client_id: Option<String>,
    },
    /// Print the record for a dispatch event id.
    Show { event_id: String },
    /// Print the most recent records, newest first.
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn main() {
    logging::init("warn");
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => {
            let paths = init_project(&cli.project_dir, InitOptions { force })?;
            println!("{}", paths.config_path.display());
            Ok(exit_codes::OK)
        }
        Command::Run {
            prompt,
            record_id,
            client_id,
        } => cmd_run(
            &Project::load(&cli.project_dir)?,
            AdmissionRequest {
                prompt,
                record_id,
                client_id,
            },
        ),
        Command::Show { event_id } => {
            let project = Project::load(&cli.project_dir)?;
            let record = project
                .store()?
                .find_by_event_id(&event_id)?
                .with_context(|| format!("no task with event id {event_id}"))?;
            print_json(&record)?;
            Ok(exit_codes::OK)
        }
        Command::List { limit } => {
            let project = Project::load(&cli.project_dir)?;
            let limit = limit.unwrap_or(project.config.store.list_limit);
            print_json(&project.store()?.list_recent(limit)?)?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(project: &Project, request: AdmissionRequest) -> Result<i32> {
    let controller = project.controller()?;
    let admission = match controller.admit(&request) {
        Ok(admission) => admission,
        Err(err @ AdmissionError::RateLimited { .. }) => {
            eprintln!("{err}");
            return Ok(exit_codes::RATE_LIMITED);
        }
        Err(err) => return Err(err.into()),
    };
    eprintln!(
        "task {} admitted (event {})",
        admission.record_id, admission.event_id
    );

    let outcome = controller
        .run(&admission.record_id)
        .map_err(anyhow::Error::from)
        .context("run task")?;
    print_json(&outcome.record)?;
    Ok(match outcome.record.status {
        TaskStatus::Completed => exit_codes::OK,
        TaskStatus::Failed => exit_codes::TASK_FAILED,
        TaskStatus::Pending => exit_codes::INVALID,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

//! `smartctx` command-line entry point.
//!
//! # Responsibility
//! - Map subcommands onto `ContextService` operations.
//! - Report failures on stderr with exit status 1.

mod render;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde_json::Value;
use smartctx_core::{
    default_log_level, init_logging, parse_context_scope, ContextScope, ContextService, JsonMap,
    StoreConfig, DEFAULT_STORE_ROOT,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "smartctx", version, about = "File-backed workflow context store")]
struct Cli {
    /// Store root holding `context/` and `checkpoints/`.
    #[arg(long, global = true, env = "SMARTCTX_ROOT", default_value = DEFAULT_STORE_ROOT)]
    root: PathBuf,

    #[arg(long, global = true, env = "SMARTCTX_LOG")]
    log_level: Option<String>,

    /// Defaults to `<root>/logs`.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new context for a project.
    #[command(alias = "init")]
    Create {
        project: String,
        workflow: String,
        /// JSON object merged into the new document.
        #[arg(long)]
        data: Option<String>,
    },
    /// List active contexts.
    List,
    /// Print a context or one of its sections.
    Show {
        project: String,
        #[arg(value_enum, default_value_t = Section::All)]
        section: Section,
    },
    /// Merge a JSON patch into the current workflow state.
    UpdateWorkflow {
        project: String,
        workflow: String,
        json: Option<String>,
    },
    /// Merge a JSON patch into one task's progress.
    UpdateTask {
        project: String,
        task_id: String,
        json: Option<String>,
    },
    /// Merge a JSON patch into one agent's memory.
    UpdateAgent {
        project: String,
        agent: String,
        json: Option<String>,
    },
    Checkpoint {
        project: String,
        name: String,
    },
    Restore {
        project: String,
        name: String,
    },
    /// Move a context into the monthly archive.
    Archive {
        project: String,
    },
    Stats,
    /// Delete checkpoints and archives older than `days` (default 90).
    Cleanup {
        days: Option<u32>,
    },
    Export {
        project: String,
        file: Option<PathBuf>,
    },
    Import {
        file: PathBuf,
    },
    Validate {
        project: String,
    },
    /// Print the view of a context an agent may read.
    Context {
        project: String,
        agent: String,
        #[arg(long, default_value = "agent_specific", value_parser = parse_context_scope)]
        scope: ContextScope,
    },
    /// Periodically print active context summaries.
    Monitor {
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: u64,
        /// Stop after this many refreshes; runs until interrupted when absent.
        #[arg(long)]
        iterations: Option<u32>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    All,
    Metadata,
    Project,
    Workflow,
    Tasks,
    Agents,
    Quality,
}

impl Section {
    fn field(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Metadata => Some("metadata"),
            Self::Project => Some("project_state"),
            Self::Workflow => Some("current_workflow_state"),
            Self::Tasks => Some("task_progress"),
            Self::Agents => Some("agent_memory"),
            Self::Quality => Some("quality_metrics"),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = StoreConfig::with_root(&cli.root);

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());
    let log_dir = cli.log_dir.clone().unwrap_or_else(|| config.log_dir());
    if let Err(err) = init_logging(&level, &log_dir) {
        eprintln!("warning: file logging disabled: {err}");
    }

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            warn!("event=cli_command module=cli status=error error={err}");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(command: Command, config: &StoreConfig) -> Result<()> {
    let service = ContextService::open(config)
        .with_context(|| format!("failed to open store at {}", config.root.display()))?;

    match command {
        Command::Create {
            project,
            workflow,
            data,
        } => {
            let initial = data.as_deref().map(parse_object).transpose()?;
            let document = service.create_context(&project, &workflow, initial.as_ref())?;
            println!(
                "Created context {} for project {project}",
                document.context_id
            );
        }
        Command::List => {
            render::print_summaries(&service.summaries()?);
        }
        Command::Show { project, section } => {
            let document = require_context(&service, &project)?;
            let mut value = document.to_value()?;
            if let Some(field) = section.field() {
                value = value.get(field).cloned().unwrap_or(Value::Null);
            }
            render::print_json(&value)?;
        }
        Command::UpdateWorkflow {
            project,
            workflow,
            json,
        } => {
            let patch = parse_optional_object(json.as_deref())?;
            let state = service.update_workflow_state(&project, &workflow, &patch)?;
            println!(
                "Updated workflow {workflow} for {project}: status={}",
                state.status.as_str()
            );
        }
        Command::UpdateTask {
            project,
            task_id,
            json,
        } => {
            let patch = parse_optional_object(json.as_deref())?;
            let progress = service.update_task_progress(&project, &task_id, &patch)?;
            println!(
                "Updated task {task_id} for {project}: {}/{} complete ({}%)",
                progress.completed_tasks, progress.total_tasks, progress.completion_percentage
            );
        }
        Command::UpdateAgent {
            project,
            agent,
            json,
        } => {
            let patch = parse_optional_object(json.as_deref())?;
            service.update_agent_memory(&project, &agent, &patch)?;
            println!("Updated memory of {agent} for {project}");
        }
        Command::Checkpoint { project, name } => {
            let path = service.create_checkpoint(&project, &name)?;
            println!("Created checkpoint {name}: {}", path.display());
        }
        Command::Restore { project, name } => {
            service.restore_checkpoint(&project, &name)?;
            println!("Restored {project} from checkpoint {name}");
        }
        Command::Archive { project } => {
            let path = service.archive_context(&project)?;
            println!("Archived {project}: {}", path.display());
        }
        Command::Stats => {
            render::print_json(&serde_json::to_value(service.statistics()?)?)?;
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.retention_days);
            let report = service.cleanup_old_contexts(days)?;
            println!(
                "Cleanup removed {} archived contexts and {} checkpoints older than {days} days",
                report.deleted_contexts, report.deleted_checkpoints
            );
        }
        Command::Export { project, file } => {
            let output =
                file.unwrap_or_else(|| PathBuf::from(format!("{project}-context-export.json")));
            service.export_context(&project, &output)?;
            println!("Exported {project} to {}", output.display());
        }
        Command::Import { file } => {
            let document = service.import_context(&file)?;
            println!(
                "Imported context for {} from {}",
                document.project_id(),
                file.display()
            );
        }
        Command::Validate { project } => {
            service.validate_context(&project)?;
            println!("Context for {project} is valid");
        }
        Command::Context {
            project,
            agent,
            scope,
        } => {
            let Some(view) = service.get_relevant_context(&project, &agent, scope)? else {
                bail!("no active context for project `{project}`");
            };
            render::print_json(&view)?;
        }
        Command::Monitor {
            interval_secs,
            iterations,
        } => {
            info!(
                "event=monitor_start module=cli status=ok interval_secs={} iterations={:?}",
                interval_secs, iterations
            );
            let mut refreshes = 0u32;
            loop {
                println!("--- {} ---", smartctx_core::time::timestamp_now());
                render::print_summaries(&service.summaries()?);
                refreshes += 1;
                if iterations.is_some_and(|limit| refreshes >= limit) {
                    break;
                }
                thread::sleep(Duration::from_secs(interval_secs));
            }
        }
    }
    Ok(())
}

fn require_context(
    service: &ContextService<smartctx_core::FileContextRepository>,
    project: &str,
) -> Result<smartctx_core::ContextDocument> {
    service
        .load_context(project)?
        .with_context(|| format!("no active context for project `{project}`"))
}

fn parse_optional_object(raw: Option<&str>) -> Result<JsonMap> {
    raw.map(parse_object)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn parse_object(raw: &str) -> Result<JsonMap> {
    match serde_json::from_str::<Value>(raw).context("invalid JSON argument")? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_object, parse_optional_object, Cli};
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn monitor_interval_must_be_positive() {
        assert!(Cli::try_parse_from(["smartctx", "monitor", "--interval-secs", "0"]).is_err());
        assert!(Cli::try_parse_from(["smartctx", "monitor", "--interval-secs", "1"]).is_ok());
    }

    #[test]
    fn json_arguments_must_be_objects() {
        assert_eq!(parse_object(r#"{"a":1}"#).unwrap().len(), 1);
        assert!(parse_object("[1,2]").is_err());
        assert!(parse_object("{oops").is_err());
        assert!(parse_optional_object(None).unwrap().is_empty());
    }
}

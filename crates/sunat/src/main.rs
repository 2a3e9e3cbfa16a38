//! SUNAT ETL launcher
//!
//! - `run`: full cycle over the configured drop folder
//! - `local`: one pipeline over a local file or directory
//! - `classify`: show how file names map to document types
//! - `tasks`: inspect and retry the task queue

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use sunat_logging::LogConfig;
use tracing::{debug, error};

mod cli;

use cli::classify::ClassifyArgs;
use cli::pipeline::{LocalArgs, RunArgs};
use cli::tasks::TasksAction;

#[derive(Parser, Debug)]
#[command(name = "sunat", about = "SUNAT tax document ingestion", version)]
struct Cli {
    /// Config file (defaults to $SUNAT_HOME/config.toml)
    #[arg(long, global = true, env = "SUNAT_CONFIG")]
    config: Option<PathBuf>,

    /// Debug-level console logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the drop folder, archive what needs no transform, then process queued tasks
    Run {
        /// Phase 1 only: archive NO-TRANSFORM documents, queue nothing
        #[arg(long, env = "ETL_TEST_MODE")]
        archive_only: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a single pipeline over a local file or directory
    Local {
        /// Document type to run (e.g. sire_ventas)
        pipeline: String,

        /// File or directory to ingest
        path: PathBuf,

        #[arg(long, env = "ETL_TEST_MODE")]
        archive_only: bool,

        #[arg(long)]
        json: bool,
    },

    /// Classify file names without touching any store
    Classify {
        /// File names (directories are stripped)
        #[arg(required = true)]
        names: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage queued tasks
    Tasks {
        #[command(subcommand)]
        action: TasksCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TasksCommand {
    /// List tasks in queue order
    List {
        /// Filter by status (pending, processed, error)
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long)]
        json: bool,
    },

    /// Queue a failed task again
    Retry {
        /// Task ID
        id: i64,
    },

    /// Task counts by status
    Stats {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = cli::context::load_config(cli.config.as_deref());
    let level = config.as_ref().ok().and_then(|c| c.log_level.clone());

    let _log_guard = match sunat_logging::init_logging(LogConfig {
        app_name: "sunat",
        level: level.as_deref(),
        log_dir: None,
        verbose: cli.verbose,
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: logging disabled: {:?}", err);
            None
        }
    };
    debug!(command = ?cli.command, "Starting");

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("{}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(
    command: Commands,
    config: anyhow::Result<sunat_ingest::PipelineConfig>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run { archive_only, json } => {
            cli::pipeline::run(config?, RunArgs { archive_only, json })
        }
        Commands::Local {
            pipeline,
            path,
            archive_only,
            json,
        } => cli::pipeline::local(
            config?,
            LocalArgs {
                pipeline,
                path,
                archive_only,
                json,
            },
        ),
        Commands::Classify { names, json } => cli::classify::run(ClassifyArgs { names, json }),
        Commands::Tasks { action } => {
            let action = match action {
                TasksCommand::List {
                    status,
                    limit,
                    json,
                } => TasksAction::List {
                    status,
                    limit,
                    json,
                },
                TasksCommand::Retry { id } => TasksAction::Retry { id },
                TasksCommand::Stats { json } => TasksAction::Stats { json },
            };
            cli::tasks::run(config?, action)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_local() {
        let cli = Cli::try_parse_from(["sunat", "local", "sire_ventas", "/tmp/in"]).unwrap();
        match cli.command {
            Commands::Local { pipeline, path, .. } => {
                assert_eq!(pipeline, "sire_ventas");
                assert_eq!(path, PathBuf::from("/tmp/in"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_tasks_list() {
        let cli =
            Cli::try_parse_from(["sunat", "tasks", "list", "--status", "error", "--limit", "5"])
                .unwrap();
        match cli.command {
            Commands::Tasks {
                action: TasksCommand::List { status, limit, .. },
            } => {
                assert_eq!(status.as_deref(), Some("error"));
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_classify_requires_names() {
        assert!(Cli::try_parse_from(["sunat", "classify"]).is_err());
    }
}

//! CLI interface for Lectern.
//!
//! `lectern run` is the long-running consumer: it follows the command stream
//! from the stored checkpoint and trains a model for every command it reads.
//! The other subcommands manage what the consumer depends on: the task type
//! registry, training configurations, and the command stream itself.
//!
//! Every subcommand is non-interactive: arguments in, plain text out.

mod format;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use jiff::Timestamp;
use serde_json::json;
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::consumer::StreamConsumer;
use crate::eventlog::{EventLog, ExpectedVersion, FileEventLog, NewEvent, Shutdown, SubscribeMode};
use crate::model::ConfigurationDocument;
use crate::orchestrator::Orchestrator;
use crate::prepare::CsvPreparation;
use crate::storage::Store;
use crate::train::{self, FileArtifactStore, ModelSelector};

use format::format_model;

/// How often a following consumer polls the command stream for new entries.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Event type of the commands `lectern submit` appends.
const COMMAND_EVENT_TYPE: &str = "train";

/// Lectern: train recommendation models from a command stream.
#[derive(Debug, Parser)]
#[command(name = "lectern", after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Config file (defaults to `~/.lectern/config.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r"Workflow: training a model
  1. lectern init
  2. lectern task-type add book-ratings
     → prints the task type id (e.g. 1)
  3. lectern configuration add 1 book-ratings.json
  4. lectern submit 1
  5. lectern run --drain
  6. lectern models --task-type 1";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write the default config and seed the metadata store.
    ///
    /// Safe to repeat: an existing config file is left alone.
    Init,

    /// Consume the command stream, training a model per command.
    ///
    /// Resumes after the stored checkpoint. Runs until interrupted unless
    /// `--drain` is given.
    Run {
        /// Stop once the stream is caught up instead of waiting for more.
        #[arg(long)]
        drain: bool,
    },

    /// Append a training command for a task type. Prints its position.
    Submit {
        /// Task type id to train.
        task_type_id: i64,
    },

    /// Print the consumer's checkpoint, creating it on first use.
    Checkpoint,

    /// Manage the task type registry.
    TaskType {
        #[command(subcommand)]
        command: TaskTypeCommand,
    },

    /// Register score and hyperparameter kinds the metadata store records.
    ///
    /// Metrics and hyperparameters with unregistered names are not stored.
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },

    /// Manage training configurations.
    Configuration {
        #[command(subcommand)]
        command: ConfigurationCommand,
    },

    /// List trained models, oldest first.
    Models {
        /// Only models trained for this task type.
        #[arg(long)]
        task_type: Option<i64>,

        /// Only the most recent model. Requires `--task-type`.
        #[arg(long, requires = "task_type")]
        latest: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum TaskTypeCommand {
    /// Register a task type. Prints its id.
    Add {
        /// Unique key, e.g. `book-ratings`.
        key: String,
    },

    /// List registered task types.
    List,
}

#[derive(Debug, Subcommand)]
pub enum RegistryCommand {
    /// Record scores under this metric name from now on.
    ScoreKind {
        /// Metric name, e.g. `MAE`.
        key: String,
    },

    /// Record hyperparameters under this name from now on.
    HyperparameterKind {
        /// Hyperparameter name, e.g. `reg_all`.
        key: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigurationCommand {
    /// Store a configuration document for a task type. Prints its id.
    Add {
        /// Task type the configuration applies to.
        task_type_id: i64,

        /// JSON configuration document.
        file: PathBuf,

        /// Start of the validity window (defaults to now).
        #[arg(long)]
        valid_from: Option<Timestamp>,

        /// End of the validity window, exclusive (open-ended when omitted).
        #[arg(long)]
        valid_to: Option<Timestamp>,
    },
}

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli) -> Result<(), String> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Init => {
            let path = match cli.config {
                Some(path) => path,
                None => Config::path().ok_or("could not determine home directory")?,
            };
            cmd_init(&config, &path)
        }
        Command::Run { drain } => cmd_run(&config, drain),
        Command::Submit { task_type_id } => cmd_submit(&config, task_type_id),
        Command::Checkpoint => cmd_checkpoint(&config),
        Command::TaskType { command } => match command {
            TaskTypeCommand::Add { key } => cmd_task_type_add(&config, &key),
            TaskTypeCommand::List => cmd_task_type_list(&config),
        },
        Command::Registry { command } => cmd_registry(&config, &command),
        Command::Configuration { command } => match command {
            ConfigurationCommand::Add {
                task_type_id,
                file,
                valid_from,
                valid_to,
            } => cmd_configuration_add(&config, task_type_id, &file, valid_from, valid_to),
        },
        Command::Models { task_type, latest } => cmd_models(&config, task_type, latest),
    }
}

fn open_store(config: &Config) -> Result<Store, String> {
    Store::open(&config.database).map_err(|e| {
        format!(
            "failed to open metadata store at {}: {e}",
            config.database.display()
        )
    })
}

fn open_log(config: &Config) -> Result<FileEventLog, String> {
    FileEventLog::new(&config.log_root).map_err(|e| {
        format!(
            "failed to open command log at {}: {e}",
            config.log_root.display()
        )
    })
}

fn cmd_init(config: &Config, path: &Path) -> Result<(), String> {
    if config.write_if_missing(path)? {
        println!("Wrote {}", path.display());
    } else {
        println!("Config already exists at {}", path.display());
    }

    let store = open_store(config)?;
    store
        .seed_defaults()
        .map_err(|e| format!("failed to seed metadata store: {e}"))?;
    println!("Metadata store ready at {}", config.database.display());
    Ok(())
}

fn cmd_run(config: &Config, drain: bool) -> Result<(), String> {
    let log = open_log(config)?;
    let store = open_store(config)?;
    let artifacts = FileArtifactStore::new(&config.artifact_dir, config.artifact_retention)
        .map_err(|e| {
            format!(
                "failed to open artifact store at {}: {e}",
                config.artifact_dir.display()
            )
        })?;

    let mut orchestrator = Orchestrator::new(
        &store,
        Box::new(CsvPreparation::new(config.data.clone())),
        selector(config, artifacts),
    );

    let shutdown = Shutdown::new();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || handle.request())
        .map_err(|e| format!("failed to install interrupt handler: {e}"))?;

    let mode = if drain {
        SubscribeMode::CatchUp
    } else {
        SubscribeMode::Follow {
            poll_interval: POLL_INTERVAL,
        }
    };

    info!(stream = %config.command_stream, drain, "consumer starting");
    consume(config, &log, &store, &mut orchestrator, mode, shutdown)
}

fn selector(config: &Config, artifacts: FileArtifactStore) -> ModelSelector {
    ModelSelector::new(
        train::default_candidates(config.data.rating_scale, config.data.seed),
        Box::new(artifacts),
    )
}

/// Runs the consumer loop over already-opened dependencies.
fn consume(
    config: &Config,
    log: &dyn EventLog,
    store: &Store,
    orchestrator: &mut Orchestrator<'_>,
    mode: SubscribeMode,
    shutdown: Shutdown,
) -> Result<(), String> {
    let checkpoints = CheckpointStore::new(
        log,
        &config.checkpoint_stream,
        &config.checkpoint_event_type,
    );
    StreamConsumer::new(log, &config.command_stream, checkpoints, store, orchestrator)
        .with_mode(mode)
        .with_shutdown(shutdown)
        .run()
        .map_err(|e| format!("consumer stopped: {e}"))
}

fn cmd_submit(config: &Config, task_type_id: i64) -> Result<(), String> {
    let log = open_log(config)?;
    let position = log
        .append(
            &config.command_stream,
            ExpectedVersion::Any,
            &[NewEvent::new(
                COMMAND_EVENT_TYPE,
                json!({ "task_type_id": task_type_id }),
            )],
        )
        .map_err(|e| format!("failed to submit command: {e}"))?;

    println!("{position}");
    Ok(())
}

fn cmd_checkpoint(config: &Config) -> Result<(), String> {
    let log = open_log(config)?;
    let checkpoints = CheckpointStore::new(
        &log,
        &config.checkpoint_stream,
        &config.checkpoint_event_type,
    );
    let position = checkpoints
        .load_or_create()
        .map_err(|e| format!("failed to read checkpoint: {e}"))?;

    println!("{position}");
    Ok(())
}

fn cmd_task_type_add(config: &Config, key: &str) -> Result<(), String> {
    if key.trim().is_empty() {
        return Err("task type key must not be empty".to_string());
    }
    let store = open_store(config)?;
    let id = store
        .add_task_type(key)
        .map_err(|e| format!("failed to add task type: {e}"))?;

    println!("{id}");
    Ok(())
}

fn cmd_task_type_list(config: &Config) -> Result<(), String> {
    let store = open_store(config)?;
    let task_types = store
        .task_types()
        .map_err(|e| format!("failed to list task types: {e}"))?;

    if task_types.is_empty() {
        println!("No task types");
        return Ok(());
    }
    for t in &task_types {
        println!("{}  {}", t.id, t.key);
    }
    Ok(())
}

fn cmd_registry(config: &Config, command: &RegistryCommand) -> Result<(), String> {
    let store = open_store(config)?;
    match command {
        RegistryCommand::ScoreKind { key } => store
            .add_score_kind(key)
            .map_err(|e| format!("failed to add score kind: {e}"))?,
        RegistryCommand::HyperparameterKind { key } => store
            .add_hyperparameter_kind(key)
            .map_err(|e| format!("failed to add hyperparameter kind: {e}"))?,
    }
    println!("Registered");
    Ok(())
}

fn cmd_configuration_add(
    config: &Config,
    task_type_id: i64,
    file: &Path,
    valid_from: Option<Timestamp>,
    valid_to: Option<Timestamp>,
) -> Result<(), String> {
    let contents = fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    let document: ConfigurationDocument = serde_json::from_str(&contents)
        .map_err(|e| format!("invalid configuration in {}: {e}", file.display()))?;

    let valid_from = valid_from.unwrap_or_else(Timestamp::now);
    if valid_to.is_some_and(|to| to <= valid_from) {
        return Err("--valid-to must be after --valid-from".to_string());
    }

    let store = open_store(config)?;
    if store
        .find_task_type(task_type_id)
        .map_err(|e| format!("failed to look up task type: {e}"))?
        .is_none()
    {
        return Err(format!("unknown task type {task_type_id}"));
    }
    let id = store
        .add_configuration(task_type_id, valid_from, valid_to, &document)
        .map_err(|e| format!("failed to add configuration: {e}"))?;

    println!("{id}");
    Ok(())
}

fn cmd_models(config: &Config, task_type: Option<i64>, latest: bool) -> Result<(), String> {
    let store = open_store(config)?;
    let models = match task_type {
        Some(id) if latest => store.latest_model(id).map(|m| m.into_iter().collect()),
        _ => store.list_models(task_type),
    }
    .map_err(|e| format!("failed to list models: {e}"))?;

    if models.is_empty() {
        println!("No trained models");
        return Ok(());
    }
    for model in &models {
        println!("{}", format_model(model));
    }
    Ok(())
}

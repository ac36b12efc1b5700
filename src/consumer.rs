//! The checkpointed stream consumer: the service's main loop.
//!
//! Entries are processed one at a time in log order. For each entry the
//! consumer decodes it, runs the handler, and then advances the checkpoint to
//! the entry's position whether or not the handler succeeded. A crash after
//! the handler commits but before the checkpoint write redelivers the entry on
//! restart, so delivery is at-least-once.
//!
//! An entry that fails validation halts the loop without advancing the
//! checkpoint. A handler failure halts the loop after the checkpoint write.

use tracing::{debug, error, info, warn};

use crate::catalog::{TaskCatalog, ValidationError, decode};
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::eventlog::{EventLog, LogError, Shutdown, SubscribeMode};
use crate::orchestrator::{OrchestratorError, TaskHandler};

/// Errors that stop the consumer.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("command stream {0} does not exist")]
    MissingCommandStream(String),

    #[error("command log: {0}")]
    Log(#[from] LogError),

    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("invalid command at position {position}: {source}")]
    Validation {
        position: u64,
        source: ValidationError,
    },

    #[error("training failed for command at position {position}: {source}")]
    Orchestration {
        position: u64,
        source: OrchestratorError,
    },
}

pub type Result<T> = core::result::Result<T, ConsumerError>;

/// Reads the command stream from the checkpoint onward and hands each task to a handler.
pub struct StreamConsumer<'a> {
    log: &'a dyn EventLog,
    command_stream: String,
    checkpoints: CheckpointStore<'a>,
    catalog: &'a dyn TaskCatalog,
    handler: &'a mut dyn TaskHandler,
    mode: SubscribeMode,
    shutdown: Shutdown,
}

impl<'a> StreamConsumer<'a> {
    pub fn new(
        log: &'a dyn EventLog,
        command_stream: impl Into<String>,
        checkpoints: CheckpointStore<'a>,
        catalog: &'a dyn TaskCatalog,
        handler: &'a mut dyn TaskHandler,
    ) -> Self {
        Self {
            log,
            command_stream: command_stream.into(),
            checkpoints,
            catalog,
            handler,
            mode: SubscribeMode::CatchUp,
            shutdown: Shutdown::new(),
        }
    }

    /// Sets how the subscription behaves at the end of the stream.
    #[must_use]
    pub fn with_mode(mut self, mode: SubscribeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the flag an operator interrupt raises.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs the loop until shutdown, the end of the stream in catch-up mode, or an error.
    ///
    /// Shutdown and catching up return `Ok(())`.
    pub fn run(&mut self) -> Result<()> {
        let checkpoint = self.checkpoints.load_or_create()?;

        let log = self.log;
        if !log.exists(&self.command_stream)? {
            error!(stream = %self.command_stream, "command stream does not exist");
            return Err(ConsumerError::MissingCommandStream(
                self.command_stream.clone(),
            ));
        }

        info!(
            stream = %self.command_stream,
            checkpoint,
            "subscribing to command stream"
        );
        let mut subscription =
            log.subscribe(&self.command_stream, checkpoint, self.mode, self.shutdown.clone())?;

        while let Some(event) = subscription.next() {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "command log subscription failed");
                    subscription.stop();
                    return Err(e.into());
                }
            };
            let position = event.position;
            debug!(position, "command received");

            let entry = event.command_entry()?;
            let task = match decode(&entry, self.catalog) {
                Ok(task) => task,
                Err(source) => {
                    error!(position, error = %source, "invalid command, stopping");
                    subscription.stop();
                    return Err(ConsumerError::Validation { position, source });
                }
            };

            let outcome = {
                let guard = CheckpointGuard::new(&self.checkpoints, position);
                let outcome = self.handler.handle(&task);
                guard.commit()?;
                outcome
            };

            if let Err(source) = outcome {
                error!(position, task = %task.task_type_key, error = %source, "training failed, stopping");
                subscription.stop();
                return Err(ConsumerError::Orchestration { position, source });
            }
            info!(position, task = %task.task_type_key, "command processed");
        }

        if self.shutdown.is_requested() {
            info!("shutdown requested, consumer stopped");
        } else {
            info!("end of command stream reached");
        }
        Ok(())
    }
}

/// Advances the checkpoint when processing of an entry ends, on every path.
///
/// [`commit`](Self::commit) writes the checkpoint and reports failure. If the
/// guard is dropped without a commit (the handler panicked), the write is
/// attempted on drop and a failure can only be logged.
struct CheckpointGuard<'s, 'a> {
    checkpoints: &'s CheckpointStore<'a>,
    position: u64,
    committed: bool,
}

impl<'s, 'a> CheckpointGuard<'s, 'a> {
    fn new(checkpoints: &'s CheckpointStore<'a>, position: u64) -> Self {
        Self {
            checkpoints,
            position,
            committed: false,
        }
    }

    fn commit(mut self) -> core::result::Result<(), CheckpointError> {
        self.committed = true;
        self.checkpoints.advance(self.position)
    }
}

impl Drop for CheckpointGuard<'_, '_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = self.checkpoints.advance(self.position) {
            warn!(position = self.position, error = %e, "checkpoint write on unwind failed");
        }
    }
}

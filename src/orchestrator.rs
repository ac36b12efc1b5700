//! Training orchestration: one validated task in, one recorded model out.
//!
//! ```text
//! configuration -> preparation -> selection -> metadata
//! ```
//!
//! Any step's error stops the job and propagates to the caller unchanged.

use jiff::Timestamp;
use tracing::info;

use crate::model::{TaskDescriptor, TrainedModel};
use crate::prepare::{DataPreparation, PrepareError};
use crate::storage::{Store, StorageError};
use crate::train::{ModelSelector, TrainError};

/// Errors that end a training job.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("data preparation: {0}")]
    Prepare(#[from] PrepareError),

    #[error("training: {0}")]
    Train(#[from] TrainError),
}

/// Runs the job for one validated task.
pub trait TaskHandler {
    fn handle(&mut self, task: &TaskDescriptor) -> Result<(), OrchestratorError>;
}

/// Drives configuration lookup, preparation, selection, and recording.
pub struct Orchestrator<'a> {
    store: &'a Store,
    preparation: Box<dyn DataPreparation + 'a>,
    selector: ModelSelector,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a Store,
        preparation: Box<dyn DataPreparation + 'a>,
        selector: ModelSelector,
    ) -> Self {
        Self {
            store,
            preparation,
            selector,
        }
    }

    /// Trains, saves, and records a model for `task`.
    pub fn run(&self, task: &TaskDescriptor) -> Result<TrainedModel, OrchestratorError> {
        let configuration = self
            .store
            .current_configuration(task.task_type_id, Timestamp::now())?;
        info!(
            task = %task.task_type_key,
            configuration_id = configuration.id,
            valid_from = %configuration.valid_from,
            valid_to = ?configuration.valid_to,
            "training started"
        );

        let datasets = self.preparation.prepare(task, &configuration)?;
        let selection = self
            .selector
            .select_and_fit(&datasets, &configuration.document)?;
        let model_variant_id = self.store.model_variant_id(selection.variant)?;

        let model = self.store.record(
            selection.model_guid,
            task.task_type_id,
            model_variant_id,
            configuration.id,
            &selection.params,
            &selection.metrics,
        )?;
        info!(
            task = %task.task_type_key,
            model_guid = %model.model_guid,
            variant = selection.variant.key(),
            "training finished"
        );
        Ok(model)
    }
}

impl TaskHandler for Orchestrator<'_> {
    fn handle(&mut self, task: &TaskDescriptor) -> Result<(), OrchestratorError> {
        self.run(task).map(|_| ())
    }
}

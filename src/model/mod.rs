//! Core data model for lectern.
//!
//! These types follow one command through the pipeline: the entry read from
//! the command log, the task it decodes to, the configuration the job trains
//! under, the dataset partitions it trains on, and the trained model record
//! it leaves behind.

mod command;
mod configuration;
mod dataset;
mod trained;

pub use command::{CommandEntry, TaskCommand, TaskDescriptor};
pub use configuration::{
    BaselineSearch, ConfigurationDocument, Evaluation, HyperparameterSearch, RuntimeParameters,
    TrainingConfiguration, window_contains,
};
pub use dataset::{Datasets, Rating};
pub use trained::{Hyperparameters, Metrics, ModelVariant, TrainedModel, metric};

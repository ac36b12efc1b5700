//! Model training: candidate models, hyperparameter search, and selection.
//!
//! Every candidate implements [`CandidateModel`]. The [`ModelSelector`] asks
//! each one for its best validated fit, keeps the lowest validation RMSE, refits
//! the winner, and saves the fitted artifact through an [`ArtifactStore`].

mod artifact;
mod baseline;
mod candidate;
mod factorization;
mod metrics;
mod search;
mod selector;

pub use artifact::{ArtifactError, ArtifactStore, FileArtifactStore};
pub use baseline::NeuralBaseline;
pub use candidate::{CandidateModel, FinalFit, Validation};
pub use factorization::MatrixFactorization;
pub use selector::{ModelSelector, Selection};

#[cfg(test)]
pub(crate) use selector::tests as selector_tests;

use crate::model::ModelVariant;

/// Errors raised while fitting, selecting, or saving models.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("no candidate models registered")]
    NoCandidates,

    #[error("empty search grid for {0}")]
    EmptyGrid(&'static str),

    #[error("cross-validation needs at least 2 folds, got {0}")]
    InvalidFolds(usize),

    #[error("{needed} ratings needed for {purpose}, got {got}")]
    TooFewRatings {
        purpose: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("{variant:?} returned no finite {metric} metric")]
    MissingMetric {
        variant: ModelVariant,
        metric: &'static str,
    },

    #[error("invalid hyperparameters for {variant:?}: {source}")]
    Hyperparameters {
        variant: ModelVariant,
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

pub type Result<T> = core::result::Result<T, TrainError>;

/// The two candidates every job trains, in registration order.
pub fn default_candidates(rating_scale: (f64, f64), seed: u64) -> Vec<Box<dyn CandidateModel>> {
    vec![
        Box::new(MatrixFactorization::new(rating_scale, seed)),
        Box::new(NeuralBaseline::new(rating_scale, seed)),
    ]
}

//! Trained model types: what a successful job leaves behind.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metric names produced by every fit.
pub mod metric {
    pub const RMSE: &str = "RMSE";
    pub const PRECISION_AT_K: &str = "Precision@K";
    pub const RECALL_AT_K: &str = "Recall@K";
}

/// Metric name to value.
pub type Metrics = BTreeMap<String, f64>;

/// Hyperparameter name to chosen value.
pub type Hyperparameters = BTreeMap<String, serde_json::Value>;

/// The candidate model implementations that compete for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    MatrixFactorization,
    NeuralBaseline,
}

impl ModelVariant {
    pub const ALL: [Self; 2] = [Self::MatrixFactorization, Self::NeuralBaseline];

    /// Registry key in the `model_type` table.
    pub fn key(self) -> &'static str {
        match self {
            Self::MatrixFactorization => "matrix_factorization",
            Self::NeuralBaseline => "neural_baseline",
        }
    }
}

/// A persisted training result with its scores and hyperparameters.
///
/// Append-only: never updated after insertion.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub id: i64,
    pub model_guid: Uuid,
    pub task_type_id: i64,
    pub model_variant_id: i64,
    pub configuration_id: i64,
    pub last_trained_time: Timestamp,
    pub scores: Metrics,
    pub hyperparameters: BTreeMap<String, String>,
}

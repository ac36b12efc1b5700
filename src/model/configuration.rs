//! Training configuration: a time-windowed document per task type.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A configuration row as stored, with its parsed document.
#[derive(Debug, Clone)]
pub struct TrainingConfiguration {
    pub id: i64,
    pub task_type_id: i64,

    /// Inclusive start of the validity window.
    pub valid_from: Timestamp,

    /// Exclusive end of the validity window; `None` means open-ended.
    pub valid_to: Option<Timestamp>,

    pub document: ConfigurationDocument,
}

/// Whether `at` falls in `[valid_from, valid_to)`. An absent end never closes.
pub fn window_contains(valid_from: Timestamp, valid_to: Option<Timestamp>, at: Timestamp) -> bool {
    valid_from <= at && valid_to.is_none_or(|to| at < to)
}

/// The nested document stored as JSON in each configuration row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationDocument {
    pub runtime_parameters: RuntimeParameters,
    pub hyperparameter_search: HyperparameterSearch,

    #[serde(default)]
    pub baseline_search: BaselineSearch,

    #[serde(default)]
    pub evaluation: Evaluation,
}

/// Minimum-support thresholds applied while cleaning the ratings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeParameters {
    /// Users with fewer ratings are dropped.
    pub min_user_ratings: usize,

    /// Items with fewer ratings are dropped.
    pub min_item_ratings: usize,
}

/// Candidate values for the factorization grid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterSearch {
    pub n_factors: Vec<usize>,
    pub n_epochs: Vec<usize>,
    pub lr_all: Vec<f64>,

    #[serde(default = "default_reg_all")]
    pub reg_all: Vec<f64>,
}

fn default_reg_all() -> Vec<f64> {
    vec![0.02]
}

/// Candidate values for the neural baseline grid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSearch {
    pub epochs: Vec<usize>,
    pub learning_rate: Vec<f64>,
}

impl Default for BaselineSearch {
    fn default() -> Self {
        Self {
            epochs: vec![20],
            learning_rate: vec![0.01],
        }
    }
}

/// How fits are scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Evaluation {
    /// Folds used by cross-validated grid search on the train partition.
    pub cv_folds: usize,

    /// Cut-off for Precision@K and Recall@K.
    pub top_k: usize,

    /// Ratings at or above this value count as relevant (and as recommended, for estimates).
    pub relevance_threshold: f64,
}

impl Default for Evaluation {
    fn default() -> Self {
        Self {
            cv_folds: 5,
            top_k: 10,
            relevance_threshold: 0.7,
        }
    }
}

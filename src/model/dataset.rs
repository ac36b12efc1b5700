//! Dataset partitions produced by data preparation.

use serde::{Deserialize, Serialize};

/// A single (user, item, rating) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user: String,
    pub item: String,
    pub value: f64,
}

impl Rating {
    pub fn new(user: impl Into<String>, item: impl Into<String>, value: f64) -> Self {
        Self {
            user: user.into(),
            item: item.into(),
            value,
        }
    }
}

/// Five partitions of the same cleaned ratings.
///
/// `train_validation` is the concatenation of `train` and `validation`;
/// `test` is held out from both.
#[derive(Debug, Clone, Default)]
pub struct Datasets {
    pub train: Vec<Rating>,
    pub validation: Vec<Rating>,
    pub train_validation: Vec<Rating>,
    pub test: Vec<Rating>,
    pub full: Vec<Rating>,
}

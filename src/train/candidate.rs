//! The capability every candidate model provides.

use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};

use crate::model::{ConfigurationDocument, Datasets, Hyperparameters, Metrics, ModelVariant, Rating};

use super::{Result, TrainError};

/// Best parameters found by search and their scores on the validation partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub params: Hyperparameters,
    pub metrics: Metrics,
}

/// A refitted model ready to be saved.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalFit {
    /// The model fitted on the full partition, serialized.
    pub artifact: Vec<u8>,

    /// Scores of a train+validation fit on the test partition.
    pub metrics: Metrics,
}

/// A training algorithm competing for selection.
pub trait CandidateModel {
    fn variant(&self) -> ModelVariant;

    /// Searches hyperparameters on the train partition and scores the best on validation.
    fn fit_and_validate(
        &self,
        datasets: &Datasets,
        configuration: &ConfigurationDocument,
    ) -> Result<Validation>;

    /// Refits with `params`: scored on test after a train+validation fit, saved after a full fit.
    fn fit_final_model(
        &self,
        params: &Hyperparameters,
        datasets: &Datasets,
        configuration: &ConfigurationDocument,
    ) -> Result<FinalFit>;
}

pub(super) fn to_hyperparameters<P: Serialize>(params: &P) -> Result<Hyperparameters> {
    match serde_json::to_value(params)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(TrainError::Json(serde::ser::Error::custom(format!(
            "hyperparameters must serialize to an object, got {other}"
        )))),
    }
}

pub(super) fn from_hyperparameters<P: DeserializeOwned>(
    variant: ModelVariant,
    params: &Hyperparameters,
) -> Result<P> {
    let object: serde_json::Map<String, serde_json::Value> =
        params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|source| TrainError::Hyperparameters { variant, source })
}

/// Dense indices for the distinct keys of a rating field, in first-seen order.
pub(super) fn vocabulary(
    ratings: &[Rating],
    key: impl Fn(&Rating) -> &String,
) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for rating in ratings {
        let next = index.len();
        index.entry(key(rating).clone()).or_insert(next);
    }
    index
}

pub(super) fn global_mean(ratings: &[Rating]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    ratings.iter().map(|r| r.value).sum::<f64>() / ratings.len() as f64
}

//! Neural baseline: one linear layer over one-hot user and item inputs.
//!
//! With one-hot inputs the layer reduces to `bias + w_user + w_item`, trained
//! by plain SGD on squared error. It carries no interaction term, so it only
//! wins when the factorization cannot beat per-user and per-item averages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{ConfigurationDocument, Datasets, Hyperparameters, ModelVariant, Rating, metric};

use super::candidate::{
    CandidateModel, FinalFit, Validation, from_hyperparameters, to_hyperparameters, vocabulary,
};
use super::metrics::{Predict, evaluate};
use super::{Result, search};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(super) struct BaselineParams {
    pub epochs: usize,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct BaselineModel {
    scale: (f64, f64),
    bias: f64,
    users: HashMap<String, usize>,
    items: HashMap<String, usize>,
    user_weights: Vec<f64>,
    item_weights: Vec<f64>,
}

impl BaselineModel {
    pub(super) fn fit(params: &BaselineParams, ratings: &[Rating], scale: (f64, f64)) -> Self {
        let users = vocabulary(ratings, |r| &r.user);
        let items = vocabulary(ratings, |r| &r.item);
        let mut model = Self {
            scale,
            bias: 0.0,
            user_weights: vec![0.0; users.len()],
            item_weights: vec![0.0; items.len()],
            users,
            items,
        };

        let rows: Vec<(usize, usize, f64)> = ratings
            .iter()
            .map(|r| (model.users[&r.user], model.items[&r.item], r.value))
            .collect();
        let lr = params.learning_rate;
        for _ in 0..params.epochs {
            for &(u, i, value) in &rows {
                let err = value - (model.bias + model.user_weights[u] + model.item_weights[i]);
                model.bias += lr * err;
                model.user_weights[u] += lr * err;
                model.item_weights[i] += lr * err;
            }
        }
        model
    }
}

impl Predict for BaselineModel {
    fn predict(&self, user: &str, item: &str) -> f64 {
        let user = self.users.get(user).map_or(0.0, |&u| self.user_weights[u]);
        let item = self.items.get(item).map_or(0.0, |&i| self.item_weights[i]);
        (self.bias + user + item).clamp(self.scale.0, self.scale.1)
    }
}

/// The neural baseline candidate.
pub struct NeuralBaseline {
    scale: (f64, f64),
    seed: u64,
}

impl NeuralBaseline {
    pub fn new(scale: (f64, f64), seed: u64) -> Self {
        Self { scale, seed }
    }
}

impl CandidateModel for NeuralBaseline {
    fn variant(&self) -> ModelVariant {
        ModelVariant::NeuralBaseline
    }

    fn fit_and_validate(
        &self,
        datasets: &Datasets,
        configuration: &ConfigurationDocument,
    ) -> Result<Validation> {
        let search = &configuration.baseline_search;
        let grid: Vec<BaselineParams> = search::grid(&search.epochs, &search.learning_rate)
            .into_iter()
            .map(|(epochs, learning_rate)| BaselineParams {
                epochs,
                learning_rate,
            })
            .collect();

        let best = search::best_params(
            self.variant().key(),
            &grid,
            &datasets.train,
            configuration.evaluation.cv_folds,
            self.seed,
            |params, rows| BaselineModel::fit(params, rows, self.scale),
        )?;
        let model = BaselineModel::fit(&best, &datasets.train, self.scale);
        let metrics = evaluate(&model, &datasets.validation, &configuration.evaluation)?;

        Ok(Validation {
            params: to_hyperparameters(&best)?,
            metrics,
        })
    }

    fn fit_final_model(
        &self,
        params: &Hyperparameters,
        datasets: &Datasets,
        configuration: &ConfigurationDocument,
    ) -> Result<FinalFit> {
        let params: BaselineParams = from_hyperparameters(self.variant(), params)?;

        let scored = BaselineModel::fit(&params, &datasets.train_validation, self.scale);
        let metrics = evaluate(&scored, &datasets.test, &configuration.evaluation)?;
        let model = BaselineModel::fit(&params, &datasets.full, self.scale);
        info!(
            rmse = metrics.get(metric::RMSE).copied(),
            "final baseline model fitted"
        );

        Ok(FinalFit {
            artifact: serde_json::to_vec(&model)?,
            metrics,
        })
    }
}

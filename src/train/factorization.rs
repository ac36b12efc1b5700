//! Biased matrix factorization fitted with stochastic gradient descent.
//!
//! The estimate for user `u` and item `i` is `mu + b_u + b_i + p_u · q_i`.
//! Unknown users or items drop the terms they would contribute.

use std::collections::HashMap;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{
    ConfigurationDocument, Datasets, Hyperparameters, ModelVariant, Rating, metric,
};

use super::candidate::{
    CandidateModel, FinalFit, Validation, from_hyperparameters, global_mean, to_hyperparameters,
    vocabulary,
};
use super::metrics::{Predict, evaluate};
use super::{Result, search};

/// Half-width of the uniform range latent factors start in.
const INIT_RANGE: f64 = 0.1;

/// One point of the factorization search grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(super) struct FactorizationParams {
    pub n_factors: usize,
    pub n_epochs: usize,
    pub lr_all: f64,
    pub reg_all: f64,
}

/// A fitted factorization, serialized as the saved artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct FactorizationModel {
    scale: (f64, f64),
    global_mean: f64,
    users: HashMap<String, usize>,
    items: HashMap<String, usize>,
    user_bias: Vec<f64>,
    item_bias: Vec<f64>,
    user_factors: Vec<Vec<f64>>,
    item_factors: Vec<Vec<f64>>,
}

impl FactorizationModel {
    pub(super) fn fit(
        params: &FactorizationParams,
        ratings: &[Rating],
        scale: (f64, f64),
        seed: u64,
    ) -> Self {
        let users = vocabulary(ratings, |r| &r.user);
        let items = vocabulary(ratings, |r| &r.item);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut factors = |n: usize| -> Vec<Vec<f64>> {
            (0..n)
                .map(|_| {
                    (0..params.n_factors)
                        .map(|_| rng.gen_range(-INIT_RANGE..INIT_RANGE))
                        .collect()
                })
                .collect()
        };
        let user_factors = factors(users.len());
        let item_factors = factors(items.len());

        let mut model = Self {
            scale,
            global_mean: global_mean(ratings),
            user_bias: vec![0.0; users.len()],
            item_bias: vec![0.0; items.len()],
            users,
            items,
            user_factors,
            item_factors,
        };

        let rows: Vec<(usize, usize, f64)> = ratings
            .iter()
            .map(|r| (model.users[&r.user], model.items[&r.item], r.value))
            .collect();
        let (lr, reg) = (params.lr_all, params.reg_all);
        for _ in 0..params.n_epochs {
            for &(u, i, value) in &rows {
                let pu = &mut model.user_factors[u];
                let qi = &mut model.item_factors[i];
                let dot: f64 = pu.iter().zip(qi.iter()).map(|(p, q)| p * q).sum();
                let err =
                    value - (model.global_mean + model.user_bias[u] + model.item_bias[i] + dot);

                model.user_bias[u] += lr * (err - reg * model.user_bias[u]);
                model.item_bias[i] += lr * (err - reg * model.item_bias[i]);
                for (p, q) in pu.iter_mut().zip(qi.iter_mut()) {
                    let (p0, q0) = (*p, *q);
                    *p += lr * (err * q0 - reg * p0);
                    *q += lr * (err * p0 - reg * q0);
                }
            }
        }
        model
    }
}

impl Predict for FactorizationModel {
    fn predict(&self, user: &str, item: &str) -> f64 {
        let u = self.users.get(user).copied();
        let i = self.items.get(item).copied();
        let mut estimate = self.global_mean;
        if let Some(u) = u {
            estimate += self.user_bias[u];
        }
        if let Some(i) = i {
            estimate += self.item_bias[i];
        }
        if let (Some(u), Some(i)) = (u, i) {
            estimate += self.user_factors[u]
                .iter()
                .zip(&self.item_factors[i])
                .map(|(p, q)| p * q)
                .sum::<f64>();
        }
        estimate.clamp(self.scale.0, self.scale.1)
    }
}

/// Collaborative filtering by biased matrix factorization.
pub struct MatrixFactorization {
    scale: (f64, f64),
    seed: u64,
}

impl MatrixFactorization {
    pub fn new(scale: (f64, f64), seed: u64) -> Self {
        Self { scale, seed }
    }

    fn fit(&self, params: &FactorizationParams, ratings: &[Rating]) -> FactorizationModel {
        FactorizationModel::fit(params, ratings, self.scale, self.seed)
    }
}

impl CandidateModel for MatrixFactorization {
    fn variant(&self) -> ModelVariant {
        ModelVariant::MatrixFactorization
    }

    fn fit_and_validate(
        &self,
        datasets: &Datasets,
        configuration: &ConfigurationDocument,
    ) -> Result<Validation> {
        let search = &configuration.hyperparameter_search;
        let grid: Vec<FactorizationParams> = search::grid(&search.n_factors, &search.n_epochs)
            .into_iter()
            .flat_map(|(n_factors, n_epochs)| {
                search::grid(&search.lr_all, &search.reg_all)
                    .into_iter()
                    .map(move |(lr_all, reg_all)| FactorizationParams {
                        n_factors,
                        n_epochs,
                        lr_all,
                        reg_all,
                    })
            })
            .collect();

        let best = search::best_params(
            self.variant().key(),
            &grid,
            &datasets.train,
            configuration.evaluation.cv_folds,
            self.seed,
            |params, rows| self.fit(params, rows),
        )?;
        let model = self.fit(&best, &datasets.train);
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
        let params: FactorizationParams = from_hyperparameters(self.variant(), params)?;

        let scored = self.fit(&params, &datasets.train_validation);
        let metrics = evaluate(&scored, &datasets.test, &configuration.evaluation)?;
        let model = self.fit(&params, &datasets.full);
        info!(
            rmse = metrics.get(metric::RMSE).copied(),
            "final factorization model fitted"
        );

        Ok(FinalFit {
            artifact: serde_json::to_vec(&model)?,
            metrics,
        })
    }
}

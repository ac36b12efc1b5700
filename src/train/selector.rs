//! Model selection: lowest validation RMSE wins, then refit and save.

use tracing::info;
use uuid::Uuid;

use crate::model::{ConfigurationDocument, Datasets, Hyperparameters, Metrics, ModelVariant, metric};

use super::{ArtifactStore, CandidateModel, Result, TrainError};

/// The outcome of one selection: the saved winner and its final scores.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub variant: ModelVariant,
    pub model_guid: Uuid,
    pub params: Hyperparameters,

    /// Scores on the test partition after the train+validation refit.
    pub metrics: Metrics,
}

/// Picks, refits, and saves the best of the registered candidates.
pub struct ModelSelector {
    candidates: Vec<Box<dyn CandidateModel>>,
    artifacts: Box<dyn ArtifactStore>,
}

impl ModelSelector {
    pub fn new(candidates: Vec<Box<dyn CandidateModel>>, artifacts: Box<dyn ArtifactStore>) -> Self {
        Self {
            candidates,
            artifacts,
        }
    }

    /// Validates every candidate, refits the one with the lowest RMSE, and saves it.
    ///
    /// Candidates are tried in registration order; on equal RMSE the earlier one wins.
    pub fn select_and_fit(
        &self,
        datasets: &Datasets,
        configuration: &ConfigurationDocument,
    ) -> Result<Selection> {
        let mut best: Option<(&dyn CandidateModel, Hyperparameters, f64)> = None;
        for candidate in &self.candidates {
            let variant = candidate.variant();
            let validation = candidate.fit_and_validate(datasets, configuration)?;
            let rmse = finite_rmse(variant, &validation.metrics)?;
            info!(variant = variant.key(), rmse, "candidate validated");

            if best.as_ref().is_none_or(|(_, _, lowest)| rmse < *lowest) {
                best = Some((candidate.as_ref(), validation.params, rmse));
            }
        }
        let (winner, params, _) = best.ok_or(TrainError::NoCandidates)?;
        let variant = winner.variant();

        let fit = winner.fit_final_model(&params, datasets, configuration)?;
        finite_rmse(variant, &fit.metrics)?;

        let model_guid = Uuid::new_v4();
        self.artifacts.save(model_guid, &fit.artifact)?;
        info!(variant = variant.key(), %model_guid, "model selected and saved");

        Ok(Selection {
            variant,
            model_guid,
            params,
            metrics: fit.metrics,
        })
    }
}

fn finite_rmse(variant: ModelVariant, metrics: &Metrics) -> Result<f64> {
    metrics
        .get(metric::RMSE)
        .copied()
        .filter(|v| v.is_finite())
        .ok_or(TrainError::MissingMetric {
            variant,
            metric: metric::RMSE,
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use serde_json::json;

    use crate::train::{ArtifactError, FinalFit, Validation};

    /// A candidate with fixed validation and final RMSEs.
    pub(crate) struct FakeCandidate {
        pub variant: ModelVariant,
        pub validation_rmse: Option<f64>,
        pub final_rmse: f64,
        pub refits: Rc<RefCell<Vec<ModelVariant>>>,
    }

    impl FakeCandidate {
        pub(crate) fn new(variant: ModelVariant, validation_rmse: f64) -> Self {
            Self {
                variant,
                validation_rmse: Some(validation_rmse),
                final_rmse: validation_rmse + 0.25,
                refits: Rc::default(),
            }
        }
    }

    impl CandidateModel for FakeCandidate {
        fn variant(&self) -> ModelVariant {
            self.variant
        }

        fn fit_and_validate(
            &self,
            _datasets: &Datasets,
            _configuration: &ConfigurationDocument,
        ) -> Result<Validation> {
            let mut metrics = Metrics::from([(metric::PRECISION_AT_K.to_string(), 0.5)]);
            if let Some(rmse) = self.validation_rmse {
                metrics.insert(metric::RMSE.to_string(), rmse);
            }
            Ok(Validation {
                params: Hyperparameters::from([("n_factors".to_string(), json!(4))]),
                metrics,
            })
        }

        fn fit_final_model(
            &self,
            params: &Hyperparameters,
            _datasets: &Datasets,
            _configuration: &ConfigurationDocument,
        ) -> Result<FinalFit> {
            assert_eq!(params["n_factors"], json!(4));
            self.refits.borrow_mut().push(self.variant);
            Ok(FinalFit {
                artifact: self.variant.key().as_bytes().to_vec(),
                metrics: Metrics::from([(metric::RMSE.to_string(), self.final_rmse)]),
            })
        }
    }

    /// In-memory artifacts keyed by guid.
    #[derive(Default, Clone)]
    pub(crate) struct MemoryArtifacts(pub Rc<RefCell<HashMap<Uuid, Vec<u8>>>>);

    impl ArtifactStore for MemoryArtifacts {
        fn save(&self, model_guid: Uuid, bytes: &[u8]) -> core::result::Result<(), ArtifactError> {
            let mut saved = self.0.borrow_mut();
            saved.clear();
            saved.insert(model_guid, bytes.to_vec());
            Ok(())
        }

        fn load(&self, model_guid: Uuid) -> core::result::Result<Option<Vec<u8>>, ArtifactError> {
            Ok(self.0.borrow().get(&model_guid).cloned())
        }
    }

    pub(crate) fn sample_configuration() -> ConfigurationDocument {
        serde_json::from_value(json!({
            "runtime_parameters": {"min_user_ratings": 1, "min_item_ratings": 1},
            "hyperparameter_search": {"n_factors": [2], "n_epochs": [5], "lr_all": [0.01]}
        }))
        .unwrap()
    }

    fn select(candidates: Vec<FakeCandidate>) -> (Result<Selection>, MemoryArtifacts) {
        let artifacts = MemoryArtifacts::default();
        let candidates = candidates
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn CandidateModel>)
            .collect();
        let selector = ModelSelector::new(candidates, Box::new(artifacts.clone()));
        let result = selector.select_and_fit(&Datasets::default(), &sample_configuration());
        (result, artifacts)
    }

    #[test]
    fn lowest_rmse_wins() {
        let a = FakeCandidate::new(ModelVariant::MatrixFactorization, 0.82);
        let b = FakeCandidate::new(ModelVariant::NeuralBaseline, 0.79);
        let refits = Rc::clone(&b.refits);

        let (selection, artifacts) = select(vec![a, b]);
        let selection = selection.unwrap();

        assert_eq!(selection.variant, ModelVariant::NeuralBaseline);
        assert_eq!(*refits.borrow(), vec![ModelVariant::NeuralBaseline]);
        assert_eq!(
            artifacts.load(selection.model_guid).unwrap().unwrap(),
            b"neural_baseline"
        );
    }

    #[test]
    fn tie_goes_to_first_registered() {
        let a = FakeCandidate::new(ModelVariant::MatrixFactorization, 0.80);
        let b = FakeCandidate::new(ModelVariant::NeuralBaseline, 0.80);

        let (selection, _) = select(vec![a, b]);
        assert_eq!(selection.unwrap().variant, ModelVariant::MatrixFactorization);
    }

    #[test]
    fn reported_metrics_come_from_the_final_fit() {
        let a = FakeCandidate::new(ModelVariant::MatrixFactorization, 0.5);

        let (selection, _) = select(vec![a]);
        let selection = selection.unwrap();

        assert_eq!(selection.metrics[metric::RMSE], 0.75);
        assert_eq!(selection.params["n_factors"], json!(4));
    }

    #[test]
    fn each_selection_mints_a_new_guid() {
        let (first, _) = select(vec![FakeCandidate::new(ModelVariant::NeuralBaseline, 0.5)]);
        let (second, _) = select(vec![FakeCandidate::new(ModelVariant::NeuralBaseline, 0.5)]);

        assert_ne!(first.unwrap().model_guid, second.unwrap().model_guid);
    }

    #[test]
    fn missing_rmse_is_an_error() {
        let mut a = FakeCandidate::new(ModelVariant::MatrixFactorization, 0.5);
        a.validation_rmse = None;

        let (result, artifacts) = select(vec![a]);
        assert!(matches!(
            result.unwrap_err(),
            TrainError::MissingMetric {
                metric: "RMSE",
                ..
            }
        ));
        assert!(artifacts.0.borrow().is_empty());
    }

    #[test]
    fn no_candidates_is_an_error() {
        let (result, _) = select(vec![]);
        assert!(matches!(result.unwrap_err(), TrainError::NoCandidates));
    }
}

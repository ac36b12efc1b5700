//! Hold-out scoring: RMSE and per-user Precision@K / Recall@K.

use std::collections::BTreeMap;

use crate::model::{Evaluation, Metrics, Rating, metric};

use super::{Result, TrainError};

/// A fitted model that can estimate a rating.
pub(super) trait Predict {
    fn predict(&self, user: &str, item: &str) -> f64;
}

/// One hold-out rating next to its estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Prediction<'a> {
    pub user: &'a str,
    pub actual: f64,
    pub estimate: f64,
}

/// Scores a model on a hold-out partition.
pub(super) fn evaluate(
    model: &impl Predict,
    holdout: &[Rating],
    evaluation: &Evaluation,
) -> Result<Metrics> {
    if holdout.is_empty() {
        return Err(TrainError::TooFewRatings {
            purpose: "evaluation",
            needed: 1,
            got: 0,
        });
    }
    let predictions: Vec<Prediction<'_>> = holdout
        .iter()
        .map(|r| Prediction {
            user: &r.user,
            actual: r.value,
            estimate: model.predict(&r.user, &r.item),
        })
        .collect();

    let (precision, recall) =
        precision_recall_at_k(&predictions, evaluation.top_k, evaluation.relevance_threshold);
    Ok(Metrics::from([
        (metric::RMSE.to_string(), rmse(&predictions)),
        (metric::PRECISION_AT_K.to_string(), precision),
        (metric::RECALL_AT_K.to_string(), recall),
    ]))
}

/// Root-mean-square error. Zero for no predictions.
pub(super) fn rmse(predictions: &[Prediction<'_>]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let sum: f64 = predictions
        .iter()
        .map(|p| (p.actual - p.estimate).powi(2))
        .sum();
    (sum / predictions.len() as f64).sqrt()
}

/// Mean per-user precision and recall over each user's top `k` estimates.
///
/// An item is relevant when its actual rating is at least `threshold` and
/// recommended when its estimate is. A user with no recommended items has
/// precision 0; a user with no relevant items has recall 0. Both still count
/// toward the mean.
pub(super) fn precision_recall_at_k(
    predictions: &[Prediction<'_>],
    k: usize,
    threshold: f64,
) -> (f64, f64) {
    let mut by_user: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for p in predictions {
        by_user
            .entry(p.user)
            .or_default()
            .push((p.estimate, p.actual));
    }
    if by_user.is_empty() {
        return (0.0, 0.0);
    }

    let (mut precision_sum, mut recall_sum) = (0.0, 0.0);
    for ratings in by_user.values_mut() {
        ratings.sort_by(|a, b| b.0.total_cmp(&a.0));
        let top = &ratings[..k.min(ratings.len())];

        let relevant = ratings.iter().filter(|(_, actual)| *actual >= threshold).count();
        let recommended = top.iter().filter(|(est, _)| *est >= threshold).count();
        let hits = top
            .iter()
            .filter(|(est, actual)| *est >= threshold && *actual >= threshold)
            .count();

        if recommended > 0 {
            precision_sum += hits as f64 / recommended as f64;
        }
        if relevant > 0 {
            recall_sum += hits as f64 / relevant as f64;
        }
    }
    let users = by_user.len() as f64;
    (precision_sum / users, recall_sum / users)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(user: &str, actual: f64, estimate: f64) -> Prediction<'_> {
        Prediction {
            user,
            actual,
            estimate,
        }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn rmse_of_known_errors() {
        let predictions = [prediction("u", 1.0, 0.0), prediction("u", 0.0, 1.0)];
        assert_close(rmse(&predictions), 1.0);

        let exact = [prediction("u", 0.5, 0.5)];
        assert_close(rmse(&exact), 0.0);
    }

    #[test]
    fn precision_and_recall_for_one_user() {
        let predictions = [
            prediction("u", 0.9, 0.95),
            prediction("u", 0.2, 0.8),
            prediction("u", 0.8, 0.1),
        ];

        let (precision, recall) = precision_recall_at_k(&predictions, 10, 0.7);

        // Two recommended, one of them relevant; two relevant, one recommended.
        assert_close(precision, 0.5);
        assert_close(recall, 0.5);
    }

    #[test]
    fn top_k_cuts_recommendations() {
        let predictions = [
            prediction("u", 0.9, 0.99),
            prediction("u", 0.9, 0.98),
            prediction("u", 0.9, 0.97),
        ];

        let (precision, recall) = precision_recall_at_k(&predictions, 1, 0.7);
        assert_close(precision, 1.0);
        assert_close(recall, 1.0 / 3.0);
    }

    #[test]
    fn users_without_relevant_items_count_as_zero() {
        let predictions = [
            prediction("hit", 0.9, 0.9),
            // Nothing relevant and nothing recommended for this user.
            prediction("miss", 0.1, 0.1),
        ];

        let (precision, recall) = precision_recall_at_k(&predictions, 10, 0.7);

        assert!(!precision.is_nan() && !recall.is_nan());
        assert_close(precision, 0.5);
        assert_close(recall, 0.5);
    }

    #[test]
    fn no_predictions_score_zero() {
        assert_eq!(precision_recall_at_k(&[], 10, 0.7), (0.0, 0.0));
    }

    struct Constant(f64);

    impl Predict for Constant {
        fn predict(&self, _user: &str, _item: &str) -> f64 {
            self.0
        }
    }

    #[test]
    fn evaluate_reports_every_metric() {
        let holdout = vec![Rating::new("u", "i", 1.0), Rating::new("v", "i", 0.0)];
        let metrics = evaluate(&Constant(0.5), &holdout, &Evaluation::default()).unwrap();

        assert_close(metrics[metric::RMSE], 0.5);
        assert!(metrics.contains_key(metric::PRECISION_AT_K));
        assert!(metrics.contains_key(metric::RECALL_AT_K));
    }

    #[test]
    fn evaluate_rejects_empty_holdout() {
        let err = evaluate(&Constant(0.5), &[], &Evaluation::default()).unwrap_err();
        assert!(matches!(err, TrainError::TooFewRatings { .. }));
    }
}

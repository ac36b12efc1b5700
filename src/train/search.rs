//! Grid search with k-fold cross-validation.

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::debug;

use crate::model::Rating;

use super::metrics::{Predict, Prediction, rmse};
use super::{Result, TrainError};

/// Returns the grid point with the lowest mean cross-validated RMSE.
///
/// Ratings are shuffled once with `seed` and dealt into `folds` folds. Ties
/// go to the earlier grid point.
pub(super) fn best_params<P, M>(
    name: &'static str,
    grid: &[P],
    ratings: &[Rating],
    folds: usize,
    seed: u64,
    fit: impl Fn(&P, &[Rating]) -> M,
) -> Result<P>
where
    P: Clone + std::fmt::Debug,
    M: Predict,
{
    if grid.is_empty() {
        return Err(TrainError::EmptyGrid(name));
    }
    if folds < 2 {
        return Err(TrainError::InvalidFolds(folds));
    }
    if ratings.len() < folds {
        return Err(TrainError::TooFewRatings {
            purpose: "cross-validation",
            needed: folds,
            got: ratings.len(),
        });
    }

    let mut order: Vec<usize> = (0..ratings.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let splits: Vec<(Vec<Rating>, Vec<Rating>)> = (0..folds)
        .map(|fold| {
            let (mut train, mut test) = (Vec::new(), Vec::new());
            for (n, &i) in order.iter().enumerate() {
                if n % folds == fold {
                    test.push(ratings[i].clone());
                } else {
                    train.push(ratings[i].clone());
                }
            }
            (train, test)
        })
        .collect();

    let mut best: Option<(&P, f64)> = None;
    for params in grid {
        let mut total = 0.0;
        for (train, test) in &splits {
            let model = fit(params, train);
            let predictions: Vec<Prediction<'_>> = test
                .iter()
                .map(|r| Prediction {
                    user: &r.user,
                    actual: r.value,
                    estimate: model.predict(&r.user, &r.item),
                })
                .collect();
            total += rmse(&predictions);
        }
        let mean = total / folds as f64;
        debug!(candidate = name, ?params, rmse = mean, "grid point scored");
        if best.is_none_or(|(_, b)| mean < b) {
            best = Some((params, mean));
        }
    }

    let (params, _) = best.ok_or(TrainError::EmptyGrid(name))?;
    Ok(params.clone())
}

/// Every combination of the given axes, the last axis varying fastest.
pub(super) fn grid<A: Copy, B: Copy>(a: &[A], b: &[B]) -> Vec<(A, B)> {
    a.iter()
        .flat_map(|&x| b.iter().map(move |&y| (x, y)))
        .collect()
}

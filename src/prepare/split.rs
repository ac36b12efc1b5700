//! Cleaning, splitting and normalising ratings.

use std::collections::{BTreeMap, HashMap};

use rand::{Rng, seq::SliceRandom};

use crate::model::{Datasets, Rating};

use super::{PrepareError, Result};

/// Drops users, then items, whose ratings sum to zero or who have too few ratings.
pub fn clean(ratings: Vec<Rating>, min_user_ratings: usize, min_item_ratings: usize) -> Vec<Rating> {
    let ratings = filter_groups(ratings, |r| &r.user, min_user_ratings);
    filter_groups(ratings, |r| &r.item, min_item_ratings)
}

/// Keeps only groups with a non-zero rating sum and at least `min_count` rows.
fn filter_groups(
    ratings: Vec<Rating>,
    key: impl Fn(&Rating) -> &String,
    min_count: usize,
) -> Vec<Rating> {
    let mut groups: HashMap<&String, (f64, usize)> = HashMap::new();
    for rating in &ratings {
        let group = groups.entry(key(rating)).or_default();
        group.0 += rating.value;
        group.1 += 1;
    }
    let keep: HashMap<String, bool> = groups
        .into_iter()
        .map(|(k, (sum, count))| (k.clone(), sum != 0.0 && count >= min_count))
        .collect();
    ratings
        .into_iter()
        .filter(|r| keep.get(key(r)).copied().unwrap_or(false))
        .collect()
}

/// Splits cleaned ratings into the five partitions, normalised by the train range.
///
/// Each user contributes `floor(explicit * test_size)` randomly chosen explicit
/// (non-zero) ratings to the hold-out. The shuffled hold-out is cut into
/// validation (`floor(len * validation_size)` rows) and test.
pub fn partition(
    cleaned: Vec<Rating>,
    test_size: f64,
    validation_size: f64,
    rng: &mut impl Rng,
) -> Result<Datasets> {
    let mut by_user: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, rating) in cleaned.iter().enumerate() {
        by_user.entry(rating.user.as_str()).or_default().push(i);
    }

    let mut held_out = vec![false; cleaned.len()];
    for rows in by_user.values() {
        let explicit: Vec<usize> = rows
            .iter()
            .copied()
            .filter(|&i| cleaned[i].value > 0.0)
            .collect();
        let count = fraction_of(explicit.len(), test_size);
        for &i in explicit.choose_multiple(rng, count) {
            held_out[i] = true;
        }
    }

    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for (rating, held) in cleaned.iter().zip(&held_out) {
        if *held {
            holdout.push(rating.clone());
        } else {
            train.push(rating.clone());
        }
    }
    holdout.shuffle(rng);
    let test = holdout.split_off(fraction_of(holdout.len(), validation_size));
    let validation = holdout;

    for (partition, rows) in [("train", &train), ("validation", &validation), ("test", &test)] {
        if rows.is_empty() {
            return Err(PrepareError::EmptyPartition(partition));
        }
    }

    let scale = MinMax::of(&train)?;
    let train = scale.apply(train);
    let validation = scale.apply(validation);
    let test = scale.apply(test);
    let full = scale.apply(cleaned);
    let train_validation = train.iter().chain(&validation).cloned().collect();

    Ok(Datasets {
        train,
        validation,
        train_validation,
        test,
        full,
    })
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "fraction is in [0, 1), so the floor is a non-negative count no larger than len"
)]
fn fraction_of(len: usize, fraction: f64) -> usize {
    (len as f64 * fraction).floor() as usize
}

/// Min-max scaling fitted on one partition.
struct MinMax {
    min: f64,
    range: f64,
}

impl MinMax {
    fn of(ratings: &[Rating]) -> Result<Self> {
        let min = ratings.iter().map(|r| r.value).fold(f64::INFINITY, f64::min);
        let max = ratings
            .iter()
            .map(|r| r.value)
            .fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        if range <= 0.0 {
            return Err(PrepareError::FlatRatings(min));
        }
        Ok(Self { min, range })
    }

    fn apply(&self, ratings: Vec<Rating>) -> Vec<Rating> {
        ratings
            .into_iter()
            .map(|r| Rating {
                value: (r.value - self.min) / self.range,
                ..r
            })
            .collect()
    }
}

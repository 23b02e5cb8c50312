//! Numerics shared by the parent samplers
//!
//! Everything here is a pure function of its inputs (plus an explicit RNG),
//! so selection probabilities can be checked without a store.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::f64::consts::TAU;

/// Added to every compressed weight so no candidate ever has zero mass
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Strength of a sine wave over the eligible-row count, in [0, 1]
///
/// One full cycle every `period` rows: 0.5 at `count = 0`, 1.0 at a quarter
/// period and 0.0 at three quarters.
pub fn adaptive_strength(count: u64, period: u32) -> f64 {
    if period == 0 {
        return 0.5;
    }
    #[allow(clippy::cast_precision_loss)]
    let phase = TAU * (count as f64) / f64::from(period);
    (phase.sin() + 1.0) / 2.0
}

/// Standard scores of `values`
///
/// Uses the sample standard deviation, taken as 1.0 for fewer than two
/// values. A zero deviation gives every value a score of 0.
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() < 2 {
        1.0
    } else {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    };

    if std == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Map advantages into (0, 1] weights with `tanh` compression
///
/// `strength` near 0 flattens the distribution toward uniform; near 1 it
/// lets above-average candidates dominate.
pub fn compressed_weights(advantages: &[f64], strength: f64) -> Vec<f64> {
    z_scores(advantages)
        .into_iter()
        .map(|z| (z * strength).tanh())
        .map(|compressed| (compressed + 1.0) / 2.0 + WEIGHT_EPSILON)
        .collect()
}

/// Scale weights to sum to 1
///
/// Returns `None` when the total is zero or not finite; callers fall back to
/// a uniform choice in that case.
pub fn normalize(weights: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = weights.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return None;
    }
    Some(weights.iter().map(|w| w / total).collect())
}

/// Max-subtracted softmax at `temperature`
pub fn softmax(scores: &[f64], temperature: f64) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .map(|s| ((s - max) / temperature).exp())
        .collect()
}

/// Index of the largest score; the earliest wins ties
pub fn argmax(scores: &[f64]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
}

/// Draw one index in proportion to `weights`
///
/// Falls back to a uniform draw when the weights cannot be normalized.
/// Returns `None` only for an empty slice.
pub fn choose_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }

    match normalize(weights).and_then(|p| WeightedIndex::new(&p).ok()) {
        Some(distribution) => Some(distribution.sample(rng)),
        None => Some(rng.gen_range(0..weights.len())),
    }
}

//! Composite score from the four rubric dimensions.
//!
//! composite = Σ weight_d × score_d, rounded to 2 decimals. Weights come from
//! `config/scoring.toml` and are validated to sum to 1.0 at load, so a composite
//! of integer scores in [1,10] stays in [1,10].

use super::DimensionScores;
use crate::config::{Dimension, Dimensions};

/// Weighted sum of the dimension scores.
pub fn composite(scores: &DimensionScores, weights: &Dimensions) -> f64 {
    let raw: f64 = Dimension::ALL
        .iter()
        .map(|d| weights.weight(*d) * f64::from(scores.get(*d)))
        .sum();
    round_to(raw, 2)
}

pub(crate) fn round_to(x: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (x * f).round() / f
}

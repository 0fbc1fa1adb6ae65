//! Evaluation
//!
//! Empirical marginal coverage and average length of prediction intervals.
use crate::errors::ConformalError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    /// Fraction of targets inside their interval, in `[0, 1]`.
    pub marginal_coverage: f64,
    pub average_length: f64,
}

/// Coverage and average length of `[lower_i, upper_i]` around `y_true_i`.
pub fn evaluate(y_true: &[f64], lower: &[f64], upper: &[f64]) -> Result<CoverageResult, ConformalError> {
    if y_true.len() != lower.len() || y_true.len() != upper.len() {
        return Err(ConformalError::InvalidArgument(format!(
            "targets, lower and upper bounds must have equal length, got {}, {} and {}",
            y_true.len(),
            lower.len(),
            upper.len()
        )));
    }
    if y_true.is_empty() {
        return Err(ConformalError::InvalidArgument(
            "cannot evaluate empty intervals".to_string(),
        ));
    }
    let n = y_true.len() as f64;
    let covered = y_true
        .iter()
        .zip(lower.iter().zip(upper.iter()))
        .filter(|(y, (l, u))| *l <= *y && *y <= *u)
        .count();
    let average_length = lower.iter().zip(upper.iter()).map(|(l, u)| u - l).sum::<f64>() / n;
    Ok(CoverageResult {
        marginal_coverage: covered as f64 / n,
        average_length,
    })
}

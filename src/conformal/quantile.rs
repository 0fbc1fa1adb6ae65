//! Conformal quantile
//!
//! Rank-adjusted empirical quantile of a calibration sample: with `n` scores
//! the `ceil((n + 1)(1 - alpha))`-th smallest one, or `+inf` when that rank
//! exceeds `n`.
use crate::constants::RANK_EPS;
use crate::errors::ConformalError;
use crate::utils::validate_open_unit_parameter;

/// One-based rank of the order statistic used as conformal quantile, may be
/// larger than `n`.
pub fn conformal_rank(n: usize, alpha: f64) -> usize {
    let target = (n as f64 + 1.0) * (1.0 - alpha);
    let r = (target - target * RANK_EPS).ceil();
    (r.max(1.0)) as usize
}

/// Conformal quantile of `|residuals|`, the symmetric half-width of a split
/// conformal interval.
pub fn conformal_quantile(residuals: &[f64], alpha: f64) -> Result<f64, ConformalError> {
    let scores: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
    signed_conformal_quantile(&scores, alpha)
}

/// Conformal quantile of raw, possibly negative, scores.
pub fn signed_conformal_quantile(scores: &[f64], alpha: f64) -> Result<f64, ConformalError> {
    validate_open_unit_parameter(alpha, "alpha")?;
    if scores.is_empty() {
        return Err(ConformalError::InvalidArgument(
            "cannot compute a conformal quantile of an empty sample".to_string(),
        ));
    }
    if scores.iter().any(|s| s.is_nan()) {
        return Err(ConformalError::InvalidArgument(
            "conformal scores must not contain NaN".to_string(),
        ));
    }
    let k = conformal_rank(scores.len(), alpha);
    if k > scores.len() {
        return Ok(f64::INFINITY);
    }
    let mut v = scores.to_vec();
    let (_, kth, _) = v.select_nth_unstable_by(k - 1, |a, b| a.total_cmp(b));
    Ok(*kth)
}

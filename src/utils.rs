use crate::constants::HESSIAN_EPS;
use crate::errors::ConformalError;
use std::collections::VecDeque;

/// Create a string of all available items.
pub fn items_to_strings(items: Vec<&str>) -> String {
    let mut s = String::new();
    for i in items {
        s.push_str(i);
        s.push_str(&String::from(", "));
    }
    s
}

pub fn fmt_vec_output(v: &[f64]) -> String {
    let mut res = String::new();
    if let Some(last) = v.len().checked_sub(1) {
        if last == 0 {
            return format!("{:.4}", v[0]);
        }
        for n in &v[..last] {
            res.push_str(format!("{:.4}", n).as_str());
            res.push_str(", ");
        }
        res.push_str(format!("{:.4}", &v[last]).as_str());
    }
    res
}

// Validation
pub fn validate_float_parameter(value: f64, min: f64, max: f64, parameter: &str) -> Result<(), ConformalError> {
    if value.is_nan() || value < min || max < value {
        let ex_msg = format!("real value within range {} and {}", min, max);
        Err(ConformalError::InvalidParameter(
            parameter.to_string(),
            ex_msg,
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate a rate such as `alpha`, `delta` or `frac`, which must lie strictly
/// inside `(0, 1)`.
pub fn validate_open_unit_parameter(value: f64, parameter: &str) -> Result<(), ConformalError> {
    if value.is_nan() || value <= 0.0 || value >= 1.0 {
        Err(ConformalError::InvalidParameter(
            parameter.to_string(),
            "real value strictly between 0 and 1".to_string(),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Check that a feature matrix and a residual sample describe the same rows.
pub fn validate_paired_rows(rows: usize, cols: usize, data_len: usize, n_residuals: usize) -> Result<(), ConformalError> {
    if rows * cols != data_len {
        return Err(ConformalError::InvalidArgument(format!(
            "feature buffer of length {} does not match shape {} x {}",
            data_len, rows, cols
        )));
    }
    if rows != n_residuals {
        return Err(ConformalError::InvalidArgument(format!(
            "feature matrix has {} rows but {} residuals were provided",
            rows, n_residuals
        )));
    }
    if n_residuals == 0 {
        return Err(ConformalError::InvalidArgument(
            "residual sample must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Reject feature buffers holding NaN or infinite values.
pub fn validate_finite_features(data: &[f64]) -> Result<(), ConformalError> {
    match data.iter().find(|v| !v.is_finite()) {
        Some(v) => Err(ConformalError::InvalidArgument(format!(
            "feature values must be finite, found {}",
            v
        ))),
        None => Ok(()),
    }
}

/// Reject residual samples holding NaN. Infinite residuals are allowed.
pub fn validate_residuals(residuals: &[f64]) -> Result<(), ConformalError> {
    if residuals.iter().any(|r| r.is_nan()) {
        return Err(ConformalError::InvalidArgument(
            "residuals must not contain NaN".to_string(),
        ));
    }
    Ok(())
}

/// Calculate the weight of a given node, given the sum
/// of the gradients, and the hessians in a node.
#[inline]
pub fn weight(gradient_sum: f32, hessian_sum: f32) -> f32 {
    -gradient_sum / (hessian_sum + 1.0)
}

/// Calculate the gain given the gradient and hessian of the node.
#[inline]
pub fn gain(gradient_sum: f32, hessian_sum: f32) -> f32 {
    (gradient_sum * gradient_sum) / (hessian_sum + HESSIAN_EPS)
}

/// Split `idx[start..stop]` so rows whose binned feature is below
/// `split_bin` come first. Returns the absolute index of the first row
/// of the right child.
pub fn pivot_on_split(start: usize, stop: usize, idx: &mut [usize], feature: &[u16], split_bin: u16) -> usize {
    let index = &mut idx[start..stop];
    let mut left = 0;
    for i in 0..index.len() {
        if feature[index[i]] < split_bin {
            index.swap(i, left);
            left += 1;
        }
    }
    start + left
}

/// Weighted percentiles of `v`, one value per requested percentile.
///
/// * `v` - Values to take percentiles of.
/// * `sample_weight` - Instance weights, aligned with `v`.
/// * `percentiles` - Sorted percentiles in `[0, 1]`.
pub fn percentiles(v: &[f64], sample_weight: &[f64], percentiles: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..v.len()).collect();
    idx.sort_unstable_by(|a, b| v[*a].total_cmp(&v[*b]));

    let mut pcts = VecDeque::from_iter(percentiles.iter());
    let mut p = Vec::new();
    let mut current_pct = match pcts.pop_front() {
        Some(c) => *c,
        None => return p,
    };
    let mut cuml_pct = 0.0;
    let total_values: f64 = sample_weight.iter().sum();

    for i in idx.iter() {
        let current_value = v[*i];
        cuml_pct += sample_weight[*i] / total_values;
        if (current_pct == 0.0) || (cuml_pct >= current_pct) {
            // The same number might be a valid value
            // for several percentiles.
            while cuml_pct >= current_pct {
                p.push(current_value);
                match pcts.pop_front() {
                    Some(p_) => current_pct = *p_,
                    None => return p,
                }
            }
        } else if current_pct == 1.0 {
            if let Some(i_) = idx.last() {
                p.push(v[*i_]);
                break;
            }
        }
    }
    p
}

/// Return the index of the first value in a sorted
/// slice that is greater than a provided value.
///
/// * `x` - The sorted slice of cut values.
/// * `v` - The value to map into a bin.
#[inline]
pub fn map_bin(x: &[f64], v: &f64) -> u16 {
    let mut low = 0;
    let mut high = x.len();
    while low != high {
        let mid = (low + high) / 2;
        if x[mid] <= *v {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    u16::try_from(low).unwrap_or(u16::MAX)
}

//! Objective
//!
//! Loss functions the booster can minimise. Gradients and hessians drive the
//! tree structure; `leaf_value` optionally renews leaf outputs once a tree's
//! structure is known.
use serde::{Deserialize, Serialize};

/// Objective selector, stored on the booster and serialised with it.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
pub enum Objective {
    /// Squared Error loss, minimises `(y - ŷ)²`.
    #[default]
    SquaredLoss,
    /// Pinball loss for the given quantile in `(0, 1)`.
    QuantileLoss { quantile: f64 },
}

impl Objective {
    pub fn function(&self) -> Box<dyn ObjectiveFunction> {
        match self {
            Objective::SquaredLoss => Box::new(SquaredLoss {}),
            Objective::QuantileLoss { quantile } => Box::new(QuantileLoss { quantile: *quantile }),
        }
    }
}

pub trait ObjectiveFunction: Send + Sync {
    /// Per-row loss.
    fn loss(&self, y: &[f64], yhat: &[f64]) -> Vec<f32>;
    /// Per-row gradient, and hessian when it is not constant.
    fn gradient(&self, y: &[f64], yhat: &[f64]) -> (Vec<f32>, Option<Vec<f32>>);
    /// Constant prediction minimising the loss.
    fn initial_value(&self, y: &[f64]) -> f64;
    /// Optimal raw output for a leaf holding the rows in `index`, if the
    /// objective prefers that over the Newton step.
    fn leaf_value(&self, _y: &[f64], _yhat: &[f64], _index: &[usize]) -> Option<f64> {
        None
    }
}

#[derive(Default, Debug, Deserialize, Serialize, Clone)]
pub struct SquaredLoss {}

impl ObjectiveFunction for SquaredLoss {
    #[inline]
    fn loss(&self, y: &[f64], yhat: &[f64]) -> Vec<f32> {
        y.iter()
            .zip(yhat)
            .map(|(y_, yhat_)| {
                let s = *y_ - *yhat_;
                (s * s) as f32
            })
            .collect()
    }

    #[inline]
    fn gradient(&self, y: &[f64], yhat: &[f64]) -> (Vec<f32>, Option<Vec<f32>>) {
        let g = y.iter().zip(yhat).map(|(y_, yhat_)| (*yhat_ - *y_) as f32).collect();
        (g, None)
    }

    #[inline]
    fn initial_value(&self, y: &[f64]) -> f64 {
        if y.is_empty() {
            return 0.0;
        }
        y.iter().sum::<f64>() / y.len() as f64
    }
}

#[derive(Default, Debug, Deserialize, Serialize, Clone)]
pub struct QuantileLoss {
    pub quantile: f64,
}

impl ObjectiveFunction for QuantileLoss {
    #[inline]
    fn loss(&self, y: &[f64], yhat: &[f64]) -> Vec<f32> {
        y.iter()
            .zip(yhat)
            .map(|(y_, yhat_)| {
                let s = *y_ - *yhat_;
                let l = if s >= 0.0 { self.quantile * s } else { (self.quantile - 1.0) * s };
                l as f32
            })
            .collect()
    }

    #[inline]
    fn gradient(&self, y: &[f64], yhat: &[f64]) -> (Vec<f32>, Option<Vec<f32>>) {
        let g = y
            .iter()
            .zip(yhat)
            .map(|(y_, yhat_)| {
                let delta = yhat_ - *y_;
                let g = if delta >= 0.0 { 1.0 - self.quantile } else { -self.quantile };
                g as f32
            })
            .collect();
        (g, None)
    }

    #[inline]
    fn initial_value(&self, y: &[f64]) -> f64 {
        let index: Vec<usize> = (0..y.len()).collect();
        quantile_value(y, &index, self.quantile)
    }

    fn leaf_value(&self, y: &[f64], yhat: &[f64], index: &[usize]) -> Option<f64> {
        if index.is_empty() {
            return None;
        }
        let residuals: Vec<f64> = index.iter().map(|&i| y[i] - yhat[i]).collect();
        let local: Vec<usize> = (0..residuals.len()).collect();
        Some(quantile_value(&residuals, &local, self.quantile))
    }
}

/// Smallest value in `v[index]` whose cumulative share reaches `quantile`.
fn quantile_value(v: &[f64], index: &[usize], quantile: f64) -> f64 {
    let mut indices = index.to_vec();
    indices.sort_by(|&a, &b| v[a].total_cmp(&v[b]));
    let w_target = indices.len() as f64 * quantile;
    let mut w_cum = 0.0_f64;
    let mut init_value = f64::NAN;
    for i in indices {
        w_cum += 1.0;
        init_value = v[i];
        if w_cum >= w_target {
            break;
        }
    }
    init_value
}

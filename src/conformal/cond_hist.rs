//! Conditional histogram
//!
//! Partitions the feature space with a shallow histogram tree grown on
//! `|residual|`, then computes one conformal quantile per leaf on held-out
//! rows. Leaves with too few held-out rows use the global quantile.
use crate::binning::bin_matrix;
use crate::conformal::quantile::conformal_quantile;
use crate::conformal::{split_calibration, Intervals};
use crate::constants::{DEFAULT_MAX_BIN, DEFAULT_MIN_BIN_SAMPLES, DEFAULT_PARTITION_DEPTH, DEFAULT_SEED, DEFAULT_SPLIT_FRAC};
use crate::data::Matrix;
use crate::errors::ConformalError;
use crate::objective::{ObjectiveFunction, SquaredLoss};
use crate::splitter::HistogramSplitter;
use crate::tree::Tree;
use crate::utils::{validate_finite_features, validate_open_unit_parameter, validate_paired_rows, validate_residuals};
use hashbrown::HashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CondHistState {
    /// Partition tree, its leaves are the bins.
    pub tree: Tree,
    /// Half-width per leaf node number.
    pub leaf_quantiles: HashMap<usize, f64>,
    /// Conformal quantile of all held-out rows.
    pub global_quantile: f64,
}

#[derive(Debug, Clone)]
pub struct ConditionalHistogram {
    pub alpha: f64,
    pub n_features: usize,
    pub frac: f64,
    pub seed: u64,
    pub max_bin: u16,
    pub max_depth: usize,
    pub min_bin_samples: usize,
    state: Option<CondHistState>,
}

impl ConditionalHistogram {
    pub fn new(alpha: f64, n_features: usize) -> Self {
        ConditionalHistogram {
            alpha,
            n_features,
            frac: DEFAULT_SPLIT_FRAC,
            seed: DEFAULT_SEED,
            max_bin: DEFAULT_MAX_BIN,
            max_depth: DEFAULT_PARTITION_DEPTH,
            min_bin_samples: DEFAULT_MIN_BIN_SAMPLES,
            state: None,
        }
    }

    pub fn set_frac(mut self, frac: f64) -> Self {
        self.frac = frac;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn set_max_bin(mut self, max_bin: u16) -> Self {
        self.max_bin = max_bin;
        self
    }

    pub fn set_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn set_min_bin_samples(mut self, min_bin_samples: usize) -> Self {
        self.min_bin_samples = min_bin_samples;
        self
    }

    pub fn state(&self) -> Option<&CondHistState> {
        self.state.as_ref()
    }

    fn check_features(&self, cols: usize) -> Result<(), ConformalError> {
        if cols != self.n_features {
            return Err(ConformalError::InvalidArgument(format!(
                "expected {} features, got {}",
                self.n_features, cols
            )));
        }
        Ok(())
    }

    /// Held-out rows a leaf needs before it gets its own quantile. Below
    /// `ceil((1 - alpha) / alpha)` rows the conformal rank would be past the
    /// sample and the width infinite.
    pub fn min_held_out(&self) -> usize {
        let finite_rank = ((1.0 - self.alpha) / self.alpha).ceil() as usize;
        self.min_bin_samples.max(finite_rank)
    }

    /// Learn the partition and the per-leaf quantiles.
    ///
    /// * `x` - Calibration features with `n_features` columns.
    /// * `residuals` - Calibration residuals, one per row of `x`.
    pub fn fit(&mut self, x: &Matrix<f64>, residuals: &[f64]) -> Result<(), ConformalError> {
        validate_open_unit_parameter(self.alpha, "alpha")?;
        validate_open_unit_parameter(self.frac, "frac")?;
        if self.n_features == 0 {
            return Err(ConformalError::InvalidParameter(
                "n_features".to_string(),
                "a positive integer".to_string(),
                "0".to_string(),
            ));
        }
        self.check_features(x.cols)?;
        validate_paired_rows(x.rows, x.cols, x.data.len(), residuals.len())?;
        validate_residuals(residuals)?;
        validate_finite_features(x.data)?;

        let (fit_rows, cal_rows) = split_calibration(x.rows, self.frac, self.seed)?;

        // Grow the partition on the first part.
        let x_fit = x.select_rows(&fit_rows);
        let x_fit = Matrix::new(&x_fit, fit_rows.len(), x.cols);
        let y_fit: Vec<f64> = fit_rows.iter().map(|i| residuals[*i].abs()).collect();
        let binned = bin_matrix(&x_fit, None, self.max_bin)?;
        let bdata = Matrix::new(&binned.binned_data, x_fit.rows, x_fit.cols);
        let objective = SquaredLoss {};
        let yhat = vec![0.0; y_fit.len()];
        let (grad, hess) = objective.gradient(&y_fit, &yhat);
        let splitter = HistogramSplitter {
            eta: 1.0,
            min_leaf_size: self.min_bin_samples.max(1),
        };
        let col_index: Vec<usize> = (0..x.cols).collect();
        let mut tree = Tree::new();
        tree.fit(
            &objective,
            &bdata,
            &binned.cuts,
            x_fit.index.to_owned(),
            &col_index,
            &grad,
            hess.as_deref(),
            &y_fit,
            &yhat,
            &splitter,
            self.max_depth,
            false,
        );

        // Conformalize on the held-out part.
        let held_out: Vec<f64> = cal_rows.iter().map(|i| residuals[*i]).collect();
        let global_quantile = conformal_quantile(&held_out, self.alpha)?;
        let mut by_leaf: HashMap<usize, Vec<f64>> = HashMap::new();
        for (i, r) in cal_rows.iter().zip(held_out.iter()) {
            let leaf = tree.leaf_index(&x.get_row(*i));
            by_leaf.entry(leaf).or_default().push(*r);
        }
        let min_held_out = self.min_held_out();
        let mut leaf_quantiles = HashMap::new();
        for leaf in tree.leaf_nodes() {
            let q = match by_leaf.get(&leaf) {
                Some(r) if r.len() >= min_held_out => conformal_quantile(r, self.alpha)?,
                _ => {
                    debug!("{} Using the global quantile.", ConformalError::DegenerateBin(leaf));
                    global_quantile
                }
            };
            leaf_quantiles.insert(leaf, q);
        }
        info!(
            "Conditional histogram with {} bins, global half-width {}.",
            leaf_quantiles.len(),
            global_quantile
        );

        self.state = Some(CondHistState {
            tree,
            leaf_quantiles,
            global_quantile,
        });
        Ok(())
    }

    /// `(-q_bin, q_bin)` for every row of `x`.
    pub fn predict(&self, x: &Matrix<f64>) -> Result<Intervals, ConformalError> {
        let state = self
            .state
            .as_ref()
            .ok_or(ConformalError::NotFitted("ConditionalHistogram"))?;
        self.check_features(x.cols)?;
        validate_finite_features(x.data)?;
        let widths: Vec<f64> = (0..x.rows)
            .map(|i| {
                let leaf = state.tree.leaf_index(&x.get_row(i));
                *state.leaf_quantiles.get(&leaf).unwrap_or(&state.global_quantile)
            })
            .collect();
        Ok(Intervals::symmetric(&widths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::evaluate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Two features, the residual scale depends on the second only.
    fn step_noise(n: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x0: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
        let x1: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
        let r: Vec<f64> = x1
            .iter()
            .map(|v| {
                let scale = if *v < 0.5 { 0.1 } else { 2.0 };
                (rng.gen::<f64>() * 2.0 - 1.0) * scale
            })
            .collect();
        let mut x = x0;
        x.extend(x1);
        (x, r)
    }

    #[test]
    fn test_cond_hist_local_widths() {
        let (x, r) = step_noise(2000, 0);
        let data = Matrix::new(&x, 2000, 2);
        let mut ch = ConditionalHistogram::new(0.1, 2).set_max_depth(1);
        ch.fit(&data, &r).unwrap();
        let state = ch.state().unwrap();
        assert_eq!(state.tree.n_leaves, 2);
        assert_eq!(state.tree.nodes[0].split_feature, 1);

        let point_data = vec![0.5, 0.5, 0.2, 0.8];
        let points = Matrix::new(&point_data, 2, 2);
        let p = ch.predict(&points).unwrap();
        assert!(p.upper[0] < 0.2, "low noise width {}", p.upper[0]);
        assert!(p.upper[1] > 1.5, "high noise width {}", p.upper[1]);
        assert!(p.lower.iter().zip(&p.upper).all(|(l, u)| l <= u));

        let (xt, rt) = step_noise(2000, 1);
        let test = Matrix::new(&xt, 2000, 2);
        let intervals = ch.predict(&test).unwrap();
        let res = evaluate(&rt, &intervals.lower, &intervals.upper).unwrap();
        assert!(res.marginal_coverage > 0.86, "coverage {}", res.marginal_coverage);
        assert_eq!(ch.predict(&test).unwrap(), intervals);
    }

    #[test]
    fn test_cond_hist_out_of_range_rows_get_a_width() {
        let (x, r) = step_noise(400, 2);
        let data = Matrix::new(&x, 400, 2);
        let mut ch = ConditionalHistogram::new(0.1, 2);
        ch.fit(&data, &r).unwrap();
        let point_data = vec![-50.0, 50.0, -50.0, 50.0];
        let points = Matrix::new(&point_data, 2, 2);
        let p = ch.predict(&points).unwrap();
        assert!(p.upper.iter().all(|u| u.is_finite() && *u >= 0.0));
    }

    #[test]
    fn test_cond_hist_small_bins_fall_back() {
        let (x, r) = step_noise(200, 3);
        let data = Matrix::new(&x, 200, 2);
        // 100 held-out rows can never satisfy this minimum.
        let mut ch = ConditionalHistogram::new(0.1, 2).set_min_bin_samples(150);
        ch.fit(&data, &r).unwrap();
        let state = ch.state().unwrap();
        assert!(state
            .leaf_quantiles
            .values()
            .all(|q| *q == state.global_quantile));
    }

    #[test]
    fn test_cond_hist_feature_count_checked() {
        let (x, r) = step_noise(100, 4);
        let data = Matrix::new(&x, 100, 2);
        let mut ch = ConditionalHistogram::new(0.1, 3);
        assert!(matches!(ch.fit(&data, &r), Err(ConformalError::InvalidArgument(_))));
        let mut ch = ConditionalHistogram::new(0.1, 2);
        ch.fit(&data, &r).unwrap();
        let one = Matrix::new(&x[..1], 1, 1);
        assert!(matches!(ch.predict(&one), Err(ConformalError::InvalidArgument(_))));
        let mut zero = ConditionalHistogram::new(0.1, 0);
        assert!(matches!(zero.fit(&data, &r), Err(ConformalError::InvalidParameter(..))));
    }

    #[test]
    fn test_cond_hist_rejects_non_finite_values() {
        let (x, r) = step_noise(200, 5);
        let data = Matrix::new(&x, 200, 2);
        let mut ch = ConditionalHistogram::new(0.1, 2);

        // Every row is checked, including the held-out half that never reaches binning.
        for i in 0..200 {
            let mut x_bad = x.clone();
            x_bad[200 + i] = f64::NAN;
            let bad = Matrix::new(&x_bad, 200, 2);
            assert!(matches!(ch.fit(&bad, &r), Err(ConformalError::InvalidArgument(_))));
        }
        let mut r_bad = r.clone();
        r_bad[3] = f64::NAN;
        assert!(matches!(ch.fit(&data, &r_bad), Err(ConformalError::InvalidArgument(_))));
        assert!(ch.state().is_none());

        ch.fit(&data, &r).unwrap();
        let rows = vec![0.5, 0.5, f64::NAN, 0.2];
        let test = Matrix::new(&rows, 2, 2);
        assert!(matches!(ch.predict(&test), Err(ConformalError::InvalidArgument(_))));
    }

    #[test]
    fn test_cond_hist_extreme_feature_values() {
        let (mut x, r) = step_noise(400, 6);
        // Half the first feature sits at the largest finite value.
        for v in x[..200].iter_mut() {
            *v = f64::MAX;
        }
        let data = Matrix::new(&x, 400, 2);
        let mut ch = ConditionalHistogram::new(0.1, 2);
        ch.fit(&data, &r).unwrap();
        let p = ch.predict(&data).unwrap();
        assert_eq!(p.len(), 400);
        assert!(p.upper.iter().all(|u| *u >= 0.0));
    }
}

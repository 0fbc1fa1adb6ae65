//! Transductive conformal (TCP_RIF)
//!
//! Per test row, calibration scores are reweighted by their feature-space
//! proximity to the row, and the half-width is the largest calibration score
//! whose weighted conformal p-value stays above `delta`. The p-value
//! `p(t) = (sum_i w_i [s_i >= t] + 1) / (sum_i w_i + 1)` is non-increasing
//! in `t`, so the search bisects over the sorted score ranking.
use crate::conformal::Intervals;
use crate::constants::DEFAULT_MAX_SEARCH_STEPS;
use crate::data::Matrix;
use crate::errors::ConformalError;
use crate::utils::{
    validate_finite_features, validate_float_parameter, validate_open_unit_parameter, validate_paired_rows,
    validate_residuals,
};
use log::{debug, info};
use rayon::prelude::*;

/// Calibration table, rows ordered by ascending score.
#[derive(Debug, Clone)]
struct TcpState {
    /// Standardized features, row major.
    features: Vec<f64>,
    scores: Vec<f64>,
    means: Vec<f64>,
    stds: Vec<f64>,
    n_features: usize,
    bandwidth: f64,
}

#[derive(Debug, Clone)]
pub struct TransductiveConformal {
    pub delta: f64,
    /// Kernel bandwidth on standardized features. `None` uses
    /// `sqrt(n_features)`, `f64::INFINITY` weights every point equally.
    pub bandwidth: Option<f64>,
    pub max_search_steps: usize,
    pub parallel: bool,
    state: Option<TcpState>,
}

impl TransductiveConformal {
    pub fn new(delta: f64) -> Self {
        TransductiveConformal {
            delta,
            bandwidth: None,
            max_search_steps: DEFAULT_MAX_SEARCH_STEPS,
            parallel: true,
            state: None,
        }
    }

    pub fn set_bandwidth(mut self, bandwidth: Option<f64>) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn set_max_search_steps(mut self, max_search_steps: usize) -> Self {
        self.max_search_steps = max_search_steps;
        self
    }

    pub fn set_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Store the standardized calibration table.
    pub fn fit(&mut self, x: &Matrix<f64>, residuals: &[f64]) -> Result<(), ConformalError> {
        validate_open_unit_parameter(self.delta, "delta")?;
        validate_paired_rows(x.rows, x.cols, x.data.len(), residuals.len())?;
        validate_residuals(residuals)?;
        validate_finite_features(x.data)?;
        let bandwidth = self.bandwidth.unwrap_or((x.cols as f64).sqrt().max(1.0));
        validate_float_parameter(bandwidth, f64::MIN_POSITIVE, f64::INFINITY, "bandwidth")?;

        let n = x.rows as f64;
        let (means, stds): (Vec<f64>, Vec<f64>) = (0..x.cols)
            .map(|j| {
                let col = x.get_col(j);
                let mean = col.iter().sum::<f64>() / n;
                let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                (mean, if std > 0.0 { std } else { 1.0 })
            })
            .unzip();

        let mut order: Vec<usize> = (0..x.rows).collect();
        order.sort_by(|a, b| residuals[*a].abs().total_cmp(&residuals[*b].abs()));
        let scores: Vec<f64> = order.iter().map(|i| residuals[*i].abs()).collect();
        let mut features = Vec::with_capacity(x.data.len());
        for i in &order {
            for j in 0..x.cols {
                features.push((x.get(*i, j) - means[j]) / stds[j]);
            }
        }
        info!(
            "Transductive conformal table of {} rows, bandwidth {}.",
            scores.len(),
            bandwidth
        );

        self.state = Some(TcpState {
            features,
            scores,
            means,
            stds,
            n_features: x.cols,
            bandwidth,
        });
        Ok(())
    }

    /// Half-width and conformal p-value at that half-width, per row of `x`.
    pub fn predict_with_rank(&self, x: &Matrix<f64>) -> Result<Vec<(f64, f64)>, ConformalError> {
        let state = self
            .state
            .as_ref()
            .ok_or(ConformalError::NotFitted("TransductiveConformal"))?;
        if x.cols != state.n_features {
            return Err(ConformalError::InvalidArgument(format!(
                "expected {} features, got {}",
                state.n_features, x.cols
            )));
        }
        validate_finite_features(x.data)?;
        let row_result = |i: usize| self.search_row(state, &x.get_row(i));
        if self.parallel {
            Ok((0..x.rows).into_par_iter().map(row_result).collect())
        } else {
            Ok((0..x.rows).map(row_result).collect())
        }
    }

    /// `(-q, q)` for every row of `x`.
    pub fn predict(&self, x: &Matrix<f64>) -> Result<Intervals, ConformalError> {
        let widths: Vec<f64> = self.predict_with_rank(x)?.into_iter().map(|(q, _)| q).collect();
        Ok(Intervals::symmetric(&widths))
    }

    fn search_row(&self, state: &TcpState, row: &[f64]) -> (f64, f64) {
        let p = state.n_features;
        let z: Vec<f64> = row
            .iter()
            .zip(state.means.iter().zip(state.stds.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect();
        let two_h2 = 2.0 * state.bandwidth * state.bandwidth;
        let weights: Vec<f64> = state
            .features
            .chunks(p.max(1))
            .map(|xi| {
                let d2: f64 = xi.iter().zip(z.iter()).map(|(a, b)| (a - b).powi(2)).sum();
                (-d2 / two_h2).exp()
            })
            .collect();
        let total: f64 = weights.iter().sum();

        // Mass of the test point itself, the p-value of any threshold above
        // every calibration score.
        let own = 1.0 / (total + 1.0);
        if own > self.delta {
            debug!(
                "{} Test point weight {} exceeds delta.",
                ConformalError::SearchExhausted(0),
                own
            );
            return (f64::INFINITY, own);
        }

        let p_value = |k: usize| {
            let first = state.scores.partition_point(|s| *s < state.scores[k]);
            let tail: f64 = weights[first..].iter().sum();
            (tail + 1.0) / (total + 1.0)
        };

        // p_value(lo) > delta, and the virtual rank n has p-value `own`.
        let mut lo = 0;
        let mut hi = state.scores.len();
        let mut steps = 0;
        while hi - lo > 1 {
            if steps == self.max_search_steps {
                debug!("{}", ConformalError::SearchExhausted(steps));
                return (f64::INFINITY, own);
            }
            let mid = lo + (hi - lo) / 2;
            if p_value(mid) > self.delta {
                lo = mid;
            } else {
                hi = mid;
            }
            steps += 1;
        }
        (state.scores[lo], p_value(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformal::quantile::conformal_quantile;
    use crate::evaluation::evaluate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noisy(n: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();
        let r: Vec<f64> = x
            .iter()
            .map(|v| (rng.gen::<f64>() * 2.0 - 1.0) * (0.2 + v.abs()))
            .collect();
        (x, r)
    }

    #[test]
    fn test_uniform_weights_match_marginal() {
        let (x, r) = noisy(99, 0);
        let data = Matrix::new(&x, 99, 1);
        for delta in [0.05, 0.1, 0.3, 0.5] {
            let mut tcp = TransductiveConformal::new(delta).set_bandwidth(Some(f64::INFINITY));
            tcp.fit(&data, &r).unwrap();
            let expected = conformal_quantile(&r, delta).unwrap();
            let point_data = vec![0.0, 0.9];
            let points = Matrix::new(&point_data, 2, 1);
            for (q, p) in tcp.predict_with_rank(&points).unwrap() {
                assert_eq!(q, expected);
                assert!(p > delta);
            }
        }
    }

    #[test]
    fn test_small_sample_is_unbounded() {
        let data_vec = vec![0.0, 1.0, 2.0];
        let data = Matrix::new(&data_vec, 3, 1);
        let mut tcp = TransductiveConformal::new(0.1).set_bandwidth(Some(f64::INFINITY));
        tcp.fit(&data, &[0.1, 0.2, 0.3]).unwrap();
        let result = tcp.predict_with_rank(&data).unwrap();
        assert!(result.iter().all(|(q, _)| q.is_infinite()));
        let intervals = tcp.predict(&data).unwrap();
        assert_eq!(intervals.lower, vec![f64::NEG_INFINITY; 3]);
    }

    #[test]
    fn test_step_budget_exhausted() {
        let (x, r) = noisy(200, 1);
        let data = Matrix::new(&x, 200, 1);
        let mut tcp = TransductiveConformal::new(0.1).set_max_search_steps(2);
        tcp.fit(&data, &r).unwrap();
        let point_data = vec![0.1];
        let points = Matrix::new(&point_data, 1, 1);
        let (q, _) = tcp.predict_with_rank(&points).unwrap()[0];
        assert_eq!(q, f64::INFINITY);
    }

    #[test]
    fn test_local_weights_adapt_width() {
        let (x, r) = noisy(2000, 2);
        let data = Matrix::new(&x, 2000, 1);
        let mut tcp = TransductiveConformal::new(0.1).set_bandwidth(Some(0.1));
        tcp.fit(&data, &r).unwrap();
        let point_data = vec![0.0, 0.95];
        let points = Matrix::new(&point_data, 2, 1);
        let p = tcp.predict(&points).unwrap();
        assert!(p.upper[0] < p.upper[1]);
        assert!(p.lower.iter().zip(&p.upper).all(|(l, u)| l <= u));

        let (xt, rt) = noisy(500, 3);
        let test = Matrix::new(&xt, 500, 1);
        let intervals = tcp.predict(&test).unwrap();
        let res = evaluate(&rt, &intervals.lower, &intervals.upper).unwrap();
        assert!(res.marginal_coverage > 0.85, "coverage {}", res.marginal_coverage);

        let serial = tcp.clone().set_parallel(false).predict(&test).unwrap();
        assert_eq!(serial, intervals);
    }

    #[test]
    fn test_transductive_errors() {
        let (x, r) = noisy(20, 4);
        let data = Matrix::new(&x, 20, 1);
        let tcp = TransductiveConformal::new(0.1);
        assert!(matches!(tcp.predict(&data), Err(ConformalError::NotFitted(_))));
        let mut bad = TransductiveConformal::new(1.2);
        assert!(matches!(bad.fit(&data, &r), Err(ConformalError::InvalidParameter(..))));
        let mut bad_h = TransductiveConformal::new(0.1).set_bandwidth(Some(0.0));
        assert!(matches!(bad_h.fit(&data, &r), Err(ConformalError::InvalidParameter(..))));
        let mut tcp = TransductiveConformal::new(0.1);
        assert!(matches!(tcp.fit(&data, &r[..5]), Err(ConformalError::InvalidArgument(_))));
    }

    #[test]
    fn test_transductive_rejects_non_finite_rows() {
        let (x, r) = noisy(50, 5);
        let data = Matrix::new(&x, 50, 1);
        let mut tcp = TransductiveConformal::new(0.1);
        let mut r_nan = r.clone();
        r_nan[7] = f64::NAN;
        assert!(matches!(tcp.fit(&data, &r_nan), Err(ConformalError::InvalidArgument(_))));
        tcp.fit(&data, &r).unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let rows = vec![0.2, bad];
            let test = Matrix::new(&rows, 2, 1);
            assert!(matches!(tcp.predict_with_rank(&test), Err(ConformalError::InvalidArgument(_))));
            assert!(matches!(tcp.predict(&test), Err(ConformalError::InvalidArgument(_))));
        }
    }
}

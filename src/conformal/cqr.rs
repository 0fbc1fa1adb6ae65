//! Conformalized Quantile Regression
//!
//! Fits lower/upper quantile boosters on one part of the calibration set and
//! corrects them with the conformal quantile of the CQR scores on the other.
use crate::booster::GradientBooster;
use crate::conformal::quantile::signed_conformal_quantile;
use crate::conformal::{split_calibration, Intervals};
use crate::constants::{DEFAULT_SEED, DEFAULT_SPLIT_FRAC};
use crate::data::Matrix;
use crate::errors::ConformalError;
use crate::objective::Objective;
use crate::utils::{validate_finite_features, validate_open_unit_parameter, validate_paired_rows, validate_residuals};
use log::info;
use serde::{Deserialize, Serialize};

/// Fitted quantile functions and their conformal correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CqrState {
    pub lower_model: GradientBooster,
    pub upper_model: GradientBooster,
    /// Signed correction added to the upper and subtracted from the lower bound.
    pub correction: f64,
}

#[derive(Debug, Clone)]
pub struct ConformalizedQuantileRegression {
    pub alpha: f64,
    pub frac: f64,
    pub seed: u64,
    /// Template the quantile boosters are cloned from, its objective is replaced.
    pub booster: GradientBooster,
    state: Option<CqrState>,
}

impl ConformalizedQuantileRegression {
    pub fn new(alpha: f64) -> Self {
        ConformalizedQuantileRegression {
            alpha,
            frac: DEFAULT_SPLIT_FRAC,
            seed: DEFAULT_SEED,
            booster: GradientBooster::default(),
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

    pub fn set_booster(mut self, booster: GradientBooster) -> Self {
        self.booster = booster;
        self
    }

    pub fn state(&self) -> Option<&CqrState> {
        self.state.as_ref()
    }

    /// Fit the quantile functions of the residuals and their correction.
    ///
    /// * `x` - Calibration features.
    /// * `residuals` - Calibration residuals, one per row of `x`.
    pub fn fit(&mut self, x: &Matrix<f64>, residuals: &[f64]) -> Result<(), ConformalError> {
        validate_open_unit_parameter(self.alpha, "alpha")?;
        validate_open_unit_parameter(self.frac, "frac")?;
        validate_paired_rows(x.rows, x.cols, x.data.len(), residuals.len())?;
        validate_residuals(residuals)?;
        validate_finite_features(x.data)?;

        let (fit_rows, cal_rows) = split_calibration(x.rows, self.frac, self.seed)?;
        let x_fit = x.select_rows(&fit_rows);
        let x_fit = Matrix::new(&x_fit, fit_rows.len(), x.cols);
        let r_fit: Vec<f64> = fit_rows.iter().map(|i| residuals[*i]).collect();
        let x_cal = x.select_rows(&cal_rows);
        let x_cal = Matrix::new(&x_cal, cal_rows.len(), x.cols);
        let r_cal: Vec<f64> = cal_rows.iter().map(|i| residuals[*i]).collect();

        let mut lower_model = self.booster.clone().set_objective(Objective::QuantileLoss {
            quantile: self.alpha / 2.0,
        });
        lower_model.fit(&x_fit, &r_fit)?;
        let mut upper_model = self.booster.clone().set_objective(Objective::QuantileLoss {
            quantile: 1.0 - self.alpha / 2.0,
        });
        upper_model.fit(&x_fit, &r_fit)?;

        let lo = lower_model.predict(&x_cal, self.booster.parallel);
        let hi = upper_model.predict(&x_cal, self.booster.parallel);
        let scores: Vec<f64> = r_cal
            .iter()
            .zip(lo.iter().zip(hi.iter()))
            .map(|(r, (l, h))| f64::max(l.min(*h) - r, r - h.max(*l)))
            .collect();
        let correction = signed_conformal_quantile(&scores, self.alpha)?;
        info!(
            "CQR correction {} from {} fitting and {} conformalizing rows.",
            correction,
            fit_rows.len(),
            cal_rows.len()
        );

        self.state = Some(CqrState {
            lower_model,
            upper_model,
            correction,
        });
        Ok(())
    }

    /// `(q_lo(x) - Q, q_hi(x) + Q)` for every row of `x`.
    pub fn predict(&self, x: &Matrix<f64>) -> Result<Intervals, ConformalError> {
        let state = self
            .state
            .as_ref()
            .ok_or(ConformalError::NotFitted("ConformalizedQuantileRegression"))?;
        if x.cols != state.lower_model.n_features {
            return Err(ConformalError::InvalidArgument(format!(
                "expected {} features, got {}",
                state.lower_model.n_features, x.cols
            )));
        }
        validate_finite_features(x.data)?;
        let lo = state.lower_model.predict(x, self.booster.parallel);
        let hi = state.upper_model.predict(x, self.booster.parallel);
        let q = state.correction;
        let (lower, upper) = lo
            .iter()
            .zip(hi.iter())
            .map(|(l, h)| {
                let (a, b) = if l <= h { (*l, *h) } else { (*h, *l) };
                let (lower, upper) = (a - q, b + q);
                if lower > upper {
                    let mid = (a + b) / 2.0;
                    (mid, mid)
                } else {
                    (lower, upper)
                }
            })
            .unzip();
        Ok(Intervals { lower, upper })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::evaluate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Residuals whose spread grows with the single feature.
    fn heteroscedastic(n: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * 4.0).collect();
        let r: Vec<f64> = x.iter().map(|v| (rng.gen::<f64>() * 2.0 - 1.0) * (0.1 + v)).collect();
        (x, r)
    }

    fn small_booster() -> GradientBooster {
        GradientBooster::default().set_iterations(30).set_parallel(false)
    }

    #[test]
    fn test_cqr_adapts_and_covers() {
        let (x, r) = heteroscedastic(1000, 0);
        let data = Matrix::new(&x, 1000, 1);
        let mut cqr = ConformalizedQuantileRegression::new(0.1).set_booster(small_booster());
        cqr.fit(&data, &r).unwrap();

        let (xt, rt) = heteroscedastic(1000, 1);
        let test = Matrix::new(&xt, 1000, 1);
        let intervals = cqr.predict(&test).unwrap();
        assert!(intervals.lower.iter().zip(&intervals.upper).all(|(l, u)| l <= u));
        let res = evaluate(&rt, &intervals.lower, &intervals.upper).unwrap();
        assert!(res.marginal_coverage > 0.84, "coverage {}", res.marginal_coverage);

        // Wider where the noise is larger.
        let point_data = vec![0.2, 3.8];
        let points = Matrix::new(&point_data, 2, 1);
        let p = cqr.predict(&points).unwrap();
        assert!(p.upper[1] - p.lower[1] > p.upper[0] - p.lower[0]);
        assert_eq!(cqr.predict(&points).unwrap(), p);
    }

    #[test]
    fn test_cqr_negative_correction_never_inverts() {
        let (x, r) = heteroscedastic(200, 2);
        let data = Matrix::new(&x, 200, 1);
        let mut cqr = ConformalizedQuantileRegression::new(0.1).set_booster(small_booster());
        cqr.fit(&data, &r).unwrap();
        if let Some(state) = cqr.state.as_mut() {
            state.correction = -100.0;
        }
        let intervals = cqr.predict(&data).unwrap();
        assert!(intervals.lower.iter().zip(&intervals.upper).all(|(l, u)| l <= u));
    }

    #[test]
    fn test_cqr_rejects_bad_input() {
        let (x, r) = heteroscedastic(50, 3);
        let data = Matrix::new(&x, 50, 1);
        let mut cqr = ConformalizedQuantileRegression::new(0.1).set_booster(small_booster());
        assert!(matches!(cqr.predict(&data), Err(ConformalError::NotFitted(_))));
        assert!(matches!(
            cqr.fit(&data, &r[..10]),
            Err(ConformalError::InvalidArgument(_))
        ));
        let one = Matrix::new(&x[..1], 1, 1);
        assert!(matches!(
            cqr.fit(&one, &r[..1]),
            Err(ConformalError::InvalidArgument(_))
        ));
        let mut bad = cqr.clone().set_frac(1.0);
        assert!(matches!(
            bad.fit(&data, &r),
            Err(ConformalError::InvalidParameter(..))
        ));
        assert!(cqr.state().is_none());
    }

    #[test]
    fn test_cqr_rejects_non_finite_values() {
        let (x, r) = heteroscedastic(100, 4);
        let data = Matrix::new(&x, 100, 1);
        let mut cqr = ConformalizedQuantileRegression::new(0.1).set_booster(small_booster());

        // Whichever half the split puts it in, a bad row is refused.
        for i in [0, 57, 99] {
            let mut x_bad = x.clone();
            x_bad[i] = f64::NAN;
            let bad = Matrix::new(&x_bad, 100, 1);
            assert!(matches!(cqr.fit(&bad, &r), Err(ConformalError::InvalidArgument(_))));
            let mut r_bad = r.clone();
            r_bad[i] = f64::NAN;
            assert!(matches!(cqr.fit(&data, &r_bad), Err(ConformalError::InvalidArgument(_))));
        }
        assert!(cqr.state().is_none());

        cqr.fit(&data, &r).unwrap();
        let rows = vec![1.0, f64::NAN];
        let test = Matrix::new(&rows, 2, 1);
        assert!(matches!(cqr.predict(&test), Err(ConformalError::InvalidArgument(_))));
    }
}

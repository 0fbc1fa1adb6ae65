//! Conformal Prediction
//!
//! Interval estimators turning calibration residuals into residual bounds for
//! new rows, and the closed set of methods they are selected from.
pub mod cond_hist;
pub mod cqr;
pub mod marginal;
pub mod quantile;
pub mod transductive;

use crate::booster::GradientBooster;
use crate::constants::{
    DEFAULT_MAX_BIN, DEFAULT_MAX_SEARCH_STEPS, DEFAULT_MIN_BIN_SAMPLES, DEFAULT_PARTITION_DEPTH, DEFAULT_SEED,
    DEFAULT_SPLIT_FRAC,
};
use crate::data::Matrix;
use crate::errors::ConformalError;
use crate::sampler::{FractionSampler, Sampler};
use crate::utils::{items_to_strings, validate_paired_rows};
use cond_hist::ConditionalHistogram;
use cqr::ConformalizedQuantileRegression;
use marginal::MarginalConformal;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use transductive::TransductiveConformal;

/// Residual bounds, `lower[i] <= upper[i]` for every row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Intervals {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Intervals {
    /// `(-w, w)` per row.
    pub fn symmetric(half_widths: &[f64]) -> Self {
        Intervals {
            lower: half_widths.iter().map(|w| -w).collect(),
            upper: half_widths.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Move residual bounds onto the target scale around point predictions.
    pub fn shift(&self, center: &[f64]) -> Result<Intervals, ConformalError> {
        if center.len() != self.len() {
            return Err(ConformalError::InvalidArgument(format!(
                "{} intervals cannot be shifted by {} predictions",
                self.len(),
                center.len()
            )));
        }
        Ok(Intervals {
            lower: self.lower.iter().zip(center).map(|(l, c)| c + l).collect(),
            upper: self.upper.iter().zip(center).map(|(u, c)| c + u).collect(),
        })
    }
}

/// Split `n` calibration rows into a fitting part of `floor(n * frac)` rows
/// and a conformalizing part, by a seeded shuffle. Both must be non-empty.
pub fn split_calibration(n: usize, frac: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>), ConformalError> {
    let mut sampler = FractionSampler::new(frac);
    let chosen = sampler.n_chosen(n);
    if chosen == 0 || chosen == n {
        return Err(ConformalError::InvalidArgument(format!(
            "splitting {} calibration rows with frac {} leaves an empty part",
            n, frac
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let index: Vec<usize> = (0..n).collect();
    Ok(sampler.sample(&mut rng, &index))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConformalMethod {
    /// Marginal split conformal.
    CP,
    /// Transductive, locally weighted conformal.
    TCP,
    /// Conformalized quantile regression.
    CQR,
    /// Conditional histogram.
    CondHist,
}

impl ConformalMethod {
    pub const ALL: [ConformalMethod; 4] = [
        ConformalMethod::CP,
        ConformalMethod::TCP,
        ConformalMethod::CQR,
        ConformalMethod::CondHist,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConformalMethod::CP => "CP",
            ConformalMethod::TCP => "TCP",
            ConformalMethod::CQR => "CQR",
            ConformalMethod::CondHist => "CondHist",
        }
    }
}

impl fmt::Display for ConformalMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ConformalMethod {
    type Err = ConformalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConformalMethod::ALL
            .iter()
            .find(|m| m.name() == s)
            .copied()
            .ok_or_else(|| {
                ConformalError::UnsupportedMethod(
                    s.to_string(),
                    items_to_strings(ConformalMethod::ALL.iter().map(|m| m.name()).collect()),
                )
            })
    }
}

/// Hyperparameters shared by all estimators, each uses the ones it needs.
#[derive(Debug, Clone)]
pub struct ConformalParams {
    /// Target miscoverage.
    pub alpha: f64,
    /// Risk threshold of the transductive p-value.
    pub delta: f64,
    pub frac: f64,
    pub n_features: usize,
    pub seed: u64,
    pub max_bin: u16,
    pub partition_depth: usize,
    pub min_bin_samples: usize,
    pub bandwidth: Option<f64>,
    pub max_search_steps: usize,
    /// Template for the CQR quantile boosters.
    pub booster: GradientBooster,
}

impl Default for ConformalParams {
    fn default() -> Self {
        ConformalParams {
            alpha: 0.1,
            delta: 0.05,
            frac: DEFAULT_SPLIT_FRAC,
            n_features: 1,
            seed: DEFAULT_SEED,
            max_bin: DEFAULT_MAX_BIN,
            partition_depth: DEFAULT_PARTITION_DEPTH,
            min_bin_samples: DEFAULT_MIN_BIN_SAMPLES,
            bandwidth: None,
            max_search_steps: DEFAULT_MAX_SEARCH_STEPS,
            booster: GradientBooster::default(),
        }
    }
}

/// One fitted-or-unfitted estimator per method.
#[derive(Debug, Clone)]
pub enum ConformalPredictor {
    Marginal(MarginalConformal),
    Transductive(TransductiveConformal),
    Cqr(ConformalizedQuantileRegression),
    CondHist(ConditionalHistogram),
}

impl ConformalPredictor {
    pub fn new(method: ConformalMethod, params: &ConformalParams) -> Self {
        match method {
            ConformalMethod::CP => ConformalPredictor::Marginal(MarginalConformal::new(params.alpha)),
            ConformalMethod::TCP => ConformalPredictor::Transductive(
                TransductiveConformal::new(params.delta)
                    .set_bandwidth(params.bandwidth)
                    .set_max_search_steps(params.max_search_steps)
                    .set_parallel(params.booster.parallel),
            ),
            ConformalMethod::CQR => ConformalPredictor::Cqr(
                ConformalizedQuantileRegression::new(params.alpha)
                    .set_frac(params.frac)
                    .set_seed(params.seed)
                    .set_booster(params.booster.clone()),
            ),
            ConformalMethod::CondHist => ConformalPredictor::CondHist(
                ConditionalHistogram::new(params.alpha, params.n_features)
                    .set_frac(params.frac)
                    .set_seed(params.seed)
                    .set_max_bin(params.max_bin)
                    .set_max_depth(params.partition_depth)
                    .set_min_bin_samples(params.min_bin_samples),
            ),
        }
    }

    pub fn method(&self) -> ConformalMethod {
        match self {
            ConformalPredictor::Marginal(_) => ConformalMethod::CP,
            ConformalPredictor::Transductive(_) => ConformalMethod::TCP,
            ConformalPredictor::Cqr(_) => ConformalMethod::CQR,
            ConformalPredictor::CondHist(_) => ConformalMethod::CondHist,
        }
    }

    /// Fit on calibration features and residuals, replacing any prior state.
    pub fn fit(&mut self, x: &Matrix<f64>, residuals: &[f64]) -> Result<(), ConformalError> {
        match self {
            ConformalPredictor::Marginal(m) => {
                validate_paired_rows(x.rows, x.cols, x.data.len(), residuals.len())?;
                m.fit(residuals)
            }
            ConformalPredictor::Transductive(m) => m.fit(x, residuals),
            ConformalPredictor::Cqr(m) => m.fit(x, residuals),
            ConformalPredictor::CondHist(m) => m.fit(x, residuals),
        }
    }

    /// Residual bounds for every row of `x`.
    pub fn predict(&self, x: &Matrix<f64>) -> Result<Intervals, ConformalError> {
        match self {
            ConformalPredictor::Marginal(m) => m.predict(x.rows),
            ConformalPredictor::Transductive(m) => m.predict(x),
            ConformalPredictor::Cqr(m) => m.predict(x),
            ConformalPredictor::CondHist(m) => m.predict(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_method_from_str() {
        for m in ConformalMethod::ALL {
            assert_eq!(m.name().parse::<ConformalMethod>().unwrap(), m);
            assert_eq!(m.to_string(), m.name());
        }
        match "MLP".parse::<ConformalMethod>() {
            Err(ConformalError::UnsupportedMethod(name, items)) => {
                assert_eq!(name, "MLP");
                assert!(items.contains("CondHist"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_split_calibration() {
        let (a, b) = split_calibration(10, 0.5, 1).unwrap();
        assert_eq!((a.len(), b.len()), (5, 5));
        assert_eq!(split_calibration(10, 0.5, 1).unwrap(), (a, b));
        assert!(split_calibration(1, 0.5, 1).is_err());
        assert!(split_calibration(3, 0.2, 1).is_err());
    }

    #[test]
    fn test_intervals_shift() {
        let i = Intervals::symmetric(&[1.0, 2.0]);
        let s = i.shift(&[10.0, 20.0]).unwrap();
        assert_eq!(s.lower, vec![9.0, 18.0]);
        assert_eq!(s.upper, vec![11.0, 22.0]);
        assert_eq!(s.len(), 2);
        assert!(matches!(i.shift(&[10.0]), Err(ConformalError::InvalidArgument(_))));
        assert!(matches!(
            i.shift(&[10.0, 20.0, 30.0]),
            Err(ConformalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_every_predictor_fits_and_orders_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 300;
        let x: Vec<f64> = (0..n * 2).map(|_| rng.gen::<f64>()).collect();
        let r: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() - 0.5).collect();
        let data = Matrix::new(&x, n, 2);
        let params = ConformalParams {
            n_features: 2,
            booster: GradientBooster::default().set_iterations(10),
            ..Default::default()
        };
        for method in ConformalMethod::ALL {
            let mut predictor = ConformalPredictor::new(method, &params);
            assert_eq!(predictor.method(), method);
            assert!(matches!(predictor.predict(&data), Err(ConformalError::NotFitted(_))));
            predictor.fit(&data, &r).unwrap();
            let intervals = predictor.predict(&data).unwrap();
            assert_eq!(intervals.len(), n);
            assert!(intervals.lower.iter().zip(&intervals.upper).all(|(l, u)| l <= u));
            assert_eq!(predictor.predict(&data).unwrap(), intervals);

            // A failed refit leaves the fitted state in place.
            assert!(predictor.fit(&data, &r[..10]).is_err());
            assert_eq!(predictor.predict(&data).unwrap(), intervals);
        }
    }

    #[test]
    fn test_marginal_small_scenario() {
        let params = ConformalParams {
            alpha: 0.4,
            ..Default::default()
        };
        let mut cp = ConformalPredictor::new(ConformalMethod::CP, &params);
        let x = vec![0.0; 5];
        cp.fit(&Matrix::new(&x, 5, 1), &[-2.0, -1.0, 0.0, 1.0, 2.0]).unwrap();
        let test = vec![0.0; 4];
        let intervals = cp.predict(&Matrix::new(&test, 4, 1)).unwrap();
        assert_eq!(intervals.lower, vec![-2.0; 4]);
        assert_eq!(intervals.upper, vec![2.0; 4]);
    }
}

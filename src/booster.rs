//! Booster
//!
//! Gradient boosted histogram trees. A `SquaredLoss` booster serves as the
//! point-prediction model, and a pair of `QuantileLoss` boosters are the
//! lower/upper quantile-regression functions conformalized by CQR.
use crate::binning::bin_matrix;
use crate::constants::{
    DEFAULT_ITERATIONS, DEFAULT_LEARNING_RATE, DEFAULT_MAX_BIN, DEFAULT_MAX_DEPTH, DEFAULT_MIN_LEAF_SIZE, DEFAULT_SEED,
};
use crate::data::Matrix;
use crate::errors::ConformalError;
use crate::objective::Objective;
use crate::sampler::{RandomSampler, Sampler};
use crate::splitter::HistogramSplitter;
use crate::tree::Tree;
use crate::utils::{validate_float_parameter, validate_open_unit_parameter};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;

/// Gradient Booster object
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GradientBooster {
    /// The name of objective function used to optimize.
    pub objective: Objective,
    /// Number of trees to fit.
    pub iterations: usize,
    /// Step size applied to every tree's output.
    pub learning_rate: f32,
    /// Maximum depth of each tree.
    pub max_depth: usize,
    /// Minimum number of rows a leaf must hold.
    pub min_leaf_size: usize,
    /// Number of equal-frequency bins per feature.
    pub max_bin: u16,
    /// Fraction of rows sampled for each tree.
    pub subsample: f32,
    /// Seed for the row sampler.
    pub seed: u64,
    /// Build histograms and predictions on the rayon pool.
    pub parallel: bool,
    /// Starting prediction, the objective's initial value on the targets.
    pub base_score: f64,
    /// Number of features the booster was fit with.
    pub n_features: usize,
    pub trees: Vec<Tree>,
}

impl Default for GradientBooster {
    fn default() -> Self {
        Self::new(Objective::SquaredLoss)
    }
}

impl GradientBooster {
    pub fn new(objective: Objective) -> Self {
        GradientBooster {
            objective,
            iterations: DEFAULT_ITERATIONS,
            learning_rate: DEFAULT_LEARNING_RATE,
            max_depth: DEFAULT_MAX_DEPTH,
            min_leaf_size: DEFAULT_MIN_LEAF_SIZE,
            max_bin: DEFAULT_MAX_BIN,
            subsample: 1.0,
            seed: DEFAULT_SEED,
            parallel: true,
            base_score: 0.0,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn validate_parameters(&self) -> Result<(), ConformalError> {
        if let Objective::QuantileLoss { quantile } = self.objective {
            validate_open_unit_parameter(quantile, "quantile")?;
        }
        validate_float_parameter(f64::from(self.learning_rate), f64::MIN_POSITIVE, 1.0, "learning_rate")?;
        validate_float_parameter(f64::from(self.subsample), f64::MIN_POSITIVE, 1.0, "subsample")?;
        if self.min_leaf_size == 0 {
            return Err(ConformalError::InvalidParameter(
                "min_leaf_size".to_string(),
                "a positive integer".to_string(),
                self.min_leaf_size.to_string(),
            ));
        }
        Ok(())
    }

    /// Fit the gradient booster on a provided dataset.
    ///
    /// * `data` - Raw feature matrix, column major.
    /// * `y` - Target values, one per row of `data`.
    ///
    /// On error the previously fitted trees are kept.
    pub fn fit(&mut self, data: &Matrix<f64>, y: &[f64]) -> Result<(), ConformalError> {
        self.validate_parameters()?;
        if !data.is_consistent() || data.rows != y.len() || y.is_empty() {
            return Err(ConformalError::InvalidArgument(format!(
                "booster needs a non-empty matrix with one target per row, got {} rows and {} targets",
                data.rows,
                y.len()
            )));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ConformalError::InvalidArgument(
                "targets must be finite".to_string(),
            ));
        }

        let binned = bin_matrix(data, None, self.max_bin)?;
        let bdata = Matrix::new(&binned.binned_data, data.rows, data.cols);
        let col_index: Vec<usize> = (0..data.cols).collect();
        let objective = self.objective.function();
        let splitter = HistogramSplitter {
            eta: self.learning_rate,
            min_leaf_size: self.min_leaf_size,
        };
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut sampler = RandomSampler::new(self.subsample);

        let base_score = objective.initial_value(y);
        let mut yhat = vec![base_score; y.len()];
        let mut trees = Vec::with_capacity(self.iterations);
        let log_every = (self.iterations / 10).max(1);

        for i in 0..self.iterations {
            let (grad, hess) = objective.gradient(y, &yhat);
            let index = if self.subsample < 1.0 {
                let (chosen, _) = sampler.sample(&mut rng, &data.index);
                if chosen.is_empty() {
                    continue;
                }
                chosen
            } else {
                data.index.to_owned()
            };

            let mut tree = Tree::new();
            tree.fit(
                objective.as_ref(),
                &bdata,
                &binned.cuts,
                index,
                &col_index,
                &grad,
                hess.as_deref(),
                y,
                &yhat,
                &splitter,
                self.max_depth,
                self.parallel,
            );
            let update = tree.predict(data, self.parallel);
            yhat.iter_mut().zip(update.iter()).for_each(|(p, u)| *p += u);
            trees.push(tree);

            if (i + 1) % log_every == 0 {
                let loss = objective.loss(y, &yhat);
                let mean_loss = loss.iter().map(|l| f64::from(*l)).sum::<f64>() / loss.len() as f64;
                debug!("round {}, average loss {:.6}", i + 1, mean_loss);
            }
        }

        info!(
            "Fit {} trees with objective {:?} on {} rows and {} features.",
            trees.len(),
            self.objective,
            data.rows,
            data.cols
        );

        self.base_score = base_score;
        self.n_features = data.cols;
        self.trees = trees;
        Ok(())
    }

    /// Predict a single raw feature row.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    /// Generate predictions on data using the gradient booster.
    ///
    /// * `data` - Raw feature matrix with the columns the booster was fit on.
    /// * `parallel` - Predict rows on the rayon pool.
    pub fn predict(&self, data: &Matrix<f64>, parallel: bool) -> Vec<f64> {
        if parallel {
            (0..data.rows)
                .into_par_iter()
                .map(|i| self.predict_row(&data.get_row(i)))
                .collect()
        } else {
            (0..data.rows).map(|i| self.predict_row(&data.get_row(i))).collect()
        }
    }

    /// Get reference to the trees
    pub fn get_prediction_trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Save a booster as a json object to a file.
    ///
    /// * `path` - Path to save booster.
    pub fn save_booster(&self, path: &str) -> Result<(), ConformalError> {
        let model = self.json_dump()?;
        fs::write(path, model).map_err(|e| ConformalError::UnableToWrite(e.to_string()))
    }

    /// Dump a booster as a json object
    pub fn json_dump(&self) -> Result<String, ConformalError> {
        serde_json::to_string(self).map_err(|e| ConformalError::UnableToWrite(e.to_string()))
    }

    /// Load a booster from Json string
    ///
    /// * `json_str` - String object, which can be serialized to json.
    pub fn from_json(json_str: &str) -> Result<Self, ConformalError> {
        serde_json::from_str::<GradientBooster>(json_str).map_err(|e| ConformalError::UnableToRead(e.to_string()))
    }

    /// Load a booster from a path to a json booster object.
    ///
    /// * `path` - Path to load booster from.
    pub fn load_booster(path: &str) -> Result<Self, ConformalError> {
        let json_str = fs::read_to_string(path).map_err(|e| ConformalError::UnableToRead(e.to_string()))?;
        Self::from_json(&json_str)
    }

    // Set methods for paramters

    /// Set the objective on the booster.
    /// * `objective` - The objective type of the booster.
    pub fn set_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    /// Set the number of boosting rounds.
    pub fn set_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the learning rate (eta) of the booster.
    pub fn set_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn set_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn set_min_leaf_size(mut self, min_leaf_size: usize) -> Self {
        self.min_leaf_size = min_leaf_size;
        self
    }

    /// Set the number of bins each feature is cut into.
    pub fn set_max_bin(mut self, max_bin: u16) -> Self {
        self.max_bin = max_bin;
        self
    }

    pub fn set_subsample(mut self, subsample: f32) -> Self {
        self.subsample = subsample;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn set_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

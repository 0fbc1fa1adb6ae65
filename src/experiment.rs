//! Experiment
//!
//! Repeated train/calibration/test experiments: a boosted point model is fit
//! on the training rows, its calibration residuals feed one conformal
//! estimator, and the resulting intervals are scored on the test rows.
use crate::booster::GradientBooster;
use crate::conformal::{ConformalMethod, ConformalParams, ConformalPredictor};
use crate::constants::{DEFAULT_ITERATIONS, DEFAULT_SPLIT_FRAC};
use crate::data::Matrix;
use crate::errors::ConformalError;
use crate::evaluation::{evaluate, CoverageResult};
use crate::objective::Objective;
use crate::utils::{fmt_vec_output, items_to_strings, validate_open_unit_parameter};
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::str::FromStr;

/// Harness options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Seed the per-experiment seeds are drawn from.
    pub grand_seed: u64,
    pub n_experiments: usize,
    pub alpha: f64,
    pub delta: f64,
    pub frac: f64,
    pub test_size: f64,
    /// Cap on the training and on the calibration rows.
    pub max_rows: usize,
    /// Boosting rounds of the point model.
    pub iterations: usize,
    pub methods: Vec<ConformalMethod>,
    pub save: bool,
    pub output: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            grand_seed: 42,
            n_experiments: 2,
            alpha: 0.1,
            delta: 0.05,
            frac: DEFAULT_SPLIT_FRAC,
            test_size: 0.15,
            max_rows: 800,
            iterations: DEFAULT_ITERATIONS,
            methods: ConformalMethod::ALL.to_vec(),
            save: true,
            output: "real_world_results.csv".to_string(),
        }
    }
}

impl ExperimentConfig {
    /// Load a config from a JSON file, missing fields take their defaults.
    pub fn from_json_file(path: &str) -> Result<Self, ConformalError> {
        let json_str = fs::read_to_string(path).map_err(|e| ConformalError::UnableToRead(e.to_string()))?;
        serde_json::from_str(&json_str).map_err(|e| ConformalError::UnableToRead(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConformalError> {
        validate_open_unit_parameter(self.alpha, "alpha")?;
        validate_open_unit_parameter(self.delta, "delta")?;
        validate_open_unit_parameter(self.frac, "frac")?;
        validate_open_unit_parameter(self.test_size, "test_size")?;
        if self.methods.is_empty() {
            return Err(ConformalError::InvalidArgument(
                "at least one method is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Estimator hyperparameters for one experiment.
    pub fn conformal_params(&self, n_features: usize, seed: u64) -> ConformalParams {
        ConformalParams {
            alpha: self.alpha,
            delta: self.delta,
            frac: self.frac,
            n_features,
            seed,
            booster: GradientBooster::default().set_iterations(self.iterations).set_seed(seed),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticKind {
    /// Linear signal with constant gaussian noise.
    Linear,
    /// Linear signal with noise growing in `|x_0|`.
    Heteroscedastic,
}

impl FromStr for SyntheticKind {
    type Err = ConformalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(SyntheticKind::Linear),
            "heteroscedastic" => Ok(SyntheticKind::Heteroscedastic),
            _ => Err(ConformalError::InvalidArgument(format!(
                "unknown synthetic dataset {}, expected one of {}",
                s,
                items_to_strings(vec!["linear", "heteroscedastic"])
            ))),
        }
    }
}

/// Regression dataset with column-major features.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub n_features: usize,
}

impl Dataset {
    pub fn n_rows(&self) -> usize {
        self.y.len()
    }

    pub fn matrix(&self) -> Matrix<f64> {
        Matrix::new(&self.x, self.n_rows(), self.n_features)
    }

    /// Read a headed CSV of numeric columns, `target_column` is the target and
    /// every other column a feature.
    pub fn from_csv(path: &str, name: &str, target_column: &str) -> Result<Self, ConformalError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| ConformalError::UnableToRead(e.to_string()))?;
        let headers = rdr
            .headers()
            .map_err(|e| ConformalError::UnableToRead(e.to_string()))?
            .clone();
        let target = headers.iter().position(|h| h == target_column).ok_or_else(|| {
            ConformalError::InvalidArgument(format!("column {} not found in {}", target_column, path))
        })?;
        let n_features = headers.len() - 1;

        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); n_features];
        let mut y = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| ConformalError::UnableToRead(e.to_string()))?;
            if record.len() != headers.len() {
                return Err(ConformalError::UnableToRead(format!(
                    "record {} has {} fields, expected {}",
                    line + 1,
                    record.len(),
                    headers.len()
                )));
            }
            let mut feature = 0;
            for (j, field) in record.iter().enumerate() {
                let v: f64 = field.parse().map_err(|_| {
                    ConformalError::UnableToRead(format!("record {} field {} is not a number: {}", line + 1, j, field))
                })?;
                if j == target {
                    y.push(v);
                } else {
                    columns[feature].push(v);
                    feature += 1;
                }
            }
        }
        info!("Read {} rows and {} features from {}.", y.len(), n_features, path);
        Ok(Dataset {
            name: name.to_string(),
            x: columns.concat(),
            y,
            n_features,
        })
    }

    /// Seeded synthetic regression data, `y = sum_j x_j / (j + 1) + noise`
    /// with `x` uniform on `[-1, 1]`.
    pub fn synthetic(kind: SyntheticKind, n_samples: usize, n_features: usize, seed: u64) -> Result<Self, ConformalError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n_samples * n_features)
            .map(|_| rng.gen::<f64>() * 2.0 - 1.0)
            .collect();
        let y = (0..n_samples)
            .map(|i| {
                let signal: f64 = (0..n_features).map(|j| x[j * n_samples + i] / (j as f64 + 1.0)).sum();
                let scale = match kind {
                    SyntheticKind::Linear => 0.5,
                    SyntheticKind::Heteroscedastic => 0.1 + 2.0 * x.get(i).map_or(0.0, |v| v.abs()),
                };
                let noise = Normal::new(0.0, scale).map_err(|e| {
                    ConformalError::InvalidParameter(
                        "noise scale".to_string(),
                        "finite and non-negative".to_string(),
                        e.to_string(),
                    )
                })?;
                Ok(signal + noise.sample(&mut rng))
            })
            .collect::<Result<Vec<f64>, ConformalError>>()?;
        let name = match kind {
            SyntheticKind::Linear => "linear",
            SyntheticKind::Heteroscedastic => "heteroscedastic",
        };
        Ok(Dataset {
            name: name.to_string(),
            x,
            y,
            n_features,
        })
    }
}

/// Disjoint train, calibration and test partitions, standardized with the
/// training statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit {
    pub x_train: Vec<f64>,
    pub y_train: Vec<f64>,
    pub x_calib: Vec<f64>,
    pub y_calib: Vec<f64>,
    pub x_test: Vec<f64>,
    pub y_test: Vec<f64>,
    pub n_features: usize,
}

impl DataSplit {
    /// Shuffle with `seed`, hold out `ceil(n * test_size)` test rows, and split
    /// the rest in halves for training and calibration, each capped at
    /// `max_rows`.
    pub fn new(dataset: &Dataset, test_size: f64, max_rows: usize, seed: u64) -> Result<Self, ConformalError> {
        validate_open_unit_parameter(test_size, "test_size")?;
        let n = dataset.n_rows();
        let mut index: Vec<usize> = (0..n).collect();
        index.shuffle(&mut StdRng::seed_from_u64(seed));
        let n_test = ((n as f64) * test_size).ceil() as usize;
        let n_rest = n.saturating_sub(n_test);
        let n_train = n_rest / 2;
        if n_test == 0 || n_train == 0 || n_rest - n_train == 0 {
            return Err(ConformalError::InvalidArgument(format!(
                "dataset {} with {} rows is too small to split",
                dataset.name, n
            )));
        }
        let test_rows = &index[..n_test];
        let train_rows = &index[n_test..n_test + n_train];
        let calib_rows = &index[n_test + n_train..];
        let train_rows = &train_rows[..train_rows.len().min(max_rows)];
        let calib_rows = &calib_rows[..calib_rows.len().min(max_rows)];

        let data = dataset.matrix();
        let (x_means, x_stds): (Vec<f64>, Vec<f64>) = (0..dataset.n_features)
            .map(|j| mean_std(train_rows.iter().map(|i| *data.get(*i, j))))
            .unzip();
        let (y_mean, y_std) = mean_std(train_rows.iter().map(|i| dataset.y[*i]));

        let (data, x_means, x_stds) = (&data, &x_means, &x_stds);
        let scale_x = |rows: &[usize]| -> Vec<f64> {
            (0..dataset.n_features)
                .flat_map(|j| rows.iter().map(move |i| (data.get(*i, j) - x_means[j]) / x_stds[j]))
                .collect()
        };
        let scale_y = |rows: &[usize]| -> Vec<f64> { rows.iter().map(|i| (dataset.y[*i] - y_mean) / y_std).collect() };

        Ok(DataSplit {
            x_train: scale_x(train_rows),
            y_train: scale_y(train_rows),
            x_calib: scale_x(calib_rows),
            y_calib: scale_y(calib_rows),
            x_test: scale_x(test_rows),
            y_test: scale_y(test_rows),
            n_features: dataset.n_features,
        })
    }

    pub fn train(&self) -> Matrix<f64> {
        Matrix::new(&self.x_train, self.y_train.len(), self.n_features)
    }

    pub fn calib(&self) -> Matrix<f64> {
        Matrix::new(&self.x_calib, self.y_calib.len(), self.n_features)
    }

    pub fn test(&self) -> Matrix<f64> {
        Matrix::new(&self.x_test, self.y_test.len(), self.n_features)
    }
}

fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.clone().count().max(1) as f64;
    let mean = values.clone().sum::<f64>() / n;
    let std = (values.map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    (mean, if std > 0.0 { std } else { 1.0 })
}

/// Fit the point model, conformalize its calibration residuals with `method`,
/// and score the resulting intervals on the test rows.
pub fn run_experiment(
    method: ConformalMethod,
    split: &DataSplit,
    config: &ExperimentConfig,
    seed: u64,
) -> Result<CoverageResult, ConformalError> {
    let params = config.conformal_params(split.n_features, seed);
    let mut predictor = ConformalPredictor::new(method, &params);

    let mut model = GradientBooster::new(Objective::SquaredLoss)
        .set_iterations(config.iterations)
        .set_seed(seed);
    info!("Fitting point model on {} training rows.", split.y_train.len());
    model.fit(&split.train(), &split.y_train)?;

    let calib = split.calib();
    let residuals: Vec<f64> = model
        .predict(&calib, true)
        .iter()
        .zip(split.y_calib.iter())
        .map(|(p, y)| y - p)
        .collect();

    info!("Running {} on {} calibration residuals.", method, residuals.len());
    predictor.fit(&calib, &residuals)?;
    let test = split.test();
    let intervals = predictor.predict(&test)?.shift(&model.predict(&test, true))?;
    evaluate(&split.y_test, &intervals.lower, &intervals.upper)
}

/// One row of the results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub exp_num: usize,
    pub dataset: String,
    pub method: ConformalMethod,
    pub marginal_coverage: f64,
    pub average_length: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultsTable {
    pub records: Vec<ExperimentRecord>,
}

impl ResultsTable {
    /// Write the records as CSV with a header row.
    pub fn save_csv(&self, path: &str) -> Result<(), ConformalError> {
        let mut wtr = csv::Writer::from_path(path).map_err(|e| ConformalError::UnableToWrite(e.to_string()))?;
        for record in &self.records {
            wtr.serialize(record)
                .map_err(|e| ConformalError::UnableToWrite(e.to_string()))?;
        }
        wtr.flush().map_err(|e| ConformalError::UnableToWrite(e.to_string()))
    }

    /// Mean coverage and mean length over experiments, per dataset and method.
    pub fn summary(&self) -> Vec<(String, ConformalMethod, CoverageResult)> {
        let mut groups: Vec<(String, ConformalMethod, Vec<f64>, Vec<f64>)> = Vec::new();
        for r in &self.records {
            match groups.iter_mut().find(|g| g.0 == r.dataset && g.1 == r.method) {
                Some(g) => {
                    g.2.push(r.marginal_coverage);
                    g.3.push(r.average_length);
                }
                None => groups.push((
                    r.dataset.clone(),
                    r.method,
                    vec![r.marginal_coverage],
                    vec![r.average_length],
                )),
            }
        }
        groups
            .into_iter()
            .map(|(d, m, c, l)| {
                let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
                (
                    d,
                    m,
                    CoverageResult {
                        marginal_coverage: mean(&c),
                        average_length: mean(&l),
                    },
                )
            })
            .collect()
    }
}

impl fmt::Display for ResultsTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{:>8} {:>16} {:>10} {:>18} {:>16}",
            "exp_num", "dataset", "method", "marginal_coverage", "average_length"
        )?;
        for r in &self.records {
            writeln!(
                f,
                "{:>8} {:>16} {:>10} {:>18} {:>16}",
                r.exp_num,
                r.dataset,
                r.method.name(),
                fmt_vec_output(&[r.marginal_coverage]),
                fmt_vec_output(&[r.average_length])
            )?;
        }
        Ok(())
    }
}

/// Per-experiment seeds in `0..100`, drawn from `grand_seed`.
pub fn experiment_seeds(grand_seed: u64, n_experiments: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(grand_seed);
    (0..n_experiments).map(|_| rng.gen_range(0..100)).collect()
}

/// Run every configured method on every dataset, `n_experiments` times.
pub fn run_experiments(config: &ExperimentConfig, datasets: &[Dataset]) -> Result<ResultsTable, ConformalError> {
    config.validate()?;
    let seeds = experiment_seeds(config.grand_seed, config.n_experiments);
    let mut table = ResultsTable::default();
    for (exp_num, seed) in seeds.iter().enumerate() {
        for dataset in datasets {
            let split = DataSplit::new(dataset, config.test_size, config.max_rows, *seed)?;
            for method in &config.methods {
                let res = run_experiment(*method, &split, config, *seed)?;
                info!(
                    "Experiment {}, {}, {}: coverage {:.4}, length {:.4}.",
                    exp_num, dataset.name, method, res.marginal_coverage, res.average_length
                );
                table.records.push(ExperimentRecord {
                    exp_num,
                    dataset: dataset.name.clone(),
                    method: *method,
                    marginal_coverage: res.marginal_coverage,
                    average_length: res.average_length,
                });
            }
        }
    }
    Ok(table)
}

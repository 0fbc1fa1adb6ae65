/// Number of equal-frequency bins each feature is cut into.
pub const DEFAULT_MAX_BIN: u16 = 64;
/// Number of boosting rounds for the gradient booster.
pub const DEFAULT_ITERATIONS: usize = 100;
pub const DEFAULT_LEARNING_RATE: f32 = 0.1;
pub const DEFAULT_MAX_DEPTH: usize = 3;
pub const DEFAULT_MIN_LEAF_SIZE: usize = 10;
/// Fraction of the calibration set used to fit auxiliary functions.
pub const DEFAULT_SPLIT_FRAC: f64 = 0.5;
pub const DEFAULT_SEED: u64 = 42;
/// Minimum held-out samples a histogram bin needs to get its own quantile.
pub const DEFAULT_MIN_BIN_SAMPLES: usize = 20;
/// Depth of the partitioning tree used by the conditional histogram.
pub const DEFAULT_PARTITION_DEPTH: usize = 3;
/// Step budget for the transductive threshold bisection.
pub const DEFAULT_MAX_SEARCH_STEPS: usize = 64;
/// Relative slack used when rounding the conformal rank up, so that products
/// such as `10 * 0.3` that land a few ulps above an integer do not skip an
/// order statistic. Scaled by the product, it holds for any sample size.
pub const RANK_EPS: f64 = 1e-14;
pub const HESSIAN_EPS: f32 = 1e-6;

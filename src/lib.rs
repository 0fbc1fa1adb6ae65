//! Conformal prediction intervals for regression residuals, with the
//! gradient boosted trees they are built on and an experiment harness
//! comparing their coverage and length.

// Modules
pub mod binning;
pub mod booster;
pub mod conformal;
pub mod constants;
pub mod data;
pub mod errors;
pub mod evaluation;
pub mod experiment;
pub mod histogram;
pub mod node;
pub mod objective;
pub mod sampler;
pub mod splitter;
pub mod tree;
pub mod utils;

// Individual classes, and functions
pub use booster::GradientBooster;
pub use conformal::{ConformalMethod, ConformalParams, ConformalPredictor, Intervals};
pub use data::Matrix;
pub use evaluation::{evaluate, CoverageResult};

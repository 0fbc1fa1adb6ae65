//! Errors
//!
//! Custom error types used throughout the `conformal_intervals` crate.
use thiserror::Error;

/// Errors that can occur while fitting or applying a conformal estimator.
#[derive(Debug, Error, PartialEq)]
pub enum ConformalError {
    /// Malformed input: empty sequences, mismatched lengths, wrong shapes.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// A method name that does not correspond to any estimator.
    #[error("Unsupported method {0}, expected one of {1}.")]
    UnsupportedMethod(String, String),
    /// `predict` was called before a successful `fit`.
    #[error("{0} must be fit before calling predict.")]
    NotFitted(&'static str),
    /// A histogram bin with too few held-out calibration samples.
    #[error("Bin {0} has too few held-out calibration samples.")]
    DegenerateBin(usize),
    /// The threshold search ran out of steps before converging.
    #[error("Threshold search did not converge within {0} steps.")]
    SearchExhausted(usize),
    /// Unable to write model or results to file.
    #[error("Unable to write to file: {0}")]
    UnableToWrite(String),
    /// Unable to read model or data from file.
    #[error("Unable to read from file: {0}")]
    UnableToRead(String),
}

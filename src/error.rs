//! Errors that can occur in sim2tod

use thiserror::Error;

use crate::{calibration::CalibrationError, config::ConfigError, io::error::IOError};

#[derive(Error, Debug)]
/// All the errors that can occur while injecting signal into an observation.
pub enum Sim2TodError {
    #[error("Invalid value for {option}: expected {expected}, received {received}")]
    /// A run parameter was supplied, but its value cannot be used.
    InvalidConfiguration {
        /// The parameter name
        option: String,
        /// What was expected
        expected: String,
        /// What was received instead
        received: String,
    },

    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    /// Error for bad array shape in provided argument
    BadArrayShape {
        /// The argument name within the function
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    #[error("sky cube contains {count} non-finite values after normalisation")]
    /// The simulated cube has NaN or infinite values.
    NonFiniteCube {
        /// How many values are not finite
        count: usize,
    },

    #[error(transparent)]
    /// Error derived from [`crate::io::error::IOError`]
    IOError(#[from] IOError),

    #[error(transparent)]
    /// Error derived from [`crate::calibration::CalibrationError`]
    CalibrationError(#[from] CalibrationError),

    #[error(transparent)]
    /// Error derived from [`crate::config::ConfigError`]
    ConfigError(#[from] ConfigError),

    #[error("processing was cancelled")]
    /// The run was cancelled before this observation finished.
    Cancelled,

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`clap::Error`]
    ClapError(#[from] clap::Error),

    #[error("Dry run")]
    /// Only print the resolved run summary.
    DryRun {},
}

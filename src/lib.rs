#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! sim2tod injects simulated sky signal into the time ordered data (TOD) of
//! single-dish line intensity mapping observations, producing synthetic level1
//! files with the instrument's own noise and calibration.
//!
//! Each observation is calibrated against its ambient-load vane events to get
//! a system temperature for every sample. Inside the calibration interval, the
//! TOD is scaled by `1 + signal / tsys`, where the signal is either the
//! brightness of a simulated cube at each sample's pointing, or radiometer
//! white noise for null tests. Elements with an unphysical system temperature
//! are zeroed.
//!
//! # Examples
//!
//! Inject a cube into a single recorded TOD array.
//!
//! ```rust
//! use sim2tod::{
//!     inject_signal, CalibrationInterval, FieldGeometry, GnomonicProjector, Pointing,
//!     SignalSource, SkyCube,
//!     ndarray::{Array2, Array4, ArrayD, IxDyn},
//! };
//!
//! // a 2x2 pixel cube of ones
//! let raw = ArrayD::from_elem(IxDyn(&[2, 2, 4096]), 1.0);
//! let cube = SkyCube::from_raw(raw, 1.0).unwrap();
//! let field = FieldGeometry { nside: 2, dpix_deg: 1.0, centre_ra_deg: 0.0, centre_dec_deg: 0.0 };
//!
//! // one feed staring at the field centre for 30 samples
//! let tod = Array4::from_elem((1, 4, 64, 30), 10.0_f32);
//! let tsys = Array4::from_elem((1, 4, 64, 30), 50.0_f32);
//! let zeros = Array2::zeros((1, 30));
//! let pointing = Pointing { ra_deg: zeros.view(), dec_deg: zeros.view() };
//! let interval = CalibrationInterval::new(5, 25, 30).unwrap();
//!
//! let injected = inject_signal(
//!     tod.view(),
//!     tsys.view(),
//!     &interval,
//!     &pointing,
//!     &field,
//!     &GnomonicProjector,
//!     &SignalSource::Cube(&cube),
//! )
//! .unwrap();
//! assert!((injected.tod[(0, 0, 0, 10)] - 10.2).abs() < 1e-5);
//! assert_eq!(injected.tod[(0, 0, 0, 24)], 10.0);
//! ```

pub mod calibration;
pub use calibration::{
    CalibrationError, CalibrationInterval, CalibrationProvider, CalibrationResult, Telemetry,
    VaneTsysSolver,
};

pub mod config;
pub use config::{FieldGeometry, InjectionMode, ObservationPaths, ParamFile, RunConfig};

pub mod constants;

pub mod cube;
pub use cube::SkyCube;

pub mod error;
pub use error::Sim2TodError;

pub mod injection;
pub use injection::{
    inject_signal, InjectedTod, InjectionStats, ObservationTiming, Pointing, SignalSource,
};

pub mod io;
pub use io::{duplicate, overwrite_tod, Observation, StagedOutput};

pub mod pipeline;
pub use pipeline::{CancelToken, InjectionPipeline, ObservationOutcome, RunReport};

pub mod projection;
pub use projection::{GnomonicProjector, PixelProjector};

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
pub(crate) mod test_common;

pub use ndarray;

/// Time `$body` and add the elapsed time to the entry `$name` of `$durations`,
/// a `HashMap<String, Duration>`. Evaluates to the value of `$body`.
#[macro_export]
macro_rules! with_increment_duration {
    ($durations:expr, $name:literal, $body:expr) => {{
        let _now = std::time::Instant::now();
        let _res = $body;
        *$durations
            .entry($name.into())
            .or_insert(std::time::Duration::default()) += _now.elapsed();
        _res
    }};
}

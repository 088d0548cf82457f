// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Injecting signal into time ordered data.
//!
//! Signal is applied multiplicatively through the calibration response,
//!
//! ```text
//! injected = tod * (1 + signal / tsys)
//! ```
//!
//! for the samples strictly inside the calibration interval. Any element whose
//! system temperature lies outside the valid band is zeroed, wherever it is.

use std::{fmt::Display, ops::Add};

use log::{debug, trace};
use ndarray::{parallel::prelude::*, Array4, ArrayView2, ArrayView4, Axis};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

use crate::{
    calibration::CalibrationInterval,
    config::FieldGeometry,
    constants::{TSYS_MAX_KELVIN, TSYS_MIN_KELVIN},
    cube::SkyCube,
    projection::PixelProjector,
    Sim2TodError,
};

/// Sampling properties of an observation which set the radiometer noise level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationTiming {
    /// Time between samples in seconds
    pub dt_seconds: f64,
    /// Channel bandwidth in Hz
    pub dnu_hz: f64,
}

impl ObservationTiming {
    /// `1 / sqrt(dt * dnu)`, the radiometer noise in units of Tsys.
    pub fn noise_scale(&self) -> f64 {
        1.0 / (self.dt_seconds * self.dnu_hz).sqrt()
    }
}

/// What to inject.
#[derive(Debug, Clone, Copy)]
pub enum SignalSource<'a> {
    /// The brightness of the cube at each sample's pixel.
    Cube(&'a SkyCube),
    /// Gaussian white noise with standard deviation `|tsys| / sqrt(dt * dnu)`.
    ///
    /// Each feed draws from its own generator seeded with `seed + feed`.
    WhiteNoise {
        /// Sampling of the observation
        timing: ObservationTiming,
        /// Base seed for the run
        seed: u64,
    },
}

/// Per-sample pointing of each feed in degrees, `[feed][time]`.
#[derive(Debug, Clone, Copy)]
pub struct Pointing<'a> {
    /// Right ascension
    pub ra_deg: ArrayView2<'a, f64>,
    /// Declination
    pub dec_deg: ArrayView2<'a, f64>,
}

/// Counts of what happened to the elements of the TOD.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InjectionStats {
    /// Elements which had signal injected
    pub num_injected: usize,
    /// Elements zeroed because of an invalid system temperature
    pub num_masked: usize,
    /// Elements inside the interval left alone because their pointing is off
    /// the grid
    pub num_off_grid: usize,
}

impl Add for InjectionStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            num_injected: self.num_injected + rhs.num_injected,
            num_masked: self.num_masked + rhs.num_masked,
            num_off_grid: self.num_off_grid + rhs.num_off_grid,
        }
    }
}

impl Display for InjectionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} injected, {} masked, {} off grid",
            self.num_injected, self.num_masked, self.num_off_grid
        )
    }
}

/// The result of [`inject_signal`].
#[derive(Debug, Clone)]
pub struct InjectedTod {
    /// The modified TOD, `[feed][sideband][channel][time]`
    pub tod: Array4<f32>,
    /// What happened to its elements
    pub stats: InjectionStats,
}

/// Whether a system temperature (Kelvin) is inside the valid band. NaN is not.
pub fn tsys_is_valid(tsys: f64) -> bool {
    tsys > TSYS_MIN_KELVIN && tsys < TSYS_MAX_KELVIN
}

fn shape_error(argument: &str, expected: String, received: String) -> Sim2TodError {
    Sim2TodError::BadArrayShape {
        argument: argument.into(),
        function: "inject_signal".into(),
        expected,
        received,
    }
}

/// Inject `source` into a copy of `tod`.
///
/// For every element of the TOD `[feed][sideband][channel][time]`:
/// - if `tsys` is not valid (see [`tsys_is_valid`]) the output is zero;
/// - otherwise, if the sample is in [`CalibrationInterval::injection_range`]
///   and the signal is defined, the output is `tod * (1 + signal / tsys)`;
/// - otherwise the output is the original TOD value.
///
/// Feeds are processed in parallel. Arithmetic is done in `f64`.
///
/// # Errors
///
/// - [`Sim2TodError::BadArrayShape`] if `tsys`, `pointing` or the cube don't
///   fit the TOD, the field geometry, or the interval.
/// - [`Sim2TodError::InvalidConfiguration`] if the white noise timing does not
///   give a finite noise level.
pub fn inject_signal(
    tod: ArrayView4<f32>,
    tsys: ArrayView4<f32>,
    interval: &CalibrationInterval,
    pointing: &Pointing,
    geometry: &FieldGeometry,
    projector: &dyn PixelProjector,
    source: &SignalSource,
) -> Result<InjectedTod, Sim2TodError> {
    trace!("start inject_signal");
    let (num_feeds, num_sidebands, num_chans, num_samples) = tod.dim();

    if tsys.dim() != tod.dim() {
        return Err(shape_error(
            "tsys",
            format!("{:?}", tod.dim()),
            format!("{:?}", tsys.dim()),
        ));
    }
    for (argument, view) in [
        ("pointing.ra_deg", pointing.ra_deg),
        ("pointing.dec_deg", pointing.dec_deg),
    ] {
        if view.dim() != (num_feeds, num_samples) {
            return Err(shape_error(
                argument,
                format!("(num_feeds, num_samples)=({num_feeds}, {num_samples})"),
                format!("{:?}", view.dim()),
            ));
        }
    }
    if interval.tod_end > num_samples {
        return Err(shape_error(
            "interval",
            format!("tod_end <= num_samples={num_samples}"),
            format!("tod_end={}", interval.tod_end),
        ));
    }
    let noise_scale = match source {
        SignalSource::Cube(cube) => {
            let (cube_sidebands, cube_chans, cube_pixels) = cube.dim();
            if (cube_sidebands, cube_chans) != (num_sidebands, num_chans) {
                return Err(shape_error(
                    "cube",
                    format!("(num_sidebands, num_chans)=({num_sidebands}, {num_chans})"),
                    format!("({cube_sidebands}, {cube_chans})"),
                ));
            }
            if cube_pixels != geometry.num_pixels() {
                return Err(shape_error(
                    "cube",
                    format!("nside^2={} pixels", geometry.num_pixels()),
                    format!("{cube_pixels} pixels"),
                ));
            }
            0.0
        }
        SignalSource::WhiteNoise { timing, .. } => {
            let scale = timing.noise_scale();
            if !scale.is_finite() {
                return Err(Sim2TodError::InvalidConfiguration {
                    option: "observation timing".into(),
                    expected: "positive sample spacing and channel bandwidth".into(),
                    received: format!("{timing:?}"),
                });
            }
            scale
        }
    };

    let injection_range = interval.injection_range();
    debug!(
        "injecting into samples {:?} of {} feeds",
        injection_range, num_feeds
    );

    let mut injected = tod.to_owned();
    let stats = injected
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(feed, mut feed_tod)| {
            let feed_tsys = tsys.index_axis(Axis(0), feed);
            let pixels = projector.angles_to_pixels(
                geometry,
                pointing.dec_deg.row(feed),
                pointing.ra_deg.row(feed),
            );
            let mut rng = match source {
                SignalSource::WhiteNoise { seed, .. } => {
                    Some(StdRng::seed_from_u64(seed.wrapping_add(feed as u64)))
                }
                SignalSource::Cube(_) => None,
            };

            let mut stats = InjectionStats::default();
            for ((sideband, chan, t), value) in feed_tod.indexed_iter_mut() {
                let sample_tsys = f64::from(feed_tsys[(sideband, chan, t)]);
                if !tsys_is_valid(sample_tsys) {
                    *value = 0.0;
                    stats.num_masked += 1;
                    continue;
                }
                if !injection_range.contains(&t) {
                    continue;
                }
                let signal = match (source, rng.as_mut()) {
                    (SignalSource::Cube(cube), _) => match pixels[t] {
                        Some(pixel) => f64::from(cube.data[(sideband, chan, pixel)]),
                        None => {
                            stats.num_off_grid += 1;
                            continue;
                        }
                    },
                    (SignalSource::WhiteNoise { .. }, Some(rng)) => {
                        let z: f64 = StandardNormal.sample(rng);
                        z * sample_tsys.abs() * noise_scale
                    }
                    (SignalSource::WhiteNoise { .. }, None) => continue,
                };
                *value = (f64::from(*value) * (1.0 + signal / sample_tsys)) as f32;
                stats.num_injected += 1;
            }
            stats
        })
        .reduce(InjectionStats::default, |a, b| a + b);

    debug!("injection: {}", stats);
    trace!("end inject_signal");
    Ok(InjectedTod {
        tod: injected,
        stats,
    })
}

//! System temperature calibration.
//!
//! The injection only needs a per-sample system temperature and the range of
//! samples between calibration manoeuvres, so calibration is modelled as a
//! [`CalibrationProvider`]. [`VaneTsysSolver`] is the provider used by the
//! pipeline; it derives Tsys from the two ambient-load vane events which
//! bracket every observation.

use std::ops::Range;

use itertools::Itertools;
use log::{debug, trace};
use ndarray::{Array1, Array3, Array4, ArrayView1, ArrayView4, Axis, Zip};
use thiserror::Error;

use crate::constants::{
    CELSIUS_TO_KELVIN, COLD_WINDOW_SAMPLES, T_CMB_KELVIN, VANE_FEATURE_BIT, VANE_HOT_ANGLE_DEG,
    VANE_HOT_TOLERANCE_DEG,
};

#[derive(Error, Debug)]
/// Errors that can occur when calibrating an observation.
pub enum CalibrationError {
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

    #[error("expected at least 2 vane calibration events, found {found}")]
    /// The observation is not bracketed by two vane calibrations.
    TooFewVaneEvents {
        /// How many events were found
        found: usize,
    },

    #[error("vane event {event} does not overlap any TOD samples")]
    /// A vane event happened entirely outside the TOD time range.
    EmptyVaneEvent {
        /// Index of the vane event
        event: usize,
    },

    #[error("vane event {event} never covered the feeds")]
    /// The vane never reached its covering position during an event.
    NoHotLoadSamples {
        /// Index of the vane event
        event: usize,
    },

    #[error("vane event {event} has no sky samples next to it")]
    /// There is no room next to a vane event for a cold-sky measurement.
    NoColdSamples {
        /// Index of the vane event
        event: usize,
    },

    #[error("calibration interval {tod_start}..{tod_end} is not within 0..{num_samples}")]
    /// The calibration interval is empty or out of range.
    InvalidInterval {
        /// First sample after the first calibration
        tod_start: usize,
        /// First sample of the second calibration
        tod_end: usize,
        /// Number of TOD samples
        num_samples: usize,
    },
}

/// The range of TOD samples between two calibration manoeuvres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationInterval {
    /// First sample after the first calibration
    pub tod_start: usize,
    /// First sample of the second calibration
    pub tod_end: usize,
}

impl CalibrationInterval {
    /// Create a calibration interval, checking `0 <= tod_start < tod_end <= num_samples`.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::InvalidInterval`] if the bounds are out of order or range.
    pub fn new(
        tod_start: usize,
        tod_end: usize,
        num_samples: usize,
    ) -> Result<Self, CalibrationError> {
        if tod_start >= tod_end || tod_end > num_samples {
            return Err(CalibrationError::InvalidInterval {
                tod_start,
                tod_end,
                num_samples,
            });
        }
        Ok(Self { tod_start, tod_end })
    }

    /// The samples which receive injected signal. One sample is trimmed from
    /// each end, since these can still be in transition from the vane.
    pub fn injection_range(&self) -> Range<usize> {
        let start = self.tod_start + 1;
        let end = self.tod_end.saturating_sub(1).max(start);
        start..end
    }
}

/// What a [`CalibrationProvider`] produces for an observation.
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    /// System temperature (Kelvin) with dimensions `[feed][sideband][channel][time]`
    pub tsys: Array4<f32>,
    /// The samples between the calibration manoeuvres
    pub interval: CalibrationInterval,
}

/// Housekeeping and timing needed to calibrate an observation.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    /// Vane angle in degrees, one per housekeeping sample
    pub vane_angles_deg: Array1<f64>,
    /// MJD of each housekeeping sample
    pub vane_times_mjd: Array1<f64>,
    /// Array feature word of each housekeeping sample
    pub array_features: Array1<u32>,
    /// Hot load temperature in hundredths of a degree Celsius
    pub hot_load_temp: Array1<f64>,
    /// MJD of each TOD sample
    pub tod_times_mjd: Array1<f64>,
}

/// Turns raw telemetry and TOD into system temperatures.
pub trait CalibrationProvider: Sync + Send {
    /// Calibrate an observation with `tod` of dimensions
    /// `[feed][sideband][channel][time]`.
    ///
    /// # Errors
    ///
    /// Any [`CalibrationError`] when no usable calibration can be derived.
    fn solve(
        &self,
        telemetry: &Telemetry,
        tod: ArrayView4<f32>,
    ) -> Result<CalibrationResult, CalibrationError>;
}

/// A Y-factor calibration against the ambient-load vane.
///
/// Each vane event gives a gain from the ratio of the power seen with the vane
/// covering the feeds to the power on the sky just outside the event. Gains are
/// interpolated linearly in time between the first two events, and the system
/// temperature of each sample is its power divided by the gain.
#[derive(Debug, Clone)]
pub struct VaneTsysSolver {
    /// Vane angle (degrees) of the covering position
    pub hot_angle_deg: f64,
    /// Tolerance (degrees) around the covering position
    pub hot_tolerance_deg: f64,
    /// Number of sky samples used as the cold load next to each event
    pub cold_window: usize,
    /// Bit of the array feature word set during vane events
    pub feature_bit: u32,
}

impl Default for VaneTsysSolver {
    fn default() -> Self {
        Self {
            hot_angle_deg: VANE_HOT_ANGLE_DEG,
            hot_tolerance_deg: VANE_HOT_TOLERANCE_DEG,
            cold_window: COLD_WINDOW_SAMPLES,
            feature_bit: VANE_FEATURE_BIT,
        }
    }
}

/// The gain measured by a single vane event.
struct VaneCalibration {
    tod_range: Range<usize>,
    time_mjd: f64,
    gain: Array3<f64>,
}

impl VaneTsysSolver {
    fn is_covering(&self, angle_deg: f64) -> bool {
        (angle_deg - self.hot_angle_deg).abs() <= self.hot_tolerance_deg
    }

    /// Contiguous ranges of housekeeping samples with the vane feature bit set.
    pub fn vane_events(&self, features: ArrayView1<u32>) -> Vec<Range<usize>> {
        let mask = 1_u32 << self.feature_bit;
        features
            .iter()
            .enumerate()
            .filter_map(|(idx, &word)| if word & mask != 0 { Some(idx) } else { None })
            .fold(Vec::<Range<usize>>::new(), |mut acc, idx| {
                match acc.last_mut() {
                    Some(last) if last.end == idx => last.end = idx + 1,
                    _ => acc.push(idx..idx + 1),
                }
                acc
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn calibrate_event(
        &self,
        event_idx: usize,
        hk_range: &Range<usize>,
        telemetry: &Telemetry,
        vane_times: &[f64],
        tod_times: &[f64],
        tod: &ArrayView4<f32>,
    ) -> Result<VaneCalibration, CalibrationError> {
        let num_samples = tod_times.len();
        let (t_first, t_last) = (vane_times[hk_range.start], vane_times[hk_range.end - 1]);
        let tod_range =
            tod_times.partition_point(|&t| t < t_first)..tod_times.partition_point(|&t| t <= t_last);
        if tod_range.is_empty() {
            return Err(CalibrationError::EmptyVaneEvent { event: event_idx });
        }

        let hot_idxs = tod_range
            .clone()
            .filter(|&idx| {
                let hk_idx = nearest_index(vane_times, tod_times[idx]);
                self.is_covering(telemetry.vane_angles_deg[hk_idx])
            })
            .collect::<Vec<_>>();
        if hot_idxs.is_empty() {
            return Err(CalibrationError::NoHotLoadSamples { event: event_idx });
        }

        let cold_idxs = if event_idx == 0 {
            tod_range.end..(tod_range.end + self.cold_window).min(num_samples)
        } else {
            tod_range.start.saturating_sub(self.cold_window)..tod_range.start
        }
        .collect::<Vec<_>>();
        if cold_idxs.is_empty() {
            return Err(CalibrationError::NoColdSamples { event: event_idx });
        }

        let covering_temps = hk_range
            .clone()
            .filter(|&k| self.is_covering(telemetry.vane_angles_deg[k]))
            .map(|k| telemetry.hot_load_temp[k])
            .collect::<Vec<_>>();
        let hot_temps = if covering_temps.is_empty() {
            hk_range.clone().map(|k| telemetry.hot_load_temp[k]).collect()
        } else {
            covering_temps
        };
        let t_hot = hot_temps.iter().sum::<f64>() / hot_temps.len() as f64 / 100.0
            + CELSIUS_TO_KELVIN;

        let p_hot = tod
            .select(Axis(3), &hot_idxs)
            .mapv(f64::from)
            .mean_axis(Axis(3))
            .ok_or(CalibrationError::NoHotLoadSamples { event: event_idx })?;
        let p_cold = tod
            .select(Axis(3), &cold_idxs)
            .mapv(f64::from)
            .mean_axis(Axis(3))
            .ok_or(CalibrationError::NoColdSamples { event: event_idx })?;

        let gain = Zip::from(&p_hot).and(&p_cold).map_collect(|&hot, &cold| {
            let y_factor = hot / cold;
            let tsys = (t_hot - y_factor * T_CMB_KELVIN) / (y_factor - 1.0);
            let gain = cold / tsys;
            if gain.is_finite() && gain > 0.0 {
                gain
            } else {
                f64::NAN
            }
        });

        let time_mjd = (tod_times[tod_range.start] + tod_times[tod_range.end - 1]) / 2.0;
        debug!(
            "vane event {} covers samples {:?}, hot load {:.2} K, {} hot / {} cold samples",
            event_idx,
            tod_range,
            t_hot,
            hot_idxs.len(),
            cold_idxs.len()
        );
        Ok(VaneCalibration {
            tod_range,
            time_mjd,
            gain,
        })
    }
}

/// Index of the value in sorted `times` closest to `t`.
fn nearest_index(times: &[f64], t: f64) -> usize {
    let upper = times.partition_point(|&v| v < t);
    if upper == 0 {
        0
    } else if upper >= times.len() {
        times.len() - 1
    } else if (times[upper] - t).abs() < (t - times[upper - 1]).abs() {
        upper
    } else {
        upper - 1
    }
}

fn check_len(
    argument: &str,
    len: usize,
    expected: usize,
    expected_name: &str,
) -> Result<(), CalibrationError> {
    if len != expected {
        return Err(CalibrationError::BadArrayShape {
            argument: argument.into(),
            function: "VaneTsysSolver::solve".into(),
            expected: format!("{expected_name}={expected}"),
            received: format!("{len}"),
        });
    }
    Ok(())
}

impl CalibrationProvider for VaneTsysSolver {
    fn solve(
        &self,
        telemetry: &Telemetry,
        tod: ArrayView4<f32>,
    ) -> Result<CalibrationResult, CalibrationError> {
        trace!("start VaneTsysSolver::solve");
        let num_samples = tod.dim().3;
        let num_hk = telemetry.vane_times_mjd.len();
        check_len(
            "telemetry.vane_angles_deg",
            telemetry.vane_angles_deg.len(),
            num_hk,
            "num_hk",
        )?;
        check_len(
            "telemetry.array_features",
            telemetry.array_features.len(),
            num_hk,
            "num_hk",
        )?;
        check_len(
            "telemetry.hot_load_temp",
            telemetry.hot_load_temp.len(),
            num_hk,
            "num_hk",
        )?;
        check_len(
            "telemetry.tod_times_mjd",
            telemetry.tod_times_mjd.len(),
            num_samples,
            "num_samples",
        )?;

        let vane_times = telemetry.vane_times_mjd.to_vec();
        let tod_times = telemetry.tod_times_mjd.to_vec();

        let events = self.vane_events(telemetry.array_features.view());
        if events.len() < 2 {
            return Err(CalibrationError::TooFewVaneEvents {
                found: events.len(),
            });
        }

        let (first, second) = events
            .iter()
            .take(2)
            .enumerate()
            .map(|(event_idx, hk_range)| {
                self.calibrate_event(
                    event_idx,
                    hk_range,
                    telemetry,
                    &vane_times,
                    &tod_times,
                    &tod,
                )
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect_tuple()
            .ok_or(CalibrationError::TooFewVaneEvents {
                found: events.len(),
            })?;

        let interval = CalibrationInterval::new(
            first.tod_range.end,
            second.tod_range.start,
            num_samples,
        )?;

        // fraction of the way from the first event to the second
        let span = second.time_mjd - first.time_mjd;
        let weights = tod_times
            .iter()
            .map(|&t| {
                if span > 0.0 {
                    ((t - first.time_mjd) / span).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect::<Vec<_>>();

        let mut tsys = Array4::<f32>::zeros(tod.raw_dim());
        Zip::indexed(&mut tsys)
            .and(&tod)
            .par_for_each(|(feed, sideband, chan, t), tsys, &power| {
                let w = weights[t];
                let gain = (1.0 - w) * first.gain[(feed, sideband, chan)]
                    + w * second.gain[(feed, sideband, chan)];
                *tsys = if gain.is_finite() && gain > 0.0 {
                    (f64::from(power) / gain) as f32
                } else {
                    0.0
                };
            });

        trace!("end VaneTsysSolver::solve");
        Ok(CalibrationResult { tsys, interval })
    }
}

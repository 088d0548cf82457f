// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! Instrument layout, sky grid defaults and the calibration validity band.

/// Number of spectrometer sidebands.
pub const NUM_SIDEBANDS: usize = 4;

/// Number of raw frequency channels per sideband in a simulated cube.
pub const NUM_RAW_CHANS_PER_SIDEBAND: usize = 1024;

/// Number of raw frequency channels in a simulated cube (all sidebands).
pub const NUM_RAW_CHANS: usize = NUM_SIDEBANDS * NUM_RAW_CHANS_PER_SIDEBAND;

/// Number of raw cube channels averaged into a single instrument channel.
pub const CHAN_AVG_FACTOR: usize = 16;

/// Number of instrument channels per sideband after averaging.
pub const NUM_CHANS_PER_SIDEBAND: usize = NUM_RAW_CHANS_PER_SIDEBAND / CHAN_AVG_FACTOR;

/// Sidebands whose channels are recorded in descending frequency order by the
/// spectrometer. Cube channels in these sidebands are reversed on load.
pub const FLIPPED_SIDEBANDS: [usize; 2] = [0, 2];

/// Default number of sky pixels along each side of the field grid.
pub const DEFAULT_NSIDE: usize = 120;

/// Default angular size of a sky pixel in arcminutes.
pub const DEFAULT_DPIX_ARCMIN: f64 = 2.0;

/// System temperatures at or below this value (Kelvin) are invalid.
pub const TSYS_MIN_KELVIN: f64 = 0.0;

/// System temperatures at or above this value (Kelvin) are invalid.
pub const TSYS_MAX_KELVIN: f64 = 200.0;

/// Seconds in a day, for converting MJD differences.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Hertz in a gigahertz, for converting the spectrometer frequency axis.
pub const HZ_PER_GHZ: f64 = 1e9;

/// Cosmic microwave background temperature in Kelvin, the cold-sky load.
pub const T_CMB_KELVIN: f64 = 2.725;

/// Offset between Celsius and Kelvin.
pub const CELSIUS_TO_KELVIN: f64 = 273.15;

/// Bit in the array feature word which is set while a vane calibration runs.
pub const VANE_FEATURE_BIT: u32 = 13;

/// Vane angle (degrees) at which the hot load fully covers the feed array.
pub const VANE_HOT_ANGLE_DEG: f64 = 0.0;

/// Tolerance (degrees) around [`VANE_HOT_ANGLE_DEG`] still considered covering.
pub const VANE_HOT_TOLERANCE_DEG: f64 = 0.5;

/// Number of TOD samples just outside a vane event used as the cold-sky load.
pub const COLD_WINDOW_SAMPLES: usize = 50;

/// MJD after which the vane carries its own thermometer (`Tvane`). Earlier
/// observations use the ambient load temperature.
pub const TVANE_AVAILABLE_MJD: f64 = 58712.03706;

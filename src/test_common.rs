//! Synthetic level1 files and cubes for tests.
//!
//! Only depends on external crates so that integration tests and benches can
//! include it with `#[path]`.
#![allow(dead_code)]

use std::ops::Range;
use std::path::Path;

use hdf5::File;
use ndarray::{Array1, Array2, Array3, Array4};
use ndarray_npy::{write_npy, WriteNpyError};

/// Vane events, in samples
pub const VANE_EVENTS: [Range<usize>; 2] = [10..30, 170..190];
/// Samples where the vane covers the feeds
pub const VANE_COVERING: [Range<usize>; 2] = [15..25, 175..185];
/// Sky power
pub const SKY_POWER: f32 = 10.0;
/// Power while the vane covers the feeds
pub const HOT_POWER: f32 = 40.0;
/// Hot load temperature in Kelvin
pub const HOT_LOAD_KELVIN: f64 = 300.0;
/// Field centre `(ra, dec)` in degrees
pub const FIELD_CENTRE: (f64, f64) = (170.0, 52.5);

/// Tsys that [`SyntheticLevel1::default`] calibrates to outside the vane,
/// `(T_hot - Y T_cmb) / (Y - 1)` with `Y = 4`.
pub fn expected_sky_tsys() -> f64 {
    (HOT_LOAD_KELVIN - 4.0 * 2.725) / 3.0
}

fn in_any(ranges: &[Range<usize>], idx: usize) -> bool {
    ranges.iter().any(|r| r.contains(&idx))
}

/// The contents of a synthetic level1 file.
#[derive(Debug, Clone)]
pub struct SyntheticLevel1 {
    pub tod: Array4<f32>,
    pub ra: Array2<f64>,
    pub dec: Array2<f64>,
    pub mjd: Array1<f64>,
    pub frequency_ghz: Array2<f64>,
    pub feeds: Array1<i32>,
    /// hundredths of a degree
    pub vane_angle: Array1<f64>,
    pub vane_utc: Array1<f64>,
    pub features: Array1<u32>,
    /// hundredths of a degree Celsius
    pub hot_load_temp: Array1<f64>,
    pub dt_seconds: f64,
    pub dnu_ghz: f64,
}

impl SyntheticLevel1 {
    /// Two vane events bracketing `num_samples` samples of two feeds staring
    /// at the field centre. Housekeeping is sampled with the TOD.
    pub fn new(num_feeds: usize, num_chans: usize, num_samples: usize) -> Self {
        let dt_seconds = 0.02;
        let dnu_ghz = 2.0 / num_chans as f64;
        let mjd = Array1::from_shape_fn(num_samples, |i| {
            59000.0 + i as f64 * dt_seconds / 86400.0
        });
        let tod = Array4::from_shape_fn((num_feeds, 4, num_chans, num_samples), |(_, _, _, t)| {
            if in_any(&VANE_COVERING, t) {
                HOT_POWER
            } else {
                SKY_POWER
            }
        });
        Self {
            tod,
            ra: Array2::from_elem((num_feeds, num_samples), FIELD_CENTRE.0),
            dec: Array2::from_elem((num_feeds, num_samples), FIELD_CENTRE.1),
            frequency_ghz: Array2::from_shape_fn((4, num_chans), |(sb, ch)| {
                26.0 + 2.0 * sb as f64 + dnu_ghz * ch as f64
            }),
            feeds: Array1::from_shape_fn(num_feeds, |f| f as i32 + 1),
            vane_angle: Array1::from_shape_fn(num_samples, |i| {
                if in_any(&VANE_COVERING, i) {
                    0.0
                } else {
                    9000.0
                }
            }),
            vane_utc: mjd.clone(),
            features: Array1::from_shape_fn(num_samples, |i| {
                if in_any(&VANE_EVENTS, i) {
                    1 << 13
                } else {
                    0
                }
            }),
            hot_load_temp: Array1::from_elem(num_samples, (HOT_LOAD_KELVIN - 273.15) * 100.0),
            mjd,
            dt_seconds,
            dnu_ghz,
        }
    }
}

impl Default for SyntheticLevel1 {
    fn default() -> Self {
        Self::new(2, 64, 200)
    }
}

/// Write a synthetic level1 HDF5 file.
pub fn write_synthetic_level1(path: &Path, obs: &SyntheticLevel1) -> hdf5::Result<()> {
    let file = File::create(path)?;
    for group in [
        "hk",
        "hk/antenna0",
        "hk/antenna0/vane",
        "hk/antenna0/env",
        "hk/array",
        "hk/array/frame",
        "spectrometer",
        "spectrometer/pixel_pointing",
    ] {
        file.create_group(group)?;
    }
    file.new_dataset_builder()
        .with_data(&obs.vane_angle)
        .create("hk/antenna0/vane/angle")?;
    file.new_dataset_builder()
        .with_data(&obs.vane_utc)
        .create("hk/antenna0/vane/utc")?;
    file.new_dataset_builder()
        .with_data(&obs.hot_load_temp)
        .create("hk/antenna0/vane/Tvane")?;
    file.new_dataset_builder()
        .with_data(&obs.hot_load_temp)
        .create("hk/antenna0/env/ambientLoadTemp")?;
    file.new_dataset_builder()
        .with_data(&obs.features)
        .create("hk/array/frame/features")?;
    file.new_dataset_builder()
        .with_data(&obs.mjd)
        .create("spectrometer/MJD")?;
    file.new_dataset_builder()
        .with_data(&obs.frequency_ghz)
        .create("spectrometer/frequency")?;
    file.new_dataset_builder()
        .with_data(&obs.feeds)
        .create("spectrometer/feeds")?;
    file.new_dataset_builder()
        .with_data(&obs.tod)
        .create("spectrometer/tod")?;
    file.new_dataset_builder()
        .with_data(&obs.ra)
        .create("spectrometer/pixel_pointing/pixel_ra")?;
    file.new_dataset_builder()
        .with_data(&obs.dec)
        .create("spectrometer/pixel_pointing/pixel_dec")?;
    Ok(())
}

/// Write a raw `[num_x][num_y][4096]` cube with every value set to `value`.
pub fn write_uniform_cube(
    path: &Path,
    num_x: usize,
    num_y: usize,
    value: f32,
) -> Result<(), WriteNpyError> {
    write_npy(path, &Array3::from_elem((num_x, num_y, 4096), value))
}

//! Loading simulated brightness cubes.
//!
//! A raw cube is stored as a `.npy` array with dimensions `[x][y][frequency]`,
//! where the 4096 frequencies span all four sidebands at full resolution. The
//! spectrometer records 64 channels per sideband, so each run of 16 raw
//! channels is averaged into one instrument channel.

use std::path::Path;

use log::{debug, trace};
use ndarray::{s, Array3, ArrayD, Axis};
use ndarray_npy::{read_npy, ReadNpyError};

use crate::{
    constants::{
        CHAN_AVG_FACTOR, FLIPPED_SIDEBANDS, NUM_CHANS_PER_SIDEBAND, NUM_RAW_CHANS, NUM_SIDEBANDS,
    },
    io::error::IOError,
    Sim2TodError,
};

/// A simulated cube laid out the way the instrument records frequencies.
#[derive(Debug, Clone)]
pub struct SkyCube {
    /// Brightness with dimensions `[sideband][channel][pixel]`, where pixel is
    /// the flattened `[x][y]` sky index.
    pub data: Array3<f32>,
    /// Number of pixels along the first sky axis.
    pub num_x: usize,
    /// Number of pixels along the second sky axis.
    pub num_y: usize,
}

impl SkyCube {
    /// Read a raw `[x][y][4096]` cube from a `.npy` file, then normalise and
    /// rearrange it. See [`SkyCube::from_raw`].
    ///
    /// # Errors
    ///
    /// - [`IOError::NpyRead`] if the file can't be read as a float array.
    /// - Anything [`SkyCube::from_raw`] can return.
    pub fn load<P: AsRef<Path>>(path: P, normalization: f64) -> Result<Self, Sim2TodError> {
        let path = path.as_ref();
        trace!("start SkyCube::load {:?}", path);
        let raw = read_float_npy(path)?;
        let cube = Self::from_raw(raw, normalization)?;
        debug!(
            "loaded {}x{} pixel cube from {:?}",
            cube.num_x, cube.num_y, path
        );
        trace!("end SkyCube::load");
        Ok(cube)
    }

    /// Build a cube from a raw `[x][y][4096]` array.
    ///
    /// The raw channels are split into 4 sidebands of 64 channels, each the mean
    /// of 16 raw channels, divided by `normalization`, and reordered to
    /// `[sideband][channel][pixel]`. Sidebands listed in [`FLIPPED_SIDEBANDS`]
    /// have their channel order reversed.
    ///
    /// # Errors
    ///
    /// - [`Sim2TodError::InvalidConfiguration`] if `normalization` is zero.
    /// - [`Sim2TodError::BadArrayShape`] if `raw` is not `[x][y][4096]`.
    /// - [`Sim2TodError::NonFiniteCube`] if any value is NaN or infinite.
    pub fn from_raw(raw: ArrayD<f64>, normalization: f64) -> Result<Self, Sim2TodError> {
        if normalization == 0.0 || !normalization.is_finite() {
            return Err(Sim2TodError::InvalidConfiguration {
                option: "normalization".into(),
                expected: "a finite, non-zero number".into(),
                received: format!("{normalization}"),
            });
        }
        let shape = raw.shape().to_vec();
        if shape.len() != 3 || shape[2] != NUM_RAW_CHANS {
            return Err(Sim2TodError::BadArrayShape {
                argument: "raw".into(),
                function: "SkyCube::from_raw".into(),
                expected: format!("[x, y, {NUM_RAW_CHANS}]"),
                received: format!("{shape:?}"),
            });
        }
        let (num_x, num_y) = (shape[0], shape[1]);
        let num_pixels = num_x * num_y;

        let raw = if raw.is_standard_layout() {
            raw
        } else {
            raw.as_standard_layout().into_owned()
        };
        let split = raw
            .into_shape_with_order((
                num_pixels,
                NUM_SIDEBANDS,
                NUM_CHANS_PER_SIDEBAND,
                CHAN_AVG_FACTOR,
            ))
            .map_err(|err| Sim2TodError::BadArrayShape {
                argument: "raw".into(),
                function: "SkyCube::from_raw".into(),
                expected: format!(
                    "[{num_pixels}, {NUM_SIDEBANDS}, {NUM_CHANS_PER_SIDEBAND}, {CHAN_AVG_FACTOR}]"
                ),
                received: format!("{shape:?} ({err})"),
            })?;

        // [pixel][sideband][channel]
        let averaged = split
            .mean_axis(Axis(3))
            .ok_or_else(|| Sim2TodError::BadArrayShape {
                argument: "raw".into(),
                function: "SkyCube::from_raw".into(),
                expected: "a non-empty channel axis".into(),
                received: format!("{shape:?}"),
            })?;

        let mut data = averaged
            .permuted_axes([1, 2, 0])
            .mapv(|v| (v / normalization) as f32)
            .as_standard_layout()
            .into_owned();

        for &sideband in FLIPPED_SIDEBANDS.iter() {
            let reversed = data.slice(s![sideband, ..;-1, ..]).to_owned();
            data.slice_mut(s![sideband, .., ..]).assign(&reversed);
        }

        let count = data.iter().filter(|v| !v.is_finite()).count();
        if count > 0 {
            return Err(Sim2TodError::NonFiniteCube { count });
        }

        Ok(Self { data, num_x, num_y })
    }

    /// Number of flattened sky pixels.
    pub fn num_pixels(&self) -> usize {
        self.data.dim().2
    }

    /// `(sidebands, channels, pixels)`
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }
}

/// Read a `.npy` array of either float width as `f64`.
fn read_float_npy(path: &Path) -> Result<ArrayD<f64>, IOError> {
    match read_npy::<_, ArrayD<f64>>(path) {
        Ok(array) => Ok(array),
        Err(ReadNpyError::WrongDescriptor(_)) => read_npy::<_, ArrayD<f32>>(path)
            .map(|array| array.mapv(f64::from))
            .map_err(|npy_error| IOError::NpyRead {
                npy_error,
                path: path.to_path_buf(),
            }),
        Err(npy_error) => Err(IOError::NpyRead {
            npy_error,
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, IxDyn, ShapeBuilder};
    use ndarray_npy::write_npy;
    use tempfile::tempdir;

    use super::*;

    /// A raw cube whose value encodes its own `(x, y, raw channel)` index.
    fn indexed_raw_cube(num_x: usize, num_y: usize) -> ArrayD<f64> {
        Array3::from_shape_fn((num_x, num_y, NUM_RAW_CHANS), |(x, y, c)| {
            (x * 100_000 + y * 10_000 + c) as f64
        })
        .into_dyn()
    }

    #[test]
    fn test_channel_average_is_mean_of_sub_channels() {
        let (num_x, num_y) = (3, 2);
        let raw = indexed_raw_cube(num_x, num_y);
        let cube = SkyCube::from_raw(raw.clone(), 1.0).unwrap();
        assert_eq!(cube.dim(), (4, 64, 6));

        for x in 0..num_x {
            for y in 0..num_y {
                let pixel = x * num_y + y;
                for sideband in [1, 3] {
                    for chan in 0..NUM_CHANS_PER_SIDEBAND {
                        let first = sideband * 1024 + chan * CHAN_AVG_FACTOR;
                        let expected = (first..first + CHAN_AVG_FACTOR)
                            .map(|c| raw[IxDyn(&[x, y, c])])
                            .sum::<f64>()
                            / CHAN_AVG_FACTOR as f64;
                        assert_abs_diff_eq!(
                            cube.data[(sideband, chan, pixel)] as f64,
                            expected,
                            epsilon = 1e-1
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_sideband_flip() {
        let raw = indexed_raw_cube(2, 2);
        let cube = SkyCube::from_raw(raw, 1.0).unwrap();

        // what the cube would look like without the flip
        let mean_of = |sideband: usize, chan: usize, pixel: usize| -> f32 {
            let (x, y) = (pixel / 2, pixel % 2);
            let first = sideband * 1024 + chan * CHAN_AVG_FACTOR;
            let sum: f64 = (first..first + CHAN_AVG_FACTOR)
                .map(|c| (x * 100_000 + y * 10_000 + c) as f64)
                .sum();
            (sum / CHAN_AVG_FACTOR as f64) as f32
        };

        for pixel in 0..4 {
            for chan in 0..NUM_CHANS_PER_SIDEBAND {
                for sideband in [0, 2] {
                    assert_abs_diff_eq!(
                        cube.data[(sideband, chan, pixel)],
                        mean_of(sideband, 63 - chan, pixel),
                        epsilon = 1e-1
                    );
                }
                for sideband in [1, 3] {
                    assert_abs_diff_eq!(
                        cube.data[(sideband, chan, pixel)],
                        mean_of(sideband, chan, pixel),
                        epsilon = 1e-1
                    );
                }
            }
        }
    }

    #[test]
    fn test_memory_layout_does_not_matter() {
        let raw = indexed_raw_cube(3, 2);
        let mut fortran = ArrayD::zeros(IxDyn(&[3, 2, NUM_RAW_CHANS]).f());
        fortran.assign(&raw);
        assert!(!fortran.is_standard_layout());

        let from_standard = SkyCube::from_raw(raw, 2.0).unwrap();
        let from_fortran = SkyCube::from_raw(fortran, 2.0).unwrap();
        assert_eq!(from_standard.data, from_fortran.data);
    }

    #[test]
    fn test_normalization_divides() {
        let raw = ArrayD::from_elem(IxDyn(&[1, 1, NUM_RAW_CHANS]), 8.0);
        let cube = SkyCube::from_raw(raw, 4.0).unwrap();
        assert!(cube.data.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_zero_normalization_rejected() {
        let raw = ArrayD::from_elem(IxDyn(&[1, 1, NUM_RAW_CHANS]), 1.0);
        assert!(matches!(
            SkyCube::from_raw(raw, 0.0),
            Err(Sim2TodError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_bad_shape_rejected() {
        let raw = ArrayD::from_elem(IxDyn(&[2, 2, 4000]), 1.0);
        assert!(matches!(
            SkyCube::from_raw(raw, 1.0),
            Err(Sim2TodError::BadArrayShape { .. })
        ));
        let raw = ArrayD::from_elem(IxDyn(&[4, NUM_RAW_CHANS]), 1.0);
        assert!(matches!(
            SkyCube::from_raw(raw, 1.0),
            Err(Sim2TodError::BadArrayShape { .. })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut raw = ArrayD::from_elem(IxDyn(&[1, 2, NUM_RAW_CHANS]), 1.0);
        raw[IxDyn(&[0, 1, 7])] = f64::NAN;
        assert!(matches!(
            SkyCube::from_raw(raw, 1.0),
            Err(Sim2TodError::NonFiniteCube { count: 1 })
        ));
    }

    #[test]
    fn test_load_f32_npy() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("cube.npy");
        let raw = Array3::<f32>::from_elem((2, 2, NUM_RAW_CHANS), 3.0);
        write_npy(&path, &raw).unwrap();

        let cube = SkyCube::load(&path, 3.0).unwrap();
        assert_eq!(cube.num_pixels(), 4);
        assert!(cube.data.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            SkyCube::load("/nonexistent/cube.npy", 1.0),
            Err(Sim2TodError::IOError(IOError::NpyRead { .. }))
        ));
    }
}

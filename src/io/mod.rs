//! Reading level1 observation files and writing their injected copies.
//!
//! Observations are HDF5 files. Only the TOD dataset of the output is ever
//! modified; everything else is a byte-for-byte duplicate of the input.

pub mod error;

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use hdf5::{File, H5Type};
use log::{debug, trace, warn};
use ndarray::{Array, Array1, Array2, Array4, ArrayView4, Dimension, Ix1, Ix2, Ix4};

use self::error::IOError;
use crate::{
    calibration::Telemetry,
    constants::{HZ_PER_GHZ, SECONDS_PER_DAY, TVANE_AVAILABLE_MJD},
    injection::{ObservationTiming, Pointing},
    Sim2TodError,
};

/// Vane angle in hundredths of a degree
pub const VANE_ANGLE_DATASET: &str = "/hk/antenna0/vane/angle";
/// MJD of each vane housekeeping sample
pub const VANE_TIME_DATASET: &str = "/hk/antenna0/vane/utc";
/// Vane thermometer, hundredths of a degree Celsius
pub const VANE_TEMP_DATASET: &str = "/hk/antenna0/vane/Tvane";
/// Ambient load thermometer, hundredths of a degree Celsius
pub const AMBIENT_TEMP_DATASET: &str = "/hk/antenna0/env/ambientLoadTemp";
/// Array feature word of each frame
pub const FEATURES_DATASET: &str = "/hk/array/frame/features";
/// MJD of each TOD sample
pub const MJD_DATASET: &str = "/spectrometer/MJD";
/// Channel frequencies in GHz, `[sideband][channel]`
pub const FREQUENCY_DATASET: &str = "/spectrometer/frequency";
/// Feed ids
pub const FEEDS_DATASET: &str = "/spectrometer/feeds";
/// The time ordered data, `[feed][sideband][channel][time]`
pub const TOD_DATASET: &str = "/spectrometer/tod";
/// Right ascension of each feed and sample in degrees
pub const RA_DATASET: &str = "/spectrometer/pixel_pointing/pixel_ra";
/// Declination of each feed and sample in degrees
pub const DEC_DATASET: &str = "/spectrometer/pixel_pointing/pixel_dec";

fn hdf5_error(path: &Path, dataset: &str, hdf5_error: hdf5::Error) -> IOError {
    IOError::Hdf5 {
        hdf5_error,
        path: path.to_path_buf(),
        dataset: dataset.into(),
        source_file: file!(),
        source_line: line!(),
    }
}

fn read_dataset<T: H5Type, D: Dimension>(
    file: &File,
    path: &Path,
    dataset: &str,
) -> Result<Array<T, D>, IOError> {
    file.dataset(dataset)
        .and_then(|ds| ds.read::<T, D>())
        .map_err(|err| hdf5_error(path, dataset, err))
}

/// Everything read from a level1 file that injection needs.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Where it was read from
    pub path: PathBuf,
    /// Feed ids
    pub feeds: Array1<i32>,
    /// `[feed][sideband][channel][time]`
    pub tod: Array4<f32>,
    /// `[feed][time]`, degrees
    pub ra_deg: Array2<f64>,
    /// `[feed][time]`, degrees
    pub dec_deg: Array2<f64>,
    /// `[sideband][channel]`, GHz
    pub frequency_ghz: Array2<f64>,
    /// Calibration inputs, including the MJD of each TOD sample
    pub telemetry: Telemetry,
}

impl Observation {
    /// Read an observation from a level1 file.
    ///
    /// The hot load temperature comes from the vane thermometer for
    /// observations after [`TVANE_AVAILABLE_MJD`], and the ambient load
    /// otherwise.
    ///
    /// # Errors
    ///
    /// [`IOError::Hdf5`] if the file can't be opened or a dataset is missing or
    /// has the wrong rank.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, IOError> {
        let path = path.as_ref();
        trace!("start Observation::read {:?}", path);
        let file = File::open(path).map_err(|err| hdf5_error(path, "/", err))?;

        let vane_angles_deg =
            read_dataset::<f64, Ix1>(&file, path, VANE_ANGLE_DATASET)?.mapv(|a| a / 100.0);
        let vane_times_mjd = read_dataset::<f64, Ix1>(&file, path, VANE_TIME_DATASET)?;
        let array_features = read_dataset::<u32, Ix1>(&file, path, FEATURES_DATASET)?;
        let tod_times_mjd = read_dataset::<f64, Ix1>(&file, path, MJD_DATASET)?;
        let frequency_ghz = read_dataset::<f64, Ix2>(&file, path, FREQUENCY_DATASET)?;
        let feeds = read_dataset::<i32, Ix1>(&file, path, FEEDS_DATASET)?;
        let tod = read_dataset::<f32, Ix4>(&file, path, TOD_DATASET)?;
        let ra_deg = read_dataset::<f64, Ix2>(&file, path, RA_DATASET)?;
        let dec_deg = read_dataset::<f64, Ix2>(&file, path, DEC_DATASET)?;

        let hot_load_dataset = match tod_times_mjd.first() {
            Some(&mjd) if mjd > TVANE_AVAILABLE_MJD => VANE_TEMP_DATASET,
            _ => AMBIENT_TEMP_DATASET,
        };
        debug!("{:?}: hot load temperature from {}", path, hot_load_dataset);
        let hot_load_temp = read_dataset::<f64, Ix1>(&file, path, hot_load_dataset)?;

        trace!("end Observation::read");
        Ok(Self {
            path: path.to_path_buf(),
            feeds,
            tod,
            ra_deg,
            dec_deg,
            frequency_ghz,
            telemetry: Telemetry {
                vane_angles_deg,
                vane_times_mjd,
                array_features,
                hot_load_temp,
                tod_times_mjd,
            },
        })
    }

    fn shape_error(&self, argument: &str, expected: String, received: String) -> Sim2TodError {
        Sim2TodError::BadArrayShape {
            argument: argument.into(),
            function: format!("Observation::validate ({})", self.path.display()),
            expected,
            received,
        }
    }

    /// Check that the TOD, pointing, feeds and timestamps agree in length.
    ///
    /// # Errors
    ///
    /// [`Sim2TodError::BadArrayShape`] naming the first disagreeing array.
    pub fn validate(&self) -> Result<(), Sim2TodError> {
        let (num_feeds, _, _, num_samples) = self.tod.dim();
        if self.feeds.len() != num_feeds {
            return Err(self.shape_error(
                "feeds",
                format!("num_feeds={num_feeds}"),
                format!("{}", self.feeds.len()),
            ));
        }
        for (argument, dim) in [("ra", self.ra_deg.dim()), ("dec", self.dec_deg.dim())] {
            if dim != (num_feeds, num_samples) {
                return Err(self.shape_error(
                    argument,
                    format!("({num_feeds}, {num_samples})"),
                    format!("{dim:?}"),
                ));
            }
        }
        if self.telemetry.tod_times_mjd.len() != num_samples {
            return Err(self.shape_error(
                "MJD",
                format!("num_samples={num_samples}"),
                format!("{}", self.telemetry.tod_times_mjd.len()),
            ));
        }
        Ok(())
    }

    /// Sample spacing and channel bandwidth, from the first two timestamps and
    /// the first two channels.
    ///
    /// # Errors
    ///
    /// [`Sim2TodError::BadArrayShape`] if there are fewer than two samples or
    /// channels.
    pub fn timing(&self) -> Result<ObservationTiming, Sim2TodError> {
        let mjd = &self.telemetry.tod_times_mjd;
        if mjd.len() < 2 {
            return Err(self.shape_error(
                "MJD",
                "at least 2 samples".into(),
                format!("{}", mjd.len()),
            ));
        }
        if self.frequency_ghz.nrows() < 1 || self.frequency_ghz.ncols() < 2 {
            return Err(self.shape_error(
                "frequency",
                "at least 1 sideband of 2 channels".into(),
                format!("{:?}", self.frequency_ghz.dim()),
            ));
        }
        let freq = &self.frequency_ghz;
        Ok(ObservationTiming {
            dt_seconds: (mjd[1] - mjd[0]).abs() * SECONDS_PER_DAY,
            dnu_hz: (freq[(0, 1)] - freq[(0, 0)]).abs() * HZ_PER_GHZ,
        })
    }

    /// Borrow the pointing.
    pub fn pointing(&self) -> Pointing {
        Pointing {
            ra_deg: self.ra_deg.view(),
            dec_deg: self.dec_deg.view(),
        }
    }
}

fn create_parent_dir(path: &Path) -> Result<(), IOError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

/// Copy an observation file byte for byte, creating the destination directory
/// if needed.
///
/// # Errors
///
/// [`IOError::Copy`] if the source is unreadable or the destination unwritable.
pub fn duplicate<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Result<(), IOError> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    trace!("start duplicate {:?} -> {:?}", src, dst);
    create_parent_dir(dst)?;
    fs::copy(src, dst).map_err(|io_error| IOError::Copy {
        io_error,
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source_file: file!(),
        source_line: line!(),
    })?;
    trace!("end duplicate");
    Ok(())
}

/// Replace the values of the TOD dataset in an existing file, in place.
///
/// # Errors
///
/// - [`IOError::TodShapeMismatch`] if the dataset is not the shape of `tod`.
/// - [`IOError::Hdf5`] if the file or dataset can't be opened or written.
pub fn overwrite_tod<P: AsRef<Path>>(dst: P, tod: ArrayView4<f32>) -> Result<(), IOError> {
    let dst = dst.as_ref();
    trace!("start overwrite_tod {:?}", dst);
    let file = File::open_rw(dst).map_err(|err| hdf5_error(dst, "/", err))?;
    let dataset = file
        .dataset(TOD_DATASET)
        .map_err(|err| hdf5_error(dst, TOD_DATASET, err))?;
    let found = dataset.shape();
    if found != tod.shape() {
        return Err(IOError::TodShapeMismatch {
            path: dst.to_path_buf(),
            expected: tod.shape().to_vec(),
            found,
        });
    }
    dataset
        .write(tod)
        .map_err(|err| hdf5_error(dst, TOD_DATASET, err))?;
    trace!("end overwrite_tod");
    Ok(())
}

/// An output file which only appears at its destination once complete.
///
/// The input is duplicated to a hidden staging file beside the destination.
/// [`StagedOutput::commit`] renames it into place; dropping it uncommitted
/// removes it.
#[derive(Debug)]
pub struct StagedOutput {
    staging: PathBuf,
    destination: PathBuf,
    committed: bool,
}

/// `dir/.name.partial` for `dir/name`
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(destination.file_name().unwrap_or_default());
    name.push(".partial");
    destination.with_file_name(name)
}

impl StagedOutput {
    /// Duplicate `src` into the staging file for `destination`.
    ///
    /// # Errors
    ///
    /// See [`duplicate`].
    pub fn duplicate<P: AsRef<Path>, Q: AsRef<Path>>(
        src: P,
        destination: Q,
    ) -> Result<Self, IOError> {
        let destination = destination.as_ref().to_path_buf();
        let staging = staging_path(&destination);
        if let Err(err) = duplicate(src, &staging) {
            // a failed copy can leave a truncated file behind
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        Ok(Self {
            staging,
            destination,
            committed: false,
        })
    }

    /// The staging file, for patching before commit.
    pub fn path(&self) -> &Path {
        &self.staging
    }

    /// Move the staging file onto the destination.
    ///
    /// # Errors
    ///
    /// [`IOError::StdIO`] if the rename fails, in which case the staging file
    /// is removed.
    pub fn commit(mut self) -> Result<PathBuf, IOError> {
        fs::rename(&self.staging, &self.destination)?;
        self.committed = true;
        debug!("wrote {:?}", self.destination);
        Ok(self.destination.clone())
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(err) = fs::remove_file(&self.staging) {
                warn!("couldn't remove staging file {:?}: {}", self.staging, err);
            }
        }
    }
}

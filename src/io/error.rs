//! Errors that can occur in the io module

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
/// All the errors that can occur in file io operations
pub enum IOError {
    /// Error when duplicating an observation file.
    #[error("{source_file}:{source_line}\nCouldn't copy {src:?} to {dst:?}: {io_error}")]
    Copy {
        /// The [`std::io::Error`]
        io_error: std::io::Error,
        /// The file being copied
        src: PathBuf,
        /// The destination of the copy
        dst: PathBuf,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A generic error associated with the hdf5 crate.
    #[error("{source_file}:{source_line}\n{path:?} dataset {dataset}: {hdf5_error}")]
    Hdf5 {
        /// The [`hdf5::Error`]
        hdf5_error: hdf5::Error,
        /// The observation file where the error occurred
        path: PathBuf,
        /// The dataset being accessed when the error occurred
        dataset: String,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// Error reading a `.npy` sky cube.
    #[error("Couldn't read sky cube {path:?}: {npy_error}")]
    NpyRead {
        /// The [`ndarray_npy::ReadNpyError`]
        npy_error: ndarray_npy::ReadNpyError,
        /// The cube path
        path: PathBuf,
    },

    /// The injected TOD does not fit the dataset it should replace.
    #[error("TOD dataset in {path:?} has shape {found:?}, injected data has shape {expected:?}")]
    TodShapeMismatch {
        /// The observation file
        path: PathBuf,
        /// Shape of the injected array
        expected: Vec<usize>,
        /// Shape of the dataset on disk
        found: Vec<usize>,
    },

    #[error("{0}")]
    /// Error derived from [`std::io::Error`]
    StdIO(#[from] std::io::Error),
}

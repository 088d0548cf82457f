//! Run configuration.
//!
//! A run is described by a YAML parameter file which names the simulated cube,
//! the input and output directories and the observations to process. The
//! observation list may be given inline, or through a legacy run list whose
//! first alphanumeric token is the patch name. The field centre is either given
//! directly or looked up in a patch definition file.
//!
//! ```yaml
//! datacube: /data/sims/cube_co7.npy
//! tod_in_dir: /data/level1
//! tod_out_dir: /data/level1_sim
//! runlist: /data/runlists/co7.txt
//! patch_definition_file: /data/patches.txt
//! ```

use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use derive_builder::Builder;
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{DEFAULT_DPIX_ARCMIN, DEFAULT_NSIDE};

#[derive(Error, Debug)]
/// Errors that can occur while resolving a run configuration.
pub enum ConfigError {
    #[error("Couldn't read {path:?}: {io_error}")]
    /// A configuration file could not be read.
    FileRead {
        /// The file which could not be read
        path: PathBuf,
        /// The [`std::io::Error`]
        io_error: std::io::Error,
    },

    #[error("Couldn't parse parameter file {path:?}: {yaml_error}")]
    /// The parameter file is not valid YAML, or has unexpected keys.
    ParamFileParse {
        /// The parameter file
        path: PathBuf,
        /// The [`serde_yaml::Error`]
        yaml_error: serde_yaml::Error,
    },

    #[error("Missing parameter: {0}")]
    /// A required parameter was not supplied.
    MissingParameter(String),

    #[error("Run list {0:?} contains no observation files")]
    /// The run list names no observations.
    RunlistEmpty(PathBuf),

    #[error("Patch {patch} not found in {path:?}")]
    /// The patch has no entry in the patch definition file.
    PatchNotFound {
        /// The patch name
        patch: String,
        /// The patch definition file
        path: PathBuf,
    },

    #[error("Invalid value for {option}: expected {expected}, received {received}")]
    /// A parameter is present but unusable.
    InvalidValue {
        /// The parameter name
        option: String,
        /// What was expected
        expected: String,
        /// What was received instead
        received: String,
    },
}

/// What gets multiplied into the TOD inside the calibration interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionMode {
    /// Brightness from the simulated sky cube at each sample's pixel.
    #[default]
    Cube,
    /// Radiometer white noise for null tests.
    WhiteNoise,
}

impl Display for InjectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cube => write!(f, "sky cube"),
            Self::WhiteNoise => write!(f, "white noise"),
        }
    }
}

/// The fixed local sky grid of a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldGeometry {
    /// Number of pixels along each side of the square grid.
    pub nside: usize,
    /// Angular size of a pixel in degrees.
    pub dpix_deg: f64,
    /// Right ascension of the field centre in degrees.
    pub centre_ra_deg: f64,
    /// Declination of the field centre in degrees.
    pub centre_dec_deg: f64,
}

impl FieldGeometry {
    /// A default-sized grid (120 x 120, 2 arcmin pixels) about the given centre.
    pub fn new(centre_ra_deg: f64, centre_dec_deg: f64) -> Self {
        Self {
            nside: DEFAULT_NSIDE,
            dpix_deg: DEFAULT_DPIX_ARCMIN / 60.0,
            centre_ra_deg,
            centre_dec_deg,
        }
    }

    /// Total number of pixels in the grid.
    pub fn num_pixels(&self) -> usize {
        self.nside * self.nside
    }
}

impl Default for FieldGeometry {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Display for FieldGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{n}x{n} pixels of {:.3} arcmin about RA {:.4}, Dec {:.4} (deg)",
            self.dpix_deg * 60.0,
            self.centre_ra_deg,
            self.centre_dec_deg,
            n = self.nside,
        )
    }
}

/// Where to read an observation from, and where to write its injected copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationPaths {
    /// The recorded observation
    pub input: PathBuf,
    /// The synthetic observation to write
    pub output: PathBuf,
}

impl ObservationPaths {
    /// A short name for logs and reports.
    pub fn name(&self) -> String {
        self.input
            .file_name()
            .map_or_else(|| self.input.display().to_string(), |name| {
                name.to_string_lossy().into_owned()
            })
    }
}

/// A fully resolved, immutable description of one run.
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct RunConfig {
    /// Path to the simulated `.npy` cube.
    #[builder(setter(into))]
    pub cube_path: PathBuf,
    /// The cube is divided by this value on load.
    #[builder(default = "1.0")]
    pub normalization: f64,
    /// Whether to inject the cube or white noise.
    #[builder(default)]
    pub mode: InjectionMode,
    /// Seed for white noise. Drawn at random when absent.
    #[builder(default)]
    pub seed: Option<u64>,
    /// The sky grid the cube is defined on.
    pub field: FieldGeometry,
    /// Observations to process, in order.
    pub observations: Vec<ObservationPaths>,
    /// Stop at the first failed observation instead of carrying on.
    #[builder(default = "false")]
    pub fail_fast: bool,
    /// How many observations to process at once.
    #[builder(default = "1")]
    pub num_jobs: usize,
    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl RunConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(norm) = self.normalization {
            if norm == 0.0 || !norm.is_finite() {
                return Err(format!(
                    "normalization must be finite and non-zero, received {norm}"
                ));
            }
        }
        if let Some(observations) = self.observations.as_ref() {
            if observations.is_empty() {
                return Err("at least one observation is required".into());
            }
        }
        if let Some(field) = self.field.as_ref() {
            if field.nside == 0 {
                return Err("nside must be positive".into());
            }
            if !(field.dpix_deg > 0.0) {
                return Err(format!("dpix must be positive, received {}", field.dpix_deg));
            }
        }
        if self.num_jobs == Some(0) {
            return Err("jobs must be positive".into());
        }
        Ok(())
    }
}

impl Display for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cube:                 {}", self.cube_path.display())?;
        writeln!(f, "Normalization:        {}", self.normalization)?;
        writeln!(f, "Injecting:            {}", self.mode)?;
        if let Some(seed) = self.seed {
            writeln!(f, "Seed:                 {seed}")?;
        }
        writeln!(f, "Field:                {}", self.field)?;
        writeln!(f, "Observations:         {}", self.observations.len())?;
        if let Some(first) = self.observations.first() {
            writeln!(f, "First observation:    {}", first.input.display())?;
        }
        writeln!(
            f,
            "{} stop at the first failure.",
            if self.fail_fast { "Will" } else { "Will not" }
        )?;
        writeln!(f, "Parallel jobs:        {}", self.num_jobs)?;
        Ok(())
    }
}

/// The on-disk parameter file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ParamFile {
    /// Simulated cube path
    pub datacube: Option<PathBuf>,
    /// Directory of the recorded observations
    pub tod_in_dir: Option<PathBuf>,
    /// Directory for the synthetic observations
    pub tod_out_dir: Option<PathBuf>,
    /// Legacy run list path
    pub runlist: Option<PathBuf>,
    /// Observation files relative to both directories
    pub observations: Option<Vec<String>>,
    /// Patch definition file path
    pub patch_definition_file: Option<PathBuf>,
    /// Patch name, overriding the one in the run list
    pub patch: Option<String>,
    /// Field centre `[ra, dec]` in degrees
    pub field_centre: Option<[f64; 2]>,
    /// Pixels along each side of the grid
    pub nside: Option<usize>,
    /// Pixel size in arcminutes
    pub dpix_arcmin: Option<f64>,
    /// Seed for white noise
    pub seed: Option<u64>,
}

/// What a legacy run list contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runlist {
    /// The patch (field) name
    pub patch: Option<String>,
    /// Observation file paths relative to the level1 directories
    pub files: Vec<String>,
}

lazy_static! {
    static ref RE_RUNLIST_FILE: Regex = Regex::new(r"/\S*?\.\w+").unwrap();
    static ref RE_RUNLIST_PATCH: Regex = Regex::new(r"\s([a-zA-Z0-9]+)\s").unwrap();
}

/// Extract the patch name and observation files from the text of a run list.
pub fn parse_runlist(text: &str) -> Runlist {
    let files = RE_RUNLIST_FILE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    // the leading field count has no whitespace before it, so it never matches
    let patch = RE_RUNLIST_PATCH
        .captures(text)
        .map(|caps| caps[1].to_string());
    Runlist { patch, files }
}

/// Find the `(ra, dec)` field centre of `patch` in the text of a patch
/// definition file.
pub fn parse_patch_centre(text: &str, patch: &str) -> Option<(f64, f64)> {
    let pattern = format!(r"(?m)^\s*{}\s+([0-9.+-]+)\s+([0-9.+-]+)", regex::escape(patch));
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    let ra = caps[1].parse().ok()?;
    let dec = caps[2].parse().ok()?;
    Some((ra, dec))
}

fn read_text(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|io_error| ConfigError::FileRead {
        path: path.to_path_buf(),
        io_error,
    })
}

fn join_relative(dir: &Path, file: &str) -> PathBuf {
    dir.join(file.trim_start_matches('/'))
}

impl ParamFile {
    /// Read and parse a YAML parameter file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileRead`] or [`ConfigError::ParamFileParse`]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        trace!("start ParamFile::from_path {:?}", path);
        let text = read_text(path)?;
        serde_yaml::from_str(&text).map_err(|yaml_error| ConfigError::ParamFileParse {
            path: path.to_path_buf(),
            yaml_error,
        })
    }

    /// Resolve the observation list and field geometry, reading the run list and
    /// patch definition file if needed, into a partially filled builder.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] for missing or malformed parameters.
    pub fn resolve(&self) -> Result<RunConfigBuilder, ConfigError> {
        let datacube = self
            .datacube
            .clone()
            .ok_or_else(|| ConfigError::MissingParameter("datacube".into()))?;
        let tod_in_dir = self
            .tod_in_dir
            .as_ref()
            .ok_or_else(|| ConfigError::MissingParameter("tod_in_dir".into()))?;
        let tod_out_dir = self
            .tod_out_dir
            .as_ref()
            .ok_or_else(|| ConfigError::MissingParameter("tod_out_dir".into()))?;

        let runlist = match (&self.observations, &self.runlist) {
            (Some(files), _) => Runlist {
                patch: None,
                files: files.clone(),
            },
            (None, Some(runlist_path)) => {
                let runlist = parse_runlist(&read_text(runlist_path)?);
                if runlist.files.is_empty() {
                    return Err(ConfigError::RunlistEmpty(runlist_path.clone()));
                }
                runlist
            }
            (None, None) => {
                return Err(ConfigError::MissingParameter(
                    "observations or runlist".into(),
                ))
            }
        };

        let (centre_ra_deg, centre_dec_deg) = match (self.field_centre, &self.patch_definition_file)
        {
            (Some([ra, dec]), _) => (ra, dec),
            (None, Some(patch_def_path)) => {
                let patch = self
                    .patch
                    .clone()
                    .or_else(|| runlist.patch.clone())
                    .ok_or_else(|| ConfigError::MissingParameter("patch".into()))?;
                parse_patch_centre(&read_text(patch_def_path)?, &patch).ok_or_else(|| {
                    ConfigError::PatchNotFound {
                        patch,
                        path: patch_def_path.clone(),
                    }
                })?
            }
            (None, None) => {
                return Err(ConfigError::MissingParameter(
                    "field_centre or patch_definition_file".into(),
                ))
            }
        };

        let mut field = FieldGeometry::new(centre_ra_deg, centre_dec_deg);
        if let Some(nside) = self.nside {
            field.nside = nside;
        }
        if let Some(dpix_arcmin) = self.dpix_arcmin {
            field.dpix_deg = dpix_arcmin / 60.0;
        }
        debug!("field geometry: {}", field);

        let observations = runlist
            .files
            .iter()
            .map(|file| ObservationPaths {
                input: join_relative(tod_in_dir, file),
                output: join_relative(tod_out_dir, file),
            })
            .collect::<Vec<_>>();

        let mut builder = RunConfigBuilder::default();
        builder
            .cube_path(datacube)
            .field(field)
            .observations(observations)
            .seed(self.seed);
        Ok(builder)
    }
}

impl From<RunConfigBuilderError> for ConfigError {
    fn from(err: RunConfigBuilderError) -> Self {
        match err {
            RunConfigBuilderError::UninitializedField(field) => {
                Self::MissingParameter(field.to_string())
            }
            RunConfigBuilderError::ValidationError(message) => Self::InvalidValue {
                option: "run configuration".into(),
                expected: "a valid run configuration".into(),
                received: message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::{tempdir, NamedTempFile};

    use super::*;

    const RUNLIST: &str = "1\nco7 1\n 6944 58681.74 58681.79 2 co7 ces 0 0\n\
        /2019-07/comap-0006944-2019-07-17-174905.hd5\n\
        /2019-07/comap-0006945-2019-07-17-183052.hd5\n";

    #[test]
    fn test_parse_runlist() {
        let runlist = parse_runlist(RUNLIST);
        assert_eq!(runlist.patch.as_deref(), Some("co7"));
        assert_eq!(
            runlist.files,
            vec![
                "/2019-07/comap-0006944-2019-07-17-174905.hd5".to_string(),
                "/2019-07/comap-0006945-2019-07-17-183052.hd5".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_runlist_patch_name() {
        let runlist = parse_runlist("1\nco2 2\n/a/obs1.hd5 /a/obs2.hd5\n");
        assert_eq!(runlist.patch.as_deref(), Some("co2"));
        assert_eq!(runlist.files.len(), 2);
    }

    #[test]
    fn test_parse_patch_centre() {
        let patches = "co2   25.435  0.000  1 2\nco7   170.0 52.5   1 2\n";
        assert_eq!(parse_patch_centre(patches, "co7"), Some((170.0, 52.5)));
        assert_eq!(parse_patch_centre(patches, "co6"), None);
    }

    #[test]
    fn test_builder_rejects_zero_normalization() {
        let result = RunConfigBuilder::default()
            .cube_path("cube.npy")
            .field(FieldGeometry::default())
            .observations(vec![ObservationPaths {
                input: "a.hd5".into(),
                output: "b.hd5".into(),
            }])
            .normalization(0.0)
            .build();
        assert!(matches!(
            result.map_err(ConfigError::from),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_builder_defaults() {
        let config = RunConfigBuilder::default()
            .cube_path("cube.npy")
            .field(FieldGeometry::default())
            .observations(vec![ObservationPaths {
                input: "a.hd5".into(),
                output: "b.hd5".into(),
            }])
            .build()
            .unwrap();
        assert_eq!(config.normalization, 1.0);
        assert_eq!(config.mode, InjectionMode::Cube);
        assert_eq!(config.num_jobs, 1);
        assert!(!config.fail_fast);
        assert_eq!(config.field.nside, 120);
    }

    #[test]
    fn test_resolve_with_runlist_and_patch_file() {
        let tmp_dir = tempdir().unwrap();
        let runlist_path = tmp_dir.path().join("runlist.txt");
        fs::write(&runlist_path, "1\nco7 1\n/2019-07/obs1.hd5\n").unwrap();
        let patch_path = tmp_dir.path().join("patches.txt");
        fs::write(&patch_path, "co7 170.0 52.5\n").unwrap();

        let mut param_file = NamedTempFile::new().unwrap();
        writeln!(
            param_file,
            "datacube: /sims/cube.npy\n\
             tod_in_dir: /level1\n\
             tod_out_dir: /level1_sim\n\
             runlist: {}\n\
             patch: co7\n\
             patch_definition_file: {}\n\
             nside: 64",
            runlist_path.display(),
            patch_path.display()
        )
        .unwrap();

        let params = ParamFile::from_path(param_file.path()).unwrap();
        let config = params.resolve().unwrap().build().unwrap();
        assert_eq!(config.cube_path, PathBuf::from("/sims/cube.npy"));
        assert_eq!(config.field.nside, 64);
        assert_eq!(config.field.centre_ra_deg, 170.0);
        assert_eq!(config.field.centre_dec_deg, 52.5);
        assert_eq!(
            config.observations,
            vec![ObservationPaths {
                input: PathBuf::from("/level1/2019-07/obs1.hd5"),
                output: PathBuf::from("/level1_sim/2019-07/obs1.hd5"),
            }]
        );
    }

    #[test]
    fn test_resolve_missing_centre() {
        let params = ParamFile {
            datacube: Some("cube.npy".into()),
            tod_in_dir: Some("/in".into()),
            tod_out_dir: Some("/out".into()),
            observations: Some(vec!["obs.hd5".into()]),
            ..ParamFile::default()
        };
        assert!(matches!(
            params.resolve(),
            Err(ConfigError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_param_file_unknown_key() {
        let mut param_file = NamedTempFile::new().unwrap();
        writeln!(param_file, "datacube: cube.npy\nDATACUBE: cube.npy").unwrap();
        assert!(matches!(
            ParamFile::from_path(param_file.path()),
            Err(ConfigError::ParamFileParse { .. })
        ));
    }
}

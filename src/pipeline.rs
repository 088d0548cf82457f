//! Running an injection over every observation of a run.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, trace, warn};
use rayon::prelude::*;

use crate::{
    calibration::{CalibrationInterval, CalibrationProvider, VaneTsysSolver},
    config::{InjectionMode, ObservationPaths, RunConfig},
    cube::SkyCube,
    injection::{inject_signal, InjectionStats, SignalSource},
    io::{overwrite_tod, Observation, StagedOutput},
    projection::{GnomonicProjector, PixelProjector},
    with_increment_duration, Sim2TodError,
};

#[derive(Debug, Default)]
struct CancelState {
    run: AtomicBool,
    observations: Mutex<HashSet<usize>>,
}

/// Flags shared between the pipeline and whoever wants to stop it, either
/// entirely or for a single observation.
///
/// A cancelled observation is abandoned at its next stage boundary, without
/// writing its output, and the run moves on to the next one. Cancelling the
/// run does the same to every observation in progress and skips the rest.
/// Observations already written are kept.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<CancelState>);

impl CancelToken {
    /// Ask the pipeline to stop.
    pub fn cancel(&self) {
        self.0.run.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.run.load(Ordering::SeqCst)
    }

    fn cancelled_observations(&self) -> std::sync::MutexGuard<'_, HashSet<usize>> {
        // the set stays consistent even if a holder panicked
        self.0
            .observations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask the pipeline to abandon the observation at `obs_idx` in the run's
    /// observation list.
    pub fn cancel_observation(&self, obs_idx: usize) {
        self.cancelled_observations().insert(obs_idx);
    }

    /// Whether the run, or the observation at `obs_idx`, has been cancelled.
    pub fn is_observation_cancelled(&self, obs_idx: usize) -> bool {
        self.is_cancelled() || self.cancelled_observations().contains(&obs_idx)
    }

    /// Forget a cancellation of the observation at `obs_idx` once it has been
    /// acted on.
    fn clear_observation(&self, obs_idx: usize) {
        self.cancelled_observations().remove(&obs_idx);
    }
}

/// What happened to a single observation.
#[derive(Debug, Clone)]
pub enum ObservationOutcome {
    /// The injected copy was written.
    Succeeded {
        /// Path of the injected copy
        output: PathBuf,
        /// Calibration interval used
        interval: CalibrationInterval,
        /// What the injection did
        stats: InjectionStats,
    },
    /// Processing failed; no output was written.
    Failed {
        /// Why
        error: String,
    },
    /// Cancelled part way through; no output was written.
    Cancelled,
    /// Never started because the run was cancelled.
    Skipped,
}

impl Display for ObservationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded {
                interval, stats, ..
            } => write!(
                f,
                "ok, samples {}..{}, {}",
                interval.tod_start, interval.tod_end, stats
            ),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// The outcome and timings of one observation.
#[derive(Debug, Clone)]
pub struct ObservationReport {
    /// Which observation
    pub paths: ObservationPaths,
    /// What happened
    pub outcome: ObservationOutcome,
    /// Time spent in each stage
    pub durations: HashMap<String, Duration>,
}

/// The outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// One report per observation, in run order
    pub observations: Vec<ObservationReport>,
    /// Time spent in each stage, summed over observations
    pub durations: HashMap<String, Duration>,
    /// The white noise seed, if white noise was injected
    pub seed: Option<u64>,
}

impl RunReport {
    /// Observations whose injected copy was written.
    pub fn num_succeeded(&self) -> usize {
        self.observations
            .iter()
            .filter(|r| matches!(r.outcome, ObservationOutcome::Succeeded { .. }))
            .count()
    }

    /// Observations which failed.
    pub fn num_failed(&self) -> usize {
        self.observations
            .iter()
            .filter(|r| matches!(r.outcome, ObservationOutcome::Failed { .. }))
            .count()
    }

    /// Observations cancelled or never started.
    pub fn num_skipped(&self) -> usize {
        self.observations.len() - self.num_succeeded() - self.num_failed()
    }

    /// Whether every observation succeeded.
    pub fn is_success(&self) -> bool {
        self.num_succeeded() == self.observations.len()
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.num_succeeded(),
            self.num_failed(),
            self.num_skipped()
        )
    }
}

/// Injects signal into every observation of a [`RunConfig`].
pub struct InjectionPipeline<'a> {
    config: &'a RunConfig,
    projector: Box<dyn PixelProjector>,
    calibration: Box<dyn CalibrationProvider>,
    cancel: CancelToken,
}

impl<'a> InjectionPipeline<'a> {
    /// A pipeline with the gnomonic projection and vane calibration.
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            projector: Box::new(GnomonicProjector),
            calibration: Box::new(VaneTsysSolver::default()),
            cancel: CancelToken::default(),
        }
    }

    /// Use a different pixel projection.
    pub fn with_projector(mut self, projector: Box<dyn PixelProjector>) -> Self {
        self.projector = projector;
        self
    }

    /// Use a different calibration.
    pub fn with_calibration(mut self, calibration: Box<dyn CalibrationProvider>) -> Self {
        self.calibration = calibration;
        self
    }

    /// Use an existing cancel token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle which cancels this pipeline.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn check_cancelled(&self, obs_idx: usize) -> Result<(), Sim2TodError> {
        if self.cancel.is_observation_cancelled(obs_idx) {
            return Err(Sim2TodError::Cancelled);
        }
        Ok(())
    }

    /// Process every observation.
    ///
    /// Up to `num_jobs` observations are processed at once. Work within an
    /// observation is spread over the global rayon pool.
    ///
    /// Failures of single observations are recorded in the report. With
    /// `fail_fast`, the first failure cancels the rest of the run.
    ///
    /// # Errors
    ///
    /// Only problems affecting the whole run, i.e. the cube can't be loaded.
    pub fn run(&self) -> Result<RunReport, Sim2TodError> {
        trace!("start InjectionPipeline::run");
        let config = self.config;
        let mut durations = HashMap::<String, Duration>::new();

        let cube = match config.mode {
            InjectionMode::Cube => Some(with_increment_duration!(
                durations,
                "init",
                SkyCube::load(&config.cube_path, config.normalization)?
            )),
            InjectionMode::WhiteNoise => None,
        };
        let seed = match config.mode {
            InjectionMode::WhiteNoise => {
                let seed = config.seed.unwrap_or_else(rand::random);
                info!("white noise seed: {}", seed);
                Some(seed)
            }
            InjectionMode::Cube => None,
        };

        let draw_target = if config.draw_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let progress = ProgressBar::with_draw_target(
            Some(config.observations.len() as u64),
            draw_target,
        )
        .with_style(
            ProgressStyle::with_template(
                "{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:4}/{len:4} ({eta:5})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        progress.set_message("observations");

        let num_jobs = config.num_jobs.max(1);
        let mut observations = Vec::with_capacity(config.observations.len());
        for (chunk_idx, chunk) in config.observations.chunks(num_jobs).enumerate() {
            let first_idx = chunk_idx * num_jobs;
            let reports = chunk
                .par_iter()
                .enumerate()
                .map(|(idx, paths)| {
                    let report =
                        self.run_observation(first_idx + idx, paths, cube.as_ref(), seed);
                    progress.inc(1);
                    report
                })
                .collect::<Vec<_>>();
            observations.extend(reports);
        }
        progress.finish();

        for report in observations.iter() {
            for (name, duration) in report.durations.iter() {
                *durations.entry(name.clone()).or_default() += *duration;
            }
        }
        let report = RunReport {
            observations,
            durations,
            seed,
        };
        info!("{}", report);
        trace!("end InjectionPipeline::run");
        Ok(report)
    }

    fn run_observation(
        &self,
        obs_idx: usize,
        paths: &ObservationPaths,
        cube: Option<&SkyCube>,
        seed: Option<u64>,
    ) -> ObservationReport {
        let mut durations = HashMap::new();
        let outcome = if self.cancel.is_cancelled() {
            ObservationOutcome::Skipped
        } else {
            // observations get disjoint runs of feed seeds
            let obs_seed = seed.map(|seed| seed.wrapping_add((obs_idx as u64) << 32));
            match self.process_observation(obs_idx, paths, cube, obs_seed, &mut durations) {
                Ok(outcome) => outcome,
                Err(Sim2TodError::Cancelled) => {
                    warn!("{}: cancelled", paths.name());
                    self.cancel.clear_observation(obs_idx);
                    ObservationOutcome::Cancelled
                }
                Err(err) => {
                    warn!("{}: {}", paths.name(), err);
                    if self.config.fail_fast {
                        self.cancel.cancel();
                    }
                    ObservationOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            }
        };
        ObservationReport {
            paths: paths.clone(),
            outcome,
            durations,
        }
    }

    /// Inject signal into a single observation and write its copy.
    ///
    /// `cube` is injected when given, otherwise white noise seeded with `seed`.
    /// `obs_idx` is the observation's position in the run, for cancellation.
    ///
    /// # Errors
    ///
    /// Anything that can go wrong reading, calibrating, injecting or writing,
    /// or [`Sim2TodError::Cancelled`]. The output is not written on error.
    pub fn process_observation(
        &self,
        obs_idx: usize,
        paths: &ObservationPaths,
        cube: Option<&SkyCube>,
        seed: Option<u64>,
        durations: &mut HashMap<String, Duration>,
    ) -> Result<ObservationOutcome, Sim2TodError> {
        trace!("start process_observation {}", paths.name());
        self.check_cancelled(obs_idx)?;
        let staged = with_increment_duration!(
            durations,
            "copy",
            StagedOutput::duplicate(&paths.input, &paths.output)?
        );

        self.check_cancelled(obs_idx)?;
        let obs = with_increment_duration!(durations, "read", Observation::read(&paths.input)?);
        obs.validate()?;

        self.check_cancelled(obs_idx)?;
        let calibration = with_increment_duration!(
            durations,
            "calibrate",
            self.calibration.solve(&obs.telemetry, obs.tod.view())?
        );
        debug!(
            "{}: calibration interval {:?}",
            paths.name(),
            calibration.interval
        );

        let source = match cube {
            Some(cube) => SignalSource::Cube(cube),
            None => SignalSource::WhiteNoise {
                timing: obs.timing()?,
                seed: seed.unwrap_or_default(),
            },
        };

        self.check_cancelled(obs_idx)?;
        let injected = with_increment_duration!(
            durations,
            "inject",
            inject_signal(
                obs.tod.view(),
                calibration.tsys.view(),
                &calibration.interval,
                &obs.pointing(),
                &self.config.field,
                self.projector.as_ref(),
                &source,
            )?
        );

        self.check_cancelled(obs_idx)?;
        let output = with_increment_duration!(durations, "write", {
            overwrite_tod(staged.path(), injected.tod.view())?;
            staged.commit()?
        });
        trace!("end process_observation");
        Ok(ObservationOutcome::Succeeded {
            output,
            interval: calibration.interval,
            stats: injected.stats,
        })
    }
}

//! Command Line Interface helpers for sim2tod

use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    path::PathBuf,
    time::Duration,
};

use clap::{
    arg, command,
    ErrorKind::{ArgumentNotFound, DisplayHelp, DisplayVersion},
    ValueHint::FilePath,
};
use log::{debug, error, info, trace};
use prettytable::{format as prettyformat, row, table};

use crate::{
    config::{ConfigError, InjectionMode, ParamFile, RunConfig},
    pipeline::{InjectionPipeline, RunReport},
    Sim2TodError::{self, DryRun},
};

/// A run, as requested on the command line.
pub struct Sim2TodContext {
    /// The parameter file the run was resolved from
    pub param_path: PathBuf,
    /// The resolved run
    pub config: RunConfig,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match GIT_HEAD_REF {
        Some(hr) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                GIT_COMMIT_HASH.unwrap_or("<unknown>"),
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {hr}")?;
        }
        None => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {BUILT_TIME_UTC}")?;
    writeln!(f, "         with compiler {RUSTC_VERSION}")?;
    writeln!(f)?;
    Ok(())
}

impl Display for Sim2TodContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} version {}", PKG_NAME, PKG_VERSION)?;
        fmt_build_info(f)?;
        writeln!(f, "Parameter file:       {}", self.param_path.display())?;
        write!(f, "{}", self.config)?;

        let mut obs_table = table!(["#", "input", "output"]);
        obs_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        for (idx, paths) in self.config.observations.iter().enumerate() {
            obs_table.add_row(row![idx, paths.input.display(), paths.output.display()]);
        }
        writeln!(f, "Observations:\n{obs_table}")?;
        Ok(())
    }
}

impl Sim2TodContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, Sim2TodError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about(
                "Inject a simulated sky cube, or white noise, into level1 \
                 time ordered data through its system temperature.",
            )
            .args(&[
                arg!(-p --param <PATH> "YAML parameter file describing the run")
                    .required(true)
                    .value_hint(FilePath),
                arg!(-n --norm <NORM> "Divide the simulated cube by this value")
                    .required(false)
                    .default_value("1.0"),
                arg!(-w --whitenoise "Inject radiometer white noise instead of the cube"),
                arg!(--seed <SEED> "Seed for white noise, overrides the parameter file")
                    .required(false),
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),
                // resource limit options
                arg!(-j --jobs <N> "Number of observations to process at once")
                    .help_heading("RESOURCE LIMITS")
                    .required(false),
                arg!(--"fail-fast" "Stop at the first observation that fails")
                    .help_heading("RESOURCE LIMITS"),
            ]);
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_optional<T>(matches: &clap::ArgMatches, name: &str) -> Result<Option<T>, Sim2TodError>
    where
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: Display,
    {
        match matches.value_of_t::<T>(name) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ArgumentNotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Parse an iterator of arguments, `args` into a `Sim2TodContext`.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - [`ConfigError`] if the parameter file can't be read or resolved, or the
    ///   run it describes is invalid.
    /// - [`Sim2TodError::DryRun`] if `--dry-run` was given.
    pub fn from_args<I, T>(args: I) -> Result<Self, Sim2TodError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);
        let args = args.into_iter().map(Into::into).collect::<Vec<OsString>>();
        let arg_strings = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        match shlex::try_join(arg_strings.iter().map(String::as_str)) {
            Ok(command_line) => info!("command line: {}", command_line),
            Err(_) => info!("command line: {:?}", arg_strings),
        }

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let param_path: PathBuf = match matches.value_of_t("param") {
            Ok(path) => path,
            Err(err) => return Err(err.into()),
        };
        let param_file = ParamFile::from_path(&param_path)?;
        let mut builder = param_file.resolve()?;

        builder
            .normalization(matches.value_of_t::<f64>("norm")?)
            .mode(if matches.is_present("whitenoise") {
                InjectionMode::WhiteNoise
            } else {
                InjectionMode::Cube
            })
            .fail_fast(matches.is_present("fail-fast"))
            .draw_progress(!matches.is_present("no-draw-progress"));
        if let Some(seed) = Self::parse_optional::<u64>(&matches, "seed")? {
            builder.seed(Some(seed));
        }
        if let Some(num_jobs) = Self::parse_optional::<usize>(&matches, "jobs")? {
            builder.num_jobs(num_jobs);
        }
        let config = builder.build().map_err(ConfigError::from)?;

        let result = Self { param_path, config };
        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }
        Ok(result)
    }

    /// Inject into every observation of the run.
    ///
    /// # Errors
    ///
    /// see [`InjectionPipeline::run`]
    pub fn run(&self) -> Result<RunReport, Sim2TodError> {
        InjectionPipeline::new(&self.config).run()
    }
}

/// A table of what happened to each observation.
pub fn fmt_report(report: &RunReport) -> String {
    let mut report_table = table!(["observation", "outcome"]);
    report_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
    for obs in report.observations.iter() {
        report_table.add_row(row![obs.paths.name(), obs.outcome]);
    }
    format!("{report_table}")
}

/// Run the command line with `args`, returning the process exit code.
///
/// 0 if every observation was injected, or only help, version or a dry run
/// was asked for. 1 otherwise.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T> + Debug,
    T: Into<OsString> + Clone,
{
    let context = match Sim2TodContext::from_args(args) {
        Ok(context) => context,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(Sim2TodError::ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match context.run() {
        Ok(report) => {
            info!(
                "total duration: {:?}",
                report
                    .durations
                    .iter()
                    .fold(Duration::ZERO, |duration_sum, (name, duration)| {
                        info!("{} duration: {:?}", name, duration);
                        duration_sum + *duration
                    })
            );
            info!("summary:\n{}", fmt_report(&report));
            if report.is_success() {
                0
            } else {
                error!(
                    "{} of {} observations were not injected: {}",
                    report.observations.len() - report.num_succeeded(),
                    report.observations.len(),
                    report
                );
                1
            }
        }
        Err(e) => {
            eprintln!("injection error: {e}");
            1
        }
    }
}

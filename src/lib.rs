// SPDX-License-Identifier: Apache-2.0

//! Load-generation core for ML inference benchmarking.
//!
//! This crate wires the pieces together behind one entry point,
//! [`start_test`]: settings resolution, the asynchronous logger, the sample
//! loader, the scenario issue engine, and the result reporter. Callers
//! implement two traits, [`SystemUnderTest`] for the inference system and
//! [`QuerySampleLibrary`] for the input data, and receive the artifacts
//! (summary, detail log, accuracy log) plus a programmatic verdict.
//!
//! ```no_run
//! use loadgen::{LogSettings, Mode, RequestedSettings, Scenario, start_test};
//! # fn demo(sut: std::sync::Arc<dyn loadgen::SystemUnderTest>,
//! #         qsl: std::sync::Arc<dyn loadgen::QuerySampleLibrary>) -> Result<(), loadgen::error::Error> {
//! let requested = RequestedSettings::new(Scenario::Server, Mode::PerformanceOnly);
//! let results = start_test(sut, qsl, &requested, &LogSettings::default())?;
//! assert!(results.summary.valid);
//! # Ok(())
//! # }
//! ```

use loadgen_config::resolve;
use loadgen_engine::run::{RunOptions, RunOutcome};
use loadgen_reporting::event::LogEvent;
use loadgen_reporting::{LogHandle, Logger, PerformanceSummary, write_summary};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub mod error;

pub use loadgen_config::{
    self as config, EffectiveSettings, LogSettings, Mode, RequestedSettings, Scenario,
};
pub use loadgen_engine::{
    CompletionHandle, QuerySample, QuerySampleLibrary, QuerySampleResponse, RunState,
    SystemUnderTest,
};
pub use loadgen_reporting as reporting;
pub use loadgen_schedule as schedule;

use error::Error;

/// Iteration cap for the peak-performance search.
const FIND_PEAK_MAX_ROUNDS: u32 = 16;

/// What a finished test hands back to the caller.
#[derive(Debug)]
pub struct TestResults {
    /// Terminal state of the reported run.
    pub state: RunState,
    /// The reported run's statistics and verdict.
    pub summary: PerformanceSummary,
    /// Where the summary artifact was written.
    pub summary_path: PathBuf,
    /// Where the detail log was written.
    pub detail_path: PathBuf,
    /// Where the accuracy log was written, when one was produced.
    pub accuracy_path: Option<PathBuf>,
}

/// Runs a complete benchmark test and writes its artifacts.
///
/// Blocks until the run (or runs: Submission and FindPeakPerformance drive
/// several) reaches a terminal state, the loggers have drained, and the
/// summary is on disk. Submission runs its accuracy and performance phases
/// under separate artifact prefixes; the returned results report the
/// performance phase, with `accuracy_path` pointing at the accuracy
/// phase's log.
pub fn start_test(
    sut: Arc<dyn SystemUnderTest>,
    qsl: Arc<dyn QuerySampleLibrary>,
    requested: &RequestedSettings,
    log_settings: &LogSettings,
) -> Result<TestResults, Error> {
    std::fs::create_dir_all(&log_settings.output_dir).map_err(|source| Error::Io {
        path: log_settings.output_dir.clone(),
        source,
    })?;

    match requested.mode {
        Mode::Submission => {
            let mut accuracy_phase = requested.clone();
            accuracy_phase.mode = Mode::AccuracyOnly;
            let mut accuracy_logs = phase_settings(log_settings, "accuracy_");
            // Only the reported (performance) summary may reach stdout.
            accuracy_logs.copy_summary_to_stdout = false;
            let accuracy_results = run_phase(&sut, &qsl, &accuracy_phase, &accuracy_logs)?;

            let mut performance_phase = requested.clone();
            performance_phase.mode = Mode::PerformanceOnly;
            let performance_logs = phase_settings(log_settings, "performance_");
            let mut results = run_phase(&sut, &qsl, &performance_phase, &performance_logs)?;
            results.accuracy_path = accuracy_results.accuracy_path;
            Ok(results)
        }
        _ => run_phase(&sut, &qsl, requested, log_settings),
    }
}

/// The log settings of one Submission phase: same directory and knobs, the
/// phase name folded into the artifact prefix.
fn phase_settings(base: &LogSettings, phase: &str) -> LogSettings {
    LogSettings {
        prefix: format!("{}{phase}", base.prefix),
        ..base.clone()
    }
}

/// Runs one phase under its own logger and artifact set.
fn run_phase(
    sut: &Arc<dyn SystemUnderTest>,
    qsl: &Arc<dyn QuerySampleLibrary>,
    requested: &RequestedSettings,
    log_settings: &LogSettings,
) -> Result<TestResults, Error> {
    let artifact = |suffix: &str| log_settings.output_dir.join(format!("{}{suffix}", log_settings.prefix));

    let detail_path = artifact("detail.txt");
    let summary_path = artifact("summary.txt");
    let wants_accuracy_log =
        requested.mode == Mode::AccuracyOnly || requested.accuracy_log_probability > 0.0;
    let accuracy_path = wants_accuracy_log.then(|| artifact("accuracy.json"));

    let detail = open_artifact(&detail_path)?;
    let accuracy = match &accuracy_path {
        Some(path) => Some(open_artifact(path)?),
        None => None,
    };
    let logger = Logger::spawn(detail, accuracy)?;
    let log = logger.handle();

    let test = match requested.mode {
        Mode::FindPeakPerformance => find_peak_performance(sut, qsl, requested, log_settings, &log),
        _ => run_one_phase(sut, qsl, requested.clone(), log_settings, &log),
    };

    // The logger owns the sinks; drain it whether or not the run succeeded.
    let finished = logger.finish();
    let (outcome, effective) = test?;
    finished?;

    let mut summary_file = File::create(&summary_path).map_err(|source| Error::Io {
        path: summary_path.clone(),
        source,
    })?;
    write_summary(&mut summary_file, &outcome.summary, &effective)?;
    if log_settings.copy_summary_to_stdout {
        let stdout = std::io::stdout();
        write_summary(&mut stdout.lock(), &outcome.summary, &effective)?;
    }
    info!(
        scenario = %effective.scenario,
        mode = %effective.mode,
        valid = outcome.summary.valid,
        "benchmark phase finished"
    );

    Ok(TestResults {
        state: outcome.state,
        summary: outcome.summary,
        summary_path,
        detail_path,
        accuracy_path,
    })
}

fn open_artifact(path: &Path) -> Result<Box<dyn Write + Send>, Error> {
    let file = File::create(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Box::new(file))
}

fn run_one_phase(
    sut: &Arc<dyn SystemUnderTest>,
    qsl: &Arc<dyn QuerySampleLibrary>,
    requested: RequestedSettings,
    log_settings: &LogSettings,
    log: &LogHandle,
) -> Result<(RunOutcome, EffectiveSettings), Error> {
    let (effective, events) = resolve(&requested, qsl.performance_sample_count())?;
    log.log(LogEvent::RequestedSettings(Box::new(requested)));
    log.log(LogEvent::EffectiveSettings(Box::new(effective.clone())));
    for event in events {
        log.config_error(event);
    }

    let options = RunOptions {
        log_queries: log_settings.log_detail_queries,
        drain_grace: None,
    };
    let outcome = loadgen_engine::run(sut.clone(), qsl.clone(), &effective, log, &options)?;
    Ok((outcome, effective))
}

/// Doubles the Server target rate until the latency objective fails,
/// reporting the last passing run.
fn find_peak_performance(
    sut: &Arc<dyn SystemUnderTest>,
    qsl: &Arc<dyn QuerySampleLibrary>,
    requested: &RequestedSettings,
    log_settings: &LogSettings,
    log: &LogHandle,
) -> Result<(RunOutcome, EffectiveSettings), Error> {
    let mut phase = requested.clone();
    phase.mode = Mode::FindPeakPerformance;
    if requested.scenario != Scenario::Server {
        log.error(format!(
            "FindPeakPerformance is only defined for the Server scenario; \
             running {} as a plain performance run",
            requested.scenario
        ));
        phase.mode = Mode::PerformanceOnly;
        return run_one_phase(sut, qsl, phase, log_settings, log);
    }

    let mut best: Option<(RunOutcome, EffectiveSettings)> = None;
    for _ in 0..FIND_PEAK_MAX_ROUNDS {
        let (outcome, effective) = run_one_phase(sut, qsl, phase.clone(), log_settings, log)?;
        let passed = outcome.summary.valid;
        let rate = effective.target_qps;
        if !passed {
            if best.is_none() {
                // Even the starting rate fails; report it as-is.
                best = Some((outcome, effective));
            }
            break;
        }
        best = Some((outcome, effective));
        phase.server_target_qps = rate * 2.0;
    }

    let (outcome, effective) = best.expect("at least one search round runs");
    log.note(format!(
        "peak performance search settled at {} queries per second",
        effective.target_qps
    ));
    Ok((outcome, effective))
}

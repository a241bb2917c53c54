//! The iteration driver.
//!
//! # Architecture
//!
//! ```text
//!  TestingEngine::run(test)
//!      │
//!      ├─ for each iteration:
//!      │    strategy.prepare_for_next_iteration(i)   (false → search exhausted)
//!      │    Runtime::new(config, strategy, options).run(test)
//!      │    take the strategy back, classify the end
//!      │
//!      └─ on a bug:
//!           replay the trace under ReplayStrategy   (reproduce_bugs)
//!           save a TraceFile                        (output_dir)
//!           stop                                    (unless run_to_completion)
//! ```
//!
//! Internal failures (strategy exhausted, replay drift) abort the run with
//! [`EngineError::Internal`]; they are not bugs in the program under test.

use crate::outcome::{BugReport, Classification, ReplayReport};
use crate::report::TestReport;
use coyote_runtime::{
    Configuration, Failure, FailureKind, IterationEnd, IterationOptions, IterationResult, Runtime, RuntimeError,
    UnknownFailureKind,
};
use coyote_strategy::{ExplorationStrategy, ReplayStrategy};
use coyote_trace::{load_trace_file, save_trace_file, ExecutionTrace, TraceFile, TraceFileError};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors that abort a test run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Config(#[from] RuntimeError),

    #[error("internal error in iteration {iteration}: {message}")]
    Internal { iteration: u32, message: String },

    #[error("replay diverged from the recorded trace: {0}")]
    ReplayDiverged(String),

    #[error("trace file error: {0}")]
    TraceFile(#[from] TraceFileError),

    #[error("trace file records an {0}")]
    RecordedBug(#[from] UnknownFailureKind),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

pub(crate) type TestFn = Arc<dyn Fn() + Send + Sync>;

fn body(test: &TestFn) -> impl FnOnce() + Send + 'static {
    let test = Arc::clone(test);
    move || test()
}

/// Runs a test for many iterations under an exploration strategy.
pub struct TestingEngine {
    config: Configuration,
    strategy: Option<Box<dyn ExplorationStrategy>>,
    /// Worker index in a parallel run.
    worker: Option<usize>,
    /// Set by any worker of a parallel run that found a bug.
    stop: Option<Arc<AtomicBool>>,
}

impl TestingEngine {
    /// Engine using the strategy named by `config.strategy`.
    pub fn new(config: Configuration) -> Result<Self, EngineError> {
        let strategy = config.strategy.build(config.seed);
        Self::with_strategy(config, strategy)
    }

    pub fn with_strategy(config: Configuration, strategy: Box<dyn ExplorationStrategy>) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            strategy: Some(strategy),
            worker: None,
            stop: None,
        })
    }

    pub(crate) fn for_worker(mut self, worker: usize, stop: Arc<AtomicBool>) -> Self {
        self.worker = Some(worker);
        self.stop = Some(stop);
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Run the configured iterations of `test`.
    ///
    /// Returns the report of the run; a bug in the program under test is a
    /// successful run with a non-empty [`TestReport::bugs`].
    pub fn run<F>(&mut self, test: F) -> Result<TestReport, EngineError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let test: TestFn = Arc::new(test);
        self.run_shared(&test)
    }

    pub(crate) fn run_shared(&mut self, test: &TestFn) -> Result<TestReport, EngineError> {
        let started = Instant::now();
        let deadline = self.config.timeout.map(|timeout| started + timeout);
        let description = self.strategy_mut(0)?.description();
        let mut report = TestReport::new(&self.config.test_name, self.config.seed, description.clone());
        let mut fuzzing = false;

        info!(
            "Starting test '{}': {} iterations, strategy {}, seed {}",
            self.config.test_name, self.config.iterations, description, self.config.seed
        );

        for iteration in 0..self.config.iterations {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                info!("Time budget exhausted after {} iterations", iteration);
                report.timed_out = true;
                break;
            }
            if self.stop.as_ref().is_some_and(|stop| stop.load(Ordering::Acquire)) {
                debug!("Stopping: another worker found a bug");
                break;
            }
            if !self.strategy_mut(iteration)?.prepare_for_next_iteration(iteration) {
                info!("Strategy exhausted the search after {} iterations", iteration);
                report.exhausted = true;
                break;
            }

            let options = IterationOptions::new(iteration)
                .with_fuzzing(fuzzing)
                .with_deadline(deadline);
            let result = self.run_iteration(options, test)?;
            report.iterations += 1;
            report.stats.record(&result.end, &result.stats);
            debug!(
                "Iteration {}: {} ({} steps)",
                iteration,
                result.end,
                result.stats.steps
            );

            if result.stats.fuzzing && !fuzzing {
                warn!("Fuzzing fallback engaged; remaining iterations run without controlled scheduling");
                fuzzing = true;
            }

            let classification = Classification::of(&result.end);
            match classification {
                Classification::Passed => {
                    if result.end == IterationEnd::TimedOut {
                        info!("Time budget exhausted during iteration {}", iteration);
                        report.timed_out = true;
                        break;
                    }
                }
                Classification::InternalError => {
                    let message = result.end.failure().map(|f| f.message.clone()).unwrap_or_default();
                    error!("Internal error in iteration {}: {}", iteration, message);
                    return Err(EngineError::Internal { iteration, message });
                }
                _ => {
                    let bug_id = report.bugs.len() as u64;
                    let bug = self.report_bug(bug_id, iteration, classification, result, test)?;
                    report.bugs.push(bug);
                    if let Some(stop) = self.stop.as_ref() {
                        stop.store(true, Ordering::Release);
                    }
                    if !self.config.run_to_completion {
                        break;
                    }
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Test '{}' finished: {} iterations, {} bugs, {:.2?}",
            self.config.test_name,
            report.iterations,
            report.bugs.len(),
            report.elapsed
        );
        Ok(report)
    }

    /// Replay `trace` once and report whether it ends with `expected`.
    ///
    /// `fair` must be the fairness of the strategy that recorded the trace.
    /// A replay that drifts from the trace is an error.
    pub fn replay<F>(
        &self,
        trace: &ExecutionTrace,
        fair: bool,
        expected: Option<&Failure>,
        test: F,
    ) -> Result<ReplayReport, EngineError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let test: TestFn = Arc::new(test);
        let result = self.replay_shared(trace, fair, 0, &test);
        match result.end.failure() {
            Some(failure) if failure.kind == FailureKind::Internal => {
                Err(EngineError::ReplayDiverged(failure.message.clone()))
            }
            _ => Ok(ReplayReport::new(result.end, result.trace, expected)),
        }
    }

    /// Replay a trace file written by a previous run.
    pub fn replay_file<F>(&self, path: &Path, test: F) -> Result<ReplayReport, EngineError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let file = load_trace_file(path)?;
        info!(
            "Replaying {} ({} steps, iteration {} of '{}')",
            path.display(),
            file.trace.len(),
            file.iteration,
            file.test_name
        );
        let expected = file
            .bug
            .as_ref()
            .map(|bug| recorded_failure(&bug.kind, &bug.message))
            .transpose()?;
        self.replay(&file.trace, file.fair, expected.as_ref(), test)
    }

    // ─── Iterations ─────────────────────────────────────────────────

    fn strategy_mut(&mut self, iteration: u32) -> Result<&mut Box<dyn ExplorationStrategy>, EngineError> {
        self.strategy.as_mut().ok_or_else(|| EngineError::Internal {
            iteration,
            message: "the exploration strategy was not returned by the previous iteration".to_string(),
        })
    }

    fn run_iteration(&mut self, options: IterationOptions, test: &TestFn) -> Result<IterationResult, EngineError> {
        let iteration = options.iteration;
        let strategy = self.strategy.take().ok_or_else(|| EngineError::Internal {
            iteration,
            message: "no exploration strategy".to_string(),
        })?;
        let mut result = Runtime::new(self.config.clone(), strategy, options).run(body(test));
        self.strategy = result.strategy.take();
        if self.strategy.is_none() {
            return Err(EngineError::Internal {
                iteration,
                message: "the runtime did not return the exploration strategy".to_string(),
            });
        }
        Ok(result)
    }

    fn replay_shared(&self, trace: &ExecutionTrace, fair: bool, iteration: u32, test: &TestFn) -> IterationResult {
        let mut strategy = ReplayStrategy::new(trace.clone()).with_fairness(fair);
        strategy.prepare_for_next_iteration(iteration);
        Runtime::new(self.config.clone(), Box::new(strategy), IterationOptions::new(iteration)).run(body(test))
    }

    // ─── Bugs ───────────────────────────────────────────────────────

    fn report_bug(
        &mut self,
        bug_id: u64,
        iteration: u32,
        classification: Classification,
        result: IterationResult,
        test: &TestFn,
    ) -> Result<BugReport, EngineError> {
        let failure = result.end.failure().cloned().ok_or_else(|| EngineError::Internal {
            iteration,
            message: "bug classification without a failure".to_string(),
        })?;
        warn!("Bug found in iteration {}: {}", iteration, failure);

        let strategy = self.strategy_mut(iteration)?.description();
        let mut bug = BugReport {
            bug_id,
            iteration,
            worker: self.worker,
            classification,
            failure,
            trace: result.trace,
            strategy,
            fair: result.stats.fair,
            reproduced: None,
            replayable: result.replayable,
            trace_path: None,
        };

        if self.config.reproduce_bugs {
            if bug.replayable {
                let reproduced = self.reproduce(&mut bug, test);
                bug.reproduced = Some(reproduced);
            } else {
                info!("Bug in iteration {} ran in fuzzing mode and cannot be replayed", iteration);
            }
        }

        if let Some(dir) = self.config.output_dir.clone() {
            bug.trace_path = Some(self.save_bug(&bug, &dir)?);
        }
        Ok(bug)
    }

    /// Replay the bug's trace; true if the same failure recurs.
    fn reproduce(&self, bug: &mut BugReport, test: &TestFn) -> bool {
        let result = self.replay_shared(&bug.trace, bug.fair, bug.iteration, test);
        match result.end.failure() {
            Some(failure) if failure.matches(&bug.failure) => {
                bug.trace.extend_or_replace(&result.trace);
                info!("Bug reproduced by replaying {} steps", bug.trace.len());
                true
            }
            Some(failure) => {
                warn!("Replay ended with a different failure: {}", failure);
                false
            }
            None => {
                warn!("Replay did not reproduce the bug: {}", result.end);
                false
            }
        }
    }

    fn save_bug(&self, bug: &BugReport, dir: &Path) -> Result<PathBuf, EngineError> {
        std::fs::create_dir_all(dir)?;
        let test_name = match self.worker {
            Some(worker) => format!("{}-worker{}", self.config.test_name, worker),
            None => self.config.test_name.clone(),
        };
        let file = TraceFile::new(test_name, self.config.seed, bug.strategy.clone(), bug.iteration, bug.trace.clone())
            .with_fairness(bug.fair)
            .with_bug(bug.failure.kind.name(), bug.failure.message.clone())
            .with_config(serde_json::to_value(&self.config)?);
        let path = dir.join(file.file_name());
        save_trace_file(&file, &path)?;
        info!("Trace saved to {}", path.display());
        Ok(path)
    }
}

/// Rebuild the failure a trace file records from its kind name.
fn recorded_failure(kind: &str, message: &str) -> Result<Failure, UnknownFailureKind> {
    Ok(Failure::new(kind.parse()?, message))
}

//! Parallel runs: one engine per worker thread.
//!
//! Each worker gets its own strategy from
//! [`StrategyKind::build_for_worker`](coyote_strategy::StrategyKind::build_for_worker):
//! a distinct member of a portfolio, or a distinct seed otherwise. The
//! configured iterations are split evenly across the workers. The first worker to
//! find a bug stops the others at their next iteration boundary.

use crate::engine::{EngineError, TestFn, TestingEngine};
use crate::report::TestReport;
use coyote_runtime::Configuration;
use log::info;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

impl TestingEngine {
    /// Run `test` on `workers` threads and merge their reports.
    ///
    /// Bugs are listed in worker order.
    pub fn run_parallel<F>(config: Configuration, workers: usize, test: F) -> Result<TestReport, EngineError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        config.validate()?;
        let workers = workers.clamp(1, config.iterations as usize);
        let base = config.iterations / workers as u32;
        let extra = config.iterations as usize % workers;
        let test: TestFn = Arc::new(test);
        let stop = Arc::new(AtomicBool::new(false));
        info!(
            "Starting parallel test '{}': {} workers, {} iterations, strategy {}",
            config.test_name, workers, config.iterations, config.strategy
        );

        let results: Vec<Result<TestReport, EngineError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let share = base + u32::from(worker < extra);
                    let config = config.clone().with_iterations(share);
                    let strategy = config.strategy.build_for_worker(config.seed, worker);
                    let stop = Arc::clone(&stop);
                    let test = Arc::clone(&test);
                    thread::Builder::new()
                        .name(format!("coyote-worker-{}", worker))
                        .spawn_scoped(scope, move || {
                            let mut engine = TestingEngine::with_strategy(config, strategy)?.for_worker(worker, stop);
                            engine.run_shared(&test)
                        })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|_| Err(EngineError::WorkerPanicked(worker))),
                    Err(err) => Err(EngineError::Io(err)),
                })
                .collect()
        });

        let mut merged: Option<TestReport> = None;
        for (worker, result) in results.into_iter().enumerate() {
            let mut report = result?;
            for bug in report.bugs.iter_mut() {
                bug.worker = Some(worker);
            }
            match merged.as_mut() {
                Some(merged) => merged.merge(report),
                None => {
                    report.test_name = config.test_name.clone();
                    report.strategy = config.strategy.to_string();
                    merged = Some(report);
                }
            }
        }
        merged.ok_or_else(|| EngineError::Internal {
            iteration: 0,
            message: "parallel run started no workers".to_string(),
        })
    }
}

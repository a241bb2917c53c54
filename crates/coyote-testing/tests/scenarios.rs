//! End-to-end scenarios: races, deadlocks, liveness and determinism.

use coyote_runtime::sync::{Mutex, SharedRegister};
use coyote_runtime::{api, Configuration, FailureKind, Monitor, Runtime, Temperature};
use coyote_strategy::StrategyKind;
use coyote_testing::{Classification, TestingEngine};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two operations increment a register with separate read and write steps.
fn racy_increment() -> i32 {
    let x = Arc::new(SharedRegister::new(0));
    let y = Arc::clone(&x);
    let worker = api::spawn("worker", move || y.set(y.get() + 1)).unwrap();
    x.set(x.get() + 1);
    worker.join().unwrap();
    x.get()
}

#[test]
fn test_lost_update_observes_both_outcomes() {
    init_logging();
    let observed = Arc::new(std::sync::Mutex::new(BTreeSet::new()));
    let sink = Arc::clone(&observed);
    let config = Configuration::default()
        .with_test_name("lost_update")
        .with_iterations(200)
        .with_seed(2024);

    let report = TestingEngine::new(config)
        .unwrap()
        .run(move || {
            let value = racy_increment();
            sink.lock().unwrap().insert(value);
        })
        .unwrap();

    assert_eq!(report.iterations, 200);
    assert!(!report.has_bugs());
    let observed = observed.lock().unwrap();
    assert!(observed.contains(&1), "lost update never observed: {:?}", observed);
    assert!(observed.contains(&2), "serial outcome never observed: {:?}", observed);
    assert_eq!(report.stats.max_enabled_operations, 2);
}

#[test]
fn test_lost_update_is_reported_as_bug() {
    init_logging();
    let config = Configuration::default().with_iterations(200).with_seed(7);
    let report = TestingEngine::new(config)
        .unwrap()
        .run(|| {
            let value = racy_increment();
            api::assert(value == 2, format!("expected 2, found {}", value));
        })
        .unwrap();

    let bug = report.first_bug().expect("lost update found");
    assert_eq!(bug.classification, Classification::BugFound);
    assert_eq!(bug.failure.kind, FailureKind::Assertion);
    assert_eq!(bug.failure.message, "expected 2, found 1");
    assert_eq!(bug.reproduced, Some(true));
}

fn lock_in_opposite_order() {
    let a = Arc::new(Mutex::new(0u32));
    let b = Arc::new(Mutex::new(0u32));
    let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
    let worker = api::spawn("worker", move || {
        let mut second = b2.lock();
        let mut first = a2.lock();
        *first += 1;
        *second += 1;
    })
    .unwrap();
    {
        let mut first = a.lock();
        let mut second = b.lock();
        *first += 1;
        *second += 1;
    }
    worker.join().unwrap();
}

#[test]
fn test_lock_order_inversion_is_a_deadlock() {
    init_logging();
    let config = Configuration::default().with_iterations(200).with_seed(5);
    let report = TestingEngine::new(config).unwrap().run(lock_in_opposite_order).unwrap();

    let bug = report.first_bug().expect("deadlock found");
    assert_eq!(bug.classification, Classification::Deadlock);
    assert_eq!(bug.failure.kind, FailureKind::Deadlock);
    assert!(bug.failure.message.starts_with("Deadlock detected."));
    assert!(bug.failure.message.contains("waiting to acquire"));
    assert_eq!(bug.reproduced, Some(true));
}

#[test]
fn test_unreported_deadlocks_do_not_fail() {
    let mut config = Configuration::default().with_iterations(50).with_seed(5);
    config.report_deadlocks_as_bugs = false;
    let report = TestingEngine::new(config).unwrap().run(lock_in_opposite_order).unwrap();
    assert!(!report.has_bugs());
    assert_eq!(report.iterations, 50);
    assert_eq!(report.stats.completed + report.stats.stalled, 50);
}

#[derive(Debug)]
enum Work {
    Started,
    Finished,
}

struct Progress {
    busy: bool,
}

impl Monitor for Progress {
    fn name(&self) -> &str {
        "Progress"
    }

    fn on_event(&mut self, event: &dyn Any) -> Result<(), String> {
        match event.downcast_ref::<Work>() {
            Some(Work::Started) => self.busy = true,
            Some(Work::Finished) => self.busy = false,
            None => {}
        }
        Ok(())
    }

    fn temperature(&self) -> Temperature {
        if self.busy {
            Temperature::Hot
        } else {
            Temperature::Cold
        }
    }

    fn state_name(&self) -> String {
        if self.busy { "Busy".into() } else { "Idle".into() }
    }
}

fn liveness_config() -> Configuration {
    Configuration::default()
        .with_iterations(5)
        .with_seed(3)
        .with_liveness_threshold(20)
}

#[test]
fn test_forever_hot_loop_is_a_liveness_violation() {
    init_logging();
    let report = TestingEngine::new(liveness_config())
        .unwrap()
        .run(|| {
            Runtime::current().unwrap().register_monitor(Progress { busy: false });
            api::monitor(&Work::Started);
            loop {
                api::yield_now();
            }
        })
        .unwrap();

    let bug = report.first_bug().expect("liveness violation found");
    assert_eq!(bug.classification, Classification::LivenessViolation);
    assert_eq!(bug.failure.kind, FailureKind::Liveness);
    assert!(bug.failure.message.contains("hot state 'Busy'"));
    assert!(bug.trace.len() <= 25, "flagged late: {} steps", bug.trace.len());
}

#[test]
fn test_periodically_cold_loop_is_not_flagged() {
    let report = TestingEngine::new(liveness_config())
        .unwrap()
        .run(|| {
            Runtime::current().unwrap().register_monitor(Progress { busy: false });
            for _ in 0..100 {
                api::monitor(&Work::Started);
                api::yield_now();
                api::monitor(&Work::Finished);
                api::yield_now();
            }
        })
        .unwrap();
    assert!(!report.has_bugs());
    assert_eq!(report.stats.completed, 5);
}

#[test]
fn test_hot_at_end_is_a_liveness_violation() {
    let report = TestingEngine::new(liveness_config())
        .unwrap()
        .run(|| {
            Runtime::current().unwrap().register_monitor(Progress { busy: false });
            api::monitor(&Work::Started);
            api::yield_now();
        })
        .unwrap();
    let bug = report.first_bug().expect("liveness violation found");
    assert!(bug.failure.message.contains("at the end of program execution"));
}

fn cycle_config() -> Configuration {
    Configuration::default()
        .with_iterations(3)
        .with_seed(13)
        .with_max_steps(200, 200)
        .with_liveness_threshold(10)
        .with_liveness_cycle_detection(true)
}

#[test]
fn test_hot_loop_revisiting_same_state_is_flagged() {
    init_logging();
    let report = TestingEngine::new(cycle_config())
        .unwrap()
        .run(|| {
            Runtime::current().unwrap().register_monitor(Progress { busy: false });
            api::monitor(&Work::Started);
            loop {
                api::yield_now();
            }
        })
        .unwrap();

    let bug = report.first_bug().expect("liveness cycle found");
    assert_eq!(bug.classification, Classification::LivenessViolation);
    assert_eq!(bug.iteration, 0);
    assert!(
        bug.failure.message.contains("potential liveness bug in hot state 'Busy'"),
        "{}",
        bug.failure.message
    );
    assert!(bug.trace.len() <= 20, "flagged late: {} steps", bug.trace.len());
    assert_eq!(bug.reproduced, Some(true));
}

#[test]
fn test_hot_loop_with_changing_state_fails_only_at_step_bound() {
    init_logging();
    let report = TestingEngine::new(cycle_config())
        .unwrap()
        .run(|| {
            let rt = Runtime::current().unwrap();
            rt.register_monitor(Progress { busy: false });
            let ticks = Arc::new(AtomicU64::new(0));
            let observed = Arc::clone(&ticks);
            rt.register_state_hasher(move || observed.load(Ordering::SeqCst));
            api::monitor(&Work::Started);
            loop {
                ticks.fetch_add(1, Ordering::SeqCst);
                api::yield_now();
            }
        })
        .unwrap();

    let bug = report.first_bug().expect("hot at the step bound");
    assert_eq!(bug.classification, Classification::LivenessViolation);
    assert!(
        bug.failure.message.contains("at the end of program execution"),
        "{}",
        bug.failure.message
    );
    assert!(!bug.failure.message.contains("potential liveness bug"));
    assert!(bug.trace.len() >= 200, "ended early: {} steps", bug.trace.len());
}

#[test]
fn test_same_seed_same_traces() {
    let strategies = [
        StrategyKind::Random,
        StrategyKind::Prioritization { priority_switch_bound: 2 },
        StrategyKind::DelayBounding { delay_bound: 2 },
    ];
    for strategy in strategies {
        let run = || {
            let config = Configuration::default()
                .with_iterations(50)
                .with_seed(99)
                .with_strategy(strategy)
                .with_run_to_completion(true);
            TestingEngine::new(config)
                .unwrap()
                .run(|| {
                    let value = racy_increment();
                    api::assert(value == 2, "lost update");
                })
                .unwrap()
        };
        let (first, second) = (run(), run());
        assert_eq!(first.bugs.len(), second.bugs.len(), "{}", strategy);
        assert_eq!(first.stats, second.stats, "{}", strategy);
        for (a, b) in first.bugs.iter().zip(&second.bugs) {
            assert_eq!(a.iteration, b.iteration);
            assert_eq!(a.trace, b.trace);
        }
    }
}

//! Free functions routed through the runtime of the calling operation.
//!
//! These are the interception points instrumented code calls. Outside a
//! running iteration they fall back to plain behaviour (a native yield, a
//! thread-local random value, a normal assertion), so the same code runs
//! unmodified in production.

use crate::error::RuntimeError;
use crate::operation::OperationInfo;
use crate::runtime::Runtime;
use crate::task::JoinHandle;
use coyote_trace::{OperationId, SchedulingPointType};
use rand::Rng;
use std::any::Any;
use std::fmt;

/// Start a controlled operation.
pub fn spawn<F, T>(name: &str, body: F) -> Result<JoinHandle<T>, RuntimeError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match Runtime::current() {
        Some(runtime) => runtime.spawn(name, body),
        None => Err(RuntimeError::NotControlled { api: "spawn" }),
    }
}

/// Start a controlled operation in the caller's group.
pub fn spawn_continuation<F, T>(name: &str, body: F) -> Result<JoinHandle<T>, RuntimeError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match Runtime::current() {
        Some(runtime) => runtime.spawn_continuation(name, body),
        None => Err(RuntimeError::NotControlled {
            api: "spawn_continuation",
        }),
    }
}

pub fn yield_now() {
    match Runtime::current() {
        Some(runtime) => runtime.yield_now(),
        None => std::thread::yield_now(),
    }
}

/// Scheduling point of the given type.
pub fn schedule(point: SchedulingPointType) {
    if let Some(runtime) = Runtime::current() {
        runtime.schedule_next(point);
    }
}

/// Hint that this is a good place to interleave.
pub fn interleave() {
    schedule(SchedulingPointType::Interleave);
}

/// Hint that the caller is spinning; priority-based strategies lower its
/// priority.
pub fn deprioritize() {
    schedule(SchedulingPointType::Deprioritize);
}

pub fn random_bool() -> bool {
    match Runtime::current() {
        Some(runtime) => runtime.random_bool(),
        None => rand::thread_rng().gen(),
    }
}

/// A value in `[0, max_value)`; 0 when `max_value` is 0.
pub fn random_integer(max_value: u64) -> u64 {
    match Runtime::current() {
        Some(runtime) => runtime.random_integer(max_value),
        None if max_value == 0 => 0,
        None => rand::thread_rng().gen_range(0..max_value),
    }
}

/// Specification assertion. Inside an iteration a failure is recorded as a
/// bug and the calling operation is canceled; outside it panics.
pub fn assert(condition: bool, message: impl AsRef<str>) {
    match Runtime::current() {
        Some(runtime) => runtime.assert(condition, message),
        None => assert!(condition, "{}", message.as_ref()),
    }
}

/// Assert `left == right`; the failure message carries both values.
pub fn assert_equal<T: PartialEq + fmt::Debug>(left: T, right: T, message: impl AsRef<str>) {
    if left != right {
        assert(false, format!("{}: {:?} != {:?}", message.as_ref(), left, right));
    }
}

/// Deliver `event` to the monitors of the current iteration.
pub fn monitor<E: Any>(event: &E) {
    if let Some(runtime) = Runtime::current() {
        runtime.notify_monitors(event);
    }
}

pub fn suppress_interleavings() {
    if let Some(runtime) = Runtime::current() {
        runtime.suppress_interleavings();
    }
}

pub fn resume_interleavings() {
    if let Some(runtime) = Runtime::current() {
        runtime.resume_interleavings();
    }
}

pub fn current_operation() -> Option<OperationId> {
    Runtime::current().and_then(|runtime| runtime.current_operation())
}

pub fn executing_operation() -> Option<OperationInfo> {
    Runtime::current().and_then(|runtime| runtime.executing_operation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Configuration, FailureKind, IterationEnd, IterationOptions};
    use coyote_strategy::RandomStrategy;

    #[test]
    fn falls_back_outside_iterations() {
        yield_now();
        interleave();
        assert!(random_integer(3) < 3);
        assert_eq!(random_integer(0), 0);
        assert(true, "holds");
        assert!(current_operation().is_none());
        assert!(matches!(spawn("x", || ()), Err(RuntimeError::NotControlled { .. })));
    }

    #[test]
    fn routes_through_current_runtime() {
        let result = Runtime::new(
            Configuration::default(),
            Box::new(RandomStrategy::new(5)),
            IterationOptions::new(0),
        )
        .run(|| {
            let worker = spawn("worker", || current_operation()).unwrap();
            let id = worker.id();
            assert_eq!(worker.join().unwrap(), Some(id));
            let _ = random_bool();
            interleave();
            deprioritize();
            assert_equal(1 + 1, 2, "arithmetic");
            assert(false, "reached the end");
        });
        let failure = result.end.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Assertion);
        assert_eq!(failure.message, "reached the end");
        assert!(result.trace.iter().any(|s| s.point() == Some(SchedulingPointType::Interleave)));
        assert!(!matches!(result.end, IterationEnd::Completed));
    }

    #[test]
    fn assert_equal_reports_both_values() {
        let result = Runtime::new(
            Configuration::default(),
            Box::new(RandomStrategy::new(5)),
            IterationOptions::new(0),
        )
        .run(|| assert_equal(3, 4, "balance"));
        assert_eq!(result.end.failure().unwrap().message, "balance: 3 != 4");
    }
}

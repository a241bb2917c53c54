//! Iteration classification and bug records.

use coyote_runtime::{Failure, FailureKind, IterationEnd};
use coyote_trace::ExecutionTrace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How the engine classifies the end of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No bug: completed, reached the step bound quietly, stalled on an
    /// unreported deadlock, or ran out of time.
    Passed,
    /// Assertion, panic, uncontrolled concurrency or step-bound failure.
    BugFound,
    Deadlock,
    LivenessViolation,
    /// The testing infrastructure failed (strategy exhausted, replay drift).
    InternalError,
}

impl Classification {
    pub fn of(end: &IterationEnd) -> Self {
        match end.failure() {
            None => Self::Passed,
            Some(failure) => Self::of_failure(failure.kind),
        }
    }

    pub fn of_failure(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Deadlock | FailureKind::PotentialDeadlock => Self::Deadlock,
            FailureKind::Liveness => Self::LivenessViolation,
            FailureKind::Internal => Self::InternalError,
            FailureKind::Assertion
            | FailureKind::UnhandledPanic
            | FailureKind::UncontrolledConcurrency
            | FailureKind::MaxStepsReached => Self::BugFound,
        }
    }

    /// A bug in the program under test.
    pub fn is_bug(&self) -> bool {
        matches!(self, Self::BugFound | Self::Deadlock | Self::LivenessViolation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::BugFound => "bug",
            Self::Deadlock => "deadlock",
            Self::LivenessViolation => "liveness-violation",
            Self::InternalError => "internal-error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A bug found during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugReport {
    /// Position of the bug in the run's report.
    pub bug_id: u64,
    /// Iteration that found it.
    pub iteration: u32,
    /// Worker of a parallel run, if any.
    pub worker: Option<usize>,
    pub classification: Classification,
    pub failure: Failure,
    /// Decisions that lead to the bug.
    pub trace: ExecutionTrace,
    /// Strategy that produced the trace.
    pub strategy: String,
    /// Whether the recording strategy was fair.
    pub fair: bool,
    /// `Some(true)` if a replay hit the same failure, `None` if no replay
    /// was attempted.
    pub reproduced: Option<bool>,
    /// False when the iteration ran in fuzzing mode.
    pub replayable: bool,
    /// Where the replay trace file was written.
    pub trace_path: Option<PathBuf>,
}

/// Result of replaying a recorded trace.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub end: IterationEnd,
    /// Trace of the replayed execution.
    pub trace: ExecutionTrace,
    /// Whether the replay ended with the expected failure; `None` when no
    /// failure was expected.
    pub reproduced: Option<bool>,
}

impl ReplayReport {
    pub(crate) fn new(end: IterationEnd, trace: ExecutionTrace, expected: Option<&Failure>) -> Self {
        let reproduced = expected.map(|expected| end.failure().is_some_and(|actual| actual.matches(expected)));
        Self { end, trace, reproduced }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_failure_kinds() {
        assert_eq!(Classification::of(&IterationEnd::Completed), Classification::Passed);
        assert_eq!(Classification::of(&IterationEnd::StepBoundReached), Classification::Passed);
        assert_eq!(
            Classification::of(&IterationEnd::Stalled("blocked".into())),
            Classification::Passed
        );
        let cases = [
            (FailureKind::Assertion, Classification::BugFound),
            (FailureKind::UnhandledPanic, Classification::BugFound),
            (FailureKind::UncontrolledConcurrency, Classification::BugFound),
            (FailureKind::MaxStepsReached, Classification::BugFound),
            (FailureKind::Deadlock, Classification::Deadlock),
            (FailureKind::PotentialDeadlock, Classification::Deadlock),
            (FailureKind::Liveness, Classification::LivenessViolation),
            (FailureKind::Internal, Classification::InternalError),
        ];
        for (kind, expected) in cases {
            let end = IterationEnd::Failed(Failure::new(kind, "x"));
            assert_eq!(Classification::of(&end), expected, "{}", kind);
        }
    }

    #[test]
    fn test_only_program_failures_are_bugs() {
        assert!(Classification::Deadlock.is_bug());
        assert!(Classification::LivenessViolation.is_bug());
        assert!(!Classification::Passed.is_bug());
        assert!(!Classification::InternalError.is_bug());
    }

    #[test]
    fn test_replay_report_compares_failures() {
        let expected = Failure::new(FailureKind::Assertion, "x == 2");
        let same = ReplayReport::new(
            IterationEnd::Failed(Failure::new(FailureKind::Assertion, "x == 2")),
            ExecutionTrace::new(),
            Some(&expected),
        );
        assert_eq!(same.reproduced, Some(true));

        let passed = ReplayReport::new(IterationEnd::Completed, ExecutionTrace::new(), Some(&expected));
        assert_eq!(passed.reproduced, Some(false));

        let nothing_expected = ReplayReport::new(IterationEnd::Completed, ExecutionTrace::new(), None);
        assert_eq!(nothing_expected.reproduced, None);
    }
}

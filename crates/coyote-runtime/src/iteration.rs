//! Inputs and outputs of one iteration.

use crate::error::Failure;
use coyote_strategy::ExplorationStrategy;
use coyote_trace::ExecutionTrace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Per-iteration options set by the driver.
#[derive(Debug, Clone, Default)]
pub struct IterationOptions {
    /// Zero-based iteration number.
    pub iteration: u32,
    /// Start the iteration in fuzzing mode (no controlled scheduling).
    pub fuzzing: bool,
    /// Wall-clock deadline after which the iteration is abandoned.
    pub deadline: Option<Instant>,
}

impl IterationOptions {
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            ..Self::default()
        }
    }

    pub fn with_fuzzing(mut self, fuzzing: bool) -> Self {
        self.fuzzing = fuzzing;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Why an iteration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationEnd {
    /// Every operation completed.
    Completed,
    /// The step bound was reached without `fail_on_max_steps`.
    StepBoundReached,
    /// A bug (or an internal error) was found.
    Failed(Failure),
    /// Operations got stuck but the configuration asked not to report it.
    Stalled(String),
    /// The run's wall-clock deadline passed.
    TimedOut,
}

impl IterationEnd {
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            IterationEnd::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure().is_some()
    }
}

impl fmt::Display for IterationEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationEnd::Completed => f.write_str("completed"),
            IterationEnd::StepBoundReached => f.write_str("step bound reached"),
            IterationEnd::Failed(failure) => write!(f, "failed: {}", failure),
            IterationEnd::Stalled(reason) => write!(f, "stalled: {}", reason),
            IterationEnd::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Scheduling statistics of one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationStats {
    /// Decisions recorded in the trace.
    pub steps: usize,
    /// Largest enabled set seen at a scheduling point (degree of concurrency).
    pub max_enabled_operations: usize,
    pub controlled_operations: usize,
    pub uncontrolled_operations: usize,
    /// Scheduling points passed in fuzzing mode.
    pub fuzzing_steps: usize,
    /// Whether the iteration ran (or ended) in fuzzing mode.
    pub fuzzing: bool,
    /// Fairness of the strategy that drove the iteration; a replay must use
    /// the same step bound.
    pub fair: bool,
    pub elapsed: Duration,
}

/// Everything the driver needs after an iteration.
pub struct IterationResult {
    pub end: IterationEnd,
    pub trace: ExecutionTrace,
    pub stats: IterationStats,
    /// The strategy, handed back so its state carries into the next
    /// iteration. `None` only if the runtime lost it to a second `run`.
    pub strategy: Option<Box<dyn ExplorationStrategy>>,
    /// False once fuzzing engaged: the trace no longer determines the
    /// execution.
    pub replayable: bool,
}

impl fmt::Debug for IterationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationResult")
            .field("end", &self.end)
            .field("trace_len", &self.trace.len())
            .field("stats", &self.stats)
            .field("replayable", &self.replayable)
            .finish()
    }
}

//! Exploration strategies for controlled-concurrency testing.
//!
//! At every scheduling point the runtime asks an [`ExplorationStrategy`]
//! which enabled operation runs next; at every nondeterministic choice it
//! asks for the boolean or integer value. Strategies persist across
//! iterations so they can steer the search (priority change points, delay
//! budgets, portfolio rotation).
//!
//! # Strategies
//!
//! | Strategy | Fair | Idea |
//! |----------|------|------|
//! | [`RandomStrategy`] | yes | uniform seeded choice |
//! | [`PrioritizationStrategy`] | no | PCT: random group priorities, bounded priority changes |
//! | [`DelayBoundingStrategy`] | no | deterministic round-robin plus a bounded number of delays |
//! | [`ReplayStrategy`] | – | follows a recorded trace, fails on drift |
//! | [`ComboStrategy`] | suffix's | unfair prefix, then a fair suffix |
//! | [`PortfolioStrategy`] | per member | rotates through an ensemble |
//!
//! # Example
//!
//! ```
//! use coyote_strategy::{ExplorationStrategy, OperationRef, RandomStrategy, SchedulingRequest};
//! use coyote_trace::{OperationGroup, OperationId, SchedulingPointType};
//!
//! let mut strategy = RandomStrategy::new(42);
//! assert!(strategy.prepare_for_next_iteration(0));
//!
//! let enabled = [
//!     OperationRef::new(OperationId(0), OperationGroup(0)),
//!     OperationRef::new(OperationId(1), OperationGroup(1)),
//! ];
//! let request = SchedulingRequest {
//!     enabled: &enabled,
//!     current: enabled[0],
//!     point: SchedulingPointType::Yield,
//! };
//! let next = strategy.next_operation(&request).unwrap();
//! assert!(next == OperationId(0) || next == OperationId(1));
//! ```

pub mod combo;
pub mod delay_bounding;
pub mod kind;
pub mod portfolio;
pub mod prioritization;
pub mod random;
pub mod replay;

pub use combo::ComboStrategy;
pub use delay_bounding::DelayBoundingStrategy;
pub use kind::{ParseStrategyError, StrategyKind};
pub use portfolio::PortfolioStrategy;
pub use prioritization::PrioritizationStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

use coyote_trace::{OperationGroup, OperationId, SchedulingPointType, StepKind};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════
//  Requests
// ═══════════════════════════════════════════════════════════════════════

/// An operation as seen by a strategy: its id and its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationRef {
    pub id: OperationId,
    pub group: OperationGroup,
}

impl OperationRef {
    pub fn new(id: OperationId, group: OperationGroup) -> Self {
        Self { id, group }
    }
}

/// A scheduling decision to be made.
#[derive(Debug, Clone, Copy)]
pub struct SchedulingRequest<'a> {
    /// Enabled operations, sorted by id. Never empty.
    pub enabled: &'a [OperationRef],
    /// Operation that reached the scheduling point. May itself be absent
    /// from `enabled` if it just blocked or completed.
    pub current: OperationRef,
    pub point: SchedulingPointType,
}

impl SchedulingRequest<'_> {
    pub fn is_enabled(&self, id: OperationId) -> bool {
        self.enabled.iter().any(|op| op.id == id)
    }

    pub fn current_is_enabled(&self) -> bool {
        self.is_enabled(self.current.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════════════

/// Failures of the strategy itself, as opposed to bugs in the program
/// under test.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("no enabled operations to choose from")]
    NoEnabledOperations,

    #[error("replay trace exhausted after {steps} steps")]
    Exhausted { steps: usize },

    #[error("replay diverged at step {index}: {reason}")]
    Drift { index: usize, reason: String },
}

impl StrategyError {
    pub(crate) fn kind_mismatch(index: usize, recorded: StepKind, requested: StepKind) -> Self {
        StrategyError::Drift {
            index,
            reason: format!("trace records a {} step but a {} decision was requested", recorded, requested),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Strategy trait
// ═══════════════════════════════════════════════════════════════════════

/// Picks the next operation to run and resolves nondeterministic choices.
///
/// Strategy state persists across iterations; `prepare_for_next_iteration`
/// is called once before each iteration starts.
pub trait ExplorationStrategy: Send {
    /// Prepare for `iteration`. Returns `false` if the strategy has nothing
    /// left to explore.
    fn prepare_for_next_iteration(&mut self, iteration: u32) -> bool;

    /// Choose the next operation among `request.enabled`.
    fn next_operation(&mut self, request: &SchedulingRequest<'_>) -> Result<OperationId, StrategyError>;

    /// Resolve a nondeterministic boolean choice made by `current`.
    fn next_boolean(&mut self, current: OperationRef) -> Result<bool, StrategyError>;

    /// Resolve a nondeterministic integer choice in `[0, max_value)` made by
    /// `current`. Returns 0 when `max_value` is 0.
    fn next_integer(&mut self, current: OperationRef, max_value: u64) -> Result<u64, StrategyError>;

    /// Decisions made in the current iteration.
    fn step_count(&self) -> usize;

    /// Whether every enabled operation is eventually scheduled.
    ///
    /// The runtime uses the fair step bound for fair strategies and the
    /// (smaller) unfair bound otherwise.
    fn is_fair(&self) -> bool;

    fn description(&self) -> String;
}

impl<S: ExplorationStrategy + ?Sized> ExplorationStrategy for Box<S> {
    fn prepare_for_next_iteration(&mut self, iteration: u32) -> bool {
        (**self).prepare_for_next_iteration(iteration)
    }

    fn next_operation(&mut self, request: &SchedulingRequest<'_>) -> Result<OperationId, StrategyError> {
        (**self).next_operation(request)
    }

    fn next_boolean(&mut self, current: OperationRef) -> Result<bool, StrategyError> {
        (**self).next_boolean(current)
    }

    fn next_integer(&mut self, current: OperationRef, max_value: u64) -> Result<u64, StrategyError> {
        (**self).next_integer(current, max_value)
    }

    fn step_count(&self) -> usize {
        (**self).step_count()
    }

    fn is_fair(&self) -> bool {
        (**self).is_fair()
    }

    fn description(&self) -> String {
        (**self).description()
    }
}

/// Domain-separated RNG for one purpose of one strategy.
pub(crate) fn seeded_rng(seed: u64, domain: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.wrapping_add(domain))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn ops(ids: &[u64]) -> Vec<OperationRef> {
        ids.iter()
            .map(|&i| OperationRef::new(OperationId(i), OperationGroup(i)))
            .collect()
    }

    pub fn request<'a>(enabled: &'a [OperationRef], current: u64) -> SchedulingRequest<'a> {
        SchedulingRequest {
            enabled,
            current: OperationRef::new(OperationId(current), OperationGroup(current)),
            point: SchedulingPointType::Default,
        }
    }

    /// Drive `strategy` through `steps` decisions over a fixed enabled set.
    pub fn drive(strategy: &mut dyn ExplorationStrategy, enabled: &[OperationRef], steps: usize) -> Vec<u64> {
        let mut current = enabled[0].id.0;
        (0..steps)
            .map(|_| {
                let next = strategy.next_operation(&request(enabled, current)).unwrap();
                current = next.0;
                next.0
            })
            .collect()
    }
}

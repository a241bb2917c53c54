//! An unfair prefix followed by a fair suffix.

use crate::{ExplorationStrategy, OperationRef, SchedulingRequest, StrategyError};
use coyote_trace::OperationId;

/// Runs `prefix` for the first `prefix_steps` decisions of each iteration
/// and `suffix` afterwards.
///
/// Unfair strategies are good at exposing safety bugs early in a schedule
/// but can starve operations forever; switching to a fair suffix lets the
/// same iteration also surface liveness violations.
pub struct ComboStrategy {
    prefix: Box<dyn ExplorationStrategy>,
    suffix: Box<dyn ExplorationStrategy>,
    prefix_steps: usize,
    steps: usize,
}

impl ComboStrategy {
    pub fn new(
        prefix: Box<dyn ExplorationStrategy>,
        suffix: Box<dyn ExplorationStrategy>,
        prefix_steps: usize,
    ) -> Self {
        Self {
            prefix,
            suffix,
            prefix_steps,
            steps: 0,
        }
    }

    fn active(&mut self) -> &mut Box<dyn ExplorationStrategy> {
        if self.steps < self.prefix_steps {
            &mut self.prefix
        } else {
            &mut self.suffix
        }
    }
}

impl ExplorationStrategy for ComboStrategy {
    fn prepare_for_next_iteration(&mut self, iteration: u32) -> bool {
        self.steps = 0;
        let prefix = self.prefix.prepare_for_next_iteration(iteration);
        let suffix = self.suffix.prepare_for_next_iteration(iteration);
        prefix && suffix
    }

    fn next_operation(&mut self, request: &SchedulingRequest<'_>) -> Result<OperationId, StrategyError> {
        let next = self.active().next_operation(request);
        self.steps += 1;
        next
    }

    fn next_boolean(&mut self, current: OperationRef) -> Result<bool, StrategyError> {
        let next = self.active().next_boolean(current);
        self.steps += 1;
        next
    }

    fn next_integer(&mut self, current: OperationRef, max_value: u64) -> Result<u64, StrategyError> {
        let next = self.active().next_integer(current, max_value);
        self.steps += 1;
        next
    }

    fn step_count(&self) -> usize {
        self.steps
    }

    fn is_fair(&self) -> bool {
        self.suffix.is_fair()
    }

    fn description(&self) -> String {
        format!(
            "{} for {} steps, then {}",
            self.prefix.description(),
            self.prefix_steps,
            self.suffix.description()
        )
    }
}

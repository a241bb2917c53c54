//! Replay of a recorded execution trace.
//!
//! The replay strategy answers every request with the decision recorded at
//! the same index. Any mismatch between the live execution and the trace
//! (wrong step kind, a different deciding operation, a recorded choice
//! that is not currently enabled or out of range) is reported as
//! [`StrategyError::Drift`]: the program under test is not deterministic
//! with respect to the controlled operations, and the replay cannot be
//! trusted.
//!
//! Once the trace is consumed, requests go to the optional suffix
//! strategy; without one the strategy reports [`StrategyError::Exhausted`].

use crate::{ExplorationStrategy, OperationRef, SchedulingRequest, StrategyError};
use coyote_trace::{Decision, ExecutionTrace, OperationId, Step, StepKind};
use log::debug;

pub struct ReplayStrategy {
    trace: ExecutionTrace,
    position: usize,
    suffix: Option<Box<dyn ExplorationStrategy>>,
    fair: Option<bool>,
    steps: usize,
}

impl ReplayStrategy {
    pub fn new(trace: ExecutionTrace) -> Self {
        Self {
            trace,
            position: 0,
            suffix: None,
            fair: None,
            steps: 0,
        }
    }

    /// Continue with `suffix` once the recorded trace is consumed.
    pub fn with_suffix(trace: ExecutionTrace, suffix: Box<dyn ExplorationStrategy>) -> Self {
        Self {
            suffix: Some(suffix),
            ..Self::new(trace)
        }
    }

    /// Report the fairness of the strategy that recorded the trace, so the
    /// replayed iteration runs under the same step bound.
    pub fn with_fairness(mut self, fair: bool) -> Self {
        self.fair = Some(fair);
        self
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    /// Recorded steps consumed so far in this iteration.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_consumed(&self) -> bool {
        self.position >= self.trace.len()
    }

    /// Next recorded step, checked against the requesting operation and
    /// the requested kind. `Ok(None)` means the trace is consumed.
    fn expect_step(&mut self, current: OperationRef, kind: StepKind) -> Result<Option<Step>, StrategyError> {
        let index = self.position;
        let Some(step) = self.trace.get(index).copied() else {
            return Ok(None);
        };
        if step.kind() != kind {
            return Err(StrategyError::kind_mismatch(index, step.kind(), kind));
        }
        if step.current != current.id {
            return Err(StrategyError::Drift {
                index,
                reason: format!(
                    "trace expects {} to decide but {} reached the decision",
                    step.current, current.id
                ),
            });
        }
        self.position += 1;
        Ok(Some(step))
    }

    fn suffix(&mut self) -> Result<&mut Box<dyn ExplorationStrategy>, StrategyError> {
        let steps = self.trace.len();
        self.suffix.as_mut().ok_or(StrategyError::Exhausted { steps })
    }
}

impl ExplorationStrategy for ReplayStrategy {
    fn prepare_for_next_iteration(&mut self, iteration: u32) -> bool {
        self.position = 0;
        self.steps = 0;
        if let Some(suffix) = self.suffix.as_mut() {
            suffix.prepare_for_next_iteration(iteration);
        }
        true
    }

    fn next_operation(&mut self, request: &SchedulingRequest<'_>) -> Result<OperationId, StrategyError> {
        self.steps += 1;
        let index = self.position;
        match self.expect_step(request.current, StepKind::Scheduling)? {
            Some(step) => {
                let Decision::Schedule { chosen, .. } = step.decision else {
                    return Err(StrategyError::kind_mismatch(index, step.kind(), StepKind::Scheduling));
                };
                if !request.is_enabled(chosen) {
                    let enabled: Vec<String> = request.enabled.iter().map(|op| op.id.to_string()).collect();
                    return Err(StrategyError::Drift {
                        index,
                        reason: format!(
                            "recorded choice {} is not enabled (enabled: [{}])",
                            chosen,
                            enabled.join(", ")
                        ),
                    });
                }
                Ok(chosen)
            }
            None => {
                if self.steps == self.trace.len() + 1 {
                    debug!("replay: trace consumed after {} steps", self.trace.len());
                }
                self.suffix()?.next_operation(request)
            }
        }
    }

    fn next_boolean(&mut self, current: OperationRef) -> Result<bool, StrategyError> {
        self.steps += 1;
        match self.expect_step(current, StepKind::Boolean)? {
            Some(Step {
                decision: Decision::Boolean { value },
                ..
            }) => Ok(value),
            Some(step) => Err(StrategyError::kind_mismatch(step.index, step.kind(), StepKind::Boolean)),
            None => self.suffix()?.next_boolean(current),
        }
    }

    fn next_integer(&mut self, current: OperationRef, max_value: u64) -> Result<u64, StrategyError> {
        self.steps += 1;
        match self.expect_step(current, StepKind::Integer)? {
            Some(Step {
                index,
                decision: Decision::Integer { value },
                ..
            }) => {
                if max_value > 0 && value >= max_value {
                    return Err(StrategyError::Drift {
                        index,
                        reason: format!("recorded integer {} is outside [0, {})", value, max_value),
                    });
                }
                Ok(value)
            }
            Some(step) => Err(StrategyError::kind_mismatch(step.index, step.kind(), StepKind::Integer)),
            None => self.suffix()?.next_integer(current, max_value),
        }
    }

    fn step_count(&self) -> usize {
        self.steps
    }

    fn is_fair(&self) -> bool {
        match (self.fair, self.suffix.as_ref()) {
            (Some(fair), _) => fair,
            (None, Some(suffix)) => suffix.is_fair(),
            (None, None) => true,
        }
    }

    fn description(&self) -> String {
        match self.suffix {
            Some(ref suffix) => format!("replay({} steps) then {}", self.trace.len(), suffix.description()),
            None => format!("replay({} steps)", self.trace.len()),
        }
    }
}

//! Delay-bounded exploration.
//!
//! The base schedule is deterministic: the current operation keeps running
//! while it is enabled, otherwise execution passes to the next enabled
//! operation in id order (round-robin). Each iteration injects at most
//! `delay_bound` *delays*: at a delay point the operation that would have
//! run is skipped in favour of the next one in round-robin order. Most
//! concurrency bugs need only a handful of delays to manifest.

use crate::{seeded_rng, ExplorationStrategy, OperationRef, SchedulingRequest, StrategyError};
use crate::prioritization::INITIAL_SCHEDULE_LENGTH;
use coyote_trace::OperationId;
use log::debug;
use rand::seq::index;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;

pub struct DelayBoundingStrategy {
    seed: u64,
    rng: ChaCha8Rng,
    delay_bound: usize,
    delay_points: BTreeSet<usize>,
    scheduling_steps: usize,
    steps: usize,
    max_schedule_length: usize,
    delays_injected: usize,
}

impl DelayBoundingStrategy {
    pub fn new(seed: u64, delay_bound: usize) -> Self {
        Self {
            seed,
            rng: seeded_rng(seed, 0x444C_4159), // "DLAY"
            delay_bound,
            delay_points: BTreeSet::new(),
            scheduling_steps: 0,
            steps: 0,
            max_schedule_length: 0,
            delays_injected: 0,
        }
    }

    pub fn delay_points(&self) -> &BTreeSet<usize> {
        &self.delay_points
    }

    /// Delays injected in the current iteration.
    pub fn delays_injected(&self) -> usize {
        self.delays_injected
    }
}

/// Position in `enabled` where round-robin continues from `current`.
fn round_robin_start(request: &SchedulingRequest<'_>) -> usize {
    let current = request.current.id;
    if let Some(pos) = request.enabled.iter().position(|op| op.id == current) {
        return pos;
    }
    request
        .enabled
        .iter()
        .position(|op| op.id > current)
        .unwrap_or(0)
}

impl ExplorationStrategy for DelayBoundingStrategy {
    fn prepare_for_next_iteration(&mut self, _iteration: u32) -> bool {
        self.max_schedule_length = self.max_schedule_length.max(self.scheduling_steps);
        self.scheduling_steps = 0;
        self.steps = 0;
        self.delays_injected = 0;

        let length = if self.max_schedule_length == 0 {
            INITIAL_SCHEDULE_LENGTH
        } else {
            self.max_schedule_length
        };
        let amount = self.delay_bound.min(length);
        self.delay_points.clear();
        self.delay_points
            .extend(index::sample(&mut self.rng, length, amount).into_iter());
        true
    }

    fn next_operation(&mut self, request: &SchedulingRequest<'_>) -> Result<OperationId, StrategyError> {
        let len = request.enabled.len();
        if len == 0 {
            return Err(StrategyError::NoEnabledOperations);
        }

        let mut index = round_robin_start(request);
        // A yielding operation steps aside for the next one.
        if request.point.is_yielding() && request.current_is_enabled() {
            index = (index + 1) % len;
        }
        if self.delay_points.contains(&self.scheduling_steps) {
            index = (index + 1) % len;
            self.delays_injected += 1;
            debug!(
                "delay-bounding: delay {} at step {}",
                self.delays_injected, self.scheduling_steps
            );
        }

        self.scheduling_steps += 1;
        self.steps += 1;
        Ok(request.enabled[index].id)
    }

    fn next_boolean(&mut self, _current: OperationRef) -> Result<bool, StrategyError> {
        self.steps += 1;
        Ok(self.rng.gen())
    }

    fn next_integer(&mut self, _current: OperationRef, max_value: u64) -> Result<u64, StrategyError> {
        self.steps += 1;
        if max_value == 0 {
            return Ok(0);
        }
        Ok(self.rng.gen_range(0..max_value))
    }

    fn step_count(&self) -> usize {
        self.steps
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn description(&self) -> String {
        format!("delay-bounding(seed={}, delays={})", self.seed, self.delay_bound)
    }
}

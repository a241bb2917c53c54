//! Probabilistic concurrency testing (PCT).
//!
//! Every operation group gets a random priority when it is first seen, and
//! the enabled operation whose group has the highest priority always runs.
//! At a small number of randomly chosen scheduling steps (the *priority
//! change points*) the currently highest-priority group is demoted to the
//! lowest priority. A bug of depth `d` is found with probability at least
//! `1 / (n * k^(d-1))` per iteration, for `n` groups and `k` steps.
//!
//! # Change points
//!
//! Change points are sampled uniformly from `[0, L)`, where `L` is the
//! longest schedule observed in earlier iterations (or
//! [`INITIAL_SCHEDULE_LENGTH`] before anything has been observed).

use crate::{seeded_rng, ExplorationStrategy, OperationRef, SchedulingRequest, StrategyError};
use coyote_trace::{OperationGroup, OperationId, SchedulingPointType};
use log::debug;
use rand::seq::index;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;

/// Schedule length assumed before any iteration has completed.
pub const INITIAL_SCHEDULE_LENGTH: usize = 100;

pub struct PrioritizationStrategy {
    seed: u64,
    rng: ChaCha8Rng,
    /// Maximum number of priority changes per iteration.
    priority_switch_bound: usize,
    /// Groups in priority order; index 0 has the highest priority.
    prioritized_groups: Vec<OperationGroup>,
    /// Scheduling step indices at which the top group is demoted.
    change_points: BTreeSet<usize>,
    scheduling_steps: usize,
    steps: usize,
    /// Longest schedule (in scheduling steps) observed so far.
    max_schedule_length: usize,
}

impl PrioritizationStrategy {
    pub fn new(seed: u64, priority_switch_bound: usize) -> Self {
        Self {
            seed,
            rng: seeded_rng(seed, 0x5043_5400), // "PCT"
            priority_switch_bound,
            prioritized_groups: Vec::new(),
            change_points: BTreeSet::new(),
            scheduling_steps: 0,
            steps: 0,
            max_schedule_length: 0,
        }
    }

    /// Current priority order, highest first.
    pub fn priorities(&self) -> &[OperationGroup] {
        &self.prioritized_groups
    }

    pub fn change_points(&self) -> &BTreeSet<usize> {
        &self.change_points
    }

    fn sample_change_points(&mut self) {
        self.change_points.clear();
        let length = if self.max_schedule_length == 0 {
            INITIAL_SCHEDULE_LENGTH
        } else {
            self.max_schedule_length
        };
        let amount = self.priority_switch_bound.min(length);
        self.change_points
            .extend(index::sample(&mut self.rng, length, amount).into_iter());
    }

    /// Give newly seen groups a random slot in the priority list.
    fn register_groups(&mut self, enabled: &[OperationRef]) {
        for op in enabled {
            if !self.prioritized_groups.contains(&op.group) {
                let slot = self.rng.gen_range(0..=self.prioritized_groups.len());
                self.prioritized_groups.insert(slot, op.group);
                debug!("pct: group {} assigned priority slot {}", op.group, slot);
            }
        }
    }

    /// Move `group` to the lowest priority.
    fn deprioritize(&mut self, group: OperationGroup) {
        if let Some(pos) = self.prioritized_groups.iter().position(|g| *g == group) {
            self.prioritized_groups.remove(pos);
            self.prioritized_groups.push(group);
        }
    }

    fn highest_enabled_group(&self, enabled: &[OperationRef]) -> Option<OperationGroup> {
        self.prioritized_groups
            .iter()
            .copied()
            .find(|g| enabled.iter().any(|op| op.group == *g))
    }
}

impl ExplorationStrategy for PrioritizationStrategy {
    fn prepare_for_next_iteration(&mut self, _iteration: u32) -> bool {
        self.max_schedule_length = self.max_schedule_length.max(self.scheduling_steps);
        self.scheduling_steps = 0;
        self.steps = 0;
        self.prioritized_groups.clear();
        self.sample_change_points();
        true
    }

    fn next_operation(&mut self, request: &SchedulingRequest<'_>) -> Result<OperationId, StrategyError> {
        if request.enabled.is_empty() {
            return Err(StrategyError::NoEnabledOperations);
        }
        self.register_groups(request.enabled);

        if request.point == SchedulingPointType::Deprioritize {
            self.deprioritize(request.current.group);
        }
        if self.change_points.contains(&self.scheduling_steps) {
            if let Some(top) = self.highest_enabled_group(request.enabled) {
                debug!(
                    "pct: priority change point at step {}, demoting {}",
                    self.scheduling_steps, top
                );
                self.deprioritize(top);
            }
        }

        self.scheduling_steps += 1;
        self.steps += 1;

        let group = self
            .highest_enabled_group(request.enabled)
            .ok_or(StrategyError::NoEnabledOperations)?;
        // Within a group keep running the current operation when possible.
        if request.current.group == group && request.current_is_enabled() {
            return Ok(request.current.id);
        }
        request
            .enabled
            .iter()
            .find(|op| op.group == group)
            .map(|op| op.id)
            .ok_or(StrategyError::NoEnabledOperations)
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
        format!(
            "prioritization(seed={}, switches={})",
            self.seed, self.priority_switch_bound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drive, ops, request};

    #[test]
    fn runs_highest_priority_group_until_change_point() {
        let enabled = ops(&[0, 1, 2]);
        let mut strategy = PrioritizationStrategy::new(3, 0);
        strategy.prepare_for_next_iteration(0);

        let picks = drive(&mut strategy, &enabled, 50);
        assert!(picks.windows(2).all(|w| w[0] == w[1]), "no switches without change points");
        assert_eq!(OperationGroup(picks[0]), strategy.priorities()[0]);
    }

    #[test]
    fn change_points_bounded_by_switch_bound() {
        let mut strategy = PrioritizationStrategy::new(11, 3);
        strategy.prepare_for_next_iteration(0);
        assert_eq!(strategy.change_points().len(), 3);
        assert!(strategy.change_points().iter().all(|&p| p < INITIAL_SCHEDULE_LENGTH));
    }

    #[test]
    fn change_points_follow_observed_schedule_length() {
        let enabled = ops(&[0, 1]);
        let mut strategy = PrioritizationStrategy::new(11, 2);
        strategy.prepare_for_next_iteration(0);
        drive(&mut strategy, &enabled, 10);
        strategy.prepare_for_next_iteration(1);
        assert!(strategy.change_points().iter().all(|&p| p < 10));
    }

    #[test]
    fn switches_at_most_bound_plus_one_groups() {
        let enabled = ops(&[0, 1, 2, 3]);
        let mut strategy = PrioritizationStrategy::new(99, 2);
        for iteration in 0..20 {
            strategy.prepare_for_next_iteration(iteration);
            let picks = drive(&mut strategy, &enabled, INITIAL_SCHEDULE_LENGTH);
            let switches = picks.windows(2).filter(|w| w[0] != w[1]).count();
            assert!(switches <= 2, "iteration {} switched {} times", iteration, switches);
        }
    }

    #[test]
    fn blocked_high_priority_group_yields_to_next() {
        let mut strategy = PrioritizationStrategy::new(5, 0);
        strategy.prepare_for_next_iteration(0);
        let all = ops(&[0, 1]);
        let first = strategy.next_operation(&request(&all, 0)).unwrap();
        let other = if first.0 == 0 { 1 } else { 0 };

        let only_other = ops(&[other]);
        let next = strategy.next_operation(&request(&only_other, first.0)).unwrap();
        assert_eq!(next.0, other);
    }

    #[test]
    fn deprioritize_hint_demotes_current_group() {
        let mut strategy = PrioritizationStrategy::new(5, 0);
        strategy.prepare_for_next_iteration(0);
        let all = ops(&[0, 1]);
        let first = strategy.next_operation(&request(&all, 0)).unwrap();

        let mut hint = request(&all, first.0);
        hint.point = SchedulingPointType::Deprioritize;
        let next = strategy.next_operation(&hint).unwrap();
        assert_ne!(next, first);
    }

    #[test]
    fn deterministic_with_same_seed() {
        let enabled = ops(&[0, 1, 2]);
        let run = |seed| {
            let mut s = PrioritizationStrategy::new(seed, 3);
            (0..5)
                .flat_map(|i| {
                    s.prepare_for_next_iteration(i);
                    drive(&mut s, &enabled, 40)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(8), run(8));
    }

    #[test]
    fn is_unfair() {
        assert!(!PrioritizationStrategy::new(0, 1).is_fair());
    }
}

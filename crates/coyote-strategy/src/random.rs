//! Uniform random exploration.

use crate::{seeded_rng, ExplorationStrategy, OperationRef, SchedulingRequest, StrategyError};
use coyote_trace::OperationId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Picks uniformly among enabled operations and resolves choices uniformly.
///
/// The RNG is seeded once and keeps advancing across iterations, so
/// iteration `n` of a run is fully determined by the seed and `n`.
pub struct RandomStrategy {
    seed: u64,
    rng: ChaCha8Rng,
    steps: usize,
}

impl RandomStrategy {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: seeded_rng(seed, 0x5241_4E44), // "RAND"
            steps: 0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl ExplorationStrategy for RandomStrategy {
    fn prepare_for_next_iteration(&mut self, _iteration: u32) -> bool {
        self.steps = 0;
        true
    }

    fn next_operation(&mut self, request: &SchedulingRequest<'_>) -> Result<OperationId, StrategyError> {
        if request.enabled.is_empty() {
            return Err(StrategyError::NoEnabledOperations);
        }
        self.steps += 1;
        let index = self.rng.gen_range(0..request.enabled.len());
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
        true
    }

    fn description(&self) -> String {
        format!("random(seed={})", self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drive, ops, request};
    use coyote_trace::{OperationGroup, OperationId};

    #[test]
    fn deterministic_with_same_seed() {
        let enabled = ops(&[0, 1, 2, 3]);
        let r1 = drive(&mut RandomStrategy::new(42), &enabled, 100);
        let r2 = drive(&mut RandomStrategy::new(42), &enabled, 100);
        let r3 = drive(&mut RandomStrategy::new(43), &enabled, 100);
        assert_eq!(r1, r2, "Same seed must produce same schedule");
        assert_ne!(r1, r3, "Different seeds should differ");
    }

    #[test]
    fn covers_every_enabled_operation() {
        let enabled = ops(&[0, 1, 2]);
        let picks = drive(&mut RandomStrategy::new(7), &enabled, 200);
        for id in 0..3 {
            assert!(picks.contains(&id), "op{} never scheduled", id);
        }
    }

    #[test]
    fn only_picks_enabled() {
        let enabled = ops(&[3, 9]);
        let mut strategy = RandomStrategy::new(1);
        for _ in 0..50 {
            let next = strategy.next_operation(&request(&enabled, 3)).unwrap();
            assert!(next == OperationId(3) || next == OperationId(9));
        }
    }

    #[test]
    fn integer_choices_stay_in_range() {
        let mut strategy = RandomStrategy::new(5);
        let current = OperationRef::new(OperationId(0), OperationGroup(0));
        for _ in 0..100 {
            assert!(strategy.next_integer(current, 4).unwrap() < 4);
        }
        assert_eq!(strategy.next_integer(current, 0).unwrap(), 0);
    }

    #[test]
    fn step_count_resets_per_iteration() {
        let enabled = ops(&[0, 1]);
        let mut strategy = RandomStrategy::new(5);
        drive(&mut strategy, &enabled, 10);
        assert_eq!(strategy.step_count(), 10);
        assert!(strategy.prepare_for_next_iteration(1));
        assert_eq!(strategy.step_count(), 0);
    }

    #[test]
    fn empty_enabled_set_is_an_error() {
        let mut strategy = RandomStrategy::new(5);
        let err = strategy.next_operation(&request(&[], 0)).unwrap_err();
        assert_eq!(err, StrategyError::NoEnabledOperations);
    }
}

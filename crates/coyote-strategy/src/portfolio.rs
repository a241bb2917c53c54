//! Portfolio of strategies.
//!
//! No single strategy finds every bug quickly. A portfolio rotates through
//! an ensemble: sequentially, iteration `i` runs member `i % n`; in
//! parallel runs each worker takes one member via
//! [`PortfolioStrategy::member_for_worker`].
//!
//! The *unfair* portfolio uses the raw members. The *fair* portfolio wraps
//! every unfair member in a [`ComboStrategy`] with a random suffix so that
//! liveness properties can be checked.

use crate::{
    ComboStrategy, DelayBoundingStrategy, ExplorationStrategy, OperationRef, PrioritizationStrategy,
    RandomStrategy, SchedulingRequest, StrategyError,
};
use coyote_trace::OperationId;
use log::debug;

/// Scheduling steps run by the unfair prefix of a fair portfolio member.
pub const DEFAULT_FAIR_PREFIX_STEPS: usize = 100;

pub struct PortfolioStrategy {
    members: Vec<Box<dyn ExplorationStrategy>>,
    active: usize,
    fair: bool,
}

impl PortfolioStrategy {
    /// The standard ensemble for `seed`.
    pub fn new(seed: u64, fair: bool, fair_prefix_steps: usize) -> Self {
        Self {
            members: Self::standard_members(seed, fair, fair_prefix_steps),
            active: 0,
            fair,
        }
    }

    /// A portfolio over explicit members.
    pub fn from_members(members: Vec<Box<dyn ExplorationStrategy>>, fair: bool) -> Self {
        Self {
            members,
            active: 0,
            fair,
        }
    }

    /// Member `worker % n` of the standard ensemble, for parallel runs.
    pub fn member_for_worker(
        seed: u64,
        fair: bool,
        fair_prefix_steps: usize,
        worker: usize,
    ) -> Box<dyn ExplorationStrategy> {
        let mut members = Self::standard_members(seed, fair, fair_prefix_steps);
        let index = worker % members.len();
        members.swap_remove(index)
    }

    fn standard_members(seed: u64, fair: bool, fair_prefix_steps: usize) -> Vec<Box<dyn ExplorationStrategy>> {
        let unfair: Vec<Box<dyn ExplorationStrategy>> = vec![
            Box::new(PrioritizationStrategy::new(seed.wrapping_add(1), 2)),
            Box::new(DelayBoundingStrategy::new(seed.wrapping_add(2), 2)),
            Box::new(PrioritizationStrategy::new(seed.wrapping_add(3), 10)),
            Box::new(DelayBoundingStrategy::new(seed.wrapping_add(4), 10)),
        ];

        let mut members: Vec<Box<dyn ExplorationStrategy>> = vec![Box::new(RandomStrategy::new(seed))];
        if fair {
            for (i, member) in unfair.into_iter().enumerate() {
                let suffix = RandomStrategy::new(seed.wrapping_add(100 + i as u64));
                members.push(Box::new(ComboStrategy::new(member, Box::new(suffix), fair_prefix_steps)));
            }
        } else {
            members.extend(unfair);
        }
        members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Index of the member driving the current iteration.
    pub fn active_index(&self) -> usize {
        self.active
    }

    fn active(&mut self) -> Result<&mut Box<dyn ExplorationStrategy>, StrategyError> {
        self.members
            .get_mut(self.active)
            .ok_or(StrategyError::Exhausted { steps: 0 })
    }
}

impl ExplorationStrategy for PortfolioStrategy {
    fn prepare_for_next_iteration(&mut self, iteration: u32) -> bool {
        if self.members.is_empty() {
            return false;
        }
        let n = self.members.len();
        self.active = iteration as usize % n;
        // Each member sees its own, dense iteration count.
        let member_iteration = iteration / n as u32;
        debug!(
            "portfolio: iteration {} -> member {} ({})",
            iteration,
            self.active,
            self.members[self.active].description()
        );
        self.members[self.active].prepare_for_next_iteration(member_iteration)
    }

    fn next_operation(&mut self, request: &SchedulingRequest<'_>) -> Result<OperationId, StrategyError> {
        self.active()?.next_operation(request)
    }

    fn next_boolean(&mut self, current: OperationRef) -> Result<bool, StrategyError> {
        self.active()?.next_boolean(current)
    }

    fn next_integer(&mut self, current: OperationRef, max_value: u64) -> Result<u64, StrategyError> {
        self.active()?.next_integer(current, max_value)
    }

    fn step_count(&self) -> usize {
        self.members.get(self.active).map_or(0, |m| m.step_count())
    }

    fn is_fair(&self) -> bool {
        self.members.get(self.active).map_or(self.fair, |m| m.is_fair())
    }

    fn description(&self) -> String {
        let kind = if self.fair { "fair" } else { "unfair" };
        match self.members.get(self.active) {
            Some(member) => format!(
                "portfolio({}, {}/{}: {})",
                kind,
                self.active + 1,
                self.members.len(),
                member.description()
            ),
            None => format!("portfolio({}, empty)", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drive, ops};

    #[test]
    fn rotates_members_per_iteration() {
        let mut portfolio = PortfolioStrategy::new(7, false, DEFAULT_FAIR_PREFIX_STEPS);
        let n = portfolio.len();
        assert_eq!(n, 5);
        for iteration in 0..(2 * n as u32) {
            assert!(portfolio.prepare_for_next_iteration(iteration));
            assert_eq!(portfolio.active_index(), iteration as usize % n);
        }
    }

    #[test]
    fn unfair_portfolio_has_unfair_members() {
        let mut portfolio = PortfolioStrategy::new(7, false, DEFAULT_FAIR_PREFIX_STEPS);
        portfolio.prepare_for_next_iteration(0);
        assert!(portfolio.is_fair(), "member 0 is random");
        portfolio.prepare_for_next_iteration(1);
        assert!(!portfolio.is_fair());
    }

    #[test]
    fn fair_portfolio_members_are_all_fair() {
        let mut portfolio = PortfolioStrategy::new(7, true, 20);
        for iteration in 0..portfolio.len() as u32 {
            portfolio.prepare_for_next_iteration(iteration);
            assert!(portfolio.is_fair(), "member {} unfair", iteration);
        }
    }

    #[test]
    fn worker_members_are_distinct() {
        let descriptions: std::collections::BTreeSet<String> = (0..5)
            .map(|w| PortfolioStrategy::member_for_worker(3, false, 0, w).description())
            .collect();
        assert_eq!(descriptions.len(), 5);
        assert_eq!(
            PortfolioStrategy::member_for_worker(3, false, 0, 5).description(),
            PortfolioStrategy::member_for_worker(3, false, 0, 0).description()
        );
    }

    #[test]
    fn delegates_decisions_to_active_member() {
        let enabled = ops(&[0, 1]);
        let mut portfolio = PortfolioStrategy::new(1, false, 0);
        portfolio.prepare_for_next_iteration(0);
        drive(&mut portfolio, &enabled, 12);
        assert_eq!(portfolio.step_count(), 12);
        assert!(portfolio.description().starts_with("portfolio(unfair, 1/5: random"));
    }

    #[test]
    fn empty_portfolio_is_exhausted() {
        let mut portfolio = PortfolioStrategy::from_members(Vec::new(), false);
        assert!(!portfolio.prepare_for_next_iteration(0));
    }
}

//! Serializable strategy selection.

use crate::portfolio::DEFAULT_FAIR_PREFIX_STEPS;
use crate::{
    DelayBoundingStrategy, ExplorationStrategy, PortfolioStrategy, PrioritizationStrategy, RandomStrategy,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which exploration strategy a run uses.
///
/// Replay is not listed: a replay strategy is built from a trace, not from
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StrategyKind {
    Random,
    Prioritization { priority_switch_bound: usize },
    DelayBounding { delay_bound: usize },
    Portfolio { fair: bool },
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Random
    }
}

impl StrategyKind {
    /// Instantiate the strategy for `seed`.
    pub fn build(&self, seed: u64) -> Box<dyn ExplorationStrategy> {
        match *self {
            StrategyKind::Random => Box::new(RandomStrategy::new(seed)),
            StrategyKind::Prioritization { priority_switch_bound } => {
                Box::new(PrioritizationStrategy::new(seed, priority_switch_bound))
            }
            StrategyKind::DelayBounding { delay_bound } => Box::new(DelayBoundingStrategy::new(seed, delay_bound)),
            StrategyKind::Portfolio { fair } => Box::new(PortfolioStrategy::new(seed, fair, DEFAULT_FAIR_PREFIX_STEPS)),
        }
    }

    /// Instantiate the strategy for one worker of a parallel run.
    ///
    /// Portfolios hand each worker a different member; other strategies
    /// get a per-worker seed.
    pub fn build_for_worker(&self, seed: u64, worker: usize) -> Box<dyn ExplorationStrategy> {
        match *self {
            StrategyKind::Portfolio { fair } => {
                PortfolioStrategy::member_for_worker(seed, fair, DEFAULT_FAIR_PREFIX_STEPS, worker)
            }
            _ => self.build(seed.wrapping_add(worker as u64)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Random => "random",
            StrategyKind::Prioritization { .. } => "prioritization",
            StrategyKind::DelayBounding { .. } => "delay-bounding",
            StrategyKind::Portfolio { fair: true } => "fair-portfolio",
            StrategyKind::Portfolio { fair: false } => "portfolio",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Prioritization { priority_switch_bound } => {
                write!(f, "prioritization:{}", priority_switch_bound)
            }
            StrategyKind::DelayBounding { delay_bound } => write!(f, "delay-bounding:{}", delay_bound),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseStrategyError {
    #[error("unknown strategy '{0}' (expected random, pct[:N], delay[:N], portfolio, fair-portfolio)")]
    Unknown(String),
    #[error("invalid bound '{0}'")]
    InvalidBound(String),
}

impl FromStr for StrategyKind {
    type Err = ParseStrategyError;

    /// Parses `random`, `pct[:N]`/`prioritization[:N]`,
    /// `delay[:N]`/`delay-bounding[:N]`, `portfolio`, `fair-portfolio`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let (name, bound) = match lowered.split_once(':') {
            Some((name, bound)) => (name, Some(bound)),
            None => (lowered.as_str(), None),
        };
        let parse_bound = |default: usize| -> Result<usize, ParseStrategyError> {
            match bound {
                Some(b) => b.parse().map_err(|_| ParseStrategyError::InvalidBound(b.to_string())),
                None => Ok(default),
            }
        };

        match name {
            "random" => Ok(StrategyKind::Random),
            "pct" | "prioritization" => Ok(StrategyKind::Prioritization {
                priority_switch_bound: parse_bound(10)?,
            }),
            "delay" | "delay-bounding" => Ok(StrategyKind::DelayBounding {
                delay_bound: parse_bound(10)?,
            }),
            "portfolio" => Ok(StrategyKind::Portfolio { fair: false }),
            "fair-portfolio" => Ok(StrategyKind::Portfolio { fair: true }),
            _ => Err(ParseStrategyError::Unknown(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_bounds() {
        assert_eq!("random".parse::<StrategyKind>().unwrap(), StrategyKind::Random);
        assert_eq!(
            "pct:3".parse::<StrategyKind>().unwrap(),
            StrategyKind::Prioritization { priority_switch_bound: 3 }
        );
        assert_eq!(
            "Delay".parse::<StrategyKind>().unwrap(),
            StrategyKind::DelayBounding { delay_bound: 10 }
        );
        assert_eq!(
            "fair-portfolio".parse::<StrategyKind>().unwrap(),
            StrategyKind::Portfolio { fair: true }
        );
        assert!(matches!("pct:x".parse::<StrategyKind>(), Err(ParseStrategyError::InvalidBound(_))));
        assert!(matches!("dfs".parse::<StrategyKind>(), Err(ParseStrategyError::Unknown(_))));
    }

    #[test]
    fn display_parses_back() {
        for kind in [
            StrategyKind::Random,
            StrategyKind::Prioritization { priority_switch_bound: 4 },
            StrategyKind::DelayBounding { delay_bound: 2 },
            StrategyKind::Portfolio { fair: true },
        ] {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn serde_uses_kind_tag() {
        let json = serde_json::to_string(&StrategyKind::DelayBounding { delay_bound: 2 }).unwrap();
        assert_eq!(json, r#"{"kind":"delay-bounding","delay_bound":2}"#);
    }

    #[test]
    fn builds_matching_strategy() {
        assert!(StrategyKind::Random.build(1).is_fair());
        assert!(!StrategyKind::Prioritization { priority_switch_bound: 2 }.build(1).is_fair());
        assert!(StrategyKind::Portfolio { fair: false }.build(1).description().starts_with("portfolio"));
        assert!(StrategyKind::Portfolio { fair: false }
            .build_for_worker(1, 1)
            .description()
            .starts_with("prioritization"));
    }
}

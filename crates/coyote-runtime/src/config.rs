//! Test configuration.

use crate::error::RuntimeError;
use coyote_strategy::StrategyKind;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that pins the seed of a run.
pub const SEED_ENV_VAR: &str = "COYOTE_SEED";

/// How the scheduler treats concurrency it does not control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialControl {
    /// Any interaction between controlled and uncontrolled concurrency is
    /// reported as a bug.
    #[default]
    Strict,
    /// Controlled operations may wait on uncontrolled work; the scheduler
    /// gives it `deadlock_timeout` to make progress before suspecting a
    /// deadlock.
    Allowed,
}

/// Configuration of a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Name used in reports and trace file names.
    pub test_name: String,
    /// Number of iterations to run.
    pub iterations: u32,
    /// Seed for the exploration strategy.
    pub seed: u64,
    pub strategy: StrategyKind,
    /// Step bound per iteration for unfair strategies.
    pub max_unfair_steps: usize,
    /// Step bound per iteration for fair strategies.
    pub max_fair_steps: usize,
    /// Report reaching the step bound as a bug instead of ending the
    /// iteration quietly.
    pub fail_on_max_steps: bool,
    /// How long uncontrolled work may go without progress before the
    /// iteration is suspected of a potential deadlock.
    pub deadlock_timeout: Duration,
    pub report_deadlocks_as_bugs: bool,
    /// When false, potential deadlocks are logged and the iteration ends
    /// without a bug.
    pub report_potential_deadlocks_as_bugs: bool,
    pub partial_control: PartialControl,
    /// On uncontrolled concurrency, switch to randomized fuzzing instead of
    /// failing.
    pub fuzzing_fallback: bool,
    /// Upper bound of the random delay injected at each scheduling point in
    /// fuzzing mode.
    pub max_fuzz_delay: Duration,
    /// Steps a monitor may stay hot before a liveness violation is
    /// reported. `None` uses half of `max_fair_steps`.
    pub liveness_temperature_threshold: Option<u64>,
    /// Count only repeated program states towards the temperature.
    pub liveness_cycle_detection: bool,
    /// Keep exploring after the first bug.
    pub run_to_completion: bool,
    /// Replay each bug to confirm it reproduces.
    pub reproduce_bugs: bool,
    /// Wall-clock budget for the whole run.
    pub timeout: Option<Duration>,
    /// Directory for replay trace files.
    pub output_dir: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            test_name: "test".to_string(),
            iterations: 100,
            seed: 42,
            strategy: StrategyKind::Random,
            max_unfair_steps: 10_000,
            max_fair_steps: 100_000,
            fail_on_max_steps: false,
            deadlock_timeout: Duration::from_secs(5),
            report_deadlocks_as_bugs: true,
            report_potential_deadlocks_as_bugs: true,
            partial_control: PartialControl::Strict,
            fuzzing_fallback: false,
            max_fuzz_delay: Duration::from_micros(500),
            liveness_temperature_threshold: None,
            liveness_cycle_detection: false,
            run_to_completion: false,
            reproduce_bugs: true,
            timeout: None,
            output_dir: None,
        }
    }
}

impl Configuration {
    pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = name.into();
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set both step bounds.
    pub fn with_max_steps(mut self, unfair: usize, fair: usize) -> Self {
        self.max_unfair_steps = unfair;
        self.max_fair_steps = fair;
        self
    }

    pub fn with_fail_on_max_steps(mut self, fail: bool) -> Self {
        self.fail_on_max_steps = fail;
        self
    }

    pub fn with_deadlock_timeout(mut self, timeout: Duration) -> Self {
        self.deadlock_timeout = timeout;
        self
    }

    pub fn with_potential_deadlocks_as_bugs(mut self, report: bool) -> Self {
        self.report_potential_deadlocks_as_bugs = report;
        self
    }

    pub fn with_partial_control(mut self, mode: PartialControl) -> Self {
        self.partial_control = mode;
        self
    }

    pub fn with_fuzzing_fallback(mut self, enabled: bool) -> Self {
        self.fuzzing_fallback = enabled;
        self
    }

    pub fn with_liveness_threshold(mut self, threshold: u64) -> Self {
        self.liveness_temperature_threshold = Some(threshold);
        self
    }

    pub fn with_liveness_cycle_detection(mut self, enabled: bool) -> Self {
        self.liveness_cycle_detection = enabled;
        self
    }

    pub fn with_run_to_completion(mut self, enabled: bool) -> Self {
        self.run_to_completion = enabled;
        self
    }

    pub fn with_reproduce_bugs(mut self, enabled: bool) -> Self {
        self.reproduce_bugs = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Step bound for a strategy of the given fairness.
    pub fn max_steps(&self, fair: bool) -> usize {
        if fair {
            self.max_fair_steps
        } else {
            self.max_unfair_steps
        }
    }

    /// Effective liveness temperature threshold.
    pub fn liveness_threshold(&self) -> u64 {
        self.liveness_temperature_threshold
            .unwrap_or(self.max_fair_steps as u64 / 2)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.iterations == 0 {
            return Err(RuntimeError::InvalidConfig("iterations must be at least 1".into()));
        }
        if self.max_unfair_steps == 0 || self.max_fair_steps == 0 {
            return Err(RuntimeError::InvalidConfig("step bounds must be at least 1".into()));
        }
        if self.deadlock_timeout.is_zero() {
            return Err(RuntimeError::InvalidConfig("deadlock_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Seed from `COYOTE_SEED`, or a fresh random one.
///
/// The seed is logged either way so a failing run can be repeated.
pub fn get_or_generate_seed() -> Result<u64, RuntimeError> {
    match std::env::var(SEED_ENV_VAR) {
        Ok(s) => {
            let seed: u64 = s
                .trim()
                .parse()
                .map_err(|_| RuntimeError::InvalidConfig(format!("{} must be a valid u64, got '{}'", SEED_ENV_VAR, s)))?;
            info!("{}={} (from environment)", SEED_ENV_VAR, seed);
            Ok(seed)
        }
        Err(_) => {
            let seed = rand::random::<u64>();
            info!("{}={} (randomly generated)", SEED_ENV_VAR, seed);
            Ok(seed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = Configuration::default()
            .with_iterations(7)
            .with_seed(9)
            .with_max_steps(10, 20)
            .with_partial_control(PartialControl::Allowed);
        assert_eq!(config.iterations, 7);
        assert_eq!(config.seed, 9);
        assert_eq!(config.max_steps(false), 10);
        assert_eq!(config.max_steps(true), 20);
        assert_eq!(config.partial_control, PartialControl::Allowed);
    }

    #[test]
    fn liveness_threshold_defaults_to_half_fair_bound() {
        let config = Configuration::default().with_max_steps(10, 400);
        assert_eq!(config.liveness_threshold(), 200);
        assert_eq!(config.with_liveness_threshold(5).liveness_threshold(), 5);
    }

    #[test]
    fn validate_rejects_zero_iterations() {
        assert!(Configuration::default().validate().is_ok());
        assert!(Configuration::default().with_iterations(0).validate().is_err());
        assert!(Configuration::default().with_max_steps(0, 1).validate().is_err());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config: Configuration = serde_json::from_str(r#"{ "iterations": 3, "strategy": { "kind": "portfolio", "fair": true } }"#).unwrap();
        assert_eq!(config.iterations, 3);
        assert_eq!(config.strategy, StrategyKind::Portfolio { fair: true });
        assert_eq!(config.max_unfair_steps, Configuration::default().max_unfair_steps);
    }
}

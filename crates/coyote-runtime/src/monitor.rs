//! Specification monitors and liveness checking.
//!
//! A [`Monitor`] observes events the program under test emits through
//! [`Runtime::notify_monitors`](crate::Runtime::notify_monitors). Safety
//! properties are checked directly in `on_event`. Liveness properties are
//! expressed through the monitor's [`Temperature`]: a *hot* monitor has an
//! obligation pending (a request awaiting a response, a leader awaiting
//! election), a *cold* monitor has none.
//!
//! # Liveness semantics
//!
//! | Situation | Verdict |
//! |-----------|---------|
//! | hot for more than `threshold` consecutive steps | liveness violation |
//! | hot when the last operation completes | liveness violation |
//! | cold at any point | temperature resets |
//! | warm | temperature held |
//!
//! With cycle detection enabled only steps that revisit an already seen
//! (monitor state, program state) pair while hot add to the temperature,
//! so a program that keeps making progress while hot is not flagged.

use crate::error::{Failure, FailureKind};
use log::debug;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Liveness temperature of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    Cold,
    Warm,
    Hot,
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cold => f.write_str("cold"),
            Self::Warm => f.write_str("warm"),
            Self::Hot => f.write_str("hot"),
        }
    }
}

/// A specification monitor.
///
/// Monitor callbacks run under the scheduler lock and must not call back
/// into the runtime.
pub trait Monitor: Send {
    fn name(&self) -> &str;

    /// Observe an event. `Err(message)` reports a safety violation.
    fn on_event(&mut self, event: &dyn Any) -> Result<(), String>;

    fn temperature(&self) -> Temperature;

    /// Name of the current state, used in liveness reports.
    fn state_name(&self) -> String;

    /// Hash of the monitor's state for cycle detection. Defaults to a hash
    /// of [`Monitor::state_name`].
    fn hashed_state(&self) -> Option<u64> {
        None
    }
}

struct MonitorSlot {
    monitor: Box<dyn Monitor>,
    /// Steps spent hot (or repeated hot states, in cycle mode).
    heat: u64,
    visited_hot_states: BTreeSet<u64>,
}

impl MonitorSlot {
    fn state_hash(&self) -> u64 {
        self.monitor.hashed_state().unwrap_or_else(|| {
            let mut hasher = DefaultHasher::new();
            self.monitor.state_name().hash(&mut hasher);
            hasher.finish()
        })
    }

    fn cool_down(&mut self) {
        self.heat = 0;
        self.visited_hot_states.clear();
    }
}

/// Tracks monitor temperatures for one iteration.
pub(crate) struct LivenessChecker {
    slots: Vec<MonitorSlot>,
    threshold: u64,
    cycle_detection: bool,
}

impl LivenessChecker {
    pub(crate) fn new(threshold: u64, cycle_detection: bool) -> Self {
        Self {
            slots: Vec::new(),
            threshold,
            cycle_detection,
        }
    }

    pub(crate) fn register(&mut self, monitor: Box<dyn Monitor>) {
        debug!("registered monitor '{}'", monitor.name());
        self.slots.push(MonitorSlot {
            monitor,
            heat: 0,
            visited_hot_states: BTreeSet::new(),
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn uses_cycle_detection(&self) -> bool {
        self.cycle_detection
    }

    /// Deliver `event` to every monitor.
    pub(crate) fn notify(&mut self, event: &dyn Any) -> Result<(), Failure> {
        for slot in &mut self.slots {
            if let Err(message) = slot.monitor.on_event(event) {
                return Err(Failure::new(
                    FailureKind::Assertion,
                    format!(
                        "Monitor '{}' in state '{}': {}",
                        slot.monitor.name(),
                        slot.monitor.state_name(),
                        message
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Account one scheduling step. `program_hash` identifies the current
    /// program state and only matters in cycle mode.
    pub(crate) fn on_step(&mut self, program_hash: u64) -> Option<Failure> {
        for slot in &mut self.slots {
            match slot.monitor.temperature() {
                Temperature::Cold => slot.cool_down(),
                Temperature::Warm => {}
                Temperature::Hot => {
                    if self.cycle_detection {
                        let state = slot.state_hash() ^ program_hash.rotate_left(17);
                        if !slot.visited_hot_states.insert(state) {
                            slot.heat += 1;
                        }
                    } else {
                        slot.heat += 1;
                    }

                    if slot.heat > self.threshold {
                        return Some(Failure::new(
                            FailureKind::Liveness,
                            format!(
                                "Monitor '{}' detected potential liveness bug in hot state '{}'",
                                slot.monitor.name(),
                                slot.monitor.state_name()
                            ),
                        ));
                    }
                }
            }
        }
        None
    }

    /// A hot monitor when the program has finished is a liveness bug.
    pub(crate) fn check_end_of_execution(&self) -> Option<Failure> {
        self.slots
            .iter()
            .find(|s| s.monitor.temperature() == Temperature::Hot)
            .map(|s| {
                Failure::new(
                    FailureKind::Liveness,
                    format!(
                        "Monitor '{}' detected liveness bug in hot state '{}' at the end of program execution",
                        s.monitor.name(),
                        s.monitor.state_name()
                    ),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hot while a request is outstanding.
    struct Responder {
        pending: u32,
    }

    enum Event {
        Request,
        Response,
        Bogus,
    }

    impl Monitor for Responder {
        fn name(&self) -> &str {
            "Responder"
        }

        fn on_event(&mut self, event: &dyn Any) -> Result<(), String> {
            match event.downcast_ref::<Event>() {
                Some(Event::Request) => self.pending += 1,
                Some(Event::Response) => self.pending = self.pending.saturating_sub(1),
                Some(Event::Bogus) => return Err("bogus event".into()),
                None => {}
            }
            Ok(())
        }

        fn temperature(&self) -> Temperature {
            if self.pending > 0 {
                Temperature::Hot
            } else {
                Temperature::Cold
            }
        }

        fn state_name(&self) -> String {
            if self.pending > 0 { "Pending".into() } else { "Idle".into() }
        }
    }

    fn checker(threshold: u64, cycles: bool) -> LivenessChecker {
        let mut checker = LivenessChecker::new(threshold, cycles);
        checker.register(Box::new(Responder { pending: 0 }));
        checker
    }

    #[test]
    fn hot_beyond_threshold_is_violation() {
        let mut checker = checker(3, false);
        checker.notify(&Event::Request).unwrap();
        for _ in 0..3 {
            assert!(checker.on_step(0).is_none());
        }
        let failure = checker.on_step(0).unwrap();
        assert_eq!(failure.kind, FailureKind::Liveness);
        assert!(failure.message.contains("hot state 'Pending'"));
    }

    #[test]
    fn cold_resets_temperature() {
        let mut checker = checker(3, false);
        for _ in 0..10 {
            checker.notify(&Event::Request).unwrap();
            assert!(checker.on_step(0).is_none());
            assert!(checker.on_step(0).is_none());
            checker.notify(&Event::Response).unwrap();
            assert!(checker.on_step(0).is_none());
        }
    }

    #[test]
    fn cycle_mode_counts_only_repeated_states() {
        let mut checker = checker(2, true);
        checker.notify(&Event::Request).unwrap();
        for program_state in 0..100 {
            assert!(checker.on_step(program_state).is_none(), "progressing program is not flagged");
        }
        assert!(checker.on_step(5).is_none());
        assert!(checker.on_step(6).is_none());
        assert!(checker.on_step(7).is_some());
    }

    #[test]
    fn hot_at_end_of_execution() {
        let mut checker = checker(100, false);
        assert!(checker.check_end_of_execution().is_none());
        checker.notify(&Event::Request).unwrap();
        let failure = checker.check_end_of_execution().unwrap();
        assert!(failure.message.contains("at the end of program execution"));
    }

    #[test]
    fn monitor_errors_are_assertions() {
        let mut checker = checker(100, false);
        let failure = checker.notify(&Event::Bogus).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Assertion);
        assert_eq!(failure.message, "Monitor 'Responder' in state 'Idle': bogus event");
    }
}

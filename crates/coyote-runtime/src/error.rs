//! Failures found in the program under test, and runtime API errors.

use coyote_trace::OperationId;
use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Classification of a failure that ended an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// A specification assertion or monitor check failed.
    Assertion,
    /// An operation panicked.
    UnhandledPanic,
    /// Operations are blocked and none can ever be enabled.
    Deadlock,
    /// Operations are blocked and uncontrolled work made no progress
    /// within the deadlock timeout.
    PotentialDeadlock,
    /// A monitor stayed hot for too long or at the end of the execution.
    Liveness,
    /// Controlled and uncontrolled concurrency interacted in strict mode.
    UncontrolledConcurrency,
    /// The step bound was reached with `fail_on_max_steps` set.
    #[serde(rename = "max-steps")]
    MaxStepsReached,
    /// The exploration strategy failed (exhausted, replay drift).
    Internal,
}

impl FailureKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Assertion => "assertion",
            Self::UnhandledPanic => "unhandled-panic",
            Self::Deadlock => "deadlock",
            Self::PotentialDeadlock => "potential-deadlock",
            Self::Liveness => "liveness",
            Self::UncontrolledConcurrency => "uncontrolled-concurrency",
            Self::MaxStepsReached => "max-steps",
            Self::Internal => "internal",
        }
    }

    /// Failures of the testing infrastructure rather than of the program.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A kind name no [`FailureKind`] carries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown failure kind '{0}'")]
pub struct UnknownFailureKind(pub String);

/// Parses the names [`FailureKind::name`] produces, through the same serde
/// names the kind serializes with.
impl FromStr for FailureKind {
    type Err = UnknownFailureKind;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let deserializer: StrDeserializer<'_, ValueError> = name.into_deserializer();
        Self::deserialize(deserializer).map_err(|_| UnknownFailureKind(name.to_string()))
    }
}

/// A failure recorded by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Operation executing when the failure was detected, if any.
    pub operation: Option<OperationId>,
    /// Trace length when the failure was detected.
    pub step: usize,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation: None,
            step: 0,
        }
    }

    pub(crate) fn at(mut self, operation: Option<OperationId>, step: usize) -> Self {
        self.operation = operation;
        self.step = step;
        self
    }

    /// Same classification and message.
    pub fn matches(&self, other: &Failure) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Errors returned by runtime entry points.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("'{api}' must be called from a controlled operation")]
    NotControlled { api: &'static str },

    #[error("failed to start operation thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{0} was canceled before producing a result")]
    OperationCanceled(OperationId),

    #[error("uncontrolled thread '{name}' panicked: {message}")]
    UncontrolledPanicked { name: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_compares_kind_and_message_only() {
        let a = Failure::new(FailureKind::Deadlock, "stuck").at(Some(OperationId(1)), 10);
        let b = Failure::new(FailureKind::Deadlock, "stuck").at(Some(OperationId(2)), 12);
        let c = Failure::new(FailureKind::PotentialDeadlock, "stuck");
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn display_includes_kind() {
        let failure = Failure::new(FailureKind::Liveness, "monitor 'M' hot");
        assert_eq!(failure.to_string(), "[liveness] monitor 'M' hot");
        assert!(FailureKind::Internal.is_internal());
        assert!(!FailureKind::Deadlock.is_internal());
    }

    #[test]
    fn kind_names_parse_back() {
        let kinds = [
            FailureKind::Assertion,
            FailureKind::UnhandledPanic,
            FailureKind::Deadlock,
            FailureKind::PotentialDeadlock,
            FailureKind::Liveness,
            FailureKind::UncontrolledConcurrency,
            FailureKind::MaxStepsReached,
            FailureKind::Internal,
        ];
        for kind in kinds {
            assert_eq!(kind.name().parse::<FailureKind>(), Ok(kind));
            assert_eq!(serde_json::to_value(kind).unwrap(), serde_json::json!(kind.name()));
        }
        assert_eq!(
            "stalled".parse::<FailureKind>(),
            Err(UnknownFailureKind("stalled".to_string()))
        );
    }
}

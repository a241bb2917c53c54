//! Identifiers for controlled operations and their logical groups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a controlled operation within one iteration.
///
/// Ids are assigned monotonically by the scheduler and never recycled, so a
/// trace index that names an operation stays meaningful for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl OperationId {
    /// The operation that runs the test body.
    pub const ROOT: OperationId = OperationId(0);

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Logical group an operation belongs to.
///
/// Continuations of the same unit of work share a group. Prioritization
/// strategies assign priorities per group rather than per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationGroup(pub u64);

impl OperationGroup {
    pub const ROOT: OperationGroup = OperationGroup(0);

    /// The default group of an operation: a group of its own.
    pub fn of(id: OperationId) -> Self {
        OperationGroup(id.0)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

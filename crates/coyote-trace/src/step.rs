//! Trace step types.
//!
//! A [`Step`] is one recorded decision: either a scheduling decision (which
//! operation runs next, and why the decision point occurred) or the resolved
//! value of a nondeterministic boolean/integer choice. Every step is tagged
//! with the operation that was executing when the decision was made and that
//! operation's group.

use crate::ids::{OperationGroup, OperationId};
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
//  Scheduling point types
// ═══════════════════════════════════════════════════════════════════════

/// Why a scheduling decision point occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPointType {
    /// Unclassified decision point.
    Default,
    /// An operation is about to start executing.
    Start,
    /// A new operation was created.
    Create,
    /// An operation finished.
    Complete,
    /// An operation voluntarily yielded.
    Yield,
    /// About to acquire a modeled resource.
    Acquire,
    /// Released a modeled resource.
    Release,
    /// About to wait on other operations or a condition.
    Wait,
    /// About to join another operation.
    Join,
    /// About to send on a modeled channel.
    Send,
    /// About to receive from a modeled channel.
    Receive,
    /// About to read shared state.
    Read,
    /// About to write shared state.
    Write,
    /// Instrumentation hint: a good place to interleave.
    Interleave,
    /// Instrumentation hint: lower the priority of the current operation.
    Deprioritize,
    /// Interleavings of the current operation are about to be suppressed.
    Suppress,
    /// Interleavings of the current operation were resumed.
    Resume,
}

impl SchedulingPointType {
    pub const ALL: [SchedulingPointType; 17] = [
        Self::Default,
        Self::Start,
        Self::Create,
        Self::Complete,
        Self::Yield,
        Self::Acquire,
        Self::Release,
        Self::Wait,
        Self::Join,
        Self::Send,
        Self::Receive,
        Self::Read,
        Self::Write,
        Self::Interleave,
        Self::Deprioritize,
        Self::Suppress,
        Self::Resume,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Start => "start",
            Self::Create => "create",
            Self::Complete => "complete",
            Self::Yield => "yield",
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::Wait => "wait",
            Self::Join => "join",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Read => "read",
            Self::Write => "write",
            Self::Interleave => "interleave",
            Self::Deprioritize => "deprioritize",
            Self::Suppress => "suppress",
            Self::Resume => "resume",
        }
    }

    /// Points at which the current operation asks to step aside.
    pub fn is_yielding(&self) -> bool {
        matches!(self, Self::Yield | Self::Deprioritize)
    }
}

impl fmt::Display for SchedulingPointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Steps
// ═══════════════════════════════════════════════════════════════════════

/// The payload of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// The scheduler handed execution to `chosen`.
    Schedule {
        point: SchedulingPointType,
        chosen: OperationId,
        chosen_group: OperationGroup,
    },
    /// A nondeterministic boolean choice resolved to `value`.
    Boolean { value: bool },
    /// A nondeterministic integer choice resolved to `value`.
    Integer { value: u64 },
}

/// Discriminant of a [`Decision`], used for statistics and drift messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StepKind {
    Scheduling,
    Boolean,
    Integer,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scheduling => "scheduling",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of an [`ExecutionTrace`](crate::ExecutionTrace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    /// Position of this step in its trace.
    pub index: usize,
    /// Operation that was executing when the decision was made.
    pub current: OperationId,
    /// Group of `current`.
    pub current_group: OperationGroup,
    /// What was decided.
    pub decision: Decision,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self.decision {
            Decision::Schedule { .. } => StepKind::Scheduling,
            Decision::Boolean { .. } => StepKind::Boolean,
            Decision::Integer { .. } => StepKind::Integer,
        }
    }

    /// The scheduled operation, if this is a scheduling step.
    pub fn chosen(&self) -> Option<OperationId> {
        match self.decision {
            Decision::Schedule { chosen, .. } => Some(chosen),
            _ => None,
        }
    }

    pub fn point(&self) -> Option<SchedulingPointType> {
        match self.decision {
            Decision::Schedule { point, .. } => Some(point),
            _ => None,
        }
    }

    /// Compare two steps ignoring their index.
    ///
    /// Two traces recorded from the same seed must agree on every decision;
    /// the index is positional and carries no information of its own.
    pub fn same_decision(&self, other: &Step) -> bool {
        self.current == other.current
            && self.current_group == other.current_group
            && self.decision == other.decision
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>6}] {}/{} ", self.index, self.current, self.current_group)?;
        match self.decision {
            Decision::Schedule {
                point,
                chosen,
                chosen_group,
            } => {
                if chosen == self.current {
                    write!(f, "{:<12} continue", point.name())
                } else {
                    write!(f, "{:<12} -> {}/{}", point.name(), chosen, chosen_group)
                }
            }
            Decision::Boolean { value } => write!(f, "{:<12} = {}", "bool", value),
            Decision::Integer { value } => write!(f, "{:<12} = {}", "int", value),
        }
    }
}

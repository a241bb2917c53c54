//! Controlled operations and their state machine.
//!
//! ```text
//!              block(reason)
//!   Enabled ─────────────────► Waiting | BlockedOnResource | BlockedOnReceive
//!    ▲ │  ▲                               │
//!    │ │  └────────── unblock() ──────────┘
//!    │ │ pause()
//!    │ ▼
//!   Paused
//!    (resume() returns to Enabled)
//!
//!   blocked ── schedule() ──► Enabled   (caller resumes after its wait)
//!
//!   any state ── complete() ──► Completed
//! ```
//!
//! Every transition happens under the scheduler lock.

use crate::resource::ResourceId;
use crate::uncontrolled::UncontrolledId;
use coyote_strategy::OperationRef;
use coyote_trace::{OperationGroup, OperationId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Condvar};

/// Scheduling status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Can be scheduled.
    Enabled,
    /// Waiting for other operations, uncontrolled work, or a condition.
    Waiting,
    /// Waiting for a modeled resource to be released.
    BlockedOnResource,
    /// Waiting for a message on a modeled channel.
    BlockedOnReceive,
    /// Explicitly paused; not schedulable until resumed.
    Paused,
    Completed,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enabled => "enabled",
            Self::Waiting => "waiting",
            Self::BlockedOnResource => "blocked on resource",
            Self::BlockedOnReceive => "blocked on receive",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Predicate of a `wait_until` call.
pub(crate) type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

/// What a blocked operation is waiting for.
///
/// Resource waits remember the resource generation observed before
/// blocking; any signal bumps the generation, so a wake-up between the
/// failed attempt and the block cannot be lost.
#[derive(Clone)]
pub(crate) enum BlockReason {
    Operations { ids: Vec<OperationId>, wait_all: bool },
    /// Evaluated under the scheduler lock; must not call into the runtime.
    Condition(Condition),
    Uncontrolled(UncontrolledId),
    Resource { id: ResourceId, generation: u64 },
    Receive { id: ResourceId, generation: u64 },
}

impl BlockReason {
    fn status(&self) -> OperationStatus {
        match self {
            Self::Operations { .. } | Self::Condition(_) | Self::Uncontrolled(_) => OperationStatus::Waiting,
            Self::Resource { .. } => OperationStatus::BlockedOnResource,
            Self::Receive { .. } => OperationStatus::BlockedOnReceive,
        }
    }
}

impl fmt::Debug for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operations { ids, wait_all } => f
                .debug_struct("Operations")
                .field("ids", ids)
                .field("wait_all", wait_all)
                .finish(),
            Self::Condition(_) => f.write_str("Condition(..)"),
            Self::Uncontrolled(id) => f.debug_tuple("Uncontrolled").field(id).finish(),
            Self::Resource { id, generation } => f
                .debug_struct("Resource")
                .field("id", id)
                .field("generation", generation)
                .finish(),
            Self::Receive { id, generation } => f
                .debug_struct("Receive")
                .field("id", id)
                .field("generation", generation)
                .finish(),
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operations { ids, wait_all } => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                let quantifier = if *wait_all { "all of" } else { "any of" };
                write!(f, "waiting for {} [{}]", quantifier, ids.join(", "))
            }
            Self::Condition(_) => f.write_str("waiting for a condition"),
            Self::Uncontrolled(id) => write!(f, "waiting for {}", id),
            Self::Resource { id, .. } => write!(f, "waiting to acquire {}", id),
            Self::Receive { id, .. } => write!(f, "waiting to receive from {}", id),
        }
    }
}

/// A unit of schedulable work.
pub struct ControlledOperation {
    id: OperationId,
    name: String,
    group: OperationGroup,
    status: OperationStatus,
    reason: Option<BlockReason>,
    /// Notified when this operation is scheduled or the iteration ends.
    pub(crate) signal: Arc<Condvar>,
    /// Nesting depth of `suppress_interleavings`.
    pub(crate) suppression_depth: u32,
}

impl ControlledOperation {
    pub(crate) fn new(id: OperationId, name: impl Into<String>, group: OperationGroup) -> Self {
        Self {
            id,
            name: name.into(),
            group,
            status: OperationStatus::Enabled,
            reason: None,
            signal: Arc::new(Condvar::new()),
            suppression_depth: 0,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> OperationGroup {
        self.group
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn is_enabled(&self) -> bool {
        self.status == OperationStatus::Enabled
    }

    pub fn is_completed(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    /// Neither runnable nor finished.
    pub fn is_blocked(&self) -> bool {
        !self.is_enabled() && !self.is_completed()
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppression_depth > 0
    }

    pub(crate) fn reason(&self) -> Option<&BlockReason> {
        self.reason.as_ref()
    }

    pub(crate) fn as_ref(&self) -> OperationRef {
        OperationRef::new(self.id, self.group)
    }

    pub fn info(&self) -> OperationInfo {
        OperationInfo {
            id: self.id,
            name: self.name.clone(),
            group: self.group,
            status: self.status,
        }
    }

    /// Human readable blocking description for deadlock reports.
    pub(crate) fn describe_blocking(&self) -> String {
        match (&self.reason, self.status) {
            (Some(reason), _) => format!("'{}' ({}) is {}", self.name, self.id, reason),
            (None, status) => format!("'{}' ({}) is {}", self.name, self.id, status),
        }
    }

    // ─── Transitions ────────────────────────────────────────────────

    /// The caller resumes as enabled once its wait is over.
    pub(crate) fn schedule(&mut self) {
        debug_assert!(!self.is_completed(), "{} scheduled after completion", self.id);
        self.status = OperationStatus::Enabled;
        self.reason = None;
    }

    pub(crate) fn block(&mut self, reason: BlockReason) {
        debug_assert!(self.is_enabled(), "{} blocked while {}", self.id, self.status);
        self.status = reason.status();
        self.reason = Some(reason);
    }

    /// Re-enable a blocked (not paused) operation.
    pub(crate) fn unblock(&mut self) {
        if matches!(
            self.status,
            OperationStatus::Waiting | OperationStatus::BlockedOnResource | OperationStatus::BlockedOnReceive
        ) {
            self.status = OperationStatus::Enabled;
            self.reason = None;
        }
    }

    pub(crate) fn pause(&mut self) -> bool {
        if self.is_enabled() {
            self.status = OperationStatus::Paused;
            true
        } else {
            false
        }
    }

    pub(crate) fn resume(&mut self) -> bool {
        if self.status == OperationStatus::Paused {
            self.status = OperationStatus::Enabled;
            true
        } else {
            false
        }
    }

    pub(crate) fn complete(&mut self) {
        self.status = OperationStatus::Completed;
        self.reason = None;
        self.suppression_depth = 0;
    }
}

impl fmt::Debug for ControlledOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledOperation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group", &self.group)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .finish()
    }
}

/// Snapshot of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub id: OperationId,
    pub name: String,
    pub group: OperationGroup,
    pub status: OperationStatus,
}

//! Generation-counted resources: the building block of modeled
//! synchronization primitives.
//!
//! A modeled primitive keeps its own state (a locked flag, a permit count,
//! a queue) and uses a [`Resource`] to block operations until that state
//! changes:
//!
//! ```text
//!   let observed = resource.generation();
//!   if !try_acquire() {            // re-check after reading the generation
//!       resource.wait(observed);   // blocks until signal() bumps it
//!   }
//! ```
//!
//! [`Resource::signal`] bumps the generation and may be called from any
//! thread, including uncontrolled ones.

use crate::operation::BlockReason;
use crate::runtime::Runtime;
use coyote_trace::SchedulingPointType;
use std::fmt;

/// Identifier of a resource within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub(crate) u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource{}", self.0)
    }
}

/// A wait/signal point controlled by the scheduler.
pub struct Resource {
    runtime: Runtime,
    id: ResourceId,
}

impl Resource {
    pub fn new(runtime: &Runtime) -> Self {
        let id = runtime.register_resource();
        Self {
            runtime: runtime.clone(),
            id,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Number of signals so far.
    pub fn generation(&self) -> u64 {
        self.runtime.resource_generation(self.id)
    }

    /// Block until the generation moves past `observed`.
    pub fn wait(&self, observed: u64) {
        self.runtime.wait_for(
            "Resource::wait",
            BlockReason::Resource {
                id: self.id,
                generation: observed,
            },
            SchedulingPointType::Acquire,
        );
    }

    /// Like [`Resource::wait`], but the waiter is reported as blocked on
    /// receive.
    pub fn wait_to_receive(&self, observed: u64) {
        self.runtime.wait_for(
            "Resource::wait_to_receive",
            BlockReason::Receive {
                id: self.id,
                generation: observed,
            },
            SchedulingPointType::Receive,
        );
    }

    /// Wake every operation waiting on this resource.
    pub fn signal(&self) {
        self.runtime.signal_resource(self.id);
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource").field("id", &self.id).finish()
    }
}

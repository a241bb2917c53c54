//! Concurrency the scheduler does not control.
//!
//! Threads started with [`Runtime::spawn_uncontrolled`] (or work announced
//! with [`Runtime::track_uncontrolled`]) run freely next to the controlled
//! operations. The scheduler only tracks whether they are still running,
//! so that a controlled operation blocked on their behalf is not mistaken
//! for a deadlock until `deadlock_timeout` passes without progress.

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use std::collections::BTreeMap;
use std::fmt;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UncontrolledId(pub(crate) u64);

impl fmt::Display for UncontrolledId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uncontrolled{}", self.0)
    }
}

/// Uncontrolled work of one iteration.
#[derive(Debug, Default)]
pub(crate) struct UncontrolledTracker {
    active: BTreeMap<UncontrolledId, String>,
    names: BTreeMap<UncontrolledId, String>,
    next_id: u64,
}

impl UncontrolledTracker {
    pub(crate) fn register(&mut self, name: &str) -> UncontrolledId {
        let id = UncontrolledId(self.next_id);
        self.next_id += 1;
        self.active.insert(id, name.to_string());
        self.names.insert(id, name.to_string());
        id
    }

    /// Returns false if `id` was already finished.
    pub(crate) fn finish(&mut self, id: UncontrolledId) -> bool {
        self.active.remove(&id).is_some()
    }

    pub(crate) fn is_finished(&self, id: UncontrolledId) -> bool {
        !self.active.contains_key(&id)
    }

    pub(crate) fn name(&self, id: UncontrolledId) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or("<unknown>")
    }

    pub(crate) fn active_names(&self) -> Vec<&str> {
        self.active.values().map(String::as_str).collect()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Uncontrolled work registered so far, finished or not.
    pub(crate) fn total(&self) -> usize {
        self.names.len()
    }
}

/// Handle to a thread started with [`Runtime::spawn_uncontrolled`].
pub struct UncontrolledHandle<T> {
    pub(crate) id: UncontrolledId,
    pub(crate) runtime: Runtime,
    pub(crate) name: String,
    pub(crate) thread: thread::JoinHandle<T>,
}

impl<T> UncontrolledHandle<T> {
    pub fn id(&self) -> UncontrolledId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread to finish.
    ///
    /// From a controlled operation this is an interaction with uncontrolled
    /// concurrency: under [`PartialControl::Strict`](crate::PartialControl)
    /// it fails the iteration, with fuzzing fallback it switches the
    /// iteration to fuzzing.
    pub fn join(self) -> Result<T, RuntimeError> {
        self.runtime.wait_for_uncontrolled(self.id);
        self.thread
            .join()
            .map_err(|payload| RuntimeError::UncontrolledPanicked {
                name: self.name,
                message: crate::runtime::panic_message(payload.as_ref()),
            })
    }
}

impl<T> fmt::Debug for UncontrolledHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UncontrolledHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Marks uncontrolled work as running until dropped.
#[must_use = "the work is considered finished as soon as the guard is dropped"]
pub struct UncontrolledGuard {
    pub(crate) id: UncontrolledId,
    pub(crate) runtime: Runtime,
}

impl UncontrolledGuard {
    pub fn id(&self) -> UncontrolledId {
        self.id
    }
}

impl Drop for UncontrolledGuard {
    fn drop(&mut self) {
        self.runtime.finish_uncontrolled(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_counts_active_and_total() {
        let mut tracker = UncontrolledTracker::default();
        let a = tracker.register("timer");
        let b = tracker.register("socket");
        assert_eq!(tracker.active_count(), 2);
        assert_eq!(tracker.active_names(), vec!["timer", "socket"]);

        assert!(tracker.finish(a));
        assert!(!tracker.finish(a));
        assert!(tracker.is_finished(a));
        assert!(!tracker.is_finished(b));
        assert_eq!(tracker.active_count(), 1);
        assert_eq!(tracker.total(), 2);
        assert_eq!(tracker.name(a), "timer");
    }
}

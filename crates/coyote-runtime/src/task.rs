//! Handles to controlled operations.

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use coyote_trace::OperationId;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Owned permission to join a controlled operation.
pub struct JoinHandle<T> {
    id: OperationId,
    runtime: Runtime,
    result: Arc<Mutex<Option<T>>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: OperationId, runtime: Runtime, result: Arc<Mutex<Option<T>>>) -> Self {
        Self { id, runtime, result }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Block until the operation completes (a `join` scheduling point) and
    /// take its result. Fails if the operation panicked or was canceled.
    pub fn join(self) -> Result<T, RuntimeError> {
        self.runtime.wait_for_operations(&[self.id], true);
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(RuntimeError::OperationCanceled(self.id))
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle").field("id", &self.id).finish()
    }
}

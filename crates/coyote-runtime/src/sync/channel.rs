use crate::resource::Resource;
use crate::runtime::Runtime;
use coyote_trace::SchedulingPointType;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

struct Shared<T> {
    resource: Resource,
    queue: Mutex<VecDeque<T>>,
}

/// An unbounded FIFO channel. Clones share the same queue.
///
/// `recv` on an empty channel blocks the operation as blocked-on-receive
/// until a message arrives. Sends may come from uncontrolled threads when
/// partial control is allowed.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Channel<T> {
    /// # Panics
    ///
    /// Outside an operation of a running iteration.
    pub fn new() -> Self {
        Self::new_in(&Runtime::current_or_panic("Channel::new"))
    }

    pub fn new_in(runtime: &Runtime) -> Self {
        Self {
            shared: Arc::new(Shared {
                resource: Resource::new(runtime),
                queue: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn send(&self, value: T) {
        self.queue().push_back(value);
        self.shared.resource.signal();
        self.shared.resource.runtime().schedule_next(SchedulingPointType::Send);
    }

    pub fn recv(&self) -> T {
        self.shared.resource.runtime().schedule_next(SchedulingPointType::Receive);
        loop {
            if let Some(value) = self.pop() {
                return value;
            }
            let observed = self.shared.resource.generation();
            if let Some(value) = self.pop() {
                return value;
            }
            self.shared.resource.wait_to_receive(observed);
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.shared.resource.runtime().schedule_next(SchedulingPointType::Receive);
        self.pop()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    fn pop(&self) -> Option<T> {
        self.queue().pop_front()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("resource", &self.shared.resource.id())
            .field("len", &self.len())
            .finish()
    }
}

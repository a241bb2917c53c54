use crate::runtime::Runtime;
use coyote_trace::SchedulingPointType;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// A shared memory cell. Every read and write is a scheduling point, so
/// races between read-modify-write sequences are explored.
pub struct SharedRegister<T> {
    runtime: Runtime,
    value: Mutex<T>,
}

impl<T: Clone> SharedRegister<T> {
    /// # Panics
    ///
    /// Outside an operation of a running iteration.
    pub fn new(value: T) -> Self {
        Self::new_in(&Runtime::current_or_panic("SharedRegister::new"), value)
    }

    pub fn new_in(runtime: &Runtime, value: T) -> Self {
        Self {
            runtime: runtime.clone(),
            value: Mutex::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.runtime.schedule_next(SchedulingPointType::Read);
        self.value.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, value: T) {
        self.runtime.schedule_next(SchedulingPointType::Write);
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Atomic read-modify-write; a single write scheduling point.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.runtime.schedule_next(SchedulingPointType::Write);
        f(&mut self.value.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedRegister<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedRegister")
            .field(&*self.value.lock().unwrap_or_else(PoisonError::into_inner))
            .finish()
    }
}

use crate::resource::Resource;
use crate::runtime::Runtime;
use coyote_trace::SchedulingPointType;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::PoisonError;
use std::thread;

/// A mutual-exclusion lock whose acquire and release are scheduling points.
pub struct Mutex<T> {
    resource: Resource,
    locked: AtomicBool,
    data: std::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    /// # Panics
    ///
    /// Outside an operation of a running iteration.
    pub fn new(value: T) -> Self {
        Self::new_in(&Runtime::current_or_panic("Mutex::new"), value)
    }

    pub fn new_in(runtime: &Runtime, value: T) -> Self {
        Self {
            resource: Resource::new(runtime),
            locked: AtomicBool::new(false),
            data: std::sync::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.resource.runtime().schedule_next(SchedulingPointType::Acquire);
        loop {
            if self.try_acquire() {
                break;
            }
            let observed = self.resource.generation();
            if self.try_acquire() {
                break;
            }
            self.resource.wait(observed);
        }
        self.guard()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.resource.runtime().schedule_next(SchedulingPointType::Acquire);
        self.try_acquire().then(|| self.guard())
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            data: Some(self.data.lock().unwrap_or_else(PoisonError::into_inner)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("resource", &self.resource.id())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Releases the lock when dropped.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    /// Released before the lock so the next owner never blocks on it.
    data: Option<std::sync::MutexGuard<'a, T>>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.data {
            Some(data) => data,
            None => unreachable!("mutex guard accessed after release"),
        }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.data {
            Some(data) => data,
            None => unreachable!("mutex guard accessed after release"),
        }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.data.take();
        self.mutex.locked.store(false, Ordering::Release);
        self.mutex.resource.signal();
        if !thread::panicking() {
            self.mutex.resource.runtime().schedule_next(SchedulingPointType::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Configuration, FailureKind, IterationEnd, IterationOptions};
    use coyote_strategy::RandomStrategy;
    use std::sync::Arc;
    use std::time::Duration;

    fn run<F: FnOnce() + Send + 'static>(seed: u64, test: F) -> crate::IterationResult {
        let config = Configuration::default()
            .with_seed(seed)
            .with_deadlock_timeout(Duration::from_millis(500));
        Runtime::new(config, Box::new(RandomStrategy::new(seed)), IterationOptions::new(0)).run(test)
    }

    #[test]
    fn increments_are_not_lost() {
        for seed in 0..5 {
            let result = run(seed, || {
                let rt = Runtime::current().unwrap();
                let counter = Arc::new(Mutex::new(0u32));
                let workers: Vec<_> = (0..3)
                    .map(|i| {
                        let counter = Arc::clone(&counter);
                        rt.spawn(&format!("w{}", i), move || {
                            for _ in 0..3 {
                                let mut guard = counter.lock();
                                let read = *guard;
                                Runtime::current().unwrap().yield_now();
                                *guard = read + 1;
                            }
                        })
                        .unwrap()
                    })
                    .collect();
                for worker in workers {
                    worker.join().unwrap();
                }
                assert_eq!(*counter.lock(), 9);
            });
            assert_eq!(result.end, IterationEnd::Completed, "seed {}", seed);
        }
    }

    #[test]
    fn try_lock_fails_while_held() {
        let result = run(1, || {
            let mutex = Mutex::new(5);
            let guard = mutex.lock();
            assert!(mutex.is_locked());
            assert!(mutex.try_lock().is_none());
            drop(guard);
            assert_eq!(*mutex.try_lock().unwrap(), 5);
        });
        assert_eq!(result.end, IterationEnd::Completed);
    }

    #[test]
    fn relocking_in_the_same_operation_deadlocks() {
        let result = run(1, || {
            let mutex = Mutex::new(());
            let _first = mutex.lock();
            let _second = mutex.lock();
        });
        let failure = result.end.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Deadlock);
        assert!(failure.message.contains("is waiting to acquire resource0"));
    }
}

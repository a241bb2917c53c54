use crate::resource::Resource;
use crate::runtime::Runtime;
use coyote_trace::SchedulingPointType;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A counting semaphore whose acquire and release are scheduling points.
#[derive(Debug)]
pub struct Semaphore {
    resource: Resource,
    permits: AtomicUsize,
}

impl Semaphore {
    /// # Panics
    ///
    /// Outside an operation of a running iteration.
    pub fn new(permits: usize) -> Self {
        Self::new_in(&Runtime::current_or_panic("Semaphore::new"), permits)
    }

    pub fn new_in(runtime: &Runtime, permits: usize) -> Self {
        Self {
            resource: Resource::new(runtime),
            permits: AtomicUsize::new(permits),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.load(Ordering::Acquire)
    }

    pub fn acquire(&self) {
        self.resource.runtime().schedule_next(SchedulingPointType::Acquire);
        loop {
            if self.take_permit() {
                return;
            }
            let observed = self.resource.generation();
            if self.take_permit() {
                return;
            }
            self.resource.wait(observed);
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.resource.runtime().schedule_next(SchedulingPointType::Acquire);
        self.take_permit()
    }

    pub fn release(&self) {
        self.permits.fetch_add(1, Ordering::AcqRel);
        self.resource.signal();
        self.resource.runtime().schedule_next(SchedulingPointType::Release);
    }

    fn take_permit(&self) -> bool {
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Configuration, IterationEnd, IterationOptions};
    use coyote_strategy::RandomStrategy;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn permits_bound_concurrent_holders() {
        for seed in 0..5 {
            let exceeded = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&exceeded);
            let result = Runtime::new(
                Configuration::default().with_seed(seed),
                Box::new(RandomStrategy::new(seed)),
                IterationOptions::new(0),
            )
            .run(move || {
                let rt = Runtime::current().unwrap();
                let semaphore = Arc::new(Semaphore::new(2));
                let holders = Arc::new(AtomicUsize::new(0));
                let workers: Vec<_> = (0..4)
                    .map(|i| {
                        let (semaphore, holders, flag) = (Arc::clone(&semaphore), Arc::clone(&holders), Arc::clone(&flag));
                        rt.spawn(&format!("w{}", i), move || {
                            semaphore.acquire();
                            if holders.fetch_add(1, Ordering::SeqCst) >= 2 {
                                flag.store(true, Ordering::SeqCst);
                            }
                            Runtime::current().unwrap().yield_now();
                            holders.fetch_sub(1, Ordering::SeqCst);
                            semaphore.release();
                        })
                        .unwrap()
                    })
                    .collect();
                for worker in workers {
                    worker.join().unwrap();
                }
                assert_eq!(semaphore.available_permits(), 2);
            });
            assert_eq!(result.end, IterationEnd::Completed, "seed {}", seed);
            assert!(!exceeded.load(Ordering::SeqCst));
        }
    }
}

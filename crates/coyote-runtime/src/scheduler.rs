//! Scheduler state of one iteration.
//!
//! Everything here is protected by the runtime's single mutex. The
//! [`Runtime`](crate::Runtime) owns the blocking and hand-off protocol;
//! this module owns the bookkeeping it operates on: the operation table,
//! the trace, resource generations, uncontrolled work and monitors.

use crate::config::Configuration;
use crate::error::{Failure, FailureKind};
use crate::iteration::{IterationEnd, IterationOptions, IterationStats};
use crate::monitor::LivenessChecker;
use crate::operation::{BlockReason, ControlledOperation};
use crate::resource::ResourceId;
use crate::uncontrolled::UncontrolledTracker;
use coyote_strategy::{ExplorationStrategy, OperationRef};
use coyote_trace::{ExecutionTrace, OperationGroup, OperationId};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar};
use std::time::Instant;

/// Seed domain of the fuzzing RNG, kept apart from strategy seeds.
const FUZZ_SEED_DOMAIN: u64 = 0x4655_5A5A;

pub(crate) struct SchedulerState {
    pub(crate) operations: BTreeMap<OperationId, ControlledOperation>,
    next_operation_id: u64,
    /// Operation currently allowed to run.
    pub(crate) scheduled: Option<OperationId>,
    pub(crate) strategy: Option<Box<dyn ExplorationStrategy>>,
    pub(crate) trace: ExecutionTrace,
    /// Set once; the first end wins.
    pub(crate) end: Option<IterationEnd>,
    /// The iteration is over; parked operations are released and cancel.
    pub(crate) detached: bool,
    pub(crate) fuzzing: bool,
    pub(crate) replayable: bool,
    pub(crate) fuzz_rng: ChaCha8Rng,
    pub(crate) fuzz_steps: usize,
    resources: BTreeMap<ResourceId, u64>,
    next_resource_id: u64,
    pub(crate) uncontrolled: UncontrolledTracker,
    pub(crate) liveness: LivenessChecker,
    pub(crate) state_hashers: Vec<Box<dyn Fn() -> u64 + Send>>,
    /// Controlled threads that have not exited yet.
    pub(crate) live_threads: usize,
    pub(crate) max_enabled: usize,
    /// Last time a decision was made or external progress was observed.
    pub(crate) last_progress: Instant,
    /// A scheduling point is waiting for uncontrolled work.
    pub(crate) awaiting_uncontrolled: bool,
    pub(crate) max_steps: usize,
    /// Fairness of the strategy at the start of the iteration.
    pub(crate) fair: bool,
    progress: Arc<Condvar>,
}

impl SchedulerState {
    pub(crate) fn new(
        config: &Configuration,
        strategy: Box<dyn ExplorationStrategy>,
        options: &IterationOptions,
        progress: Arc<Condvar>,
    ) -> Self {
        let fair = strategy.is_fair();
        let max_steps = config.max_steps(fair);
        let fuzz_seed = config
            .seed
            .wrapping_add(FUZZ_SEED_DOMAIN)
            .wrapping_add(options.iteration as u64);
        Self {
            operations: BTreeMap::new(),
            next_operation_id: 0,
            scheduled: None,
            strategy: Some(strategy),
            trace: ExecutionTrace::new(),
            end: None,
            detached: false,
            fuzzing: options.fuzzing,
            replayable: !options.fuzzing,
            fuzz_rng: ChaCha8Rng::seed_from_u64(fuzz_seed),
            fuzz_steps: 0,
            resources: BTreeMap::new(),
            next_resource_id: 0,
            uncontrolled: UncontrolledTracker::default(),
            liveness: LivenessChecker::new(config.liveness_threshold(), config.liveness_cycle_detection),
            state_hashers: Vec::new(),
            live_threads: 0,
            max_enabled: 0,
            last_progress: Instant::now(),
            awaiting_uncontrolled: false,
            max_steps,
            fair,
            progress,
        }
    }

    // ─── Operations ─────────────────────────────────────────────────

    /// Register a new enabled operation. `group` defaults to a fresh group
    /// named after the operation.
    pub(crate) fn register_operation(&mut self, name: &str, group: Option<OperationGroup>) -> OperationId {
        let id = OperationId(self.next_operation_id);
        self.next_operation_id += 1;
        let group = group.unwrap_or_else(|| OperationGroup::of(id));
        debug!("registered {} '{}' in {}", id, name, group);
        self.operations.insert(id, ControlledOperation::new(id, name, group));
        id
    }

    pub(crate) fn operation(&self, id: OperationId) -> Option<&ControlledOperation> {
        self.operations.get(&id)
    }

    pub(crate) fn operation_mut(&mut self, id: OperationId) -> Option<&mut ControlledOperation> {
        self.operations.get_mut(&id)
    }

    pub(crate) fn operation_name(&self, id: OperationId) -> String {
        self.operations
            .get(&id)
            .map(|op| op.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn operation_ref(&self, id: OperationId) -> OperationRef {
        self.operations
            .get(&id)
            .map(ControlledOperation::as_ref)
            .unwrap_or_else(|| OperationRef::new(id, OperationGroup::of(id)))
    }

    /// Enabled operations sorted by id.
    pub(crate) fn enabled_operations(&self) -> Vec<OperationRef> {
        self.operations
            .values()
            .filter(|op| op.is_enabled())
            .map(ControlledOperation::as_ref)
            .collect()
    }

    pub(crate) fn has_blocked(&self) -> bool {
        self.operations.values().any(ControlledOperation::is_blocked)
    }

    pub(crate) fn all_completed(&self) -> bool {
        self.operations.values().all(ControlledOperation::is_completed)
    }

    /// Re-enable every blocked operation whose reason is satisfied.
    pub(crate) fn try_enable_operations(&mut self) {
        let ready: Vec<OperationId> = self
            .operations
            .values()
            .filter(|op| op.reason().is_some_and(|reason| self.is_satisfied(reason)))
            .map(ControlledOperation::id)
            .collect();
        for id in ready {
            if let Some(op) = self.operations.get_mut(&id) {
                debug!("{} '{}' unblocked", id, op.name());
                op.unblock();
            }
        }
    }

    pub(crate) fn is_satisfied(&self, reason: &BlockReason) -> bool {
        let completed = |id: &OperationId| self.operations.get(id).map_or(true, ControlledOperation::is_completed);
        match reason {
            BlockReason::Operations { ids, wait_all: true } => ids.iter().all(completed),
            BlockReason::Operations { ids, wait_all: false } => ids.is_empty() || ids.iter().any(completed),
            BlockReason::Condition(condition) => condition(),
            BlockReason::Uncontrolled(id) => self.uncontrolled.is_finished(*id),
            BlockReason::Resource { id, generation } | BlockReason::Receive { id, generation } => {
                self.resources.get(id).map_or(true, |current| current != generation)
            }
        }
    }

    // ─── Resources ──────────────────────────────────────────────────

    pub(crate) fn register_resource(&mut self) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.insert(id, 0);
        id
    }

    pub(crate) fn resource_generation(&self, id: ResourceId) -> u64 {
        self.resources.get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn signal_resource(&mut self, id: ResourceId) {
        if let Some(generation) = self.resources.get_mut(&id) {
            *generation += 1;
        }
        self.mark_progress();
    }

    // ─── Progress and ending ────────────────────────────────────────

    pub(crate) fn mark_progress(&mut self) {
        self.last_progress = Instant::now();
        self.progress.notify_all();
    }

    /// Record a failure and end the iteration. Only the first end counts.
    pub(crate) fn fail(&mut self, failure: Failure) {
        if self.end.is_some() {
            debug!("ignoring failure after iteration end: {}", failure);
            return;
        }
        let failure = failure.at(self.scheduled, self.trace.len());
        if failure.kind.is_internal() {
            warn!("internal error at step {}: {}", failure.step, failure.message);
        } else {
            info!("bug found at step {}: {}", failure.step, failure);
        }
        self.end(IterationEnd::Failed(failure));
    }

    /// End the iteration and release every parked thread.
    pub(crate) fn end(&mut self, end: IterationEnd) {
        if self.end.is_none() {
            debug!("iteration ended after {} steps: {}", self.trace.len(), end);
            self.end = Some(end);
        }
        self.detached = true;
        for op in self.operations.values() {
            op.signal.notify_all();
        }
        self.progress.notify_all();
    }

    /// All operations finished: check end-of-execution liveness.
    pub(crate) fn complete_iteration(&mut self) {
        match self.liveness.check_end_of_execution() {
            Some(failure) => self.fail(failure),
            None => self.end(IterationEnd::Completed),
        }
    }

    /// The step bound was hit at a scheduling point or choice.
    pub(crate) fn reach_step_bound(&mut self, fair: bool, fail_on_max_steps: bool) {
        if fair {
            if let Some(failure) = self.liveness.check_end_of_execution() {
                self.fail(failure);
                return;
            }
        }
        if fail_on_max_steps {
            let message = format!("Scheduling steps bound of {} reached.", self.max_steps);
            self.fail(Failure::new(FailureKind::MaxStepsReached, message));
        } else {
            debug!("step bound of {} reached", self.max_steps);
            self.end(IterationEnd::StepBoundReached);
        }
    }

    pub(crate) fn step_bound_reached(&self) -> bool {
        let steps = if self.fuzzing { self.fuzz_steps } else { self.trace.len() };
        steps >= self.max_steps
    }

    pub(crate) fn switch_to_fuzzing(&mut self, reason: &str) {
        if self.fuzzing {
            return;
        }
        warn!("switching to fuzzing at step {}: {}", self.trace.len(), reason);
        self.fuzzing = true;
        self.replayable = false;
        for op in self.operations.values() {
            op.signal.notify_all();
        }
        self.progress.notify_all();
    }

    // ─── Reports ────────────────────────────────────────────────────

    pub(crate) fn deadlock_message(&self) -> String {
        let blocked: Vec<String> = self
            .operations
            .values()
            .filter(|op| op.is_blocked())
            .map(ControlledOperation::describe_blocking)
            .collect();
        format!(
            "Deadlock detected. No controlled operation is enabled: {}.",
            blocked.join("; ")
        )
    }

    pub(crate) fn potential_deadlock_message(&self, timeout_ms: u128) -> String {
        let blocked: Vec<String> = self
            .operations
            .values()
            .filter(|op| op.is_blocked())
            .map(ControlledOperation::describe_blocking)
            .collect();
        let running = self
            .scheduled
            .and_then(|id| self.operations.get(&id))
            .filter(|op| op.is_enabled());
        let uncontrolled = self.uncontrolled.active_names();
        let mut message = format!("Potential deadlock detected. No progress within {}ms", timeout_ms);
        if let Some(op) = running {
            message.push_str(&format!(". '{}' ({}) is still running", op.name(), op.id()));
        }
        if !blocked.is_empty() {
            message.push_str(&format!(": {}", blocked.join("; ")));
        }
        if !uncontrolled.is_empty() {
            message.push_str(&format!(". Uncontrolled work still running: [{}]", uncontrolled.join(", ")));
        }
        message.push('.');
        message
    }

    /// Hash of the program state for liveness cycle detection.
    pub(crate) fn program_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for op in self.operations.values() {
            op.id().hash(&mut hasher);
            op.status().hash(&mut hasher);
        }
        self.scheduled.hash(&mut hasher);
        for hash_state in &self.state_hashers {
            hash_state().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Account a scheduling step in the monitors.
    pub(crate) fn check_liveness_step(&mut self) {
        if self.liveness.is_empty() {
            return;
        }
        let hash = if self.liveness.uses_cycle_detection() {
            self.program_hash()
        } else {
            0
        };
        if let Some(failure) = self.liveness.on_step(hash) {
            self.fail(failure);
        }
    }

    pub(crate) fn stats(&self, elapsed: std::time::Duration) -> IterationStats {
        IterationStats {
            steps: self.trace.len(),
            max_enabled_operations: self.max_enabled,
            controlled_operations: self.operations.len(),
            uncontrolled_operations: self.uncontrolled.total(),
            fuzzing_steps: self.fuzz_steps,
            fuzzing: self.fuzzing,
            fair: self.fair,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coyote_strategy::RandomStrategy;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn state() -> SchedulerState {
        SchedulerState::new(
            &Configuration::default(),
            Box::new(RandomStrategy::new(1)),
            &IterationOptions::new(0),
            Arc::new(Condvar::new()),
        )
    }

    #[test]
    fn ids_are_dense_and_never_reused() {
        let mut state = state();
        let a = state.register_operation("main", Some(OperationGroup::ROOT));
        let b = state.register_operation("worker", None);
        assert_eq!(a, OperationId(0));
        assert_eq!(b, OperationId(1));
        assert_eq!(state.operation(b).unwrap().group(), OperationGroup(1));
        state.operation_mut(b).unwrap().complete();
        assert_eq!(state.register_operation("next", None), OperationId(2));
    }

    #[test]
    fn potential_deadlock_names_the_running_operation() {
        let mut state = state();
        let main = state.register_operation("main", Some(OperationGroup::ROOT));
        let worker = state.register_operation("worker", None);
        state.scheduled = Some(worker);
        assert_eq!(
            state.potential_deadlock_message(100),
            "Potential deadlock detected. No progress within 100ms. 'worker' (op1) is still running."
        );

        state.scheduled = Some(main);
        state.operation_mut(main).unwrap().block(BlockReason::Operations {
            ids: vec![worker],
            wait_all: true,
        });
        let message = state.potential_deadlock_message(100);
        assert!(!message.contains("still running"), "{}", message);
        assert!(message.contains("'main' (op0) is waiting for all of [op1]"), "{}", message);
    }

    #[test]
    fn join_waits_until_target_completes() {
        let mut state = state();
        let main = state.register_operation("main", None);
        let worker = state.register_operation("worker", None);
        state.operation_mut(main).unwrap().block(BlockReason::Operations {
            ids: vec![worker],
            wait_all: true,
        });
        state.try_enable_operations();
        assert_eq!(state.enabled_operations().len(), 1);
        assert!(state.has_blocked());

        state.operation_mut(worker).unwrap().complete();
        state.try_enable_operations();
        assert!(state.operation(main).unwrap().is_enabled());
    }

    #[test]
    fn resource_wait_is_satisfied_by_signal() {
        let mut state = state();
        let op = state.register_operation("main", None);
        let resource = state.register_resource();
        let generation = state.resource_generation(resource);
        state.operation_mut(op).unwrap().block(BlockReason::Resource {
            id: resource,
            generation,
        });
        state.try_enable_operations();
        assert!(!state.operation(op).unwrap().is_enabled());

        state.signal_resource(resource);
        state.try_enable_operations();
        assert!(state.operation(op).unwrap().is_enabled());
    }

    #[test]
    fn condition_wait_is_reevaluated() {
        let mut state = state();
        let op = state.register_operation("main", None);
        let flag = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&flag);
        state
            .operation_mut(op)
            .unwrap()
            .block(BlockReason::Condition(Arc::new(move || observed.load(Ordering::SeqCst))));
        state.try_enable_operations();
        assert!(!state.operation(op).unwrap().is_enabled());
        flag.store(true, Ordering::SeqCst);
        state.try_enable_operations();
        assert!(state.operation(op).unwrap().is_enabled());
    }

    #[test]
    fn first_failure_wins() {
        let mut state = state();
        state.fail(Failure::new(FailureKind::Assertion, "first"));
        state.fail(Failure::new(FailureKind::Deadlock, "second"));
        assert!(state.detached);
        let failure = state.end.as_ref().and_then(IterationEnd::failure).unwrap();
        assert_eq!(failure.message, "first");
    }

    #[test]
    fn deadlock_message_lists_blocked_operations() {
        let mut state = state();
        let a = state.register_operation("left", None);
        let b = state.register_operation("right", None);
        state.operation_mut(a).unwrap().block(BlockReason::Operations {
            ids: vec![b],
            wait_all: true,
        });
        state.operation_mut(b).unwrap().block(BlockReason::Operations {
            ids: vec![a],
            wait_all: true,
        });
        let message = state.deadlock_message();
        assert!(message.starts_with("Deadlock detected."));
        assert!(message.contains("'left' (op0) is waiting for all of [op1]"));
        assert!(message.contains("'right' (op1) is waiting for all of [op0]"));
    }

    #[test]
    fn step_bound_ends_quietly_unless_configured() {
        let mut quiet = state();
        quiet.reach_step_bound(false, false);
        assert_eq!(quiet.end, Some(IterationEnd::StepBoundReached));

        let mut loud = state();
        loud.reach_step_bound(false, true);
        let failure = loud.end.as_ref().and_then(IterationEnd::failure).unwrap();
        assert_eq!(failure.kind, FailureKind::MaxStepsReached);
    }
}

//! The controlled runtime of one iteration.
//!
//! Every controlled operation runs on its own native thread, but only the
//! *scheduled* operation is allowed to execute. All others are parked on
//! their own condition variable, paired with the single scheduler mutex.
//! When the scheduled operation reaches a scheduling point it asks the
//! strategy for the next operation, records the decision in the trace,
//! wakes the chosen operation and parks itself.
//!
//! # Architecture
//!
//! ```text
//!  engine thread              controlled threads (one per operation)
//!  ─────────────              ─────────────────────────────────────
//!  Runtime::run ──spawn──►  op0 "main"   op1 "worker"   op2 ...
//!      │                      │ running     │ parked       │ parked
//!      │ watchdog             │
//!      │ (deadline,           ▼ schedule_next(point)
//!      │  no progress)   ┌──────────────────────────────┐
//!      │                 │ Mutex<SchedulerState>        │
//!      │                 │  try_enable_operations       │
//!      │                 │  strategy.next_operation ────┼──► ExecutionTrace
//!      │                 │  scheduled = chosen          │
//!      │                 └──────────────┬───────────────┘
//!      │                                │ notify chosen.signal
//!      ▼                                ▼
//!  IterationResult            op1 runs, op0 parks
//! ```
//!
//! # Ending an iteration
//!
//! An iteration ends when every operation completed, a bug was found, the
//! step bound was reached or the deadline passed. Ending *detaches* the
//! runtime: parked threads wake up and unwind with a private cancellation
//! payload at their next entry point, so user destructors run. Threads that
//! do not exit within `deadlock_timeout` are abandoned.
//!
//! # Fuzzing mode
//!
//! When uncontrolled concurrency is detected and fuzzing fallback is
//! enabled, the iteration switches to fuzzing: all operations run freely,
//! scheduling points only inject a seeded random delay, and waits poll
//! their condition. The trace stops being a replayable record.

use crate::config::{Configuration, PartialControl};
use crate::error::{Failure, FailureKind, RuntimeError};
use crate::iteration::{IterationEnd, IterationOptions, IterationResult};
use crate::monitor::Monitor;
use crate::operation::{BlockReason, OperationInfo};
use crate::resource::ResourceId;
use crate::scheduler::SchedulerState;
use crate::task::JoinHandle;
use crate::uncontrolled::{UncontrolledGuard, UncontrolledHandle, UncontrolledId};
use coyote_strategy::{ExplorationStrategy, OperationRef, SchedulingRequest, StrategyError};
use coyote_trace::{ExecutionTrace, OperationGroup, OperationId, SchedulingPointType};
use log::{debug, info, warn};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on how long any internal wait sleeps before re-checking.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ═══════════════════════════════════════════════════════════════════════
//  Thread context
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct Context {
    runtime: Runtime,
    /// `None` on uncontrolled threads started by the runtime.
    operation: Option<OperationId>,
}

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

struct ContextGuard {
    previous: Option<Context>,
}

impl ContextGuard {
    fn enter(runtime: Runtime, operation: Option<OperationId>) -> Self {
        let previous = CONTEXT.with(|c| c.replace(Some(Context { runtime, operation })));
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = CONTEXT.try_with(|c| *c.borrow_mut() = previous);
    }
}

/// Unwind payload used to cancel operations of an ended iteration.
struct ExecutionCanceled;

fn cancel() -> ! {
    panic::resume_unwind(Box::new(ExecutionCanceled))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    Controlled(OperationId),
    Uncontrolled,
}

// ═══════════════════════════════════════════════════════════════════════
//  Runtime
// ═══════════════════════════════════════════════════════════════════════

struct Inner {
    config: Configuration,
    options: IterationOptions,
    state: Mutex<SchedulerState>,
    /// Notified on every event the engine thread or a pending wait may be
    /// interested in: resource signals, completions, iteration end.
    progress: Arc<Condvar>,
}

/// Handle to the runtime of one iteration. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    pub fn new(config: Configuration, strategy: Box<dyn ExplorationStrategy>, options: IterationOptions) -> Self {
        let progress = Arc::new(Condvar::new());
        let state = SchedulerState::new(&config, strategy, &options, Arc::clone(&progress));
        Self {
            inner: Arc::new(Inner {
                config,
                options,
                state: Mutex::new(state),
                progress,
            }),
        }
    }

    /// Runtime of the calling thread, if it belongs to an iteration.
    pub fn current() -> Option<Runtime> {
        CONTEXT
            .try_with(|c| c.borrow().as_ref().map(|ctx| ctx.runtime.clone()))
            .ok()
            .flatten()
    }

    pub(crate) fn current_or_panic(api: &str) -> Runtime {
        match Self::current() {
            Some(runtime) => runtime,
            None => panic!("coyote: {} must be called from an operation of a running iteration", api),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    pub fn iteration(&self) -> u32 {
        self.inner.options.iteration
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_same(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Operation of the calling thread, if it is a controlled thread of
    /// this runtime.
    fn controlled_caller(&self) -> Option<OperationId> {
        CONTEXT
            .try_with(|c| {
                c.borrow()
                    .as_ref()
                    .filter(|ctx| ctx.runtime.is_same(self))
                    .and_then(|ctx| ctx.operation)
            })
            .ok()
            .flatten()
    }

    /// Classify the caller of `api`; uncontrolled callers are subject to
    /// the partial-control policy.
    fn resolve_caller(&self, api: &str) -> Caller {
        if let Some(id) = self.controlled_caller() {
            return Caller::Controlled(id);
        }
        let mut state = self.lock();
        if !state.detached && !state.fuzzing {
            let thread_name = thread::current().name().unwrap_or("<unnamed>").to_string();
            if self.config().fuzzing_fallback {
                state.switch_to_fuzzing(&format!("'{}' invoked from uncontrolled thread '{}'", api, thread_name));
            } else if self.config().partial_control == PartialControl::Strict {
                state.fail(Failure::new(
                    FailureKind::UncontrolledConcurrency,
                    format!(
                        "'{}' was invoked from uncontrolled thread '{}' while the iteration is under controlled scheduling.",
                        api, thread_name
                    ),
                ));
            } else {
                debug!("'{}' invoked from uncontrolled thread '{}'", api, thread_name);
            }
        }
        Caller::Uncontrolled
    }

    /// Unwind the calling controlled thread if the iteration has ended.
    fn exit_if_detached(&self) {
        if thread::panicking() || self.controlled_caller().is_none() {
            return;
        }
        let detached = self.lock().detached;
        if detached {
            cancel();
        }
    }

    fn poll_progress<'a>(&'a self, state: MutexGuard<'a, SchedulerState>) -> MutexGuard<'a, SchedulerState> {
        let (state, _) = self
            .inner
            .progress
            .wait_timeout(state, POLL_INTERVAL)
            .unwrap_or_else(PoisonError::into_inner);
        state
    }

    // ─── Iteration ──────────────────────────────────────────────────

    /// Run `test` as the root operation and drive the iteration to its end.
    pub fn run<F>(self, test: F) -> IterationResult
    where
        F: FnOnce() + Send + 'static,
    {
        let started = Instant::now();
        let root = {
            let mut state = self.lock();
            let root = state.register_operation("main", Some(OperationGroup::ROOT));
            state.scheduled = Some(root);
            state.live_threads += 1;
            state.last_progress = Instant::now();
            root
        };
        debug!("iteration {} started", self.iteration());

        let runtime = self.clone();
        let spawned = thread::Builder::new()
            .name("coyote-main".to_string())
            .spawn(move || runtime.run_operation(root, test));
        if let Err(err) = spawned {
            let mut state = self.lock();
            state.live_threads -= 1;
            state.fail(Failure::new(
                FailureKind::Internal,
                format!("failed to start the main operation: {}", err),
            ));
        }

        let mut state = self.lock();
        while state.end.is_none() {
            state = self.poll_progress(state);
            if state.end.is_some() {
                break;
            }
            if let Some(deadline) = self.inner.options.deadline {
                if Instant::now() >= deadline {
                    warn!("iteration {} passed the run deadline", self.iteration());
                    state.end(IterationEnd::TimedOut);
                    break;
                }
            }
            if !state.awaiting_uncontrolled {
                let timeout = self.config().deadlock_timeout;
                if state.last_progress.elapsed() >= timeout {
                    let message = state.potential_deadlock_message(timeout.as_millis());
                    self.report_potential_deadlock(&mut state, message);
                }
            }
        }

        let grace = Instant::now() + self.config().deadlock_timeout;
        while state.live_threads > 0 {
            if Instant::now() >= grace {
                warn!(
                    "abandoning {} operation thread(s) that did not exit after iteration {}",
                    state.live_threads,
                    self.iteration()
                );
                break;
            }
            state = self.poll_progress(state);
        }

        let stats = state.stats(started.elapsed());
        let end = state.end.clone().unwrap_or(IterationEnd::Completed);
        debug!("iteration {} finished: {} ({} steps)", self.iteration(), end, stats.steps);
        IterationResult {
            end,
            trace: std::mem::replace(&mut state.trace, ExecutionTrace::new()),
            stats,
            strategy: state.strategy.take(),
            replayable: state.replayable,
        }
    }

    fn report_potential_deadlock(&self, state: &mut SchedulerState, message: String) {
        if self.config().report_potential_deadlocks_as_bugs {
            state.fail(Failure::new(FailureKind::PotentialDeadlock, message));
        } else {
            warn!("{}", message);
            state.end(IterationEnd::Stalled(message));
        }
    }

    /// Body of every controlled thread.
    fn run_operation<F: FnOnce()>(self, id: OperationId, body: F) {
        let context = ContextGuard::enter(self.clone(), Some(id));
        let started = {
            let state = self.lock();
            let state = self.wait_until_scheduled(state, id);
            !state.detached
        };
        if started {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
                if !payload.is::<ExecutionCanceled>() {
                    let mut state = self.lock();
                    let message = format!(
                        "Operation '{}' panicked: {}",
                        state.operation_name(id),
                        panic_message(payload.as_ref())
                    );
                    state.fail(Failure::new(FailureKind::UnhandledPanic, message));
                }
            }
        }
        self.complete_operation(id);
        drop(context);

        let mut state = self.lock();
        state.live_threads = state.live_threads.saturating_sub(1);
        self.inner.progress.notify_all();
    }

    /// Mark `id` completed and hand execution on. Never unwinds.
    fn complete_operation(&self, id: OperationId) {
        let mut state = self.lock();
        if let Some(op) = state.operation_mut(id) {
            op.complete();
        }
        debug!("{} completed", id);
        state.mark_progress();
        if state.detached {
            return;
        }
        if state.fuzzing {
            if state.all_completed() {
                state.complete_iteration();
            }
            return;
        }
        drop(self.schedule_locked(state, id, SchedulingPointType::Complete));
    }

    // ─── Scheduling ─────────────────────────────────────────────────

    fn wait_until_scheduled<'a>(
        &'a self,
        mut state: MutexGuard<'a, SchedulerState>,
        id: OperationId,
    ) -> MutexGuard<'a, SchedulerState> {
        let Some(signal) = state.operation(id).map(|op| Arc::clone(&op.signal)) else {
            return state;
        };
        while state.scheduled != Some(id) && !state.detached && !state.fuzzing {
            state = signal.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    /// Make a scheduling decision on behalf of `current` and park it until
    /// it is scheduled again. Returns early when the iteration ends.
    fn schedule_locked<'a>(
        &'a self,
        mut state: MutexGuard<'a, SchedulerState>,
        current: OperationId,
        point: SchedulingPointType,
    ) -> MutexGuard<'a, SchedulerState> {
        if state.detached || state.fuzzing {
            return state;
        }
        let skip = state.operation(current).map_or(true, |op| {
            op.is_suppressed() && op.is_enabled() && point != SchedulingPointType::Complete
        });
        if skip {
            return state;
        }

        state.try_enable_operations();
        let mut enabled = state.enabled_operations();
        if enabled.is_empty() && !state.has_blocked() {
            state.complete_iteration();
            return state;
        }
        if state.step_bound_reached() {
            let fair = state.strategy.as_ref().is_some_and(|s| s.is_fair());
            state.reach_step_bound(fair, self.config().fail_on_max_steps);
            return state;
        }
        if enabled.is_empty() {
            state = self.await_progress_or_deadlock(state);
            if state.detached || state.fuzzing {
                return state;
            }
            enabled = state.enabled_operations();
        }
        state.max_enabled = state.max_enabled.max(enabled.len());

        let current_ref = state.operation_ref(current);
        let choice = {
            let request = SchedulingRequest {
                enabled: &enabled,
                current: current_ref,
                point,
            };
            match state.strategy.as_mut() {
                Some(strategy) => strategy.next_operation(&request),
                None => Err(StrategyError::NoEnabledOperations),
            }
        };
        let chosen: OperationRef = match choice {
            Ok(id) => match enabled.iter().find(|op| op.id == id) {
                Some(op) => *op,
                None => {
                    state.fail(Failure::new(
                        FailureKind::Internal,
                        format!("strategy chose {} which is not enabled at {}", id, point),
                    ));
                    return state;
                }
            },
            Err(err) => {
                state.fail(Failure::new(FailureKind::Internal, err.to_string()));
                return state;
            }
        };

        state
            .trace
            .add_scheduling_decision(current_ref.id, current_ref.group, point, chosen.id, chosen.group);
        state.last_progress = Instant::now();
        state.check_liveness_step();
        if state.detached {
            return state;
        }

        if chosen.id != current {
            debug!("{} -> {} at {}", current, chosen.id, point);
            state.scheduled = Some(chosen.id);
            if let Some(op) = state.operation(chosen.id) {
                op.signal.notify_all();
            }
            let completed = state.operation(current).map_or(true, |op| op.is_completed());
            if !completed {
                state = self.wait_until_scheduled(state, current);
            }
        }
        state
    }

    /// Nothing is enabled but something is blocked. Give uncontrolled work
    /// up to `deadlock_timeout` without progress to unblock it, otherwise
    /// report a (potential) deadlock.
    fn await_progress_or_deadlock<'a>(
        &'a self,
        mut state: MutexGuard<'a, SchedulerState>,
    ) -> MutexGuard<'a, SchedulerState> {
        let timeout = self.config().deadlock_timeout;
        while state.uncontrolled.active_count() > 0 && !state.detached && !state.fuzzing {
            state.try_enable_operations();
            if !state.enabled_operations().is_empty() {
                state.awaiting_uncontrolled = false;
                return state;
            }
            let waited = state.last_progress.elapsed();
            if waited >= timeout {
                state.awaiting_uncontrolled = false;
                let message = state.potential_deadlock_message(timeout.as_millis());
                self.report_potential_deadlock(&mut state, message);
                return state;
            }
            state.awaiting_uncontrolled = true;
            let (guard, _) = self
                .inner
                .progress
                .wait_timeout(state, (timeout - waited).min(POLL_INTERVAL))
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        state.awaiting_uncontrolled = false;
        if state.detached || state.fuzzing {
            return state;
        }

        state.try_enable_operations();
        if state.enabled_operations().is_empty() {
            let message = state.deadlock_message();
            if self.config().report_deadlocks_as_bugs {
                state.fail(Failure::new(FailureKind::Deadlock, message));
            } else {
                warn!("{}", message);
                state.end(IterationEnd::Stalled(message));
            }
        }
        state
    }

    fn schedule_as(&self, current: OperationId, point: SchedulingPointType) {
        let state = self.lock();
        if state.fuzzing {
            drop(state);
            self.fuzz_point();
            return;
        }
        drop(self.schedule_locked(state, current, point));
        self.exit_if_detached();
    }

    /// Inject a random delay in place of a scheduling decision.
    fn fuzz_point(&self) {
        let delay = {
            let mut state = self.lock();
            if state.detached {
                None
            } else {
                state.fuzz_steps += 1;
                state.last_progress = Instant::now();
                if state.step_bound_reached() {
                    let fair = state.strategy.as_ref().is_some_and(|s| s.is_fair());
                    state.reach_step_bound(fair, self.config().fail_on_max_steps);
                    None
                } else {
                    let max = self.config().max_fuzz_delay.as_micros() as u64;
                    Some(Duration::from_micros(state.fuzz_rng.gen_range(0..=max)))
                }
            }
        };
        if let Some(delay) = delay.filter(|d| !d.is_zero()) {
            thread::sleep(delay);
        }
        self.exit_if_detached();
    }

    /// A scheduling point of the calling operation.
    pub fn schedule_next(&self, point: SchedulingPointType) {
        match self.resolve_caller(point.name()) {
            Caller::Controlled(id) => self.schedule_as(id, point),
            Caller::Uncontrolled => {
                if self.is_fuzzing() {
                    self.fuzz_point();
                }
            }
        }
    }

    pub fn yield_now(&self) {
        self.schedule_next(SchedulingPointType::Yield);
    }

    pub fn is_fuzzing(&self) -> bool {
        self.lock().fuzzing
    }

    // ─── Nondeterministic choices ───────────────────────────────────

    /// Resolve a choice through the strategy and record it. Uncontrolled
    /// callers and fuzzing iterations draw from the fuzzing RNG instead.
    fn choose<T>(
        &self,
        api: &str,
        fuzz: impl FnOnce(&mut ChaCha8Rng) -> T,
        decide: impl FnOnce(&mut dyn ExplorationStrategy, OperationRef, &mut ExecutionTrace) -> Result<T, StrategyError>,
    ) -> T {
        let caller = self.resolve_caller(api);
        let mut state = self.lock();
        let value = match caller {
            Caller::Controlled(id) if !state.fuzzing && !state.detached => {
                if state.step_bound_reached() {
                    let fair = state.strategy.as_ref().is_some_and(|s| s.is_fair());
                    state.reach_step_bound(fair, self.config().fail_on_max_steps);
                    fuzz(&mut state.fuzz_rng)
                } else {
                    let current = state.operation_ref(id);
                    let st = &mut *state;
                    let result = match st.strategy.as_mut() {
                        Some(strategy) => decide(&mut **strategy, current, &mut st.trace),
                        None => Err(StrategyError::NoEnabledOperations),
                    };
                    match result {
                        Ok(value) => {
                            st.last_progress = Instant::now();
                            value
                        }
                        Err(err) => {
                            let value = fuzz(&mut st.fuzz_rng);
                            st.fail(Failure::new(FailureKind::Internal, err.to_string()));
                            value
                        }
                    }
                }
            }
            _ => fuzz(&mut state.fuzz_rng),
        };
        drop(state);
        self.exit_if_detached();
        value
    }

    pub fn random_bool(&self) -> bool {
        self.choose(
            "random_bool",
            |rng| rng.gen(),
            |strategy, current, trace| {
                let value = strategy.next_boolean(current)?;
                trace.add_boolean_decision(current.id, current.group, value);
                Ok(value)
            },
        )
    }

    /// A value in `[0, max_value)`; 0 when `max_value` is 0.
    pub fn random_integer(&self, max_value: u64) -> u64 {
        self.choose(
            "random_integer",
            |rng| if max_value == 0 { 0 } else { rng.gen_range(0..max_value) },
            |strategy, current, trace| {
                let value = strategy.next_integer(current, max_value)?;
                trace.add_integer_decision(current.id, current.group, value);
                Ok(value)
            },
        )
    }

    // ─── Operations ─────────────────────────────────────────────────

    /// Start a controlled operation in a new group.
    pub fn spawn<F, T>(&self, name: &str, body: F) -> Result<JoinHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_operation("spawn", name, false, body)
    }

    /// Start a controlled operation in the caller's group, as a
    /// continuation of the caller's logical task.
    pub fn spawn_continuation<F, T>(&self, name: &str, body: F) -> Result<JoinHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_operation("spawn_continuation", name, true, body)
    }

    fn spawn_operation<F, T>(
        &self,
        api: &'static str,
        name: &str,
        same_group: bool,
        body: F,
    ) -> Result<JoinHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let caller = match self.resolve_caller(api) {
            Caller::Controlled(id) => id,
            Caller::Uncontrolled => return Err(RuntimeError::NotControlled { api }),
        };
        let id = {
            let mut state = self.lock();
            let group = if same_group {
                state.operation(caller).map(|op| op.group())
            } else {
                None
            };
            let id = state.register_operation(name, group);
            state.live_threads += 1;
            id
        };

        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        let runtime = self.clone();
        let spawned = thread::Builder::new().name(format!("coyote-{}", name)).spawn(move || {
            runtime.run_operation(id, move || {
                let value = body();
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
            })
        });
        if let Err(err) = spawned {
            let mut state = self.lock();
            if let Some(op) = state.operation_mut(id) {
                op.complete();
            }
            state.live_threads = state.live_threads.saturating_sub(1);
            return Err(RuntimeError::Spawn(err));
        }

        self.schedule_as(caller, SchedulingPointType::Create);
        Ok(JoinHandle::new(id, self.clone(), result))
    }

    /// Block until all (or any) of `ids` completed.
    pub fn wait_for_operations(&self, ids: &[OperationId], wait_all: bool) {
        self.wait_for(
            "wait_for_operations",
            BlockReason::Operations {
                ids: ids.to_vec(),
                wait_all,
            },
            SchedulingPointType::Join,
        );
    }

    /// Block until `condition` holds. The condition is evaluated under the
    /// scheduler lock and must not call into the runtime.
    pub fn wait_until<C>(&self, condition: C)
    where
        C: Fn() -> bool + Send + Sync + 'static,
    {
        self.wait_for(
            "wait_until",
            BlockReason::Condition(Arc::new(condition)),
            SchedulingPointType::Wait,
        );
    }

    /// Block the caller until `reason` is satisfied.
    pub(crate) fn wait_for(&self, api: &str, reason: BlockReason, point: SchedulingPointType) {
        match self.resolve_caller(api) {
            Caller::Controlled(id) => {
                let mut state = self.lock();
                loop {
                    if state.detached || state.is_satisfied(&reason) {
                        break;
                    }
                    if state.fuzzing {
                        state = self.poll_progress(state);
                        continue;
                    }
                    if let Some(op) = state.operation_mut(id) {
                        op.block(reason.clone());
                    }
                    state = self.schedule_locked(state, id, point);
                }
                if !state.detached {
                    if let Some(op) = state.operation_mut(id) {
                        op.schedule();
                    }
                }
                drop(state);
                self.exit_if_detached();
            }
            Caller::Uncontrolled => {
                let mut state = self.lock();
                while !state.detached && !state.is_satisfied(&reason) {
                    state = self.poll_progress(state);
                }
            }
        }
    }

    /// Stop interleaving the caller with other operations until the
    /// matching [`Runtime::resume_interleavings`]. Calls nest. Blocking
    /// still hands execution on.
    pub fn suppress_interleavings(&self) {
        let Caller::Controlled(id) = self.resolve_caller("suppress_interleavings") else {
            return;
        };
        let mut state = self.lock();
        let depth = state.operation(id).map_or(0, |op| op.suppression_depth);
        if depth == 0 && !state.fuzzing {
            state = self.schedule_locked(state, id, SchedulingPointType::Suppress);
        }
        if let Some(op) = state.operation_mut(id) {
            op.suppression_depth += 1;
        }
        drop(state);
        self.exit_if_detached();
    }

    pub fn resume_interleavings(&self) {
        let Caller::Controlled(id) = self.resolve_caller("resume_interleavings") else {
            return;
        };
        let mut state = self.lock();
        let depth = state.operation(id).map_or(0, |op| op.suppression_depth);
        if depth == 0 {
            warn!("resume_interleavings in {} without a matching suppress_interleavings", id);
            return;
        }
        if let Some(op) = state.operation_mut(id) {
            op.suppression_depth -= 1;
        }
        if depth == 1 && !state.fuzzing {
            state = self.schedule_locked(state, id, SchedulingPointType::Resume);
        }
        drop(state);
        self.exit_if_detached();
    }

    /// Pause an enabled operation; it is not scheduled until resumed.
    /// Pausing the caller itself hands execution on.
    pub fn pause_operation(&self, target: OperationId) -> bool {
        let caller = self.resolve_caller("pause_operation");
        let mut state = self.lock();
        let paused = state.operation_mut(target).is_some_and(|op| op.pause());
        if paused && caller == Caller::Controlled(target) {
            state = self.schedule_locked(state, target, SchedulingPointType::Wait);
        }
        drop(state);
        self.exit_if_detached();
        paused
    }

    pub fn resume_operation(&self, target: OperationId) -> bool {
        let _ = self.resolve_caller("resume_operation");
        let mut state = self.lock();
        let resumed = state.operation_mut(target).is_some_and(|op| op.resume());
        if resumed {
            state.mark_progress();
        }
        resumed
    }

    /// The operation executing on the calling thread.
    pub fn executing_operation(&self) -> Option<OperationInfo> {
        let id = self.controlled_caller()?;
        self.lock().operation(id).map(|op| op.info())
    }

    pub fn current_operation(&self) -> Option<OperationId> {
        self.controlled_caller()
    }

    /// Snapshot of every operation registered in this iteration.
    pub fn operations(&self) -> Vec<OperationInfo> {
        self.lock().operations.values().map(|op| op.info()).collect()
    }

    // ─── Specification ──────────────────────────────────────────────

    /// Fail the iteration with an assertion failure unless `condition`.
    pub fn assert(&self, condition: bool, message: impl AsRef<str>) {
        if condition {
            return;
        }
        self.lock()
            .fail(Failure::new(FailureKind::Assertion, message.as_ref()));
        self.exit_if_detached();
    }

    pub fn register_monitor<M: Monitor + 'static>(&self, monitor: M) {
        self.lock().liveness.register(Box::new(monitor));
    }

    /// Deliver `event` to every registered monitor.
    pub fn notify_monitors<E: Any>(&self, event: &E) {
        {
            let mut state = self.lock();
            if let Err(failure) = state.liveness.notify(event) {
                state.fail(failure);
            }
        }
        self.exit_if_detached();
    }

    /// Contribute user state to the program hash used by liveness cycle
    /// detection.
    pub fn register_state_hasher<H>(&self, hasher: H)
    where
        H: Fn() -> u64 + Send + 'static,
    {
        self.lock().state_hashers.push(Box::new(hasher));
    }

    // ─── Resources ──────────────────────────────────────────────────

    pub(crate) fn register_resource(&self) -> ResourceId {
        self.lock().register_resource()
    }

    pub(crate) fn resource_generation(&self, id: ResourceId) -> u64 {
        self.lock().resource_generation(id)
    }

    pub(crate) fn signal_resource(&self, id: ResourceId) {
        self.lock().signal_resource(id);
    }

    // ─── Uncontrolled concurrency ───────────────────────────────────

    /// Start a thread the scheduler does not control.
    pub fn spawn_uncontrolled<F, T>(&self, name: &str, body: F) -> Result<UncontrolledHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = self.lock().uncontrolled.register(name);
        debug!("started uncontrolled '{}' ({})", name, id);
        let runtime = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("coyote-uncontrolled-{}", name))
            .spawn(move || {
                let _context = ContextGuard::enter(runtime.clone(), None);
                let _finished = UncontrolledGuard { id, runtime };
                body()
            });
        match spawned {
            Ok(thread) => Ok(UncontrolledHandle {
                id,
                runtime: self.clone(),
                name: name.to_string(),
                thread,
            }),
            Err(err) => {
                self.finish_uncontrolled(id);
                Err(RuntimeError::Spawn(err))
            }
        }
    }

    /// Announce uncontrolled work started outside the runtime; it counts
    /// as running until the guard is dropped.
    pub fn track_uncontrolled(&self, name: &str) -> UncontrolledGuard {
        let id = self.lock().uncontrolled.register(name);
        debug!("tracking uncontrolled '{}' ({})", name, id);
        UncontrolledGuard {
            id,
            runtime: self.clone(),
        }
    }

    pub(crate) fn finish_uncontrolled(&self, id: UncontrolledId) {
        let mut state = self.lock();
        if state.uncontrolled.finish(id) {
            debug!("{} finished", id);
            state.mark_progress();
        }
    }

    /// Tell the scheduler that uncontrolled work made progress, resetting
    /// the potential-deadlock timer.
    pub fn notify_external_progress(&self) {
        self.lock().mark_progress();
    }

    pub(crate) fn wait_for_uncontrolled(&self, id: UncontrolledId) {
        let Some(op) = self.controlled_caller() else {
            return;
        };
        {
            let mut state = self.lock();
            if !state.detached && !state.fuzzing && !state.uncontrolled.is_finished(id) {
                let message = format!(
                    "Operation '{}' is waiting on uncontrolled operation '{}'.",
                    state.operation_name(op),
                    state.uncontrolled.name(id)
                );
                if self.config().fuzzing_fallback {
                    state.switch_to_fuzzing(&message);
                } else if self.config().partial_control == PartialControl::Strict {
                    state.fail(Failure::new(FailureKind::UncontrolledConcurrency, message));
                } else {
                    info!("{}", message);
                }
            }
        }
        self.exit_if_detached();
        self.wait_for("join_uncontrolled", BlockReason::Uncontrolled(id), SchedulingPointType::Wait);
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("iteration", &self.inner.options.iteration)
            .field("test", &self.inner.config.test_name)
            .finish()
    }
}

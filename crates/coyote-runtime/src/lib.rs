//! Controlled runtime for systematic concurrency testing.
//!
//! A [`Runtime`] runs one iteration of a concurrent test under full control
//! of its interleaving: every controlled operation executes on its own
//! thread, but only one is allowed to run at any time, and every
//! scheduling-relevant action (spawn, yield, lock, send, read, join, ...)
//! hands the decision of who runs next to an
//! [`ExplorationStrategy`](coyote_strategy::ExplorationStrategy). Each
//! decision lands in the iteration's
//! [`ExecutionTrace`](coyote_trace::ExecutionTrace), so the iteration can be
//! replayed exactly.
//!
//! # Bugs the runtime detects
//!
//! | Kind | Detected when |
//! |------|---------------|
//! | assertion | [`Runtime::assert`] fails, or a monitor rejects an event |
//! | unhandled panic | an operation panics |
//! | deadlock | operations are blocked and none can be enabled |
//! | potential deadlock | blocked on uncontrolled work that made no progress for `deadlock_timeout` |
//! | liveness | a monitor stays hot past the threshold, or is hot at the end |
//! | uncontrolled concurrency | strict mode, controlled code interacts with uncontrolled threads |
//!
//! # Example
//!
//! ```
//! use coyote_runtime::{Configuration, IterationEnd, IterationOptions, Runtime};
//! use coyote_runtime::sync::SharedRegister;
//! use coyote_strategy::RandomStrategy;
//! use std::sync::Arc;
//!
//! let runtime = Runtime::new(
//!     Configuration::default(),
//!     Box::new(RandomStrategy::new(7)),
//!     IterationOptions::new(0),
//! );
//! let result = runtime.run(|| {
//!     let rt = Runtime::current().unwrap();
//!     let x = Arc::new(SharedRegister::new(0));
//!     let y = Arc::clone(&x);
//!     let worker = rt.spawn("worker", move || y.set(y.get() + 1)).unwrap();
//!     x.set(x.get() + 1);
//!     worker.join().unwrap();
//! });
//! assert_eq!(result.end, IterationEnd::Completed);
//! assert!(!result.trace.is_empty());
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod iteration;
pub mod monitor;
pub mod operation;
pub mod resource;
pub mod runtime;
mod scheduler;
pub mod sync;
pub mod task;
pub mod uncontrolled;

pub use config::{get_or_generate_seed, Configuration, PartialControl, SEED_ENV_VAR};
pub use error::{Failure, FailureKind, RuntimeError, UnknownFailureKind};
pub use iteration::{IterationEnd, IterationOptions, IterationResult, IterationStats};
pub use monitor::{Monitor, Temperature};
pub use operation::{ControlledOperation, OperationInfo, OperationStatus};
pub use resource::{Resource, ResourceId};
pub use runtime::Runtime;
pub use task::JoinHandle;
pub use uncontrolled::{UncontrolledGuard, UncontrolledHandle, UncontrolledId};

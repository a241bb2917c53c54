//! Execution traces for controlled-concurrency testing.
//!
//! Every decision the scheduler makes during an iteration, whether handing
//! execution to an operation or resolving a nondeterministic boolean or
//! integer, is appended to an [`ExecutionTrace`]. The trace is the total
//! order of the iteration: replaying it decision-by-decision reproduces the
//! execution bit for bit.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  Scheduler (coyote-runtime)  │
//! │  add_scheduling_decision     │
//! │  add_boolean_decision        │
//! │  add_integer_decision        │
//! └──────────────┬───────────────┘
//!                │ append
//! ┌──────────────▼───────────────┐
//! │  ExecutionTrace              │
//! │    Step[i].index == i        │
//! │    extend_or_replace         │
//! └──────┬───────────────┬───────┘
//!        │               │
//! ┌──────▼──────┐ ┌──────▼───────────────┐
//! │  TraceFile  │ │  DeterminismVerifier │
//! │  (JSON)     │ │  first divergence    │
//! └─────────────┘ └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use coyote_trace::{ExecutionTrace, OperationGroup, OperationId, SchedulingPointType};
//!
//! let mut trace = ExecutionTrace::new();
//! trace.add_scheduling_decision(
//!     OperationId(0),
//!     OperationGroup(0),
//!     SchedulingPointType::Create,
//!     OperationId(1),
//!     OperationGroup(1),
//! );
//! trace.add_boolean_decision(OperationId(1), OperationGroup(1), true);
//!
//! assert_eq!(trace.len(), 2);
//! assert_eq!(trace[1].index, 1);
//! ```

pub mod file;
pub mod ids;
pub mod step;
pub mod trace;
pub mod verifier;

pub use file::{load_trace_file, save_trace_file, RecordedBug, TraceFile, TraceFileError, TRACE_FORMAT_VERSION};
pub use ids::{OperationGroup, OperationId};
pub use step::{Decision, SchedulingPointType, Step, StepKind};
pub use trace::{ExecutionTrace, TraceError, TraceSummary};
pub use verifier::{DeterminismVerifier, Divergence, VerificationResult};

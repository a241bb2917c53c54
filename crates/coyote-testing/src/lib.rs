//! Testing engine for controlled-concurrency tests.
//!
//! The [`TestingEngine`] runs a test body for many iterations, each one
//! under a fresh [`Runtime`](coyote_runtime::Runtime) driven by the
//! configured exploration strategy. Every iteration is classified:
//!
//! | Classification | Iteration ended with |
//! |----------------|----------------------|
//! | `Passed` | completion, a quiet step bound, an unreported deadlock |
//! | `BugFound` | assertion, panic, uncontrolled concurrency, step-bound failure |
//! | `Deadlock` | deadlock or potential deadlock |
//! | `LivenessViolation` | a monitor stuck hot |
//! | `InternalError` | strategy exhaustion or replay drift (aborts the run) |
//!
//! A bug is replayed from its trace to confirm it reproduces, and written
//! to `output_dir` as a [`TraceFile`](coyote_trace::TraceFile) that
//! [`TestingEngine::replay_file`] can rerun later.
//!
//! # Example
//!
//! ```
//! use coyote_runtime::{api, Configuration};
//! use coyote_runtime::sync::SharedRegister;
//! use coyote_testing::{Classification, TestingEngine};
//! use std::sync::Arc;
//!
//! let config = Configuration::default().with_iterations(100).with_seed(1);
//! let mut engine = TestingEngine::new(config).unwrap();
//! let report = engine
//!     .run(|| {
//!         let x = Arc::new(SharedRegister::new(0));
//!         let y = Arc::clone(&x);
//!         let worker = api::spawn("worker", move || y.set(y.get() + 1)).unwrap();
//!         x.set(x.get() + 1);
//!         worker.join().unwrap();
//!         api::assert(x.get() == 2, "lost update");
//!     })
//!     .unwrap();
//!
//! let bug = report.first_bug().expect("the race is found");
//! assert_eq!(bug.classification, Classification::BugFound);
//! assert_eq!(bug.reproduced, Some(true));
//! ```

pub mod engine;
pub mod outcome;
pub mod parallel;
pub mod report;

pub use engine::{EngineError, TestingEngine};
pub use outcome::{BugReport, Classification, ReplayReport};
pub use report::{format_bug, format_report, TestReport, TestStats};

//! Modeled synchronization primitives.
//!
//! Each primitive keeps its state in host memory and routes every
//! acquire, release, send, receive, read and write through the scheduler,
//! so the strategy can interleave operations at exactly those points and
//! blocked operations show up in deadlock reports.
//!
//! | Primitive | Blocks with | Scheduling points |
//! |-----------|-------------|-------------------|
//! | [`Mutex`] | `BlockedOnResource` | acquire, release |
//! | [`Semaphore`] | `BlockedOnResource` | acquire, release |
//! | [`Channel`] | `BlockedOnReceive` | send, receive |
//! | [`SharedRegister`] | never | read, write |
//!
//! Constructors without a runtime argument use the runtime of the calling
//! operation and panic outside of one.

pub mod channel;
pub mod mutex;
pub mod register;
pub mod semaphore;

pub use channel::Channel;
pub use mutex::{Mutex, MutexGuard};
pub use register::SharedRegister;
pub use semaphore::Semaphore;

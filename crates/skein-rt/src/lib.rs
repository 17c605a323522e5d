// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Skein execution services.
//!
//! The coroutine runtime only needs two capabilities from its host: run a
//! closure "later" on some thread, and run a closure after a delay. This
//! crate defines both as traits and ships thread-backed implementations.
//!
//! Components:
//! - executor: `Executor` trait, `Job`, `Rejected`
//! - pool: `WorkerPool`, N worker threads over one injection queue
//! - timer: `Timer` trait, `TimerService` deadline thread, `TimerHandle`
//! - cancel: monotonic cancellation flag
//! - panic: panic payload formatting

pub mod cancel;
pub mod executor;
pub mod panic;
pub mod pool;
pub mod timer;

pub use cancel::CancelToken;
pub use executor::{Executor, Job, Rejected};
pub use panic::panic_message;
pub use pool::WorkerPool;
pub use timer::{Timer, TimerHandle, TimerService};

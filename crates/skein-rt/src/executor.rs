// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work submission.

use std::fmt;

use thiserror::Error;

/// A unit of work handed to an executor or timer.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Returned when a service no longer accepts work. Carries the job back so
/// the caller decides whether to run it, drop it, or report failure.
#[derive(Error)]
#[error("job rejected: service is shut down")]
pub struct Rejected(pub Job);

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rejected(..)")
    }
}

/// Runs submitted closures asynchronously.
///
/// `submit` must not run the job on the calling thread and must not block
/// for longer than it takes to enqueue it.
pub trait Executor: Send + Sync {
    fn submit(&self, job: Job) -> Result<(), Rejected>;
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative cancellation flag.
//!
//! Monotonic: once set it stays set. Holders poll `is_cancelled()` at their
//! own boundaries (step boundaries, timer dispatch).

use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation token shared between the requester and the work it governs.
#[derive(Debug)]
pub struct CancelToken {
    flag: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Set the cancellation flag. Returns true if this call set it.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

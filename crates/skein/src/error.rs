// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine and scope errors.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed user error carried by [`CoroutineError::Step`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a step, a channel operation or a whole continuation did not
/// produce a value.
///
/// Cloneable so that a terminal error can be handed out by every call to
/// `Continuation::result`.
#[derive(Debug, Clone, Error)]
pub enum CoroutineError {
    /// User step code returned an error.
    #[error("step failed: {source}")]
    Step {
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },

    /// User step code panicked; the panic was caught at the step boundary.
    #[error("step panicked: {0}")]
    Panicked(String),

    /// The owning scope was cancelled.
    #[error("coroutine was cancelled")]
    Cancelled,

    /// Send or receive against a closed channel.
    #[error("channel `{channel}` is closed")]
    ChannelClosed { channel: String },

    /// A channel name was reused with a different value type in one scope.
    #[error("channel `{channel}` exists with a different value type")]
    ChannelType { channel: String },

    #[error("operation timed out")]
    Timeout,

    /// The executor or timer no longer accepts work.
    #[error("execution context is shut down")]
    Rejected,

    /// The scope that owned this continuation no longer exists.
    #[error("owning scope has been dropped")]
    ScopeDropped,

    /// A value did not have the type its step was built for.
    #[error("step value is not a `{expected}`")]
    TypeMismatch { expected: &'static str },

    /// A suspension result was read twice.
    #[error("suspension result already consumed")]
    Consumed,
}

impl CoroutineError {
    /// Wrap a user error.
    pub fn step(error: impl Into<BoxError>) -> Self {
        Self::Step {
            source: Arc::from(error.into()),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. })
    }
}

/// One continuation that ended in the FAILED state.
#[derive(Debug, Clone, Error)]
#[error("{coroutine}#{id}: {error}")]
pub struct FailedRun {
    pub id: u64,
    pub coroutine: String,
    pub error: CoroutineError,
}

/// Aggregate failure of a scope: its body failed, one or more of its
/// continuations failed, or both.
#[derive(Debug, Clone, Error)]
#[error("scope {scope} failed{}", details(.body, .failures))]
pub struct ScopeError {
    pub scope: u64,
    #[source]
    pub body: Option<CoroutineError>,
    pub failures: Vec<FailedRun>,
}

impl ScopeError {
    /// Number of failures: the body (if it failed) plus failed runs.
    pub fn len(&self) -> usize {
        self.failures.len() + usize::from(self.body.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn details(body: &Option<CoroutineError>, failures: &[FailedRun]) -> String {
    let mut out = String::new();
    if let Some(body) = body {
        out.push_str(&format!("; body: {body}"));
    }
    if !failures.is_empty() {
        let runs: Vec<String> = failures.iter().map(FailedRun::to_string).collect();
        out.push_str(&format!("; {} coroutine(s) failed: {}", failures.len(), runs.join(", ")));
    }
    out
}

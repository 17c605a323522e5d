// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Skein: structured-concurrency coroutines over rendezvous channels.
//!
//! A [`Coroutine`] is an immutable chain of [`Step`]s. Each run of it is a
//! [`Continuation`] inside a [`CoroutineScope`], executed either on the
//! context's worker pool ([`Coroutine::run_async`]) or on the calling
//! thread ([`Coroutine::run_blocking`]). Runs in one scope talk through
//! [`Channel`]s and can be combined with `select` (first result wins) and
//! `collect` (wait for all).
//!
//! ```no_run
//! use skein::prelude::*;
//!
//! let context = CoroutineContext::new().expect("worker threads");
//! let numbers: ChannelId<i32> = ChannelId::new("numbers");
//! let doubler = Coroutine::first(receive::<(), i32>(&numbers)).then(apply(|n: i32| n * 2));
//!
//! CoroutineScope::launch(&context, |scope| {
//!     let run = doubler.run_async(scope, ());
//!     scope.channel(&numbers)?.send_blocking(21)?;
//!     assert_eq!(run.result()?, 42);
//!     Ok(())
//! })
//! .expect("scope failed");
//! ```
//!
//! Components:
//! - gate / completion: claimable one-shot suspension cells
//! - engine: the step interpreter shared by both run modes
//! - channel: `ChannelId`, `Channel`
//! - continuation: `Continuation`, `ContinuationState`
//! - scope: `CoroutineScope`, `Deferred`
//! - context / config: `CoroutineContext`, `ContextConfig`
//! - step: step factories and combinators

mod channel;
mod completion;
mod config;
mod context;
mod continuation;
mod coroutine;
mod engine;
mod error;
mod gate;
mod listener;
mod scope;
pub mod step;

pub use channel::{Channel, ChannelId};
pub use config::{ContextConfig, WORKERS_ENV};
pub use context::CoroutineContext;
pub use continuation::{Continuation, ContinuationState};
pub use coroutine::Coroutine;
pub use error::{BoxError, CoroutineError, FailedRun, ScopeError};
pub use listener::{EventKind, LifecycleEvent, LifecycleListener};
pub use scope::{CoroutineScope, Deferred};
pub use step::Step;

pub use skein_rt::{Executor, Timer};

/// Everything needed to build and run coroutines.
pub mod prelude {
    pub use crate::step::{
        apply, call, collect, collect_each, consume, do_if, do_if_else, for_each, loop_while,
        receive, run, select, send, sleep, supply, try_apply,
    };
    pub use crate::{
        Channel, ChannelId, ContextConfig, Continuation, ContinuationState, Coroutine,
        CoroutineContext, CoroutineError, CoroutineScope, Deferred, Step,
    };
}

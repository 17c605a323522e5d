// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! One-shot suspension cells.
//!
//! A `Completion` is what a suspended step waits on. Whoever resolves the
//! awaited condition (a channel partner, a timer, a group of branches)
//! claims it and fills it with a result. The consumer either blocks on it
//! (`wait`) or leaves a callback (`on_complete`); there is exactly one
//! consumer per completion.
//!
//! Claiming and filling are separate steps so a channel can claim both
//! rendezvous parties under its lock and fill them after releasing it.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::CoroutineError;
use crate::gate::{self, GateNode};

/// Type-erased running value.
pub(crate) type AnyValue = Box<dyn Any + Send>;

pub(crate) type StepResult = Result<AnyValue, CoroutineError>;

type Callback = Box<dyn FnOnce(StepResult) + Send>;
type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Slot {
    done: bool,
    result: Option<StepResult>,
    callback: Option<Callback>,
    hooks: Vec<Hook>,
}

pub(crate) struct Completion {
    own: GateNode,
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Completion {
    /// A completion whose claims must also pass `parent`'s chain.
    pub fn gated(parent: Arc<GateNode>) -> Arc<Self> {
        Self::with_node(GateNode::once(Some(parent)))
    }

    /// A completion that only guards itself.
    pub fn detached() -> Arc<Self> {
        Self::with_node(GateNode::once(None))
    }

    fn with_node(own: GateNode) -> Arc<Self> {
        Arc::new(Self {
            own,
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
        })
    }

    pub fn node(&self) -> &GateNode {
        &self.own
    }

    /// Claim this completion through its whole chain.
    pub fn claim(&self) -> bool {
        gate::claim_all(&[&self.own])
    }

    pub fn is_claimable(&self) -> bool {
        gate::claimable(&[&self.own])
    }

    /// Deliver the result of a successful claim.
    pub fn fill(&self, result: StepResult) {
        let mut slot = self.slot.lock();
        if slot.done {
            debug_assert!(false, "completion filled twice");
            return;
        }
        slot.done = true;
        let hooks = std::mem::take(&mut slot.hooks);
        match slot.callback.take() {
            Some(callback) => {
                drop(slot);
                run_hooks(hooks);
                callback(result);
            }
            None => {
                slot.result = Some(result);
                self.ready.notify_all();
                drop(slot);
                run_hooks(hooks);
            }
        }
    }

    /// Claim and fill. Hands the result back if the claim fails.
    pub fn try_complete(&self, result: StepResult) -> Result<(), StepResult> {
        if self.claim() {
            self.fill(result);
            Ok(())
        } else {
            Err(result)
        }
    }

    /// Complete regardless of the enclosing chain; fails only if this
    /// completion was already claimed.
    pub fn force(&self, result: StepResult) -> bool {
        if self.own.claim_local() {
            self.fill(result);
            true
        } else {
            false
        }
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().done
    }

    /// Take the result if it is already there.
    pub fn try_take(&self) -> Option<StepResult> {
        let mut slot = self.slot.lock();
        if slot.done {
            slot.result.take()
        } else {
            None
        }
    }

    /// Block the calling thread until filled.
    pub fn wait(&self) -> StepResult {
        let mut slot = self.slot.lock();
        while !slot.done {
            self.ready.wait(&mut slot);
        }
        slot.result.take().unwrap_or(Err(CoroutineError::Consumed))
    }

    /// Block until filled or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StepResult> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while !slot.done {
            if self.ready.wait_until(&mut slot, deadline).timed_out() && !slot.done {
                return None;
            }
        }
        Some(slot.result.take().unwrap_or(Err(CoroutineError::Consumed)))
    }

    /// Hand the result to `callback`, now if already filled, otherwise on
    /// the thread that fills it.
    pub fn on_complete(&self, callback: impl FnOnce(StepResult) + Send + 'static) {
        let mut slot = self.slot.lock();
        if slot.done {
            let result = slot.result.take().unwrap_or(Err(CoroutineError::Consumed));
            drop(slot);
            callback(result);
        } else {
            slot.callback = Some(Box::new(callback));
        }
    }

    /// Run `hook` once this completion is filled, by any means.
    pub fn on_settled(&self, hook: impl FnOnce() + Send + 'static) {
        let mut slot = self.slot.lock();
        if slot.done {
            drop(slot);
            hook();
        } else {
            slot.hooks.push(Box::new(hook));
        }
    }
}

fn run_hooks(hooks: Vec<Hook>) {
    for hook in hooks {
        hook();
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.is_done())
            .finish()
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Continuations: the outcome handle of one coroutine run.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::channel::{Channel, ChannelId};
use crate::completion::{AnyValue, Completion, StepResult};
use crate::error::CoroutineError;
use crate::gate::{GateKind, GateNode};
use crate::listener::{self, EventKind, LifecycleEvent, LifecycleListener};
use crate::scope::{CoroutineScope, ScopeInner};

/// Where a run is in its life. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContinuationState {
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl ContinuationState {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

struct Outcome {
    state: ContinuationState,
    value: Option<AnyValue>,
    error: Option<CoroutineError>,
    hooks: Vec<Box<dyn FnOnce(ContinuationState) + Send>>,
}

#[derive(Default)]
struct Parking {
    parked: Vec<Arc<Completion>>,
    aborted: Option<CoroutineError>,
}

/// Type-erased state of one run, shared by the engine, the owning scope and
/// every `Continuation` handle.
pub(crate) struct RunCore {
    id: u64,
    coroutine: Arc<str>,
    scope: Weak<ScopeInner>,
    listeners: Arc<[Arc<dyn LifecycleListener>]>,
    outcome: Mutex<Outcome>,
    settled: Condvar,
    error_handled: AtomicBool,
    root: Arc<GateNode>,
    parking: Mutex<Parking>,
}

impl RunCore {
    pub fn new(
        id: u64,
        coroutine: Arc<str>,
        scope: Weak<ScopeInner>,
        listeners: Arc<[Arc<dyn LifecycleListener>]>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            coroutine,
            scope,
            listeners,
            outcome: Mutex::new(Outcome {
                state: ContinuationState::Running,
                value: None,
                error: None,
                hooks: Vec::new(),
            }),
            settled: Condvar::new(),
            error_handled: AtomicBool::new(false),
            root: GateNode::root(GateKind::Shared),
            parking: Mutex::new(Parking::default()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn coroutine(&self) -> &Arc<str> {
        &self.coroutine
    }

    pub fn root(&self) -> &Arc<GateNode> {
        &self.root
    }

    pub fn scope(&self) -> Option<CoroutineScope> {
        self.scope.upgrade().map(CoroutineScope::from_inner)
    }

    pub fn state(&self) -> ContinuationState {
        self.outcome.lock().state
    }

    pub fn error(&self) -> Option<CoroutineError> {
        self.outcome.lock().error.clone()
    }

    pub fn is_error_handled(&self) -> bool {
        self.error_handled.load(Ordering::Acquire)
    }

    /// Record a completion this run is waiting on, so that cancellation
    /// can wake it.
    pub fn park(&self, pending: &Arc<Completion>) {
        let mut parking = self.parking.lock();
        if let Some(err) = parking.aborted.clone() {
            drop(parking);
            pending.force(Err(err));
            return;
        }
        parking.parked.retain(|c| !c.is_done() && c.is_claimable());
        parking.parked.push(pending.clone());
    }

    /// Stop the run: nothing may be delivered to it any more, and every
    /// waiter it has parked is woken with `err`.
    pub fn abort(&self, err: CoroutineError) {
        let parked = {
            let mut parking = self.parking.lock();
            if parking.aborted.is_some() {
                return;
            }
            parking.aborted = Some(err.clone());
            std::mem::take(&mut parking.parked)
        };
        self.root.gate().close();
        for pending in parked {
            pending.force(Err(err.clone()));
        }
    }

    pub fn start(&self) {
        tracing::debug!(run = self.id, coroutine = %self.coroutine, "coroutine started");
        self.fire(EventKind::Started, None);
    }

    /// Move to a terminal state. Only the first call has any effect.
    pub fn finish(&self, result: StepResult) {
        let (state, hooks) = {
            let mut outcome = self.outcome.lock();
            if outcome.state.is_terminal() {
                return;
            }
            outcome.state = match result {
                Ok(value) => {
                    outcome.value = Some(value);
                    ContinuationState::Finished
                }
                Err(err) => {
                    let state = if err.is_cancellation() {
                        ContinuationState::Cancelled
                    } else {
                        ContinuationState::Failed
                    };
                    outcome.error = Some(err);
                    state
                }
            };
            self.settled.notify_all();
            (outcome.state, std::mem::take(&mut outcome.hooks))
        };
        self.root.gate().close();
        {
            // Whatever an abandoned branch suspends on from now is forced
            // as soon as it is parked.
            let mut parking = self.parking.lock();
            parking.parked.clear();
            parking.aborted.get_or_insert(CoroutineError::Cancelled);
        }

        match state {
            ContinuationState::Failed => tracing::debug!(
                run = self.id,
                coroutine = %self.coroutine,
                error = ?self.error(),
                "coroutine failed"
            ),
            _ => tracing::debug!(run = self.id, coroutine = %self.coroutine, ?state, "coroutine finished"),
        }

        for hook in hooks {
            hook(state);
        }
        self.fire(EventKind::Finished, Some(state));
        if let Some(scope) = self.scope.upgrade() {
            scope.run_settled();
        }
    }

    fn fire(&self, kind: EventKind, state: Option<ContinuationState>) {
        let scope = self.scope.upgrade();
        let event = LifecycleEvent {
            kind,
            scope: scope.as_ref().map_or(0, |s| s.id()),
            continuation: self.id,
            coroutine: self.coroutine.clone(),
            state,
        };
        listener::fire_all(&self.listeners, &event);
        if let Some(scope) = scope {
            scope.fire(&event);
        }
    }

    pub fn on_finish(&self, hook: impl FnOnce(ContinuationState) + Send + 'static) {
        let mut outcome = self.outcome.lock();
        if outcome.state.is_terminal() {
            let state = outcome.state;
            drop(outcome);
            hook(state);
        } else {
            outcome.hooks.push(Box::new(hook));
        }
    }

    pub fn wait(&self) -> ContinuationState {
        let mut outcome = self.outcome.lock();
        while !outcome.state.is_terminal() {
            self.settled.wait(&mut outcome);
        }
        outcome.state
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<ContinuationState> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.outcome.lock();
        while !outcome.state.is_terminal() {
            if self.settled.wait_until(&mut outcome, deadline).timed_out() {
                break;
            }
        }
        Some(outcome.state).filter(|s| s.is_terminal())
    }

    fn read<T: Clone + 'static>(&self) -> Result<T, CoroutineError> {
        let outcome = self.outcome.lock();
        match (&outcome.value, &outcome.error) {
            (Some(value), _) => value
                .downcast_ref::<T>()
                .cloned()
                .ok_or(CoroutineError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                }),
            (None, Some(err)) => Err(err.clone()),
            (None, None) => Err(CoroutineError::Consumed),
        }
    }
}

/// Handle to one run of a [`Coroutine`](crate::Coroutine) producing `T`.
///
/// Cheap to clone. The run keeps going whether or not any handle is kept.
pub struct Continuation<T> {
    core: Arc<RunCore>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _output: PhantomData,
        }
    }
}

impl<T: 'static> Continuation<T> {
    pub(crate) fn new(core: Arc<RunCore>) -> Self {
        Self {
            core,
            _output: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.core.id()
    }

    pub fn coroutine_name(&self) -> &str {
        self.core.coroutine()
    }

    pub fn state(&self) -> ContinuationState {
        self.core.state()
    }

    /// True once the run reached any terminal state.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == ContinuationState::Cancelled
    }

    pub fn is_failed(&self) -> bool {
        self.state() == ContinuationState::Failed
    }

    /// Block until the run reaches a terminal state.
    pub fn wait(&self) -> ContinuationState {
        self.core.wait()
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ContinuationState> {
        self.core.wait_timeout(timeout)
    }

    /// The run's output, waiting for it if necessary. A failed or cancelled
    /// run returns its error, every time this is called.
    pub fn result(&self) -> Result<T, CoroutineError>
    where
        T: Clone,
    {
        self.core.wait();
        self.core.read::<T>()
    }

    pub fn result_timeout(&self, timeout: Duration) -> Result<T, CoroutineError>
    where
        T: Clone,
    {
        match self.core.wait_timeout(timeout) {
            Some(_) => self.core.read::<T>(),
            None => Err(CoroutineError::Timeout),
        }
    }

    /// The stored error of a failed or cancelled run.
    pub fn error(&self) -> Option<CoroutineError> {
        self.core.error()
    }

    /// Acknowledge this run's error so scope aggregation skips it.
    pub fn error_handled(&self) -> &Self {
        self.core.error_handled.store(true, Ordering::Release);
        self
    }

    pub fn is_error_handled(&self) -> bool {
        self.core.is_error_handled()
    }

    /// Run `hook` with the terminal state, immediately if already there.
    pub fn on_finish(&self, hook: impl FnOnce(ContinuationState) + Send + 'static) {
        self.core.on_finish(hook);
    }

    /// Look up a channel in the scope this run belongs to.
    pub fn channel<V: Send + 'static>(&self, id: &ChannelId<V>) -> Result<Channel<V>, CoroutineError> {
        self.core
            .scope()
            .ok_or(CoroutineError::ScopeDropped)?
            .channel(id)
    }
}

impl<T> std::fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("id", &self.core.id)
            .field("coroutine", &self.core.coroutine)
            .field("state", &self.core.state())
            .finish()
    }
}

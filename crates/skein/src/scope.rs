// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine scopes.
//!
//! A scope is the structured-concurrency boundary: it owns the runs started
//! in it, their channels and a cancellation flag. [`CoroutineScope::launch`]
//! does not return before every run it started has reached a terminal
//! state, and reports every unhandled failure together.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use skein_rt::{panic_message, CancelToken, Job};

use crate::channel::{Channel, ChannelId};
use crate::context::CoroutineContext;
use crate::continuation::{ContinuationState, RunCore};
use crate::error::{CoroutineError, FailedRun, ScopeError};
use crate::listener::{LifecycleEvent, LifecycleListener, ListenerSet};

/// Runs still going, plus what to do when there are none.
#[derive(Default)]
struct Activity {
    running: usize,
    on_idle: Vec<Job>,
}

pub(crate) struct ScopeInner {
    id: u64,
    context: CoroutineContext,
    cancelled: CancelToken,
    runs: Mutex<Vec<Arc<RunCore>>>,
    next_run: AtomicU64,
    activity: Mutex<Activity>,
    idle: Condvar,
    channels: Mutex<HashMap<Arc<str>, Arc<dyn Any + Send + Sync>>>,
    listeners: ListenerSet,
}

impl ScopeInner {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fire scope listeners, then context listeners.
    pub fn fire(&self, event: &LifecycleEvent) {
        self.listeners.fire(event);
        self.context.fire(event);
    }

    /// A run reached its terminal state.
    pub fn run_settled(&self) {
        let hooks = {
            let mut activity = self.activity.lock();
            activity.running = activity.running.saturating_sub(1);
            if activity.running > 0 {
                return;
            }
            self.idle.notify_all();
            std::mem::take(&mut activity.on_idle)
        };
        for hook in hooks {
            hook();
        }
    }
}

/// Handle to a scope. Cheap to clone.
#[derive(Clone)]
pub struct CoroutineScope {
    inner: Arc<ScopeInner>,
}

impl CoroutineScope {
    fn new(context: &CoroutineContext) -> Self {
        let id = context.next_scope_id();
        tracing::debug!(scope = id, "scope created");
        Self {
            inner: Arc::new(ScopeInner {
                id,
                context: context.clone(),
                cancelled: CancelToken::new(),
                runs: Mutex::new(Vec::new()),
                next_run: AtomicU64::new(1),
                activity: Mutex::new(Activity::default()),
                idle: Condvar::new(),
                channels: Mutex::new(HashMap::new()),
                listeners: ListenerSet::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ScopeInner>) -> Self {
        Self { inner }
    }

    /// Run `body` in a fresh scope on the calling thread, then block until
    /// every run it started has finished.
    ///
    /// Fails if `body` failed or panicked, or if any run ended FAILED
    /// without its error being marked handled. Cancelled runs are not
    /// failures.
    pub fn launch<F>(context: &CoroutineContext, body: F) -> Result<(), ScopeError>
    where
        F: FnOnce(&CoroutineScope) -> Result<(), CoroutineError>,
    {
        let scope = Self::new(context);
        let body_error = run_body(&scope, body);
        scope.wait();
        scope.outcome(body_error)
    }

    /// Non-blocking counterpart of [`launch`](Self::launch): runs `body`
    /// on the executor and, once it and every run it started are done,
    /// resolves the returned handle with `extractor` applied to the scope.
    pub fn produce<R, E, F>(context: &CoroutineContext, extractor: E, body: F) -> Deferred<R>
    where
        R: Send + 'static,
        E: FnOnce(&CoroutineScope) -> R + Send + 'static,
        F: FnOnce(&CoroutineScope) -> Result<(), CoroutineError> + Send + 'static,
    {
        let scope = Self::new(context);
        let deferred = Deferred::pending();
        let slot = deferred.slot.clone();
        let fallback = deferred.slot.clone();
        let scope_id = scope.id();

        let job: Job = Box::new(move || {
            let body_error = run_body(&scope, body);
            let idle_scope = scope.clone();
            let extract: Job = Box::new(move || {
                let scope = idle_scope;
                let result = match scope.outcome(body_error) {
                    Ok(()) => panic::catch_unwind(AssertUnwindSafe(|| extractor(&scope))).map_err(
                        |payload| ScopeError {
                            scope: scope.id(),
                            body: Some(CoroutineError::Panicked(panic_message(&*payload))),
                            failures: Vec::new(),
                        },
                    ),
                    Err(err) => Err(err),
                };
                slot.resolve(result);
            });
            // The last run may settle on a timer or sender thread; the
            // extractor belongs on the executor.
            let executor = scope.context().executor().clone();
            scope.when_idle(Box::new(move || {
                if let Err(rejected) = executor.submit(extract) {
                    (rejected.0)();
                }
            }));
        });
        if context.executor().submit(job).is_err() {
            tracing::warn!(scope = scope_id, "executor rejected scope body");
            fallback.resolve(Err(ScopeError {
                scope: scope_id,
                body: Some(CoroutineError::Rejected),
                failures: Vec::new(),
            }));
        }
        deferred
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn context(&self) -> &CoroutineContext {
        &self.inner.context
    }

    /// Cancel every run in this scope, including runs not started yet.
    /// Follow with [`wait`](Self::wait) to see them all settle.
    pub fn cancel(&self) {
        if !self.inner.cancelled.cancel() {
            return;
        }
        let runs: Vec<_> = self.inner.runs.lock().clone();
        tracing::debug!(scope = self.id(), runs = runs.len(), "scope cancelled");
        for run in runs {
            run.abort(CoroutineError::Cancelled);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.is_cancelled()
    }

    /// Block until no run in this scope is still going.
    pub fn wait(&self) {
        let mut activity = self.inner.activity.lock();
        while activity.running > 0 {
            self.inner.idle.wait(&mut activity);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`. Returns
    /// whether the scope went idle.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut activity = self.inner.activity.lock();
        while activity.running > 0 {
            if self.inner.idle.wait_until(&mut activity, deadline).timed_out() {
                return activity.running == 0;
            }
        }
        true
    }

    /// The channel `id` names in this scope, created on first use.
    pub fn channel<T: Send + 'static>(&self, id: &ChannelId<T>) -> Result<Channel<T>, CoroutineError> {
        let mut channels = self.inner.channels.lock();
        let entry = channels
            .entry(id.key().clone())
            .or_insert_with(|| {
                let channel = Channel::<T>::new(id.key().clone(), Arc::downgrade(&self.inner));
                Arc::new(channel) as Arc<dyn Any + Send + Sync>
            });
        entry
            .downcast_ref::<Channel<T>>()
            .cloned()
            .ok_or_else(|| CoroutineError::ChannelType {
                channel: id.name().to_string(),
            })
    }

    pub fn has_channel<T>(&self, id: &ChannelId<T>) -> bool {
        self.inner.channels.lock().contains_key(id.key())
    }

    pub fn add_listener(&self, listener: impl LifecycleListener + 'static) {
        self.inner.listeners.add(Arc::new(listener));
    }

    /// Runs started in this scope so far.
    pub fn continuation_count(&self) -> usize {
        self.inner.runs.lock().len()
    }

    pub(crate) fn register(
        &self,
        coroutine: Arc<str>,
        listeners: Arc<[Arc<dyn LifecycleListener>]>,
    ) -> Arc<RunCore> {
        let id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        let run = RunCore::new(id, coroutine, Arc::downgrade(&self.inner), listeners);
        self.inner.activity.lock().running += 1;
        self.inner.runs.lock().push(run.clone());
        if self.is_cancelled() {
            run.abort(CoroutineError::Cancelled);
        }
        run
    }

    fn when_idle(&self, hook: Job) {
        let mut activity = self.inner.activity.lock();
        if activity.running == 0 {
            drop(activity);
            hook();
        } else {
            activity.on_idle.push(hook);
        }
    }

    fn outcome(&self, body: Option<CoroutineError>) -> Result<(), ScopeError> {
        let failures: Vec<FailedRun> = self
            .inner
            .runs
            .lock()
            .iter()
            .filter(|run| run.state() == ContinuationState::Failed && !run.is_error_handled())
            .map(|run| FailedRun {
                id: run.id(),
                coroutine: run.coroutine().to_string(),
                error: run.error().unwrap_or(CoroutineError::Consumed),
            })
            .collect();
        for failure in &failures {
            tracing::warn!(scope = self.id(), %failure, "unhandled coroutine failure");
        }
        if body.is_none() && failures.is_empty() {
            Ok(())
        } else {
            Err(ScopeError {
                scope: self.id(),
                body,
                failures,
            })
        }
    }
}

fn run_body<F>(scope: &CoroutineScope, body: F) -> Option<CoroutineError>
where
    F: FnOnce(&CoroutineScope) -> Result<(), CoroutineError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| body(scope))) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(payload) => Some(CoroutineError::Panicked(panic_message(&*payload))),
    }
}

impl std::fmt::Debug for CoroutineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineScope")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .field("continuations", &self.continuation_count())
            .finish()
    }
}

struct DeferredSlot<R> {
    value: Mutex<Option<Result<R, ScopeError>>>,
    ready: Condvar,
}

impl<R> DeferredSlot<R> {
    fn resolve(&self, result: Result<R, ScopeError>) {
        let mut value = self.value.lock();
        if value.is_none() {
            *value = Some(result);
            self.ready.notify_all();
        }
    }
}

/// Result of [`CoroutineScope::produce`], available once the scope is done.
pub struct Deferred<R> {
    slot: Arc<DeferredSlot<R>>,
}

impl<R> Deferred<R> {
    fn pending() -> Self {
        Self {
            slot: Arc::new(DeferredSlot {
                value: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn is_done(&self) -> bool {
        self.slot.value.lock().is_some()
    }

    /// Block until the scope is done.
    pub fn wait(self) -> Result<R, ScopeError> {
        let mut value = self.slot.value.lock();
        loop {
            if let Some(result) = value.take() {
                return result;
            }
            self.slot.ready.wait(&mut value);
        }
    }

    /// Like [`wait`](Self::wait), handing the `Deferred` back on timeout.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<R, ScopeError>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut value = self.slot.value.lock();
            loop {
                if let Some(result) = value.take() {
                    return Ok(result);
                }
                if self.slot.ready.wait_until(&mut value, deadline).timed_out() {
                    if let Some(result) = value.take() {
                        return Ok(result);
                    }
                    break;
                }
            }
        }
        Err(self)
    }
}

impl<R> std::fmt::Debug for Deferred<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").field("done", &self.is_done()).finish()
    }
}

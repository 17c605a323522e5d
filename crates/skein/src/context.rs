// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine context: the execution environment shared by scopes.
//!
//! Holds the work-submission and timer capabilities plus context-wide
//! lifecycle listeners. Created explicitly by the embedding application and
//! passed to every scope; there is no ambient default context.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use skein_rt::{Executor, Timer, TimerService, WorkerPool};

use crate::config::ContextConfig;
use crate::listener::{LifecycleEvent, LifecycleListener, ListenerSet};

/// Cheap to clone; all clones share one environment.
#[derive(Clone)]
pub struct CoroutineContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    executor: Arc<dyn Executor>,
    timer: Arc<dyn Timer>,
    listeners: ListenerSet,
    next_scope: AtomicU64,
    /// Services this context created itself and must tear down.
    owned: Option<OwnedServices>,
}

struct OwnedServices {
    pool: Arc<WorkerPool>,
    timer: Arc<TimerService>,
}

impl CoroutineContext {
    /// Context with a worker per CPU and its own timer thread.
    pub fn new() -> io::Result<Self> {
        Self::with_config(ContextConfig::default())
    }

    pub fn with_config(config: ContextConfig) -> io::Result<Self> {
        let pool = Arc::new(WorkerPool::new(config.workers, &config.worker_name)?);
        let timer = Arc::new(TimerService::new(&config.timer_name)?);
        tracing::debug!(workers = pool.worker_count(), "coroutine context created");
        Ok(Self {
            inner: Arc::new(ContextInner {
                executor: pool.clone(),
                timer: timer.clone(),
                listeners: ListenerSet::default(),
                next_scope: AtomicU64::new(1),
                owned: Some(OwnedServices { pool, timer }),
            }),
        })
    }

    /// Context over externally managed services. `shutdown` leaves them
    /// running.
    pub fn from_services(executor: Arc<dyn Executor>, timer: Arc<dyn Timer>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                executor,
                timer,
                listeners: ListenerSet::default(),
                next_scope: AtomicU64::new(1),
                owned: None,
            }),
        }
    }

    pub fn add_listener(&self, listener: impl LifecycleListener + 'static) {
        self.inner.listeners.add(Arc::new(listener));
    }

    /// Stop the executor and timer this context created. Runs that still
    /// need to be scheduled afterwards fail with `Rejected`.
    pub fn shutdown(&self) {
        if let Some(owned) = &self.inner.owned {
            owned.timer.shutdown();
            owned.pool.shutdown();
            tracing::debug!("coroutine context shut down");
        }
    }

    pub(crate) fn executor(&self) -> &Arc<dyn Executor> {
        &self.inner.executor
    }

    pub(crate) fn timer(&self) -> &Arc<dyn Timer> {
        &self.inner.timer
    }

    pub(crate) fn fire(&self, event: &LifecycleEvent) {
        self.inner.listeners.fire(event);
    }

    pub(crate) fn next_scope_id(&self) -> u64 {
        self.inner.next_scope.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CoroutineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineContext")
            .field("listeners", &self.inner.listeners.len())
            .field("owns_services", &self.inner.owned.is_some())
            .finish()
    }
}

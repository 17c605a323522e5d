// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker thread pool.
//!
//! N worker threads share one injection queue. Idle workers park on a
//! condvar; `submit` wakes one of them. Jobs that panic are caught and
//! logged so a faulty job never takes a worker down with it.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::executor::{Executor, Job, Rejected};
use crate::panic::panic_message;

/// How long an idle worker sleeps before re-checking the queue and the
/// shutdown flag on its own.
const IDLE_PARK: Duration = Duration::from_millis(5);

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    /// Worker handles for join-on-shutdown.
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    /// State shared with the workers.
    shared: Arc<SharedState>,
}

struct SharedState {
    /// Jobs waiting for a worker.
    queue: Mutex<VecDeque<Job>>,
    /// Signalled whenever a job is queued or shutdown starts.
    work_available: Condvar,
    /// Once set, submissions are rejected and workers exit after draining.
    shutdown: AtomicBool,
    worker_count: usize,
}

impl WorkerPool {
    /// Start a pool with `n` workers named `{name}-{index}`.
    ///
    /// If `n` is 0, defaults to the number of available CPU cores.
    pub fn new(n: usize, name: &str) -> io::Result<Self> {
        let worker_count = if n == 0 {
            thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            n
        };

        let shared = Arc::new(SharedState {
            queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            worker_count,
        });

        let pool = Self {
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            shared,
        };

        for id in 0..worker_count {
            let shared = pool.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || worker_loop(&shared));
            match handle {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(err) => {
                    // Already-started workers are stopped by Drop.
                    return Err(err);
                }
            }
        }

        tracing::debug!(workers = worker_count, name, "worker pool started");
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work, let workers drain the queue, then join them.
    ///
    /// Safe to call from a worker thread: that worker is not joined.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            // Take the queue lock so no worker misses the wakeup between its
            // shutdown check and its park.
            let _queue = self.shared.queue.lock();
            self.shared.work_available.notify_all();
        }

        let current = thread::current().id();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Executor for WorkerPool {
    fn submit(&self, job: Job) -> Result<(), Rejected> {
        let mut queue = self.shared.queue.lock();
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Rejected(job));
        }
        queue.push_back(job);
        self.shared.work_available.notify_one();
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker main loop: pop, run, park when idle, exit on shutdown once the
/// queue is empty.
fn worker_loop(shared: &SharedState) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                shared.work_available.wait_for(&mut queue, IDLE_PARK);
            }
        };

        match job {
            Some(job) => run_job(job),
            None => break,
        }
    }
}

fn run_job(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!(panic = %panic_message(payload.as_ref()), "job panicked on worker thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn pool_runs_jobs_and_shuts_down() {
        let pool = WorkerPool::new(2, "test-worker").unwrap();
        let counter = Arc::new(AtomicI32::new(0));

        for _ in 0..10 {
            let c = counter.clone();
            pool.submit(Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn pool_default_workers() {
        // Verify it starts without panicking with 0 (auto-detect).
        let pool = WorkerPool::new(0, "test-worker").unwrap();
        assert!(pool.worker_count() >= 1);
        pool.shutdown();
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::new(1, "test-worker").unwrap();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert!(pool.submit(Box::new(|| {})).is_err());
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let pool = WorkerPool::new(1, "test-worker").unwrap();
        let counter = Arc::new(AtomicI32::new(0));

        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let c = counter.clone();
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }))
        .unwrap();

        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Delayed jobs.
//!
//! `TimerService` owns one thread that sleeps until the earliest deadline
//! in a min-heap, then runs every due job. Jobs run on the timer thread and
//! must stay short; anything heavier should be handed to an executor.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::executor::{Job, Rejected};
use crate::panic::panic_message;

/// Schedules a job to run once after a delay.
pub trait Timer: Send + Sync {
    fn schedule(&self, delay: Duration, job: Job) -> Result<TimerHandle, Rejected>;
}

/// Handle to a scheduled job. Cancelling prevents the job from running if
/// it has not fired yet; it has no effect afterwards.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: Arc<CancelToken>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct Entry {
    deadline: Instant,
    /// Tie-breaker: equal deadlines fire in scheduling order.
    seq: u64,
    token: Arc<CancelToken>,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    changed: Condvar,
}

/// Thread-backed timer.
pub struct TimerService {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimerService {
    /// Start the timer thread.
    pub fn new(name: &str) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            changed: Condvar::new(),
        });

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || timer_loop(&shared))?
        };

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Number of jobs that have neither fired nor been discarded.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Stop the timer thread. Pending jobs are dropped without running.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.shared.changed.notify_all();
            std::mem::take(&mut state.heap)
        };
        if !dropped.is_empty() {
            tracing::debug!(pending = dropped.len(), "timer stopped with pending jobs");
        }
        drop(dropped);

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Timer for TimerService {
    fn schedule(&self, delay: Duration, job: Job) -> Result<TimerHandle, Rejected> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(Rejected(job));
        }
        let token = Arc::new(CancelToken::new());
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse(Entry {
            deadline: Instant::now() + delay,
            seq,
            token: token.clone(),
            job,
        }));
        self.shared.changed.notify_one();
        Ok(TimerHandle { token })
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &Shared) {
    loop {
        let due = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                let now = Instant::now();
                match state.heap.peek() {
                    Some(Reverse(entry)) if entry.deadline <= now => {
                        break state.heap.pop();
                    }
                    Some(Reverse(entry)) => {
                        let deadline = entry.deadline;
                        shared.changed.wait_until(&mut state, deadline);
                    }
                    None => {
                        shared.changed.wait(&mut state);
                    }
                }
            }
        };

        let Some(Reverse(entry)) = due else {
            continue;
        };
        if entry.token.is_cancelled() {
            continue;
        }
        tracing::trace!(seq = entry.seq, "timer fired");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry.job)) {
            tracing::error!(panic = %panic_message(payload.as_ref()), "timer job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let timer = TimerService::new("test-timer").unwrap();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        timer
            .schedule(Duration::from_millis(20), Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn fires_in_deadline_order() {
        let timer = TimerService::new("test-timer").unwrap();
        let (tx, rx) = mpsc::channel();
        for (delay, label) in [(40, "late"), (10, "early"), (25, "middle")] {
            let tx = tx.clone();
            timer
                .schedule(
                    Duration::from_millis(delay),
                    Box::new(move || tx.send(label).unwrap()),
                )
                .unwrap();
        }
        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn cancelled_job_does_not_run() {
        let timer = TimerService::new("test-timer").unwrap();
        let (tx, rx) = mpsc::channel::<&str>();
        let tx2 = tx.clone();
        let handle = timer
            .schedule(Duration::from_millis(10), Box::new(move || tx.send("cancelled").unwrap()))
            .unwrap();
        handle.cancel();
        timer
            .schedule(Duration::from_millis(30), Box::new(move || tx2.send("kept").unwrap()))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "kept");
        assert!(handle.is_cancelled());
    }

    #[test]
    fn schedule_after_shutdown_is_rejected() {
        let timer = TimerService::new("test-timer").unwrap();
        timer
            .schedule(Duration::from_secs(60), Box::new(|| {}))
            .unwrap();
        assert_eq!(timer.pending(), 1);
        timer.shutdown();
        assert_eq!(timer.pending(), 0);
        assert!(timer.schedule(Duration::ZERO, Box::new(|| {})).is_err());
    }
}

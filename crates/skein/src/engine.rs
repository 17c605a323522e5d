// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The step interpreter.
//!
//! Every step body returns an [`Outcome`]: either a result, or the
//! [`Completion`] it is waiting on. Steps that walk other steps (a chain, a
//! loop, an iteration) are written as [`Resumable`] state machines and run
//! through [`drive`], which is the only place that knows about the two run
//! modes:
//!
//! - blocking: the driving thread waits on each completion in turn
//! - async: the machine is parked on the completion, and the callback that
//!   fills it submits the next `advance` to the executor
//!
//! Both modes call the same `advance` with the same values, so a coroutine
//! produces the same result however it is run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use skein_rt::{panic_message, Job};

use crate::completion::{AnyValue, Completion, StepResult};
use crate::continuation::RunCore;
use crate::error::CoroutineError;
use crate::gate::{Gate, GateNode};
use crate::scope::CoroutineScope;

/// Unwrap a `Result` inside a step body, turning the error into a ready
/// failure.
macro_rules! try_ready {
    ($e:expr) => {
        match $e {
            Ok(value) => value,
            Err(err) => return $crate::engine::Outcome::Ready(Err(err)),
        }
    };
}
pub(crate) use try_ready;

/// Downcast a running value to the type a step was built for.
pub(crate) fn take<T: 'static>(value: AnyValue) -> Result<T, CoroutineError> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| CoroutineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        })
}

pub(crate) enum Outcome {
    Ready(StepResult),
    Suspended(Arc<Completion>),
}

/// Type-erased step implementation.
pub(crate) trait StepBody: Send + Sync {
    fn execute(&self, cx: &StepContext, input: AnyValue) -> Outcome;
}

impl<F> StepBody for F
where
    F: Fn(&StepContext, AnyValue) -> Outcome + Send + Sync,
{
    fn execute(&self, cx: &StepContext, input: AnyValue) -> Outcome {
        self(cx, input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Blocking,
    Async,
}

/// Completions the branches of one Select or Collect group are suspended
/// on, including those of nested groups. Once the group settles they are
/// forced, so abandoned branches drop their callbacks and stop waiting in
/// channel queues.
pub(crate) struct BranchWaits {
    parent: Option<Arc<BranchWaits>>,
    pending: Mutex<Option<Vec<Arc<Completion>>>>,
}

impl BranchWaits {
    /// Returns false once the group has been released.
    fn track(&self, pending: &Arc<Completion>) -> bool {
        let mut list = self.pending.lock();
        match list.as_mut() {
            Some(list) => {
                list.retain(|c| !c.is_done());
                list.push(pending.clone());
                true
            }
            None => false,
        }
    }

    /// Force every outstanding branch suspension. Suspensions tracked later
    /// are forced on the spot.
    pub fn release(&self) {
        let pending = self.pending.lock().take();
        for c in pending.into_iter().flatten() {
            c.force(Err(CoroutineError::Cancelled));
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.pending.lock().as_ref().map_or(0, Vec::len)
    }
}

/// Everything a step needs from the run executing it.
#[derive(Clone)]
pub(crate) struct StepContext {
    scope: CoroutineScope,
    run: Arc<RunCore>,
    gate: Arc<GateNode>,
    waits: Option<Arc<BranchWaits>>,
    mode: Mode,
}

impl StepContext {
    pub fn new(scope: CoroutineScope, run: Arc<RunCore>, mode: Mode) -> Self {
        let gate = run.root().clone();
        Self {
            scope,
            run,
            gate,
            waits: None,
            mode,
        }
    }

    pub fn scope(&self) -> &CoroutineScope {
        &self.scope
    }

    /// A completion claimable only while this run (and every group it is
    /// nested in) still wants a value.
    pub fn completion(&self) -> Arc<Completion> {
        Completion::gated(self.gate.clone())
    }

    /// Wait registry for a new group started from this context.
    pub fn branch_waits(&self) -> Arc<BranchWaits> {
        Arc::new(BranchWaits {
            parent: self.waits.clone(),
            pending: Mutex::new(Some(Vec::new())),
        })
    }

    /// Context for branch `index` of a Select or Collect group. Branches
    /// always run asynchronously.
    pub fn branch(&self, group: &Arc<Gate>, waits: &Arc<BranchWaits>, index: usize) -> Self {
        Self {
            scope: self.scope.clone(),
            run: self.run.clone(),
            gate: self.gate.child(group, index),
            waits: Some(waits.clone()),
            mode: Mode::Async,
        }
    }

    pub fn gate(&self) -> &GateNode {
        &self.gate
    }

    pub fn check_cancelled(&self) -> Result<(), CoroutineError> {
        if self.scope.is_cancelled() {
            Err(CoroutineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run one step. A panic in user code fails the step.
    pub fn execute(&self, step: &Arc<dyn StepBody>, input: AnyValue) -> Outcome {
        match panic::catch_unwind(AssertUnwindSafe(|| step.execute(self, input))) {
            Ok(outcome) => outcome,
            Err(payload) => Outcome::Ready(Err(CoroutineError::Panicked(panic_message(&*payload)))),
        }
    }

    pub fn submit(&self, job: Job) -> Result<(), CoroutineError> {
        self.scope.context().executor().submit(job).map_err(|rejected| {
            tracing::warn!(scope = self.scope.id(), "executor rejected step work");
            drop(rejected);
            CoroutineError::Rejected
        })
    }

    /// Register `pending` with the run and every enclosing group, so that
    /// cancelling the run or settling a group forces it.
    pub fn park(&self, pending: &Arc<Completion>) {
        self.run.park(pending);
        if pending.is_done() {
            return;
        }
        let mut waits = self.waits.as_deref();
        while let Some(group) = waits {
            if !group.track(pending) {
                pending.force(Err(CoroutineError::Cancelled));
                return;
            }
            waits = group.parent.as_deref();
        }
    }

    /// Block the calling thread on `pending`. Cancellation of the run
    /// forces it.
    pub fn wait_parked(&self, pending: &Arc<Completion>) -> StepResult {
        self.park(pending);
        pending.wait()
    }

    pub fn suspend_on(&self, pending: Arc<Completion>) -> Outcome {
        match pending.try_take() {
            Some(result) => Outcome::Ready(result),
            None => Outcome::Suspended(pending),
        }
    }

    /// Transform the eventual result of `outcome`. `f` runs on whichever
    /// thread fills the completion and must be cheap.
    pub fn map_outcome(
        &self,
        outcome: Outcome,
        f: impl FnOnce(StepResult) -> StepResult + Send + 'static,
    ) -> Outcome {
        match outcome {
            Outcome::Ready(result) => Outcome::Ready(f(result)),
            Outcome::Suspended(pending) => {
                let target = Completion::detached();
                let sink = target.clone();
                pending.on_complete(move |result| {
                    sink.force(f(result));
                });
                self.suspend_on(target)
            }
        }
    }

    /// Hand the eventual result of `outcome` to `f` without blocking.
    pub fn when_ready(&self, outcome: Outcome, f: impl FnOnce(StepResult) + Send + 'static) {
        match outcome {
            Outcome::Ready(result) => f(result),
            Outcome::Suspended(pending) => {
                self.park(&pending);
                pending.on_complete(f);
            }
        }
    }
}

pub(crate) enum Progress {
    Done(StepResult),
    Await(Arc<Completion>),
}

/// A multi-step computation that can stop at a completion and pick up
/// where it left off. `input` is the step input on the first call and the
/// awaited result afterwards.
pub(crate) trait Resumable: Send + 'static {
    fn advance(&mut self, cx: &StepContext, input: StepResult) -> Progress;
}

fn advance(machine: &mut dyn Resumable, cx: &StepContext, input: StepResult) -> Progress {
    match panic::catch_unwind(AssertUnwindSafe(|| machine.advance(cx, input))) {
        Ok(progress) => progress,
        Err(payload) => Progress::Done(Err(CoroutineError::Panicked(panic_message(&*payload)))),
    }
}

/// Run `machine` from `input` in the context's mode.
pub(crate) fn drive(cx: &StepContext, mut machine: Box<dyn Resumable>, input: StepResult) -> Outcome {
    let mut progress = advance(machine.as_mut(), cx, input);
    loop {
        match progress {
            Progress::Done(result) => return Outcome::Ready(result),
            Progress::Await(pending) => {
                if let Some(result) = pending.try_take() {
                    progress = advance(machine.as_mut(), cx, result);
                    continue;
                }
                match cx.mode {
                    Mode::Blocking => {
                        let result = cx.wait_parked(&pending);
                        progress = advance(machine.as_mut(), cx, result);
                    }
                    Mode::Async => {
                        let target = Completion::detached();
                        park_async(cx.clone(), machine, pending, target.clone());
                        return cx.suspend_on(target);
                    }
                }
            }
        }
    }
}

/// Resume `machine` on the executor once `pending` is filled. The final
/// result lands in `target`, which stays the same across every suspension
/// of the machine.
fn park_async(
    cx: StepContext,
    mut machine: Box<dyn Resumable>,
    pending: Arc<Completion>,
    target: Arc<Completion>,
) {
    cx.park(&pending);
    pending.on_complete(move |result| {
        let executor = cx.scope.context().executor().clone();
        let fallback = target.clone();
        let job: Job = Box::new(move || {
            let mut progress = advance(machine.as_mut(), &cx, result);
            loop {
                match progress {
                    Progress::Done(result) => {
                        target.force(result);
                        return;
                    }
                    Progress::Await(next) => match next.try_take() {
                        Some(result) => progress = advance(machine.as_mut(), &cx, result),
                        None => {
                            park_async(cx, machine, next, target);
                            return;
                        }
                    },
                }
            }
        });
        if executor.submit(job).is_err() {
            tracing::warn!("executor rejected a resumed coroutine");
            fallback.force(Err(CoroutineError::Rejected));
        }
    });
}

/// Walks a list of steps in order, threading the running value.
pub(crate) struct ChainMachine {
    steps: Arc<[Arc<dyn StepBody>]>,
    next: usize,
}

impl ChainMachine {
    pub fn new(steps: Arc<[Arc<dyn StepBody>]>) -> Self {
        Self { steps, next: 0 }
    }
}

impl Resumable for ChainMachine {
    fn advance(&mut self, cx: &StepContext, input: StepResult) -> Progress {
        let mut value = match input {
            Ok(value) => value,
            Err(err) => return Progress::Done(Err(err)),
        };
        while let Some(step) = self.steps.get(self.next) {
            if let Err(err) = cx.check_cancelled() {
                return Progress::Done(Err(err));
            }
            self.next += 1;
            match cx.execute(step, value) {
                Outcome::Ready(Ok(next)) => value = next,
                Outcome::Ready(Err(err)) => return Progress::Done(Err(err)),
                Outcome::Suspended(pending) => return Progress::Await(pending),
            }
        }
        Progress::Done(Ok(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waits() -> BranchWaits {
        BranchWaits {
            parent: None,
            pending: Mutex::new(Some(Vec::new())),
        }
    }

    #[test]
    fn release_forces_outstanding_branch_waits() {
        let group = waits();
        let finished = Completion::detached();
        let abandoned = Completion::detached();
        assert!(group.track(&finished));
        assert!(group.track(&abandoned));
        assert!(finished.try_complete(Ok(Box::new(1))).is_ok());

        let (tx, rx) = std::sync::mpsc::channel();
        abandoned.on_complete(move |r| tx.send(r.is_err()).unwrap());
        group.release();
        assert!(rx.recv().unwrap());
        assert!(finished.try_take().unwrap().is_ok());
    }

    #[test]
    fn finished_waits_are_pruned_and_late_ones_refused() {
        let group = waits();
        for _ in 0..10 {
            let c = Completion::detached();
            assert!(group.track(&c));
            c.force(Err(CoroutineError::Cancelled));
        }
        assert!(group.track(&Completion::detached()));
        assert_eq!(group.tracked(), 1);

        group.release();
        assert_eq!(group.tracked(), 0);
        assert!(!group.track(&Completion::detached()));
    }

    #[test]
    fn take_reports_the_expected_type() {
        let value: AnyValue = Box::new("text");
        match take::<i32>(value) {
            Err(CoroutineError::TypeMismatch { expected }) => assert_eq!(expected, "i32"),
            _ => panic!("downcast to the wrong type succeeded"),
        }
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine definitions and the two ways to run them.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::completion::StepResult;
use crate::continuation::{Continuation, RunCore};
use crate::engine::{self, ChainMachine, Mode, Outcome, StepBody, StepContext};
use crate::error::CoroutineError;
use crate::listener::LifecycleListener;
use crate::scope::CoroutineScope;
use crate::step::Step;

const DEFAULT_NAME: &str = "coroutine";

/// An immutable chain of steps turning an `I` into an `O`.
///
/// Building never mutates: [`then`](Self::then) returns a new coroutine
/// sharing the earlier steps. One coroutine can be run any number of times,
/// concurrently, from any thread.
pub struct Coroutine<I, O> {
    name: Arc<str>,
    steps: Arc<[Arc<dyn StepBody>]>,
    listeners: Arc<[Arc<dyn LifecycleListener>]>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Coroutine<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            steps: self.steps.clone(),
            listeners: self.listeners.clone(),
            _types: PhantomData,
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> Coroutine<I, O> {
    /// A one-step coroutine.
    pub fn first(step: impl Into<Step<I, O>>) -> Self {
        Self::named(DEFAULT_NAME, step)
    }

    pub fn named(name: impl Into<Arc<str>>, step: impl Into<Step<I, O>>) -> Self {
        let steps: Vec<Arc<dyn StepBody>> = vec![step.into().into_body()];
        Self {
            name: name.into(),
            steps: steps.into(),
            listeners: Arc::from(Vec::new()),
            _types: PhantomData,
        }
    }

    /// This chain followed by `step`.
    pub fn then<P: Send + 'static>(&self, step: impl Into<Step<O, P>>) -> Coroutine<I, P> {
        let mut steps: Vec<Arc<dyn StepBody>> = self.steps.to_vec();
        steps.push(step.into().into_body());
        Coroutine {
            name: self.name.clone(),
            steps: steps.into(),
            listeners: self.listeners.clone(),
            _types: PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Observe STARTED / FINISHED of every run of this coroutine.
    pub fn with_listener(mut self, listener: impl LifecycleListener + 'static) -> Self {
        let mut listeners = self.listeners.to_vec();
        listeners.push(Arc::new(listener));
        self.listeners = listeners.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub(crate) fn steps(&self) -> &Arc<[Arc<dyn StepBody>]> {
        &self.steps
    }

    /// Start a run on the scope's executor and return without waiting.
    pub fn run_async(&self, scope: &CoroutineScope, input: I) -> Continuation<O> {
        let run = scope.register(self.name.clone(), self.listeners.clone());
        let cx = StepContext::new(scope.clone(), run.clone(), Mode::Async);
        let steps = self.steps.clone();
        let job_run = run.clone();
        let job = Box::new(move || {
            job_run.start();
            let outcome = engine::drive(&cx, Box::new(ChainMachine::new(steps)), Ok(Box::new(input)));
            settle(&job_run, outcome);
        });
        if scope.context().executor().submit(job).is_err() {
            tracing::warn!(scope = scope.id(), coroutine = %self.name, "executor rejected coroutine");
            run.finish(Err(CoroutineError::Rejected));
        }
        Continuation::new(run)
    }

    /// Run to completion on the calling thread, blocking at every
    /// suspension.
    pub fn run_blocking(&self, scope: &CoroutineScope, input: I) -> Continuation<O> {
        let run = scope.register(self.name.clone(), self.listeners.clone());
        let cx = StepContext::new(scope.clone(), run.clone(), Mode::Blocking);
        run.start();
        let result = match engine::drive(&cx, Box::new(ChainMachine::new(self.steps.clone())), Ok(Box::new(input))) {
            Outcome::Ready(result) => result,
            Outcome::Suspended(pending) => cx.wait_parked(&pending),
        };
        run.finish(result);
        Continuation::new(run)
    }
}

fn settle(run: &Arc<RunCore>, outcome: Outcome) {
    match outcome {
        Outcome::Ready(result) => run.finish(result),
        Outcome::Suspended(pending) => {
            run.park(&pending);
            let run = run.clone();
            pending.on_complete(move |result: StepResult| run.finish(result));
        }
    }
}

impl<I, O> std::fmt::Debug for Coroutine<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

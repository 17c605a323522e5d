// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Steps that run a body once per element of a sequence, in order.

use std::marker::PhantomData;
use std::sync::Arc;
use std::vec;

use crate::completion::{AnyValue, StepResult};
use crate::engine::{self, take, Outcome, Progress, Resumable, StepBody, StepContext};
use crate::error::CoroutineError;

use super::Step;

struct IterationMachine<C, E, R> {
    body: Arc<dyn StepBody>,
    /// `None` until the input sequence has been taken apart.
    items: Option<vec::IntoIter<E>>,
    results: Vec<R>,
    keep: bool,
    _input: PhantomData<fn(C)>,
}

impl<C, E, R> IterationMachine<C, E, R>
where
    C: IntoIterator<Item = E> + Send + 'static,
    E: Send + 'static,
    R: Send + 'static,
{
    fn new(body: Arc<dyn StepBody>, keep: bool) -> Self {
        Self {
            body,
            items: None,
            results: Vec::new(),
            keep,
            _input: PhantomData,
        }
    }

    fn accept(&mut self, input: StepResult) -> Result<(), CoroutineError> {
        let value = input?;
        if self.items.is_none() {
            let items: Vec<E> = take::<C>(value)?.into_iter().collect();
            if self.keep {
                self.results.reserve(items.len());
            }
            self.items = Some(items.into_iter());
        } else if self.keep {
            self.results.push(take::<R>(value)?);
        }
        Ok(())
    }

    fn finish(&mut self) -> AnyValue {
        if self.keep {
            Box::new(std::mem::take(&mut self.results))
        } else {
            Box::new(())
        }
    }
}

impl<C, E, R> Resumable for IterationMachine<C, E, R>
where
    C: IntoIterator<Item = E> + Send + 'static,
    E: Send + 'static,
    R: Send + 'static,
{
    fn advance(&mut self, cx: &StepContext, input: StepResult) -> Progress {
        if let Err(err) = self.accept(input) {
            return Progress::Done(Err(err));
        }
        loop {
            let Some(item) = self.items.as_mut().and_then(|items| items.next()) else {
                return Progress::Done(Ok(self.finish()));
            };
            if let Err(err) = cx.check_cancelled() {
                return Progress::Done(Err(err));
            }
            match cx.execute(&self.body, Box::new(item)) {
                Outcome::Ready(result) => {
                    if let Err(err) = self.accept(result) {
                        return Progress::Done(Err(err));
                    }
                }
                Outcome::Suspended(pending) => return Progress::Await(pending),
            }
        }
    }
}

fn iterate<C, E, R>(body: Step<E, R>, keep: bool) -> Arc<dyn StepBody>
where
    C: IntoIterator<Item = E> + Send + 'static,
    E: Send + 'static,
    R: Send + 'static,
{
    let body = body.into_body();
    Arc::new(move |cx: &StepContext, input: AnyValue| {
        let machine = IterationMachine::<C, E, R>::new(body.clone(), keep);
        engine::drive(cx, Box::new(machine), Ok(input))
    })
}

/// Apply `body` to every element of the input sequence, in order, and
/// collect the results in the same order.
pub fn collect_each<C, E, R>(body: impl Into<Step<E, R>>) -> Step<C, Vec<R>>
where
    C: IntoIterator<Item = E> + Send + 'static,
    E: Send + 'static,
    R: Send + 'static,
{
    Step::from_body(iterate::<C, E, R>(body.into(), true))
}

/// Apply `body` to every element of the input sequence, in order,
/// discarding the results.
pub fn for_each<C, E, R>(body: impl Into<Step<E, R>>) -> Step<C, ()>
where
    C: IntoIterator<Item = E> + Send + 'static,
    E: Send + 'static,
    R: Send + 'static,
{
    Step::from_body(iterate::<C, E, R>(body.into(), false))
}

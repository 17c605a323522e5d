// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Code-execution steps. These never suspend.

use crate::completion::AnyValue;
use crate::engine::{take, try_ready, Outcome, StepContext};
use crate::error::{BoxError, CoroutineError};

use super::Step;

fn ready<T: Send + 'static>(value: T) -> Outcome {
    Outcome::Ready(Ok(Box::new(value)))
}

/// Transform the running value.
pub fn apply<I, O, F>(f: F) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    Step::new(move |_: &StepContext, input: AnyValue| {
        let input = try_ready!(take::<I>(input));
        ready(f(input))
    })
}

/// Transform the running value with code that can fail. An error fails the
/// continuation.
pub fn try_apply<I, O, E, F>(f: F) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Into<BoxError>,
    F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
{
    Step::new(move |_: &StepContext, input: AnyValue| {
        let input = try_ready!(take::<I>(input));
        match f(input) {
            Ok(output) => ready(output),
            Err(err) => Outcome::Ready(Err(CoroutineError::step(err))),
        }
    })
}

/// Use up the running value; the step produces `()`.
pub fn consume<I, F>(f: F) -> Step<I, ()>
where
    I: Send + 'static,
    F: Fn(I) + Send + Sync + 'static,
{
    apply(f)
}

/// Ignore the running value and produce a new one.
pub fn supply<I, O, F>(f: F) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn() -> O + Send + Sync + 'static,
{
    Step::new(move |_: &StepContext, _: AnyValue| ready(f()))
}

/// Run a side effect, passing the running value through unchanged.
pub fn run<T, F>(f: F) -> Step<T, T>
where
    T: Send + 'static,
    F: Fn() + Send + Sync + 'static,
{
    Step::new(move |_: &StepContext, input: AnyValue| {
        f();
        Outcome::Ready(Ok(input))
    })
}

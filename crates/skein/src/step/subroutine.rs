// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Running a whole coroutine as one step.

use crate::completion::AnyValue;
use crate::coroutine::Coroutine;
use crate::engine::{self, ChainMachine, StepContext};

use super::Step;

/// Run `coroutine` as a single step of the calling chain, in the caller's
/// run and scope. Its suspensions, cancellation and failure are the
/// caller's.
pub fn call<I, O>(coroutine: &Coroutine<I, O>) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    let steps = coroutine.steps().clone();
    Step::new(move |cx: &StepContext, input: AnyValue| {
        engine::drive(cx, Box::new(ChainMachine::new(steps.clone())), Ok(input))
    })
}

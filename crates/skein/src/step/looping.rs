// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! While-loops over the running value.

use std::sync::Arc;

use crate::completion::{AnyValue, StepResult};
use crate::engine::{self, take, Outcome, Progress, Resumable, StepBody, StepContext};

use super::Step;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct LoopMachine<T> {
    predicate: Predicate<T>,
    body: Arc<dyn StepBody>,
}

impl<T: Send + 'static> Resumable for LoopMachine<T> {
    fn advance(&mut self, cx: &StepContext, input: StepResult) -> Progress {
        let mut value = match input.and_then(take::<T>) {
            Ok(value) => value,
            Err(err) => return Progress::Done(Err(err)),
        };
        loop {
            if !(self.predicate)(&value) {
                return Progress::Done(Ok(Box::new(value)));
            }
            if let Err(err) = cx.check_cancelled() {
                return Progress::Done(Err(err));
            }
            match cx.execute(&self.body, Box::new(value)) {
                Outcome::Ready(Ok(next)) => match take::<T>(next) {
                    Ok(next) => value = next,
                    Err(err) => return Progress::Done(Err(err)),
                },
                Outcome::Ready(Err(err)) => return Progress::Done(Err(err)),
                Outcome::Suspended(pending) => return Progress::Await(pending),
            }
        }
    }
}

/// Replace the running value with `body(value)` while `predicate(value)`
/// holds. Yields the first value for which it does not.
pub fn loop_while<T, P>(predicate: P, body: impl Into<Step<T, T>>) -> Step<T, T>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    let predicate: Predicate<T> = Arc::new(predicate);
    let body = body.into().into_body();
    Step::new(move |cx: &StepContext, input: AnyValue| {
        let machine = LoopMachine {
            predicate: predicate.clone(),
            body: body.clone(),
        };
        engine::drive(cx, Box::new(machine), Ok(input))
    })
}

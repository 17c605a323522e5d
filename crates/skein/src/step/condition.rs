// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Conditional steps.

use std::sync::Arc;

use crate::completion::{AnyValue, StepResult};
use crate::engine::{take, try_ready, Outcome, StepBody, StepContext};

use super::Step;

type Predicate<I> = Arc<dyn Fn(&I) -> bool + Send + Sync>;

enum Otherwise {
    Step(Arc<dyn StepBody>),
    /// No else branch: the then-branch output is wrapped in `Some`, a false
    /// predicate yields `None`.
    Empty {
        some: fn(AnyValue) -> StepResult,
        none: fn() -> AnyValue,
    },
}

struct ConditionBody<I> {
    predicate: Predicate<I>,
    then: Arc<dyn StepBody>,
    otherwise: Otherwise,
}

impl<I: Send + 'static> StepBody for ConditionBody<I> {
    fn execute(&self, cx: &StepContext, input: AnyValue) -> Outcome {
        let input = try_ready!(take::<I>(input));
        let holds = (self.predicate)(&input);
        match (&self.otherwise, holds) {
            (Otherwise::Step(_), true) => cx.execute(&self.then, Box::new(input)),
            (Otherwise::Step(other), false) => cx.execute(other, Box::new(input)),
            (Otherwise::Empty { some, .. }, true) => {
                let some = *some;
                let outcome = cx.execute(&self.then, Box::new(input));
                cx.map_outcome(outcome, move |result| result.and_then(some))
            }
            (Otherwise::Empty { none, .. }, false) => Outcome::Ready(Ok(none())),
        }
    }
}

fn wrap_some<O: Send + 'static>(value: AnyValue) -> StepResult {
    take::<O>(value).map(|value| Box::new(Some(value)) as AnyValue)
}

fn empty<O: Send + 'static>() -> AnyValue {
    Box::new(None::<O>)
}

/// A then-branch without an else-branch yet. Use it as a
/// `Step<I, Option<O>>` directly, or finish it with
/// [`or_else`](Self::or_else).
pub struct Conditional<I, O> {
    predicate: Predicate<I>,
    then: Step<I, O>,
}

impl<I: Send + 'static, O: Send + 'static> Conditional<I, O> {
    pub fn or_else(self, otherwise: impl Into<Step<I, O>>) -> Step<I, O> {
        Step::new(ConditionBody {
            predicate: self.predicate,
            then: self.then.into_body(),
            otherwise: Otherwise::Step(otherwise.into().into_body()),
        })
    }
}

impl<I: Send + 'static, O: Send + 'static> From<Conditional<I, O>> for Step<I, Option<O>> {
    fn from(cond: Conditional<I, O>) -> Self {
        Step::new(ConditionBody {
            predicate: cond.predicate,
            then: cond.then.into_body(),
            otherwise: Otherwise::Empty {
                some: wrap_some::<O>,
                none: empty::<O>,
            },
        })
    }
}

/// Run `then` when `predicate` holds on the running value.
pub fn do_if<I, O, P>(predicate: P, then: impl Into<Step<I, O>>) -> Conditional<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    P: Fn(&I) -> bool + Send + Sync + 'static,
{
    Conditional {
        predicate: Arc::new(predicate),
        then: then.into(),
    }
}

/// Run `then` when `predicate` holds, `otherwise` when it does not.
pub fn do_if_else<I, O, P>(
    predicate: P,
    then: impl Into<Step<I, O>>,
    otherwise: impl Into<Step<I, O>>,
) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    P: Fn(&I) -> bool + Send + Sync + 'static,
{
    do_if(predicate, then).or_else(otherwise)
}

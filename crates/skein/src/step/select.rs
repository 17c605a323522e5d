// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Select: race several branches, keep the first result.
//!
//! Branches share an exclusive gate. Whichever branch first claims it,
//! by delivering a result or by taking part in a channel rendezvous, wins;
//! the other branches can no longer be claimed by anyone, so their pending
//! channel operations are skipped by the channels and lose no values. Once
//! the group has a result, whatever the losers still wait on is forced.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::completion::AnyValue;
use crate::engine::{take, try_ready, Outcome, StepBody, StepContext};
use crate::gate::{self, Gate, GateKind};

use super::Step;

struct SelectBody<I> {
    branches: Vec<Arc<dyn StepBody>>,
    _input: PhantomData<fn(I)>,
}

impl<I: Clone + Send + 'static> StepBody for SelectBody<I> {
    fn execute(&self, cx: &StepContext, input: AnyValue) -> Outcome {
        let input = try_ready!(take::<I>(input));
        let group = Gate::new(GateKind::Exclusive);
        let waits = cx.branch_waits();
        let result = cx.completion();
        {
            let waits = waits.clone();
            result.on_settled(move || waits.release());
        }

        for (index, branch) in self.branches.iter().enumerate() {
            let bcx = cx.branch(&group, &waits, index);
            let branch = branch.clone();
            let value: AnyValue = Box::new(input.clone());
            let slot = result.clone();
            let job = Box::new(move || {
                let outcome = bcx.execute(&branch, value);
                let winner = bcx.clone();
                bcx.when_ready(outcome, move |r| {
                    if gate::claim_all(&[winner.gate()]) {
                        // Losing only to cancellation of the whole run.
                        let _ = slot.try_complete(r);
                    }
                });
            });
            if let Err(err) = cx.submit(job) {
                result.force(Err(err));
                break;
            }
        }
        cx.suspend_on(result)
    }
}

/// A Select group under construction. Add branches with
/// [`or`](Self::or); use it wherever a `Step<I, O>` is expected.
pub struct Select<I, O> {
    branches: Vec<Arc<dyn StepBody>>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I: Clone + Send + 'static, O: Send + 'static> Select<I, O> {
    pub fn or(mut self, branch: impl Into<Step<I, O>>) -> Self {
        self.branches.push(branch.into().into_body());
        self
    }
}

impl<I: Clone + Send + 'static, O: Send + 'static> From<Select<I, O>> for Step<I, O> {
    fn from(select: Select<I, O>) -> Self {
        Step::new(SelectBody::<I> {
            branches: select.branches,
            _input: PhantomData,
        })
    }
}

/// Start a Select group with its first branch. Every branch gets a copy of
/// the running value.
pub fn select<I, O>(first: impl Into<Step<I, O>>) -> Select<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    Select {
        branches: vec![first.into().into_body()],
        _types: PhantomData,
    }
}

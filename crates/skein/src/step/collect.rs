// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Collect: run several branches concurrently and wait for all of them.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::completion::{AnyValue, Completion};
use crate::engine::{take, try_ready, Outcome, StepBody, StepContext};
use crate::error::CoroutineError;
use crate::gate::{self, Gate, GateKind};

use super::Step;

struct Join {
    slots: Vec<Option<AnyValue>>,
    remaining: usize,
}

struct CollectBody<I, O> {
    branches: Vec<Arc<dyn StepBody>>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> CollectBody<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    fn deliver(
        join: &Mutex<Join>,
        group: &Gate,
        branch: &StepContext,
        index: usize,
        result: Result<AnyValue, CoroutineError>,
        out: &Completion,
    ) {
        if !gate::claim_all(&[branch.gate()]) {
            return;
        }
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                // First failure fails the group; the rest are abandoned.
                group.close();
                let _ = out.try_complete(Err(err));
                return;
            }
        };
        let slots = {
            let mut join = join.lock();
            join.slots[index] = Some(value);
            join.remaining -= 1;
            if join.remaining > 0 {
                return;
            }
            std::mem::take(&mut join.slots)
        };
        let assembled: Result<Vec<O>, CoroutineError> = slots
            .into_iter()
            .map(|slot| slot.ok_or(CoroutineError::Consumed).and_then(take::<O>))
            .collect();
        let _ = out.try_complete(assembled.map(|values| Box::new(values) as AnyValue));
    }
}

impl<I, O> StepBody for CollectBody<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    fn execute(&self, cx: &StepContext, input: AnyValue) -> Outcome {
        let input = try_ready!(take::<I>(input));
        let group = Gate::new(GateKind::Shared);
        let waits = cx.branch_waits();
        let out = cx.completion();
        {
            let waits = waits.clone();
            out.on_settled(move || waits.release());
        }
        let join = Arc::new(Mutex::new(Join {
            slots: (0..self.branches.len()).map(|_| None).collect(),
            remaining: self.branches.len(),
        }));

        for (index, branch) in self.branches.iter().enumerate() {
            let bcx = cx.branch(&group, &waits, index);
            let branch = branch.clone();
            let value: AnyValue = Box::new(input.clone());
            let (bjoin, bgroup, bout) = (join.clone(), group.clone(), out.clone());
            let job = Box::new(move || {
                let outcome = bcx.execute(&branch, value);
                let owner = bcx.clone();
                bcx.when_ready(outcome, move |r| {
                    Self::deliver(&bjoin, &bgroup, &owner, index, r, &bout);
                });
            });
            if let Err(err) = cx.submit(job) {
                group_failed(&group, &out, err);
                break;
            }
        }
        cx.suspend_on(out)
    }
}

fn group_failed(group: &Gate, out: &Completion, err: CoroutineError) {
    group.close();
    out.force(Err(err));
}

/// A Collect group under construction. Add branches with
/// [`and`](Self::and); use it wherever a `Step<I, Vec<O>>` is expected.
pub struct Collect<I, O> {
    branches: Vec<Arc<dyn StepBody>>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I: Clone + Send + 'static, O: Send + 'static> Collect<I, O> {
    pub fn and(mut self, branch: impl Into<Step<I, O>>) -> Self {
        self.branches.push(branch.into().into_body());
        self
    }
}

impl<I: Clone + Send + 'static, O: Send + 'static> From<Collect<I, O>> for Step<I, Vec<O>> {
    fn from(collect: Collect<I, O>) -> Self {
        Step::new(CollectBody::<I, O> {
            branches: collect.branches,
            _types: PhantomData,
        })
    }
}

/// Start a Collect group with its first branch. The group's output holds
/// one result per branch, in branch order.
pub fn collect<I, O>(first: impl Into<Step<I, O>>) -> Collect<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    Collect {
        branches: vec![first.into().into_body()],
        _types: PhantomData,
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channel send and receive steps.

use crate::channel::ChannelId;
use crate::completion::AnyValue;
use crate::engine::{take, try_ready, StepContext};

use super::Step;

/// Send the running value on channel `id` of the run's scope, suspending
/// until a receiver takes it. The value is passed through.
pub fn send<T>(id: &ChannelId<T>) -> Step<T, T>
where
    T: Clone + Send + 'static,
{
    let id = id.clone();
    Step::new(move |cx: &StepContext, input: AnyValue| {
        let value = try_ready!(take::<T>(input));
        let channel = try_ready!(cx.scope().channel(&id));
        let done = cx.completion();
        channel.offer(value.clone(), done.clone());
        let outcome = cx.suspend_on(done);
        cx.map_outcome(outcome, move |result| result.map(|_| Box::new(value) as AnyValue))
    })
}

/// Receive a value from channel `id` of the run's scope, suspending until a
/// sender arrives. The running value is dropped.
pub fn receive<I, T>(id: &ChannelId<T>) -> Step<I, T>
where
    I: Send + 'static,
    T: Send + 'static,
{
    let id = id.clone();
    Step::new(move |cx: &StepContext, _: AnyValue| {
        let channel = try_ready!(cx.scope().channel(&id));
        let waiter = cx.completion();
        channel.request(waiter.clone());
        cx.suspend_on(waiter)
    })
}

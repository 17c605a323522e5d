// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timed suspension.

use std::time::Duration;

use crate::completion::AnyValue;
use crate::engine::{Outcome, StepContext};
use crate::error::CoroutineError;

use super::Step;

/// Suspend for at least `duration`, then pass the running value on.
///
/// The wake-up comes from the context's timer, so no worker thread is held
/// while waiting.
pub fn sleep<T: Send + 'static>(duration: Duration) -> Step<T, T> {
    Step::new(move |cx: &StepContext, input: AnyValue| {
        let wake = cx.completion();
        let fire = wake.clone();
        let scheduled = cx.scope().context().timer().schedule(
            duration,
            Box::new(move || {
                tracing::trace!(?duration, "delay elapsed");
                let _ = fire.try_complete(Ok(input));
            }),
        );
        match scheduled {
            Ok(handle) => wake.on_settled(move || handle.cancel()),
            Err(_) => return Outcome::Ready(Err(CoroutineError::Rejected)),
        }
        cx.suspend_on(wake)
    })
}

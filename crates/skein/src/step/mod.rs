// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Steps: the instructions a coroutine is built from.
//!
//! A [`Step<I, O>`] takes the running value `I` and produces `O`, possibly
//! after suspending. Steps hold no per-run state and can be shared between
//! coroutines. Each submodule provides one family of steps:
//!
//! | module | steps |
//! |---|---|
//! | `code` | `apply`, `try_apply`, `consume`, `supply`, `run` |
//! | `condition` | `do_if`, `do_if_else` |
//! | `looping` | `loop_while` |
//! | `iteration` | `collect_each`, `for_each` |
//! | `channel_ops` | `send`, `receive` |
//! | `select` | `select` |
//! | `collect` | `collect` |
//! | `subroutine` | `call` |
//! | `delay` | `sleep` |

mod channel_ops;
mod code;
mod collect;
mod condition;
mod delay;
mod iteration;
mod looping;
mod select;
mod subroutine;

use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::StepBody;

pub use channel_ops::{receive, send};
pub use code::{apply, consume, run, supply, try_apply};
pub use collect::{collect, Collect};
pub use condition::{do_if, do_if_else, Conditional};
pub use delay::sleep;
pub use iteration::{collect_each, for_each};
pub use looping::loop_while;
pub use select::{select, Select};
pub use subroutine::call;

/// One typed step from `I` to `O`.
pub struct Step<I, O> {
    body: Arc<dyn StepBody>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Step<I, O> {
    fn clone(&self) -> Self {
        Self {
            body: self.body.clone(),
            _types: PhantomData,
        }
    }
}

impl<I, O> Step<I, O> {
    pub(crate) fn new(body: impl StepBody + 'static) -> Self {
        Self {
            body: Arc::new(body),
            _types: PhantomData,
        }
    }

    pub(crate) fn from_body(body: Arc<dyn StepBody>) -> Self {
        Self {
            body,
            _types: PhantomData,
        }
    }

    pub(crate) fn into_body(self) -> Arc<dyn StepBody> {
        self.body
    }
}

impl<I, O> std::fmt::Debug for Step<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Step<{}, {}>",
            std::any::type_name::<I>(),
            std::any::type_name::<O>()
        )
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Rendezvous channels.
//!
//! A channel pairs the longest-waiting sender with the longest-waiting
//! receiver; nothing is buffered. Both sides wait on a [`Completion`]. A
//! pair is matched by claiming both completions (and every gate above
//! them) in one step while the channel lock is held; the values are
//! delivered after the lock is released.
//!
//! Waiters that can no longer be claimed (their run was cancelled, their
//! Select branch lost) are dropped from the queues as the matcher meets
//! them, and from their own side's queue whenever a new waiter joins it.

use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::completion::Completion;
use crate::engine::take;
use crate::error::CoroutineError;
use crate::gate;
use crate::scope::{CoroutineScope, ScopeInner};

/// Typed, name-keyed channel identifier.
///
/// Does not own a channel: the same id names a distinct channel in every
/// scope. Equality and hashing use the name only.
pub struct ChannelId<T> {
    name: Arc<str>,
    _value: PhantomData<fn() -> T>,
}

impl<T> ChannelId<T> {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key(&self) -> &Arc<str> {
        &self.name
    }
}

impl<T> Clone for ChannelId<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> PartialEq for ChannelId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for ChannelId<T> {}

impl<T> Hash for ChannelId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<T> fmt::Debug for ChannelId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId<{}>({:?})", std::any::type_name::<T>(), self.name)
    }
}

impl<T> fmt::Display for ChannelId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

struct PendingSend<T> {
    value: T,
    done: Arc<Completion>,
}

struct Queues<T> {
    closed: bool,
    senders: VecDeque<PendingSend<T>>,
    receivers: VecDeque<Arc<Completion>>,
}

struct Shared<T> {
    name: Arc<str>,
    scope: Weak<ScopeInner>,
    queues: Mutex<Queues<T>>,
}

/// A rendezvous channel owned by one scope.
///
/// Handles are cheap to clone and all refer to the same channel.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> Channel<T> {
    pub(crate) fn new(name: Arc<str>, scope: Weak<ScopeInner>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                scope,
                queues: Mutex::new(Queues {
                    closed: false,
                    senders: VecDeque::new(),
                    receivers: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queues.lock().closed
    }

    /// The scope that owns this channel, while it is still alive.
    pub fn scope(&self) -> Option<CoroutineScope> {
        self.shared.scope.upgrade().map(CoroutineScope::from_inner)
    }

    fn closed_error(&self) -> CoroutineError {
        CoroutineError::ChannelClosed {
            channel: self.shared.name.to_string(),
        }
    }

    /// Offer `value`; `done` is filled with `()` once a receiver took it,
    /// or with an error if the channel is or becomes closed.
    pub(crate) fn offer(&self, value: T, done: Arc<Completion>) {
        let mut queues = self.shared.queues.lock();
        if queues.closed {
            drop(queues);
            done.force(Err(self.closed_error()));
            return;
        }
        let mut i = 0;
        while let Some(receiver) = queues.receivers.get(i) {
            if gate::claim_all(&[receiver.node(), done.node()]) {
                if let Some(receiver) = queues.receivers.remove(i) {
                    drop(queues);
                    tracing::trace!(channel = %self.shared.name, "rendezvous");
                    receiver.fill(Ok(Box::new(value)));
                    done.fill(Ok(Box::new(())));
                }
                return;
            }
            if !done.is_claimable() {
                return;
            }
            if receiver.is_claimable() {
                // Opposite branch of the sender's own Select group.
                i += 1;
            } else {
                queues.receivers.remove(i);
            }
        }
        if done.is_claimable() {
            queues.senders.retain(|sender| sender.done.is_claimable());
            queues.senders.push_back(PendingSend { value, done });
        }
    }

    /// Ask for a value; `waiter` is filled with the boxed value once a
    /// sender is matched, or with an error on close.
    pub(crate) fn request(&self, waiter: Arc<Completion>) {
        let mut queues = self.shared.queues.lock();
        if queues.closed {
            drop(queues);
            waiter.force(Err(self.closed_error()));
            return;
        }
        let mut i = 0;
        while let Some(sender) = queues.senders.get(i) {
            if gate::claim_all(&[waiter.node(), sender.done.node()]) {
                if let Some(sender) = queues.senders.remove(i) {
                    drop(queues);
                    tracing::trace!(channel = %self.shared.name, "rendezvous");
                    waiter.fill(Ok(Box::new(sender.value)));
                    sender.done.fill(Ok(Box::new(())));
                }
                return;
            }
            if !waiter.is_claimable() {
                return;
            }
            if sender.done.is_claimable() {
                i += 1;
            } else {
                queues.senders.remove(i);
            }
        }
        if waiter.is_claimable() {
            queues.receivers.retain(|receiver| receiver.is_claimable());
            queues.receivers.push_back(waiter);
        }
    }

    /// Send from plain code, blocking until a receiver takes the value.
    pub fn send_blocking(&self, value: T) -> Result<(), CoroutineError> {
        let done = Completion::detached();
        self.offer(value, done.clone());
        done.wait().map(drop)
    }

    /// Receive from plain code, blocking until a sender arrives.
    pub fn receive_blocking(&self) -> Result<T, CoroutineError> {
        let waiter = Completion::detached();
        self.request(waiter.clone());
        waiter.wait().and_then(take::<T>)
    }

    /// Like [`receive_blocking`](Self::receive_blocking), giving up with
    /// `Timeout` after `timeout`.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<T, CoroutineError> {
        let waiter = Completion::detached();
        self.request(waiter.clone());
        let result = match waiter.wait_timeout(timeout) {
            Some(result) => result,
            // Lost the race to a sender that already claimed us.
            None if !waiter.force(Err(CoroutineError::Timeout)) => waiter.wait(),
            None => return Err(CoroutineError::Timeout),
        };
        result.and_then(take::<T>)
    }

    /// Take a value only if a sender is already waiting.
    pub fn try_receive(&self) -> Result<Option<T>, CoroutineError> {
        let mut queues = self.shared.queues.lock();
        if queues.closed {
            return Err(self.closed_error());
        }
        let mut i = 0;
        while let Some(sender) = queues.senders.get(i) {
            if sender.done.claim() {
                if let Some(sender) = queues.senders.remove(i) {
                    drop(queues);
                    sender.done.fill(Ok(Box::new(())));
                    return Ok(Some(sender.value));
                }
                return Ok(None);
            }
            if sender.done.is_claimable() {
                i += 1;
            } else {
                queues.senders.remove(i);
            }
        }
        Ok(None)
    }

    /// Close the channel. Every waiting sender and receiver fails with
    /// `ChannelClosed`, as does every later send or receive. Closing twice
    /// has no further effect.
    pub fn close(&self) {
        let (senders, receivers) = {
            let mut queues = self.shared.queues.lock();
            if queues.closed {
                return;
            }
            queues.closed = true;
            (
                std::mem::take(&mut queues.senders),
                std::mem::take(&mut queues.receivers),
            )
        };
        tracing::debug!(
            channel = %self.shared.name,
            senders = senders.len(),
            receivers = receivers.len(),
            "channel closed"
        );
        for sender in senders {
            sender.done.force(Err(self.closed_error()));
        }
        for receiver in receivers {
            receiver.force(Err(self.closed_error()));
        }
    }

    #[cfg(test)]
    fn waiting(&self) -> (usize, usize) {
        let queues = self.shared.queues.lock();
        (queues.senders.len(), queues.receivers.len())
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("name", &self.shared.name).finish()
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lifecycle listeners.
//!
//! Listeners can be attached to a coroutine, a scope or a context and see
//! STARTED / FINISHED events for every run in their reach. They are called
//! synchronously on whatever thread drives the run and must not block.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::continuation::ContinuationState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Finished,
}

/// One lifecycle transition of a run.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub scope: u64,
    pub continuation: u64,
    pub coroutine: Arc<str>,
    /// Terminal state, for `Finished` events.
    pub state: Option<ContinuationState>,
}

pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> LifecycleListener for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Mutable listener list owned by a scope or context.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
}

impl ListenerSet {
    pub fn add(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.write().push(listener);
    }

    /// Snapshot first so a listener may register further listeners.
    pub fn fire(&self, event: &LifecycleEvent) {
        let snapshot: Vec<_> = self.listeners.read().clone();
        fire_all(&snapshot, event);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

pub(crate) fn fire_all(listeners: &[Arc<dyn LifecycleListener>], event: &LifecycleEvent) {
    for listener in listeners {
        listener.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn closures_are_listeners() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::default();
        let sink = seen.clone();
        set.add(Arc::new(move |e: &LifecycleEvent| sink.lock().push(e.kind)));
        assert_eq!(set.len(), 1);

        let event = LifecycleEvent {
            kind: EventKind::Started,
            scope: 1,
            continuation: 2,
            coroutine: Arc::from("probe"),
            state: None,
        };
        set.fire(&event);
        set.fire(&LifecycleEvent {
            kind: EventKind::Finished,
            state: Some(ContinuationState::Finished),
            ..event
        });
        assert_eq!(*seen.lock(), vec![EventKind::Started, EventKind::Finished]);
    }
}

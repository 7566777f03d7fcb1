//! Render event notifications.
//!
//! Each render owns one `EventEmitter`. Handlers subscribe to a named
//! channel and are called in registration order; events are never replayed
//! to handlers that subscribe later.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::RenderError;
use crate::ids::FragmentId;

/// Terminal outcome of an async fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Completed with content (direct or written through its context).
    Resolved,
    /// Completed with an error, raised, or was abandoned.
    Failed,
    /// Its deadline elapsed before it completed.
    TimedOut,
}

/// Channel names a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Error,
    End,
    Declared,
    Settled,
    Flush,
}

/// A render notification.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// A fragment failed or timed out.
    Error(RenderError),
    /// The render is complete and the sink has been finished.
    End,
    /// A fragment placeholder was declared.
    Declared { fragment: FragmentId },
    /// A fragment reached its terminal state.
    Settled {
        fragment: FragmentId,
        outcome: FragmentOutcome,
    },
    /// Content was handed to the sink.
    Flush { bytes: usize },
}

impl RenderEvent {
    /// The channel this event is delivered on.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Error(_) => EventKind::Error,
            Self::End => EventKind::End,
            Self::Declared { .. } => EventKind::Declared,
            Self::Settled { .. } => EventKind::Settled,
            Self::Flush { .. } => EventKind::Flush,
        }
    }
}

/// Handler invoked for every event on its channel.
pub type EventHandler = Arc<dyn Fn(&RenderEvent) + Send + Sync>;

/// Ordered subscriber list.
#[derive(Default)]
pub struct EventEmitter {
    handlers: Mutex<Vec<(EventKind, EventHandler)>>,
}

impl EventEmitter {
    /// Create an emitter with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to a channel.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, handler));
    }

    /// Deliver an event to the current subscribers of its channel.
    ///
    /// The subscriber list is snapshotted first, so handlers may subscribe
    /// further handlers or call back into the render.
    pub fn emit(&self, event: &RenderEvent) {
        let kind = event.kind();
        let targets: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in targets {
            handler(event);
        }
    }

    /// Number of handlers subscribed to a channel.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("EventEmitter")
            .field("handlers", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_delivers_in_registration_order() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            emitter.subscribe(
                EventKind::End,
                Arc::new(move |_| seen.lock().unwrap().push(tag)),
            );
        }

        emitter.emit(&RenderEvent::End);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_emit_filters_by_channel() {
        let emitter = EventEmitter::new();
        let errors = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&errors);
        emitter.subscribe(
            EventKind::Error,
            Arc::new(move |_| *counter.lock().unwrap() += 1),
        );

        emitter.emit(&RenderEvent::End);
        emitter.emit(&RenderEvent::Flush { bytes: 3 });
        assert_eq!(*errors.lock().unwrap(), 0);

        emitter.emit(&RenderEvent::Error(RenderError::FragmentAbandoned {
            fragment: FragmentId(1),
        }));
        assert_eq!(*errors.lock().unwrap(), 1);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let emitter = EventEmitter::new();
        emitter.emit(&RenderEvent::End);

        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        emitter.subscribe(EventKind::End, Arc::new(move |_| *flag.lock().unwrap() = true));

        assert!(!*called.lock().unwrap());
        assert_eq!(emitter.subscriber_count(EventKind::End), 1);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let emitter = Arc::new(EventEmitter::new());
        let inner = Arc::clone(&emitter);
        emitter.subscribe(
            EventKind::End,
            Arc::new(move |_| inner.subscribe(EventKind::Error, Arc::new(|_| {}))),
        );

        emitter.emit(&RenderEvent::End);
        assert_eq!(emitter.subscriber_count(EventKind::Error), 1);
    }
}

//! Lifecycle events and the in-process event bus.
//!
//! The engine and queues publish through the narrow [`EventSink`] trait they
//! are handed at construction. [`EventBus`] is the in-process implementation:
//! subscribers are called synchronously, in registration order, on the
//! publisher's task. Each publish delivers to the subscribers registered when
//! it started; a handler may subscribe further handlers, which see later
//! events only.
//!
//! Known limitation: a subscriber that returns an error stops delivery of that
//! event to the subscribers registered after it. The error is returned to the
//! publisher, which logs it. State has always been persisted before an event
//! is published, so a failing subscriber never loses engine state.

use crate::errors::EventError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Names of the lifecycle events the system emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    PhaseCompleted,
    WorkflowCompleted,
    WorkflowFailed,
    PrCreated,
    PrUpdated,
    BranchCreated,
    QueueItemCompleted,
    QueueItemFailed,
}

impl EventKind {
    /// Returns all event kinds.
    pub fn all() -> &'static [EventKind] {
        &[
            EventKind::PhaseCompleted,
            EventKind::WorkflowCompleted,
            EventKind::WorkflowFailed,
            EventKind::PrCreated,
            EventKind::PrUpdated,
            EventKind::BranchCreated,
            EventKind::QueueItemCompleted,
            EventKind::QueueItemFailed,
        ]
    }

    /// Returns the event name as published.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PhaseCompleted => "phaseCompleted",
            EventKind::WorkflowCompleted => "workflowCompleted",
            EventKind::WorkflowFailed => "workflowFailed",
            EventKind::PrCreated => "prCreated",
            EventKind::PrUpdated => "prUpdated",
            EventKind::BranchCreated => "branchCreated",
            EventKind::QueueItemCompleted => "queueItemCompleted",
            EventKind::QueueItemFailed => "queueItemFailed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown event '{}'", s))
    }
}

/// A published event: a name plus a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            emitted_at: Utc::now(),
        }
    }
}

/// Publish capability injected into the engine and queues.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &Event) -> Result<(), EventError>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &Event) -> Result<(), EventError> {
        Ok(())
    }
}

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    /// `None` subscribes to every event.
    kind: Option<EventKind>,
    handler: Handler,
}

/// Synchronous publish/subscribe keyed by event name.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(Some(kind), Arc::new(handler));
    }

    /// Register a handler for every event kind.
    pub fn subscribe_all<F>(&self, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(None, Arc::new(handler));
    }

    /// Number of handlers that would receive an event of `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        subscribers
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == kind))
            .count()
    }

    fn push(&self, kind: Option<EventKind>, handler: Handler) {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.push(Subscriber { kind, handler });
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: &Event) -> Result<(), EventError> {
        let matching: Vec<(usize, Handler)> = {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            subscribers
                .iter()
                .enumerate()
                .filter(|(_, s)| s.kind.is_none_or(|k| k == event.kind))
                .map(|(index, s)| (index, Arc::clone(&s.handler)))
                .collect()
        };
        for (index, handler) in matching {
            handler(event).map_err(|source| EventError::SubscriberFailed {
                event: event.kind.to_string(),
                subscriber: index,
                source,
            })?;
        }
        Ok(())
    }
}

/// Publish and log (rather than propagate) a delivery failure.
pub(crate) fn emit(sink: &dyn EventSink, kind: EventKind, payload: Value) {
    let event = Event::new(kind, payload);
    if let Err(e) = sink.publish(&event) {
        tracing::warn!(event = %kind, error = %e, "event delivery aborted");
    }
}

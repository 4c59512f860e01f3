//! Persisted, order-preserving work queue drained one item at a time.

use super::item::{QueueItem, QueueItemStatus, QueuePayload};
use crate::errors::EngineError;
use crate::events::{EventKind, EventSink, emit};
use crate::store::StateStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Does the work for one queued payload.
#[async_trait]
pub trait QueueProcessor<T>: Send + Sync {
    async fn process(&self, payload: &T) -> anyhow::Result<Option<Value>>;
}

/// What happens to the head item when processing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Remove it and move on to the next item.
    #[default]
    Drop,
    /// Leave it at the head; the next drain retries it.
    Stall,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Drop => write!(f, "drop"),
            FailurePolicy::Stall => write!(f, "stall"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(FailurePolicy::Drop),
            "stall" => Ok(FailurePolicy::Stall),
            _ => anyhow::bail!("Unknown failure policy '{}'. Use 'drop' or 'stall'", s),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    pub failure_policy: FailurePolicy,
    /// Maximum number of finished items kept in `history`.
    pub history_limit: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Drop,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Appended { position: usize },
    Merged { position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Nothing queued.
    Empty,
    /// The head item is already being processed by another drain.
    Busy,
    Completed { key: String },
    Failed { key: String, error: String },
}

/// Snapshot returned by [`DurableQueue::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus<T> {
    pub name: String,
    pub items: Vec<QueueItem<T>>,
    pub history: Vec<QueueItem<T>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueDocument<T> {
    items: Vec<QueueItem<T>>,
    #[serde(default = "VecDeque::new")]
    history: VecDeque<QueueItem<T>>,
}

impl<T> Default for QueueDocument<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            history: VecDeque::new(),
        }
    }
}

impl<T: QueuePayload> QueueDocument<T> {
    /// Move the item at `position` into history, bounded to `limit` entries.
    /// A payload re-submitted while it was processing takes its place as a
    /// fresh pending item. Returns the retired item.
    fn retire(&mut self, position: usize, limit: usize) -> QueueItem<T> {
        let mut item = self.items.remove(position);
        if let Some(next) = item.resubmitted.take() {
            self.items.insert(position, QueueItem::new(next));
        }
        self.history.push_back(item.clone());
        while self.history.len() > limit.max(1) {
            self.history.pop_front();
        }
        item
    }
}

pub struct DurableQueue<T: QueuePayload> {
    name: String,
    collection: String,
    store: Arc<dyn StateStore>,
    processor: Arc<dyn QueueProcessor<T>>,
    events: Arc<dyn EventSink>,
    options: QueueOptions,
    state: Mutex<QueueDocument<T>>,
}

impl<T: QueuePayload> DurableQueue<T> {
    /// Open the queue persisted as `queue-<name>`.
    ///
    /// An item left `processing` by a dead process goes back to `pending`.
    /// An item that was already recorded as finished (completed, or failed
    /// under [`FailurePolicy::Drop`]) is moved to history without being
    /// processed again. `history_limit` is raised to at least 1.
    pub fn open(
        name: &str,
        store: Arc<dyn StateStore>,
        processor: Arc<dyn QueueProcessor<T>>,
        events: Arc<dyn EventSink>,
        options: QueueOptions,
    ) -> Result<Self, EngineError> {
        let options = QueueOptions {
            history_limit: options.history_limit.max(1),
            ..options
        };
        let collection = format!("queue-{name}");
        let mut document: QueueDocument<T> = store.load_or_default(&collection)?;

        let mut recovered = false;
        let mut position = 0;
        while position < document.items.len() {
            let item = &mut document.items[position];
            let finished = match item.status {
                QueueItemStatus::Completed => true,
                QueueItemStatus::Failed if options.failure_policy == FailurePolicy::Drop => true,
                QueueItemStatus::Failed => {
                    if let Some(next) = item.resubmitted.take() {
                        item.payload = next;
                        recovered = true;
                    }
                    false
                }
                QueueItemStatus::Processing => {
                    item.status = QueueItemStatus::Pending;
                    if let Some(next) = item.resubmitted.take() {
                        item.payload = next;
                    }
                    recovered = true;
                    false
                }
                QueueItemStatus::Pending => false,
            };
            if finished {
                let item = document.retire(position, options.history_limit);
                tracing::warn!(
                    queue = %name,
                    key = %item.key(),
                    status = %item.status,
                    "moved finished item to history"
                );
                recovered = true;
                // A re-queued resubmission now sits at this position.
                if document.items.get(position).is_some_and(|i| i.key() == item.key()) {
                    position += 1;
                }
            } else {
                position += 1;
            }
        }
        if recovered {
            tracing::warn!(queue = %name, "recovered interrupted queue state");
            store.save_typed(&collection, &document)?;
        }

        Ok(Self {
            name: name.to_string(),
            collection,
            store,
            processor,
            events,
            options,
            state: Mutex::new(document),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueDocument<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, document: &QueueDocument<T>) {
        if let Err(e) = self.store.save_typed(&self.collection, document) {
            tracing::error!(queue = %self.name, error = %e, "failed to persist queue");
        }
    }

    /// Append a payload, or merge it into the queued item with the same key.
    ///
    /// A merge keeps the existing item's position and status. If that item is
    /// being processed, the merged payload is queued again in the same
    /// position once the current attempt finishes.
    pub fn enqueue(&self, payload: T) -> Result<EnqueueOutcome, EngineError> {
        let key = payload.natural_key();
        let mut document = self.lock();

        let outcome = match document.items.iter().position(|i| i.key() == key) {
            Some(position) => {
                document.items[position].absorb(payload);
                EnqueueOutcome::Merged { position }
            }
            None => {
                document.items.push(QueueItem::new(payload));
                EnqueueOutcome::Appended {
                    position: document.items.len() - 1,
                }
            }
        };

        self.store.save_typed(&self.collection, &*document)?;
        tracing::debug!(queue = %self.name, key = %key, ?outcome, "enqueued");
        Ok(outcome)
    }

    /// Process at most one item: the head of the queue.
    pub async fn drain(&self) -> DrainOutcome {
        let (key, payload) = {
            let mut document = self.lock();
            let Some(head) = document.items.first_mut() else {
                return DrainOutcome::Empty;
            };
            if head.status == QueueItemStatus::Processing {
                return DrainOutcome::Busy;
            }
            head.status = QueueItemStatus::Processing;
            head.attempts += 1;
            head.updated_at = Utc::now();
            let claimed = (head.key(), head.payload.clone());
            self.persist(&document);
            claimed
        };

        tracing::info!(queue = %self.name, key = %key, "processing item");
        let result = self.processor.process(&payload).await;

        let mut document = self.lock();
        let Some(position) = document.items.iter().position(|i| i.key() == key) else {
            // Only drain removes items and the head was claimed above.
            return DrainOutcome::Busy;
        };

        match result {
            Ok(value) => {
                let item = &mut document.items[position];
                item.status = QueueItemStatus::Completed;
                item.result = value;
                item.updated_at = Utc::now();
                self.persist(&document);

                let item = document.retire(position, self.options.history_limit);
                let payload = json!({ "queue": self.name, "key": key, "item": item });
                self.persist(&document);
                drop(document);

                tracing::info!(queue = %self.name, key = %key, "item completed");
                emit(&*self.events, EventKind::QueueItemCompleted, payload);
                DrainOutcome::Completed { key }
            }
            Err(e) => {
                let error = format!("{e:#}");
                let item = &mut document.items[position];
                item.status = QueueItemStatus::Failed;
                item.error = Some(error.clone());
                item.updated_at = Utc::now();
                self.persist(&document);

                let payload = match self.options.failure_policy {
                    FailurePolicy::Drop => {
                        let item = document.retire(position, self.options.history_limit);
                        let payload = json!({ "queue": self.name, "key": key, "item": item });
                        self.persist(&document);
                        payload
                    }
                    FailurePolicy::Stall => {
                        let payload =
                            json!({ "queue": self.name, "key": key, "item": document.items[position] });
                        let item = &mut document.items[position];
                        if let Some(next) = item.resubmitted.take() {
                            item.payload = next;
                            self.persist(&document);
                        }
                        payload
                    }
                };
                drop(document);

                tracing::error!(queue = %self.name, key = %key, error = %error, "item failed");
                emit(&*self.events, EventKind::QueueItemFailed, payload);
                DrainOutcome::Failed { key, error }
            }
        }
    }

    /// Drain until the queue is empty, busy, or stalled on a failed head.
    pub async fn drain_all(&self) -> Vec<DrainOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.drain().await;
            let stop = match &outcome {
                DrainOutcome::Empty | DrainOutcome::Busy => true,
                DrainOutcome::Failed { .. } => {
                    self.options.failure_policy == FailurePolicy::Stall
                }
                DrainOutcome::Completed { .. } => false,
            };
            if !matches!(outcome, DrainOutcome::Empty) {
                outcomes.push(outcome);
            }
            if stop {
                return outcomes;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Finished items, oldest first.
    pub fn history(&self) -> Vec<QueueItem<T>> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn status(&self) -> QueueStatus<T> {
        let document = self.lock();
        QueueStatus {
            name: self.name.clone(),
            items: document.items.clone(),
            history: document.history.iter().cloned().collect(),
        }
    }
}

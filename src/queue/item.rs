use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A payload that can be queued.
///
/// Items with equal natural keys are the same logical item: enqueuing one
/// while another is present merges into it instead of appending.
pub trait QueuePayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn natural_key(&self) -> String;

    /// Merge a re-submitted payload into this one. Last write wins.
    fn merge(&mut self, newer: Self) {
        *self = newer;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem<T> {
    pub payload: T,
    pub status: QueueItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of times a drain has handed this item to the processor.
    #[serde(default)]
    pub attempts: u32,
    /// Payload enqueued under this key while the item was processing. It is
    /// queued as a fresh item once the current attempt finishes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resubmitted: Option<T>,
}

impl<T: QueuePayload> QueueItem<T> {
    pub fn new(payload: T) -> Self {
        let now = Utc::now();
        Self {
            payload,
            status: QueueItemStatus::Pending,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            attempts: 0,
            resubmitted: None,
        }
    }

    pub fn key(&self) -> String {
        self.payload.natural_key()
    }

    /// Fold a newer submission into this item. While the item is being
    /// processed the submission is held aside so the in-flight payload
    /// stays the one that gets recorded.
    pub fn absorb(&mut self, newer: T) {
        if self.status == QueueItemStatus::Processing {
            let mut next = self
                .resubmitted
                .take()
                .unwrap_or_else(|| self.payload.clone());
            next.merge(newer);
            self.resubmitted = Some(next);
        } else {
            self.payload.merge(newer);
        }
        self.updated_at = Utc::now();
    }
}

//! Durable work queues.
//!
//! Items are keyed by a natural key derived from their payload and drained
//! strictly one at a time, head first. Any terminal outcome removes the item
//! so a bad item cannot block the queue (unless the queue is configured to
//! stall on failure).

mod durable;
mod item;

pub use durable::{
    DrainOutcome, DurableQueue, EnqueueOutcome, FailurePolicy, QueueOptions, QueueProcessor,
    QueueStatus,
};
pub use item::{QueueItem, QueueItemStatus, QueuePayload};

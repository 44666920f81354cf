//! Message store capability consumed by the queue engine.
//!
//! A store holds the ordered messages of exactly one queue. The engine only
//! relies on three operations, so an in-process deque and an on-disk log
//! satisfy the same contract.

use crate::error::StoreError;
use crate::message::{QueueUrl, StoredMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// Ordered message storage for a single queue.
///
/// Each operation must be linearizable with respect to the others on the
/// same store; in particular `dequeue_front` is the point where concurrent
/// pulls are serialized, so two callers never receive the same message.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Append a message at the back of the queue
    async fn enqueue_back(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// Remove and return the front message, or `None` when the queue is empty
    async fn dequeue_front(&self) -> Result<Option<StoredMessage>, StoreError>;

    /// Put a message back at the head of the queue
    async fn requeue_front(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// Number of messages currently visible
    async fn len(&self) -> Result<usize, StoreError>;

    /// Check whether no message is currently visible
    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}

/// Creates the store backing a queue the first time the queue is referenced.
pub trait StoreFactory: Send + Sync + std::fmt::Debug {
    /// Open (or create) the store for `queue_url`
    fn open(&self, queue_url: &QueueUrl) -> Result<Arc<dyn MessageStore>, StoreError>;
}

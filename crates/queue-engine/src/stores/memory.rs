//! In-memory message store for tests, development and single-process use.

use crate::error::StoreError;
use crate::message::{QueueUrl, StoredMessage};
use crate::store::{MessageStore, StoreFactory};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Process-local FIFO of messages for one queue
#[derive(Debug, Default)]
pub struct InMemoryStore {
    messages: Mutex<VecDeque<StoredMessage>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn messages(&self) -> MutexGuard<'_, VecDeque<StoredMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn enqueue_back(&self, message: StoredMessage) -> Result<(), StoreError> {
        self.messages().push_back(message);
        Ok(())
    }

    async fn dequeue_front(&self) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.messages().pop_front())
    }

    async fn requeue_front(&self, message: StoredMessage) -> Result<(), StoreError> {
        self.messages().push_front(message);
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.messages().len())
    }
}

/// Hands out a fresh [`InMemoryStore`] per queue
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryStoreFactory;

impl StoreFactory for InMemoryStoreFactory {
    fn open(&self, _queue_url: &QueueUrl) -> Result<Arc<dyn MessageStore>, StoreError> {
        Ok(Arc::new(InMemoryStore::new()))
    }
}

//! Common test utilities for queue-engine integration tests
//!
//! This module provides:
//! - Engine builders for the memory and file backends
//! - Store wrappers that can be told to fail
//! - Helpers for pulling and deleting by body

use async_trait::async_trait;
use queue_engine::{
    DeleteRequest, EngineConfig, Message, MessageStore, PullRequest, QueueEngine, QueueUrl,
    StoreError, StoreFactory, StoredMessage,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

/// Margin added to visibility timeouts before checking for redelivery.
#[allow(dead_code)]
pub const SETTLE: Duration = Duration::from_millis(400);

/// Engine settings used across the integration tests
#[allow(dead_code)]
pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_messages_per_pull: 10,
        scheduler_worker_threads: 2,
        ..EngineConfig::default()
    }
}

#[allow(dead_code)]
pub fn memory_engine() -> Arc<QueueEngine> {
    Arc::new(QueueEngine::new(test_config()).unwrap())
}

/// Receipt handle of a delivered message as the string callers pass back.
#[allow(dead_code)]
pub fn receipt(message: &Message) -> String {
    message
        .receipt_handle
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Pull everything currently visible, up to the configured ceiling per call.
#[allow(dead_code)]
pub async fn drain(engine: &QueueEngine, queue: &str) -> Vec<Message> {
    let mut all = Vec::new();
    loop {
        let batch = engine
            .pull(PullRequest::new(queue).with_max_messages(10))
            .await
            .unwrap();
        if batch.is_empty() {
            return all;
        }
        all.extend(batch);
    }
}

#[allow(dead_code)]
pub async fn delete_all(engine: &QueueEngine, queue: &str, messages: &[Message]) {
    for message in messages {
        engine
            .delete(DeleteRequest::new(queue, receipt(message)))
            .await
            .unwrap();
    }
}

// ============================================================================
// Failing Store
// ============================================================================

/// Store wrapper that fails every operation while `failing` is set.
#[derive(Debug)]
#[allow(dead_code)]
pub struct FlakyStore {
    inner: Arc<dyn MessageStore>,
    failing: Arc<AtomicBool>,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("injected failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn enqueue_back(&self, message: StoredMessage) -> Result<(), StoreError> {
        self.check()?;
        self.inner.enqueue_back(message).await
    }

    async fn dequeue_front(&self) -> Result<Option<StoredMessage>, StoreError> {
        self.check()?;
        self.inner.dequeue_front().await
    }

    async fn requeue_front(&self, message: StoredMessage) -> Result<(), StoreError> {
        self.check()?;
        self.inner.requeue_front(message).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}

/// Factory producing [`FlakyStore`]s that share one failure switch.
#[derive(Debug, Default)]
#[allow(dead_code)]
pub struct FlakyStoreFactory {
    pub failing: Arc<AtomicBool>,
}

impl StoreFactory for FlakyStoreFactory {
    fn open(&self, queue_url: &QueueUrl) -> Result<Arc<dyn MessageStore>, StoreError> {
        Ok(Arc::new(FlakyStore {
            inner: queue_engine::InMemoryStoreFactory.open(queue_url)?,
            failing: Arc::clone(&self.failing),
        }))
    }
}

/// Store wrapper whose `failing_dequeue`-th dequeue (1-based) fails once.
#[derive(Debug)]
#[allow(dead_code)]
pub struct FailOnceStore {
    inner: Arc<dyn MessageStore>,
    dequeues: AtomicUsize,
    failing_dequeue: usize,
}

#[async_trait]
impl MessageStore for FailOnceStore {
    async fn enqueue_back(&self, message: StoredMessage) -> Result<(), StoreError> {
        self.inner.enqueue_back(message).await
    }

    async fn dequeue_front(&self) -> Result<Option<StoredMessage>, StoreError> {
        if self.dequeues.fetch_add(1, Ordering::SeqCst) + 1 == self.failing_dequeue {
            return Err(StoreError::Io(std::io::Error::other("injected failure")));
        }
        self.inner.dequeue_front().await
    }

    async fn requeue_front(&self, message: StoredMessage) -> Result<(), StoreError> {
        self.inner.requeue_front(message).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}

/// Factory producing [`FailOnceStore`]s.
#[derive(Debug)]
#[allow(dead_code)]
pub struct FailOnceStoreFactory {
    pub failing_dequeue: usize,
}

impl StoreFactory for FailOnceStoreFactory {
    fn open(&self, queue_url: &QueueUrl) -> Result<Arc<dyn MessageStore>, StoreError> {
        Ok(Arc::new(FailOnceStore {
            inner: queue_engine::InMemoryStoreFactory.open(queue_url)?,
            dequeues: AtomicUsize::new(0),
            failing_dequeue: self.failing_dequeue,
        }))
    }
}

//! Queue engine: push, pull and delete with visibility timeouts.
//!
//! Per delivery a message moves `Queued -> InFlight(handle) -> {Deleted | Queued}`.
//! `InFlight` is entered only by pull and left exactly once, by whichever of
//! delete or the visibility timer takes the handle out of the
//! [`ReceiptTracker`] first.

use crate::config::{EngineConfig, StorageConfig};
use crate::error::{QueueError, StoreError};
use crate::message::{
    Checksum, DeleteRequest, Message, PullRequest, PushRequest, QueueUrl, ReceiptHandle,
    StoredMessage,
};
use crate::registry::QueueRegistry;
use crate::scheduler::{CancelToken, SchedulerStats, VisibilityScheduler};
use crate::store::{MessageStore, StoreFactory};
use crate::stores::{FileStoreFactory, InMemoryStoreFactory};
use crate::tracker::{InFlightRecord, ReceiptTracker};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Shortest wait before a failed requeue is attempted again
const MIN_REQUEUE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

/// Message queue engine with at-least-once delivery
#[derive(Debug)]
pub struct QueueEngine {
    config: EngineConfig,
    registry: QueueRegistry,
    tracker: Arc<ReceiptTracker>,
    scheduler: Arc<VisibilityScheduler>,
}

impl QueueEngine {
    /// Create an engine using the store backend named in `config`
    pub fn new(config: EngineConfig) -> Result<Self, QueueError> {
        let factory: Arc<dyn StoreFactory> = match &config.storage {
            StorageConfig::Memory => Arc::new(InMemoryStoreFactory),
            StorageConfig::File { directory } => Arc::new(FileStoreFactory::new(directory)),
        };
        Self::with_store_factory(config, factory)
    }

    /// Create an engine whose queues are backed by stores from `factory`
    pub fn with_store_factory(
        config: EngineConfig,
        factory: Arc<dyn StoreFactory>,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        let scheduler = VisibilityScheduler::new(config.scheduler_worker_threads)?;

        info!(
            default_visibility_timeout_seconds = config.default_visibility_timeout_seconds,
            max_messages_per_pull = config.max_messages_per_pull,
            scheduler_worker_threads = config.scheduler_worker_threads,
            "Queue engine started"
        );

        Ok(Self {
            config,
            registry: QueueRegistry::new(factory),
            tracker: Arc::new(ReceiptTracker::new()),
            scheduler: Arc::new(scheduler),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Add a message to a queue, returning the checksum of its body.
    ///
    /// With a positive delay the call returns before the message becomes
    /// visible; it is appended once the delay has elapsed.
    #[instrument(skip(self, request), fields(queue = %request.queue_url))]
    pub async fn push(&self, request: PushRequest) -> Result<Checksum, QueueError> {
        let queue_url = QueueUrl::new(request.queue_url)?;

        if request.body.is_empty() {
            return Err(QueueError::required("body"));
        }

        if request.body.len() > self.config.max_message_size_bytes {
            return Err(QueueError::out_of_range(
                "body",
                format!(
                    "{} bytes exceeds the limit of {} bytes",
                    request.body.len(),
                    self.config.max_message_size_bytes
                ),
            ));
        }

        let store = self.registry.resolve(&queue_url)?;
        let message = StoredMessage::new(request.body);
        let checksum = message.checksum.clone();

        match request.delay_seconds {
            None | Some(0) => {
                debug!(message_id = %message.id, "Enqueuing message");
                store.enqueue_back(message).await?;
            }
            Some(delay) => {
                debug!(message_id = %message.id, delay_seconds = delay, "Scheduling delayed enqueue");
                let span = info_span!("delayed_enqueue", queue = %queue_url, message_id = %message.id);
                self.scheduler.schedule(
                    Duration::from_secs(delay),
                    async move { store.enqueue_back(message).await }.instrument(span),
                )?;
            }
        }

        Ok(checksum)
    }

    /// Take up to `max_messages` messages from the head of a queue.
    ///
    /// Never blocks and never fails because the queue is empty: the result is
    /// simply shorter than requested. Every returned message carries a fresh
    /// receipt handle and stays invisible until deleted or until its
    /// visibility timeout elapses, after which it goes back to the head of
    /// the queue.
    #[instrument(skip(self, request), fields(queue = %request.queue_url))]
    pub async fn pull(&self, request: PullRequest) -> Result<Vec<Message>, QueueError> {
        let queue_url = QueueUrl::new(request.queue_url)?;

        let ceiling = self.config.max_messages_per_pull;
        let max = request.max_messages.unwrap_or(1);
        if max == 0 || max > ceiling {
            return Err(QueueError::out_of_range(
                "max_messages",
                format!("must be between 1 and {ceiling}, got {max}"),
            ));
        }

        let visibility_timeout = request
            .visibility_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.visibility_timeout_for(queue_url.as_str()));

        let store = self.registry.resolve(&queue_url)?;
        let mut delivered = Vec::new();
        let mut handles = Vec::new();

        while delivered.len() < max as usize {
            let mut message = match store.dequeue_front().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Dequeue failed; restoring pulled messages");
                    self.restore(&store, &handles).await?;
                    return Err(e.into());
                }
            };
            message.mark_received();

            let handle = ReceiptHandle::generate();
            let copy = message.deliver(handle.clone());

            if let Err(e) = arm_visibility_timer(
                &self.tracker,
                &self.scheduler,
                &store,
                &queue_url,
                handle.clone(),
                message,
                visibility_timeout,
            ) {
                warn!(error = %e, "Could not arm visibility timer; restoring pulled messages");
                // Never armed, so there is nothing to cancel
                if let Some(record) = self.tracker.untrack(&handle) {
                    let mut message = record.message;
                    message.unmark_received();
                    store.requeue_front(message).await?;
                }
                self.restore(&store, &handles).await?;
                return Err(e);
            }

            delivered.push(copy);
            handles.push(handle);
        }

        debug!(
            requested = max,
            delivered = delivered.len(),
            visibility_timeout_ms = visibility_timeout.as_millis() as u64,
            "Pulled messages"
        );

        Ok(delivered)
    }

    /// Acknowledge a delivery so the message is never redelivered.
    ///
    /// Fails with [`QueueError::MessageNotFound`] when the handle was already
    /// deleted, has expired, was superseded by a later pull, belongs to a
    /// different queue or was never issued.
    #[instrument(skip(self, request), fields(queue = %request.queue_url))]
    pub async fn delete(&self, request: DeleteRequest) -> Result<(), QueueError> {
        let queue_url = QueueUrl::new(request.queue_url)?;
        let handle: ReceiptHandle = request.receipt_handle.parse()?;

        let Some(record) = self.tracker.untrack_for(&queue_url, &handle) else {
            return Err(QueueError::MessageNotFound {
                receipt: handle.to_string(),
            });
        };

        // Losing this race is harmless: the timer found the handle gone and did nothing
        if !self.scheduler.cancel(&record.token) {
            debug!(receipt = %handle, "Visibility timer already fired");
        }

        debug!(message_id = %record.message.id, "Deleted message");
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of visible messages in a queue; unknown queues are empty
    pub async fn queue_depth(&self, queue_url: &str) -> Result<usize, QueueError> {
        let queue_url = QueueUrl::new(queue_url)?;
        match self.registry.get(&queue_url) {
            Some(store) => Ok(store.len().await?),
            None => Ok(0),
        }
    }

    /// Number of messages of a queue that are currently in flight
    pub fn in_flight_count(&self, queue_url: &str) -> Result<usize, QueueError> {
        let queue_url = QueueUrl::new(queue_url)?;
        Ok(self.tracker.len_for(&queue_url))
    }

    /// Every queue referenced so far
    pub fn queue_urls(&self) -> Vec<QueueUrl> {
        self.registry.queue_urls()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Stop firing timers. In-flight messages stay invisible and delayed
    /// pushes are dropped; later pushes with a delay and pulls fail.
    pub fn shutdown(&self) {
        info!(in_flight = self.tracker.len(), "Queue engine shutting down");
        self.scheduler.shutdown();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Put the undelivered messages behind `handles` back at the head,
    /// preserving their order.
    ///
    /// A message whose requeue fails keeps its handle and gets a fresh
    /// timer, so it still comes back once the store recovers.
    async fn restore(
        &self,
        store: &Arc<dyn MessageStore>,
        handles: &[ReceiptHandle],
    ) -> Result<(), QueueError> {
        for handle in handles.iter().rev() {
            let Some(mut record) = self.tracker.untrack(handle) else {
                continue;
            };
            self.scheduler.cancel(&record.token);
            record.message.unmark_received();

            if let Err(e) = store.requeue_front(record.message.clone()).await {
                rearm_after_failure(
                    &self.tracker,
                    &Arc::downgrade(&self.scheduler),
                    store,
                    handle.clone(),
                    record,
                );
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// Track a delivery, then arm the timer that puts it back at the head.
///
/// The record is tracked before the timer exists so that even a zero
/// timeout finds it. The timer only holds a weak reference to the
/// scheduler, which it needs to try again when the store rejects the
/// requeue.
fn arm_visibility_timer(
    tracker: &Arc<ReceiptTracker>,
    scheduler: &Arc<VisibilityScheduler>,
    store: &Arc<dyn MessageStore>,
    queue_url: &QueueUrl,
    handle: ReceiptHandle,
    message: StoredMessage,
    visibility_timeout: Duration,
) -> Result<(), QueueError> {
    let token = CancelToken::new();
    tracker.track(
        handle.clone(),
        InFlightRecord {
            queue_url: queue_url.clone(),
            message,
            token: token.clone(),
            visibility_timeout,
        },
    );

    let span = info_span!("visibility_timeout", queue = %queue_url, receipt = %handle);
    let weak_scheduler = Arc::downgrade(scheduler);
    let tracker_for_action = Arc::clone(tracker);
    let store_for_action = Arc::clone(store);

    let requeue = async move {
        let Some(record) = tracker_for_action.untrack(&handle) else {
            return Ok::<(), StoreError>(());
        };

        let message_id = record.message.id.clone();
        if let Err(e) = store_for_action.requeue_front(record.message.clone()).await {
            rearm_after_failure(
                &tracker_for_action,
                &weak_scheduler,
                &store_for_action,
                handle,
                record,
            );
            return Err(e);
        }
        debug!(message_id = %message_id, "Visibility timeout expired; message requeued");
        Ok(())
    };

    scheduler.schedule_with_token(token, visibility_timeout, requeue.instrument(span))
}

/// Keep a message whose requeue failed in flight under its handle and arm
/// a new timer for it.
fn rearm_after_failure(
    tracker: &Arc<ReceiptTracker>,
    scheduler: &Weak<VisibilityScheduler>,
    store: &Arc<dyn MessageStore>,
    handle: ReceiptHandle,
    record: InFlightRecord,
) {
    let retry_delay = record.visibility_timeout.max(MIN_REQUEUE_RETRY_DELAY);
    let message_id = record.message.id.clone();

    let Some(scheduler) = scheduler.upgrade() else {
        warn!(message_id = %message_id, "Engine gone; message not requeued");
        return;
    };

    match arm_visibility_timer(
        tracker,
        &scheduler,
        store,
        &record.queue_url,
        handle,
        record.message,
        retry_delay,
    ) {
        Ok(()) => warn!(
            message_id = %message_id,
            retry_delay_ms = retry_delay.as_millis() as u64,
            "Requeue failed; message stays in flight until the next attempt"
        ),
        Err(e) => warn!(
            message_id = %message_id,
            error = %e,
            "Requeue failed and could not be retried; message stays in flight"
        ),
    }
}

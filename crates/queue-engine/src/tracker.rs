//! Receipt tracker: the set of messages currently in flight.
//!
//! A receipt handle is present here exactly while its message is invisible.
//! The delete path and the expiry action both leave the in-flight state by
//! calling `untrack`, an atomic remove-and-return, so whichever gets there
//! first owns the message and the other observes nothing.

use crate::message::{QueueUrl, ReceiptHandle, StoredMessage};
use crate::scheduler::CancelToken;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;

/// Everything needed to finish one delivery attempt either way
#[derive(Debug, Clone)]
pub struct InFlightRecord {
    /// Queue the message was pulled from
    pub queue_url: QueueUrl,
    /// Exact message to restore on expiry
    pub message: StoredMessage,
    /// Guard of the scheduled requeue action
    pub token: CancelToken,
    /// Visibility timeout applied to this delivery; reused when the requeue
    /// has to be attempted again
    pub visibility_timeout: Duration,
}

/// Concurrent map from receipt handle to in-flight record
#[derive(Debug, Default)]
pub struct ReceiptTracker {
    records: Mutex<HashMap<ReceiptHandle, InFlightRecord>>,
}

impl ReceiptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ReceiptHandle, InFlightRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a delivery.
    ///
    /// Handles are freshly minted per pull, so an existing entry for the same
    /// handle is replaced and returned.
    pub fn track(&self, handle: ReceiptHandle, record: InFlightRecord) -> Option<InFlightRecord> {
        self.records().insert(handle, record)
    }

    /// Remove and return the record for `handle`; at most one caller gets it
    pub fn untrack(&self, handle: &ReceiptHandle) -> Option<InFlightRecord> {
        self.records().remove(handle)
    }

    /// Like [`untrack`](Self::untrack), but only if the delivery belongs to `queue_url`.
    ///
    /// A record pulled from another queue is left in place.
    pub fn untrack_for(
        &self,
        queue_url: &QueueUrl,
        handle: &ReceiptHandle,
    ) -> Option<InFlightRecord> {
        let mut records = self.records();
        match records.get(handle) {
            Some(record) if &record.queue_url == queue_url => records.remove(handle),
            _ => None,
        }
    }

    pub fn contains(&self, handle: &ReceiptHandle) -> bool {
        self.records().contains_key(handle)
    }

    /// Number of deliveries in flight across all queues
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of deliveries in flight for one queue
    pub fn len_for(&self, queue_url: &QueueUrl) -> usize {
        self.records()
            .values()
            .filter(|record| &record.queue_url == queue_url)
            .count()
    }
}

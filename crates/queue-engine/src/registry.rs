//! Queue registry: lazily maps queue URLs to their message stores.

use crate::error::StoreError;
use crate::message::QueueUrl;
use crate::store::{MessageStore, StoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Owns the mapping from queue URL to store.
///
/// A store is created exactly once per distinct URL, on first reference, and
/// lives for the life of the registry. Lookups of existing queues only take
/// the shared read lock; creation re-checks under the write lock so two
/// racing first references still end up with the same store.
#[derive(Debug)]
pub struct QueueRegistry {
    factory: Arc<dyn StoreFactory>,
    stores: RwLock<HashMap<QueueUrl, Arc<dyn MessageStore>>>,
}

impl QueueRegistry {
    /// Create an empty registry creating stores through `factory`
    pub fn new(factory: Arc<dyn StoreFactory>) -> Self {
        Self {
            factory,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Return the store for `queue_url`, creating it if this is the first reference
    pub fn resolve(&self, queue_url: &QueueUrl) -> Result<Arc<dyn MessageStore>, StoreError> {
        // Fast path: queue already exists
        {
            let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(store) = stores.get(queue_url) {
                return Ok(Arc::clone(store));
            }
        }

        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(queue_url) {
            return Ok(Arc::clone(store));
        }

        let store = self.factory.open(queue_url)?;
        stores.insert(queue_url.clone(), Arc::clone(&store));
        info!(queue = %queue_url, "Created queue");

        Ok(store)
    }

    /// Store for `queue_url` if the queue has been referenced before
    pub fn get(&self, queue_url: &QueueUrl) -> Option<Arc<dyn MessageStore>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue_url)
            .cloned()
    }

    /// URLs of every queue created so far, sorted
    pub fn queue_urls(&self) -> Vec<QueueUrl> {
        let mut urls: Vec<_> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        urls.sort();
        urls
    }

    /// Number of queues created so far
    pub fn len(&self) -> usize {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! # Queue Engine
//!
//! Minimal message-queue engine with push/pull/delete semantics and
//! at-least-once delivery driven by visibility timeouts.
//!
//! A pulled message becomes invisible to other consumers for a bounded
//! window. If it is deleted with its receipt handle inside that window it is
//! gone for good; otherwise it goes back to the head of its queue and will be
//! delivered again with a new receipt handle.
//!
//! ## Module Organization
//!
//! - [`engine`] - Push, pull and delete orchestration
//! - [`registry`] - Lazy queue URL to store mapping
//! - [`tracker`] - In-flight deliveries keyed by receipt handle
//! - [`scheduler`] - Cancellable delayed actions on a worker pool
//! - [`store`] / [`stores`] - Message store capability and its backends
//! - [`config`] - Engine settings and their layered loader
//! - [`message`] - Identifiers, messages and requests
//! - [`error`] - Error types for all queue operations
//!
//! ## Example
//!
//! ```no_run
//! use queue_engine::{DeleteRequest, EngineConfig, PullRequest, PushRequest, QueueEngine};
//!
//! # async fn run() -> Result<(), queue_engine::QueueError> {
//! let engine = QueueEngine::new(EngineConfig::default())?;
//! engine.push(PushRequest::new("localhost", "hello")).await?;
//!
//! for message in engine.pull(PullRequest::new("localhost")).await? {
//!     if let Some(handle) = &message.receipt_handle {
//!         engine
//!             .delete(DeleteRequest::new("localhost", handle.to_string()))
//!             .await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod stores;
pub mod tracker;

// Re-export commonly used types at crate root for convenience
pub use config::{EngineConfig, QueueSettings, StorageConfig};
pub use engine::QueueEngine;
pub use error::{ConfigurationError, QueueError, StoreError, ValidationError};
pub use message::{
    Checksum, DeleteRequest, Message, MessageId, PullRequest, PushRequest, QueueUrl,
    ReceiptHandle, StoredMessage, Timestamp,
};
pub use registry::QueueRegistry;
pub use scheduler::{CancelToken, SchedulerStats, VisibilityScheduler};
pub use store::{MessageStore, StoreFactory};
pub use stores::{FileStore, FileStoreFactory, InMemoryStore, InMemoryStoreFactory};
pub use tracker::{InFlightRecord, ReceiptTracker};

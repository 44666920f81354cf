//! Message store backends.
//!
//! Both backends implement [`MessageStore`](crate::store::MessageStore) for a
//! single queue and come with a [`StoreFactory`](crate::store::StoreFactory)
//! the queue registry uses to create them lazily.

pub mod file;
pub mod memory;

pub use file::{FileStore, FileStoreFactory};
pub use memory::{InMemoryStore, InMemoryStoreFactory};

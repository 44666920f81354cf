//! File-backed message store.
//!
//! Each queue lives in one JSON-lines file named after the MD5 of its URL,
//! one [`StoredMessage`] per line with the head of the queue first. Appends
//! go straight to the end of the file; operations touching the head rewrite
//! the file through a temporary sibling and an atomic rename, so a crash
//! leaves either the old or the new contents on disk.
//!
//! No fsync is issued. A file store survives process restarts, not power loss.

use crate::error::StoreError;
use crate::message::{Checksum, QueueUrl, StoredMessage};
use crate::store::{MessageStore, StoreFactory};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;

const FILE_EXTENSION: &str = "jsonl";

/// JSON-lines file holding the messages of one queue
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes every read-modify-write of `path` within this process.
    lock: Mutex<()>,
}

impl FileStore {
    /// Use `path` as the backing file; it is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<VecDeque<StoredMessage>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(VecDeque::new()),
            Err(e) => return Err(e.into()),
        };

        let mut messages = VecDeque::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let message =
                serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                    path: self.path.clone(),
                    line: index + 1,
                    message: e.to_string(),
                })?;
            messages.push_back(message);
        }

        Ok(messages)
    }

    async fn write_all(&self, messages: &VecDeque<StoredMessage>) -> Result<(), StoreError> {
        let mut buffer = Vec::new();
        for message in messages {
            serde_json::to_writer(&mut buffer, message)?;
            buffer.push(b'\n');
        }

        let temp_path = self.path.with_extension(format!("{FILE_EXTENSION}.tmp"));
        tokio::fs::write(&temp_path, &buffer).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn enqueue_back(&self, message: StoredMessage) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn dequeue_front(&self) -> Result<Option<StoredMessage>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut messages = self.read_all().await?;
        let Some(front) = messages.pop_front() else {
            return Ok(None);
        };

        self.write_all(&messages).await?;
        Ok(Some(front))
    }

    async fn requeue_front(&self, message: StoredMessage) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut messages = self.read_all().await?;
        messages.push_front(message);
        self.write_all(&messages).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.len())
    }
}

/// Opens one [`FileStore`] per queue under a shared directory
#[derive(Debug, Clone)]
pub struct FileStoreFactory {
    directory: PathBuf,
}

impl FileStoreFactory {
    /// Store queue files under `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// File that holds the messages of `queue_url`
    pub fn path_for(&self, queue_url: &QueueUrl) -> PathBuf {
        let name = Checksum::of(queue_url.as_str().as_bytes());
        self.directory.join(format!("{name}.{FILE_EXTENSION}"))
    }
}

impl StoreFactory for FileStoreFactory {
    fn open(&self, queue_url: &QueueUrl) -> Result<Arc<dyn MessageStore>, StoreError> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.path_for(queue_url);
        debug!(queue = %queue_url, path = %path.display(), "Opened file store");
        Ok(Arc::new(FileStore::new(path)))
    }
}

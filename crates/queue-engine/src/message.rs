//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Longest queue identifier accepted, in bytes.
pub const MAX_QUEUE_URL_LENGTH: usize = 1024;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated, otherwise opaque queue identifier (`localhost`, `https://host/123/orders`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueUrl(String);

impl QueueUrl {
    /// Create new queue URL with validation
    pub fn new(url: impl Into<String>) -> Result<Self, ValidationError> {
        let url = url.into();

        if url.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "queue_url".to_string(),
            });
        }

        if url.len() > MAX_QUEUE_URL_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_url".to_string(),
                message: format!("must be at most {MAX_QUEUE_URL_LENGTH} bytes"),
            });
        }

        Ok(Self(url))
    }

    /// Get queue URL as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueUrl {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Unique identifier for a message, stable for its whole life
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single-use token identifying one delivery attempt of one message.
///
/// A fresh handle is minted on every pull, so a redelivered message never
/// shares a handle with an earlier delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Mint a new random receipt handle
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReceiptHandle {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "receipt_handle".to_string(),
            });
        }

        let parsed = uuid::Uuid::parse_str(s).map_err(|e| ValidationError::InvalidFormat {
            field: "receipt_handle".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self(parsed.hyphenated().to_string()))
    }
}

/// Hex MD5 digest of a message body, handed back to callers as an integrity token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Digest the given bytes
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    /// Get checksum as lower-case hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message as held by a message store.
///
/// This is the record that gets restored to the head of the queue when a
/// visibility timeout expires, so it carries everything a redelivery needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub checksum: Checksum,
    pub sent_at: Timestamp,
    pub receive_count: u32,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl StoredMessage {
    /// Create a never-delivered message, computing its checksum once
    pub fn new(body: Bytes) -> Self {
        let checksum = Checksum::of(&body);
        Self {
            id: MessageId::new(),
            body,
            checksum,
            sent_at: Timestamp::now(),
            receive_count: 0,
        }
    }

    /// Record one more delivery attempt
    pub(crate) fn mark_received(&mut self) {
        self.receive_count = self.receive_count.saturating_add(1);
    }

    /// Undo [`mark_received`](Self::mark_received) for a delivery that never reached a caller
    pub(crate) fn unmark_received(&mut self) {
        self.receive_count = self.receive_count.saturating_sub(1);
    }

    /// Build the copy handed to a puller for this delivery attempt
    pub(crate) fn deliver(&self, receipt_handle: ReceiptHandle) -> Message {
        Message {
            id: self.id.clone(),
            body: self.body.clone(),
            checksum: self.checksum.clone(),
            sent_at: self.sent_at,
            receive_count: self.receive_count,
            receipt_handle: Some(receipt_handle),
        }
    }
}

/// A message returned by pull, tagged with the receipt handle of this delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub body: Bytes,
    pub checksum: Checksum,
    pub sent_at: Timestamp,
    pub receive_count: u32,
    pub receipt_handle: Option<ReceiptHandle>,
}

impl Message {
    /// Body as UTF-8 text, if it is valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Push request: deliver `body` to `queue_url`, optionally after a delay
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub queue_url: String,
    pub body: Bytes,
    pub delay_seconds: Option<u64>,
}

impl PushRequest {
    /// Create new push request delivered immediately
    pub fn new(queue_url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            queue_url: queue_url.into(),
            body: body.into(),
            delay_seconds: None,
        }
    }

    /// Hold the message back for the given number of seconds
    pub fn with_delay_seconds(mut self, seconds: u64) -> Self {
        self.delay_seconds = Some(seconds);
        self
    }
}

/// Pull request: take up to `max_messages` from `queue_url`
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub queue_url: String,
    pub max_messages: Option<u32>,
    pub visibility_timeout_seconds: Option<u64>,
}

impl PullRequest {
    /// Create new pull request with defaults (one message, configured timeout)
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            max_messages: None,
            visibility_timeout_seconds: None,
        }
    }

    /// Set maximum number of messages to receive
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = Some(max);
        self
    }

    /// Override the visibility timeout for every message of this pull
    pub fn with_visibility_timeout(mut self, seconds: u64) -> Self {
        self.visibility_timeout_seconds = Some(seconds);
        self
    }
}

/// Delete request: acknowledge the delivery identified by `receipt_handle`
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub queue_url: String,
    pub receipt_handle: String,
}

impl DeleteRequest {
    /// Create new delete request
    pub fn new(queue_url: impl Into<String>, receipt_handle: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            receipt_handle: receipt_handle.into(),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

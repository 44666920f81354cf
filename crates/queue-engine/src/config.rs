//! Engine configuration and its layered loader.
//!
//! Sources, later ones overriding earlier ones:
//! 1. `/etc/queue-engine/engine.toml` (optional)
//! 2. `./config/engine.toml` (optional)
//! 3. an explicit path supplied by the operator (required when given)
//! 4. environment variables prefixed `QE__`, e.g. `QE__MAX_MESSAGES_PER_PULL=5`
//!
//! Every field carries a serde default, so an unconfigured environment
//! yields a valid configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "QE";

/// Resolved settings consumed by [`crate::QueueEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Visibility timeout applied when neither the pull nor the queue override one
    pub default_visibility_timeout_seconds: u64,

    /// Ceiling for the number of messages a single pull may request
    pub max_messages_per_pull: u32,

    /// Worker threads owned by the visibility scheduler
    pub scheduler_worker_threads: usize,

    /// Largest accepted message body
    pub max_message_size_bytes: usize,

    /// Message store backend
    pub storage: StorageConfig,

    /// Per-queue overrides keyed by queue URL
    pub queues: BTreeMap<String, QueueSettings>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_visibility_timeout_seconds: 30,
            max_messages_per_pull: 10,
            scheduler_worker_threads: 4,
            max_message_size_bytes: 256 * 1024,
            storage: StorageConfig::default(),
            queues: BTreeMap::new(),
        }
    }
}

/// Message store backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Process-local deques
    Memory,
    /// One JSON-lines file per queue under `directory`
    File { directory: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Settings that may differ per queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub visibility_timeout_seconds: Option<u64>,
}

impl EngineConfig {
    /// Load configuration from the standard locations, the optional explicit
    /// file and the environment, then validate it.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/queue-engine/engine")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/engine")
                    .required(false)
                    .format(config::FileFormat::Toml),
            );

        if let Some(path) = explicit_path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_messages_per_pull == 0 {
            return Err(invalid("max_messages_per_pull must be at least 1"));
        }

        if self.scheduler_worker_threads == 0 {
            return Err(invalid("scheduler_worker_threads must be at least 1"));
        }

        if self.max_message_size_bytes == 0 {
            return Err(invalid("max_message_size_bytes must be at least 1"));
        }

        if let StorageConfig::File { directory } = &self.storage {
            if directory.as_os_str().is_empty() {
                return Err(invalid("storage.directory must not be empty"));
            }
        }

        if self.queues.keys().any(|url| url.trim().is_empty()) {
            return Err(invalid("queue override keys must not be empty"));
        }

        Ok(())
    }

    /// Visibility timeout for `queue_url` when the pull does not name one
    pub fn visibility_timeout_for(&self, queue_url: &str) -> Duration {
        let seconds = self
            .queues
            .get(queue_url)
            .and_then(|settings| settings.visibility_timeout_seconds)
            .unwrap_or(self.default_visibility_timeout_seconds);
        Duration::from_secs(seconds)
    }
}

fn invalid(message: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: message.to_string(),
    }
}

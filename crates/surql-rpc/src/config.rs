//! Client configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Default ceiling for a single inbound message (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const KNOWN_FIELDS: &[&str] = &[
    "timeoutMs",
    "maxMessageSize",
    "notificationCapacity",
    "maxConsecutiveTimeouts",
    "namespace",
    "database",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Per-call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Buffered notifications per live subscription before pushes are dropped
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Timeouts in a row after which the transport is closed and reopened
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub database: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_notification_capacity() -> usize {
    64
}

fn default_max_consecutive_timeouts() -> u32 {
    2
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_message_size: default_max_message_size(),
            notification_capacity: default_notification_capacity(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
            namespace: None,
            database: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_context(mut self, namespace: impl Into<String>, database: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self.database = Some(database.into());
        self
    }

    /// Load config from a JSON file, falling back to defaults when it is missing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Parse config from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text is not a valid config object.
    pub fn from_json(content: &str) -> Result<Self> {
        for field in unknown_fields(content) {
            warn!("Unknown client config field: {field}");
        }
        let config: Self =
            serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeoutMs must be greater than zero".to_string()));
        }
        if self.notification_capacity == 0 {
            return Err(Error::Config(
                "notificationCapacity must be greater than zero".to_string(),
            ));
        }
        if self.namespace.is_some() != self.database.is_some() {
            return Err(Error::Config(
                "namespace and database must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

fn unknown_fields(content: &str) -> Vec<String> {
    let Ok(serde_json::Value::Object(object)) = serde_json::from_str(content) else {
        return Vec::new();
    };
    let known: HashSet<&str> = KNOWN_FIELDS.iter().copied().collect();
    object
        .keys()
        .filter(|key| !known.contains(key.as_str()))
        .cloned()
        .collect()
}

//! Upload engine configuration.
//!
//! Loaded from a JSON document; every field has a default so partial
//! files are accepted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_transfer::DEFAULT_CHUNK_SIZE;

use crate::error::UploadError;

/// Completion polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmConfig {
    /// Ceiling for "not found yet" answers. "Still writing" answers reset
    /// the count and never exhaust it.
    pub max_attempts: u32,
    /// Fixed pause between queries, in milliseconds.
    pub interval_ms: u64,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_ms: 1000,
        }
    }
}

impl ConfirmConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Upload engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Owner identity sent with every chunk.
    pub owner: String,
    /// Storage domain sent with every chunk.
    pub domain: String,
    /// Upper bound for one chunk in bytes (0 = default 100 KiB).
    pub chunk_size: usize,
    /// Throughput ceiling in bytes/second (0 = unlimited).
    pub rate_ceiling: u64,
    /// Resends of a chunk after a transport-level failure. Server
    /// rejections are never retried.
    pub chunk_retries: u32,
    /// Pause before a chunk resend, in milliseconds.
    pub chunk_retry_delay_ms: u64,
    pub confirm: ConfirmConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            domain: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            rate_ceiling: 0,
            chunk_retries: 0,
            chunk_retry_delay_ms: 1000,
            confirm: ConfirmConfig::default(),
        }
    }
}

impl UploadConfig {
    /// Loads configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, UploadError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Chunk bound actually used by the driver.
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    pub fn chunk_retry_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_retry_delay_ms)
    }
}

//! Session configuration
//!
//! Loaded from JSON. Every field has a default, so a partial document
//! only needs the settings that differ:
//!
//! ```json
//! {
//!     "adapter": { "kind": "at_command", "header_mode": "set_header" },
//!     "port": { "type": "serial", "baud_rate": 115200, "timeout_ms": 500 },
//!     "key_algorithm": 1
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::codec::AdapterKind;
use crate::protocol::ids::device;
use crate::protocol::{RetryPolicy, SeedByteOrder, KEEP_ALIVE_INTERVAL};
use crate::transport::PortConfig;

/// Errors raised while loading a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document is not valid configuration JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything a session needs to talk to one PCM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Adapter family and its framing options
    pub adapter: AdapterKind,
    /// How the transport is opened
    pub port: PortConfig,
    /// Attempt budgets per exchange
    pub retry: RetryPolicy,
    /// Milliseconds between tool-present notifications
    pub keep_alive_interval_ms: u64,
    /// Address the tool answers to
    pub tool_id: u8,
    /// Address of the PCM
    pub pcm_id: u8,
    /// Order of the seed bytes in a seed response
    pub seed_byte_order: SeedByteOrder,
    /// Key derivation algorithm used by `unlock`
    pub key_algorithm: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterKind::default(),
            port: PortConfig::default(),
            retry: RetryPolicy::default(),
            keep_alive_interval_ms: KEEP_ALIVE_INTERVAL.as_millis() as u64,
            tool_id: device::TOOL,
            pcm_id: device::PCM,
            seed_byte_order: SeedByteOrder::default(),
            key_algorithm: 1,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&content)?;
        tracing::debug!("loaded session config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Keep-alive interval as a duration
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }
}

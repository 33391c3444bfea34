//! Byte transports
//!
//! The codecs and the device driver only need a blocking byte pipe with a
//! per-read timeout. [`SerialTransport`] drives a real serial port,
//! [`MockTransport`] replays scripted adapter output for tests and demos.

mod mock;
mod serial;

pub use mock::{MockHandle, MockTransport};
pub use serial::{clear_buffers, configure_port, open_port, SerialTransport};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// How to open a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortConfig {
    /// No settings (USB-native adapters, mocks)
    Plain,
    /// Serial line settings
    Serial {
        /// Line speed
        baud_rate: u32,
        /// Read timeout in milliseconds
        timeout_ms: u64,
    },
}

impl Default for PortConfig {
    fn default() -> Self {
        PortConfig::Serial {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Blocking byte pipe to an adapter
///
/// `receive` blocks until at least one byte is available or the timeout
/// expires. An expired timeout is reported as [`ProtocolError::Timeout`].
/// A read may return fewer bytes than the buffer holds.
pub trait Transport: Send {
    /// Open with the given configuration
    fn open(&mut self, config: &PortConfig) -> Result<(), ProtocolError>;

    /// Write all bytes
    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Read whatever is available into `buffer`, returning the byte count
    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, ProtocolError>;

    /// Drop anything buffered in either direction
    fn discard_buffers(&mut self) -> Result<(), ProtocolError>;

    /// Bytes waiting to be read
    fn queued_byte_count(&mut self) -> Result<usize, ProtocolError>;

    /// Timeout applied to each `receive`
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError>;

    /// Release the underlying resource
    fn close(&mut self);
}

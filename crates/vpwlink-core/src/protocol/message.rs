//! VPW messages
//!
//! A [`Message`] is one logical frame on the bus, header through payload,
//! without the trailing CRC byte. Codecs add and strip the CRC.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::hex::to_hex;

/// An immutable bus message
///
/// Equality compares bytes only; timestamp and error metadata are ignored.
#[derive(Debug, Clone)]
pub struct Message {
    bytes: Bytes,
    timestamp: Option<DateTime<Utc>>,
    error: Option<u64>,
}

impl Message {
    /// Create a message from its bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            timestamp: None,
            error: None,
        }
    }

    /// Create a message stamped with the current time
    pub fn received(bytes: impl Into<Bytes>) -> Self {
        Self::new(bytes).with_timestamp(Utc::now())
    }

    /// Attach a timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach an adapter-reported error code
    pub fn with_error(mut self, error: u64) -> Self {
        self.error = Some(error);
        self
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap clone of the underlying buffer
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Number of bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when there are no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Header byte (priority, style and addressing bits)
    pub fn priority(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// Destination address
    pub fn destination(&self) -> Option<u8> {
        self.bytes.get(1).copied()
    }

    /// Source address
    pub fn source(&self) -> Option<u8> {
        self.bytes.get(2).copied()
    }

    /// Mode byte
    pub fn mode(&self) -> Option<u8> {
        self.bytes.get(3).copied()
    }

    /// The three header bytes, if present
    pub fn header(&self) -> Option<&[u8]> {
        self.bytes.get(..3)
    }

    /// Everything after the header
    pub fn body(&self) -> &[u8] {
        self.bytes.get(3..).unwrap_or_default()
    }

    /// Time the message was received, when known
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Adapter-reported error code, when present
    pub fn error(&self) -> Option<u64> {
        self.error
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Message {}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::new(bytes)
    }
}

impl From<&[u8]> for Message {
    fn from(bytes: &[u8]) -> Self {
        Message::new(Bytes::copy_from_slice(bytes))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(&self.bytes))
    }
}

/// Builder for constructing messages
pub struct MessageBuilder {
    bytes: Vec<u8>,
}

impl MessageBuilder {
    /// Start a message with the three header bytes
    pub fn new(priority: u8, destination: u8, source: u8) -> Self {
        Self {
            bytes: vec![priority, destination, source],
        }
    }

    /// Add the mode byte
    pub fn mode(mut self, mode: u8) -> Self {
        self.bytes.push(mode);
        self
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.bytes.push(b);
        self
    }

    /// Add a 16-bit value (big-endian)
    pub fn u16_be(mut self, value: u16) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(data);
        self
    }

    /// Build the message
    pub fn build(self) -> Message {
        Message::new(self.bytes)
    }
}

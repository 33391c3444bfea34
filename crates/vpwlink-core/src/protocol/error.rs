//! Protocol errors

use thiserror::Error;

use super::ResponseStatus;

/// Errors that can occur while exchanging frames with an adapter
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Receive timeout")]
    Timeout,

    #[error("Transport is not open")]
    NotConnected,

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    CrcMismatch { expected: u8, actual: u8 },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Adapter rejected command: {0}")]
    AdapterRejected(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Buffer overflow: frame too large")]
    BufferOverflow,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Collapse this error into the status reported to callers of an exchange.
    ///
    /// A CRC mismatch is its own error so the cause stays visible in logs, but
    /// a frame that fails its checksum is still an unexpected response.
    pub fn status(&self) -> ResponseStatus {
        match self {
            ProtocolError::Timeout => ResponseStatus::Timeout,
            ProtocolError::IoError(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                ResponseStatus::Timeout
            }
            ProtocolError::Truncated { .. } => ResponseStatus::Truncated,
            ProtocolError::UnexpectedResponse(_)
            | ProtocolError::CrcMismatch { .. }
            | ProtocolError::AdapterRejected(_) => ResponseStatus::UnexpectedResponse,
            ProtocolError::Cancelled => ResponseStatus::Cancelled,
            ProtocolError::TransportError(_)
            | ProtocolError::NotConnected
            | ProtocolError::InvalidMessage(_)
            | ProtocolError::BufferOverflow
            | ProtocolError::IoError(_) => ResponseStatus::Error,
        }
    }
}

//! CAN capture stream parser
//!
//! Each frame on the stream looks like:
//!
//! ```text
//! AA <type> <id...> <payload...> 55
//! ```
//!
//! The type byte carries the extended-id flag (`0x20`), the remote-frame
//! flag (`0x10`) and the DLC in its low nibble. Standard ids take two
//! bytes (`lo`, then three high bits); extended ids take four bytes,
//! least significant first.

use serde::Serialize;
use std::fmt;

use crate::hex::to_hex;

/// First byte of every frame
pub const SENTINEL: u8 = 0xAA;

/// Last byte of every well-formed frame
pub const TRAILER: u8 = 0x55;

/// Largest classic CAN payload
pub const MAX_DLC: u8 = 8;

const TYPE_EXTENDED: u8 = 0x20;
const TYPE_REMOTE: u8 = 0x10;

/// Message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CanId {
    /// 11-bit identifier
    Standard(u16),
    /// 29-bit identifier
    Extended(u32),
}

impl CanId {
    /// Numeric identifier
    pub fn raw(self) -> u32 {
        match self {
            CanId::Standard(id) => id as u32,
            CanId::Extended(id) => id,
        }
    }

    /// True for 29-bit identifiers
    pub fn is_extended(self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanId::Standard(id) => write!(f, "{:03X}", id),
            CanId::Extended(id) => write!(f, "{:08X}", id),
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanFrame {
    /// Message identifier
    pub id: CanId,
    /// Remote transmission request
    pub remote: bool,
    /// DLC as declared by the type byte
    pub dlc: u8,
    /// Payload bytes, at most [`MAX_DLC`]
    pub payload: Vec<u8>,
    /// Byte that closed the frame
    pub trailer: u8,
}

impl CanFrame {
    /// Numeric message identifier
    pub fn message_id(&self) -> u32 {
        self.id.raw()
    }

    /// The declared DLC exceeded [`MAX_DLC`] and the payload was cut short
    pub fn dlc_clamped(&self) -> bool {
        self.dlc > MAX_DLC
    }

    /// The frame ended with the expected trailer
    pub fn trailer_valid(&self) -> bool {
        self.trailer == TRAILER
    }

    /// No defects were seen while parsing
    pub fn is_well_formed(&self) -> bool {
        !self.dlc_clamped() && self.trailer_valid()
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.dlc, to_hex(&self.payload))?;
        if self.remote {
            write!(f, " (remote)")?;
        }
        if self.dlc_clamped() {
            write!(f, " (DLC clamped)")?;
        }
        if !self.trailer_valid() {
            write!(f, " (trailer {:02X})", self.trailer)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sentinel,
    Type,
    StandardId { index: u8 },
    ExtendedId { index: u8 },
    Payload,
    Trailer,
}

/// Byte-at-a-time CAN stream parser
#[derive(Debug, Clone)]
pub struct CanParser {
    state: State,
    id: u32,
    extended: bool,
    remote: bool,
    dlc: u8,
    payload: Vec<u8>,
    skipped: usize,
}

impl CanParser {
    /// Parser waiting for a sentinel
    pub fn new() -> Self {
        Self {
            state: State::Sentinel,
            id: 0,
            extended: false,
            remote: false,
            dlc: 0,
            payload: Vec::with_capacity(MAX_DLC as usize),
            skipped: 0,
        }
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.state = State::Sentinel;
        self.payload.clear();
    }

    /// True between frames
    pub fn is_idle(&self) -> bool {
        self.state == State::Sentinel
    }

    /// Bytes discarded while looking for a sentinel
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn payload_len(&self) -> usize {
        self.dlc.min(MAX_DLC) as usize
    }

    fn after_id(&self) -> State {
        if self.payload_len() == 0 {
            State::Trailer
        } else {
            State::Payload
        }
    }

    /// Consume one byte, returning a frame when it completes one
    pub fn push(&mut self, byte: u8) -> Option<CanFrame> {
        match self.state {
            State::Sentinel => {
                if byte == SENTINEL {
                    self.id = 0;
                    self.payload.clear();
                    self.state = State::Type;
                } else {
                    self.skipped += 1;
                }
            }
            State::Type => {
                self.extended = byte & TYPE_EXTENDED != 0;
                self.remote = byte & TYPE_REMOTE != 0;
                self.dlc = byte & 0x0F;
                if self.dlc > MAX_DLC {
                    tracing::debug!("CAN DLC {} clamped to {}", self.dlc, MAX_DLC);
                }
                self.state = if self.extended {
                    State::ExtendedId { index: 0 }
                } else {
                    State::StandardId { index: 0 }
                };
            }
            State::StandardId { index: 0 } => {
                self.id = byte as u32;
                self.state = State::StandardId { index: 1 };
            }
            State::StandardId { .. } => {
                self.id |= ((byte & 0x07) as u32) << 8;
                self.state = self.after_id();
            }
            State::ExtendedId { index } => {
                self.id |= (byte as u32) << (8 * index as u32);
                self.state = if index == 3 {
                    self.after_id()
                } else {
                    State::ExtendedId { index: index + 1 }
                };
            }
            State::Payload => {
                self.payload.push(byte);
                if self.payload.len() == self.payload_len() {
                    self.state = State::Trailer;
                }
            }
            State::Trailer => {
                self.state = State::Sentinel;
                if byte != TRAILER {
                    tracing::debug!("CAN frame closed by {:02X} instead of {:02X}", byte, TRAILER);
                }
                let id = if self.extended {
                    CanId::Extended(self.id & 0x1FFF_FFFF)
                } else {
                    CanId::Standard(self.id as u16)
                };
                return Some(CanFrame {
                    id,
                    remote: self.remote,
                    dlc: self.dlc,
                    payload: std::mem::take(&mut self.payload),
                    trailer: byte,
                });
            }
        }
        None
    }

    /// Consume a run of bytes, collecting every completed frame
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<CanFrame> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}

impl Default for CanParser {
    fn default() -> Self {
        Self::new()
    }
}

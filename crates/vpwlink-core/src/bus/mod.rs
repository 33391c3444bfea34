//! Bus frame decoding
//!
//! Restartable byte-at-a-time parsers for traffic captured off the wire.
//! Neither parser fails: malformed input is reported on the frame it
//! belongs to, so diagnostic tooling can still show what was seen.

pub mod can;
pub mod vpw;

pub use can::{CanFrame, CanId, CanParser};
pub use vpw::{
    mode_name, Addressing, CrcCheck, DeviceClass, HeaderStyle, VpwFrame, VpwFrameBuilder,
    VpwHeader, VpwLogParser,
};

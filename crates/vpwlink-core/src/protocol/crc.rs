//! CRC-8 engine
//!
//! SAE J1850 CRC-8: polynomial `0x11D`, initial state `0xFF`, no reflection.
//!
//! The accumulator is the same for every user; only the finalization
//! differs. The VPW bus transmits the one's complement of the state, while
//! some adapter firmware reports the raw state. Both are exposed through
//! [`CrcConvention`] so callers must pick one explicitly.

use crc::{Algorithm, Crc, Digest, CRC_8_SAE_J1850};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generator polynomial, including the implicit x^8 term
pub const POLYNOMIAL: u16 = 0x11D;

/// Accumulator value before any byte is processed
pub const INITIAL_STATE: u8 = 0xFF;

/// Raw accumulator value left after running over a frame followed by its
/// valid [`CrcConvention::Vpw`] checksum
pub const VPW_RESIDUE: u8 = 0xC4;

/// J1850 without the final complement: the raw accumulator
const RAW_ALGORITHM: Algorithm<u8> = Algorithm {
    width: 8,
    poly: POLYNOMIAL as u8,
    init: INITIAL_STATE,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0xB4,
    residue: 0x00,
};

static VPW: Crc<u8> = Crc::<u8>::new(&CRC_8_SAE_J1850);
static RAW: Crc<u8> = Crc::<u8>::new(&RAW_ALGORITHM);

/// How the accumulator turns into the transmitted byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrcConvention {
    /// One's complement of the state, as carried on the VPW bus
    Vpw,
    /// The raw low byte of the state
    Raw,
}

impl CrcConvention {
    /// Turn an accumulator state into a checksum byte
    pub const fn finalize(self, state: u8) -> u8 {
        match self {
            CrcConvention::Vpw => !state,
            CrcConvention::Raw => state,
        }
    }
}

/// Fold one byte into the accumulator.
///
/// XOR the byte in, then eight rounds of shift-left with the polynomial
/// applied whenever the high bit falls out.
pub fn update(state: u8, byte: u8) -> u8 {
    let mut digest = RAW.digest_with_initial(state);
    digest.update(&[byte]);
    digest.finalize()
}

/// Streaming CRC-8 accumulator
#[derive(Clone)]
pub struct Crc8 {
    digest: Digest<'static, u8>,
}

impl Crc8 {
    /// Start a new accumulator
    pub fn new() -> Self {
        Self {
            digest: RAW.digest(),
        }
    }

    /// Fold one byte in
    pub fn update(&mut self, byte: u8) {
        self.digest.update(&[byte]);
    }

    /// Fold a slice in
    pub fn update_slice(&mut self, bytes: &[u8]) -> &mut Self {
        self.digest.update(bytes);
        self
    }

    /// Current raw accumulator value
    pub fn state(&self) -> u8 {
        self.digest.clone().finalize()
    }

    /// Checksum byte under the given convention
    pub fn finalize(&self, convention: CrcConvention) -> u8 {
        convention.finalize(self.state())
    }
}

impl Default for Crc8 {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Crc8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc8").field("state", &self.state()).finish()
    }
}

/// Checksum of a byte slice under the given convention
pub fn checksum(bytes: &[u8], convention: CrcConvention) -> u8 {
    match convention {
        CrcConvention::Vpw => VPW.checksum(bytes),
        CrcConvention::Raw => RAW.checksum(bytes),
    }
}

/// Checksum as transmitted on the VPW bus
pub fn vpw_crc(bytes: &[u8]) -> u8 {
    checksum(bytes, CrcConvention::Vpw)
}

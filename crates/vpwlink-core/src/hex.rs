//! Hex helpers
//!
//! Formatting used in logs and adapter command lines, and parsing of hex
//! text with arbitrary whitespace between digits.

use thiserror::Error;

/// Errors from parsing hex text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    /// Digits do not pair up into bytes
    #[error("Odd number of hex digits ({0})")]
    OddLength(usize),

    /// A character that is not a hex digit
    #[error("Invalid hex digit {character:?} at position {index}")]
    InvalidDigit {
        /// The offending character
        character: char,
        /// Position among the digits, whitespace excluded
        index: usize,
    },
}

/// Format bytes as uppercase pairs separated by spaces, e.g. `"6C 10 F0"`
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format at most `count` leading bytes
pub fn to_hex_count(bytes: &[u8], count: usize) -> String {
    to_hex(&bytes[..count.min(bytes.len())])
}

/// Parse hex text, ignoring whitespace anywhere in the input
pub fn from_hex(text: &str) -> Result<Vec<u8>, HexError> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => HexError::InvalidDigit {
            character: c,
            index,
        },
        _ => HexError::OddLength(digits.len()),
    })
}

/// Canonical form of hex text: whitespace removed, uppercased, grouped in
/// space-separated pairs
pub fn normalize_hex(text: &str) -> String {
    let digits: Vec<char> = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    digits
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the text is a non-empty, even-length run of hex digits
/// (whitespace ignored)
pub fn is_hex(text: &str) -> bool {
    let mut count = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        if !c.is_ascii_hexdigit() {
            return false;
        }
        count += 1;
    }
    count > 0 && count % 2 == 0
}

/// Keep only bytes in the printable range `0x30..=0x7E`
pub fn printable(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|b| (0x30..=0x7E).contains(b))
        .collect()
}

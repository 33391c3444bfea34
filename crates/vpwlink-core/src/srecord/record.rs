use std::fmt;

use crate::hex::to_hex;

/// Number of address bytes carried by a record type
///
/// Returns `None` for type codes that have no defined layout.
pub fn address_width(type_code: u8) -> Option<usize> {
    match type_code {
        0 | 1 | 5 | 9 => Some(2),
        2 | 6 | 8 => Some(3),
        3 | 7 => Some(4),
        _ => None,
    }
}

/// One line of an S-Record file
///
/// The constructors check the type code against the variant and panic on
/// a mismatch. Building a record with the wrong type is a bug in the
/// caller, not a property of the input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SRecord {
    /// S0 header text
    Header {
        /// Header contents
        text: String,
    },
    /// S1, S2 or S3 data
    Data {
        /// Type code, 1 to 3
        type_code: u8,
        /// Load address of the first payload byte
        address: u32,
        /// Data bytes
        payload: Vec<u8>,
    },
    /// S5 or S6 record count
    Count {
        /// Type code, 5 or 6
        type_code: u8,
        /// Data records read before this one
        actual: u32,
        /// Data records the file declares
        expected: u32,
    },
    /// S7, S8 or S9 entry point
    EntryPoint {
        /// Type code, 7 to 9
        type_code: u8,
        /// Execution start address
        address: u32,
    },
    /// Anything this reader does not interpret
    Unsupported {
        /// Character after the `S`, or `?` when the line has no `S`
        type_code: char,
        /// The line as read
        raw: String,
        /// 1-based line number
        line: usize,
    },
}

impl SRecord {
    /// S0 header
    pub fn header(type_code: u8, text: impl Into<String>) -> Self {
        assert!(type_code == 0, "header records are type 0, not {}", type_code);
        SRecord::Header { text: text.into() }
    }

    /// S1/S2/S3 data
    pub fn data(type_code: u8, address: u32, payload: Vec<u8>) -> Self {
        assert!(
            matches!(type_code, 1..=3),
            "data records are types 1 to 3, not {}",
            type_code
        );
        SRecord::Data {
            type_code,
            address,
            payload,
        }
    }

    /// S5/S6 count
    pub fn count(type_code: u8, actual: u32, expected: u32) -> Self {
        assert!(
            matches!(type_code, 5 | 6),
            "count records are types 5 and 6, not {}",
            type_code
        );
        SRecord::Count {
            type_code,
            actual,
            expected,
        }
    }

    /// S7/S8/S9 entry point
    pub fn entry_point(type_code: u8, address: u32) -> Self {
        assert!(
            matches!(type_code, 7..=9),
            "entry point records are types 7 to 9, not {}",
            type_code
        );
        SRecord::EntryPoint { type_code, address }
    }

    /// A line kept verbatim
    pub fn unsupported(type_code: char, raw: impl Into<String>, line: usize) -> Self {
        SRecord::Unsupported {
            type_code,
            raw: raw.into(),
            line,
        }
    }

    /// Type character as it appears after the `S`
    pub fn type_code(&self) -> char {
        let digit = match self {
            SRecord::Header { .. } => 0,
            SRecord::Data { type_code, .. }
            | SRecord::Count { type_code, .. }
            | SRecord::EntryPoint { type_code, .. } => *type_code,
            SRecord::Unsupported { type_code, .. } => return *type_code,
        };
        char::from(b'0' + digit)
    }

    /// Address carried by data and entry point records
    pub fn address(&self) -> Option<u32> {
        match self {
            SRecord::Data { address, .. } | SRecord::EntryPoint { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// Payload of a data record
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            SRecord::Data { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// False for unsupported lines and for counts that disagree with the file
    pub fn is_valid(&self) -> bool {
        match self {
            SRecord::Count {
                actual, expected, ..
            } => actual == expected,
            SRecord::Unsupported { .. } => false,
            _ => true,
        }
    }
}

impl fmt::Display for SRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SRecord::Header { text } => write!(f, "Header: {}", text),
            SRecord::Data {
                address, payload, ..
            } => write!(f, "Address: {:08X}, Payload: {}", address, to_hex(payload)),
            SRecord::Count {
                actual, expected, ..
            } => write!(
                f,
                "Actual record count: {}, expected count {}, match = {}",
                actual,
                expected,
                actual == expected
            ),
            SRecord::EntryPoint { address, .. } => write!(f, "Entry point: {:08X}", address),
            SRecord::Unsupported {
                type_code, raw, ..
            } => write!(f, "Unsupported record type {}, Contents: {}", type_code, raw),
        }
    }
}

use thiserror::Error;

/// Errors raised while reading an S-Record file
#[derive(Error, Debug)]
pub enum SRecordError {
    /// A line's trailing checksum does not match its contents
    #[error("On line {line}, the checksum is 0x{actual:02X}, but should be 0x{expected:02X}\n{text}")]
    ChecksumMismatch {
        /// 1-based line number
        line: usize,
        /// Checksum byte found on the line
        actual: u8,
        /// Checksum computed from the line
        expected: u8,
        /// The offending line
        text: String,
    },

    /// A line is not a well-formed record
    #[error("Malformed record on line {line}: {reason}\n{text}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// What is wrong with it
        reason: String,
        /// The offending line
        text: String,
    },

    /// A count record disagrees with the number of data records read
    #[error("The file declares {expected} data records but {actual} were read")]
    CountMismatch {
        /// Data records read before the count record
        actual: u32,
        /// Count declared by the record
        expected: u32,
    },

    /// Underlying read failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

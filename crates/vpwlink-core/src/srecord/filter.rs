use std::io::Write;
use std::ops::Range;

use super::{SRecord, SRecordError};

/// Where the flash kernel is loaded in PCM RAM
pub const KERNEL_LOAD_RANGE: Range<u32> = 0xFF9000..0xFFC000;

/// Selects data records by load address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFilter {
    range: Range<u32>,
}

impl PayloadFilter {
    /// Accept data records whose address is inside `range` (end excluded)
    pub fn new(range: Range<u32>) -> Self {
        Self { range }
    }

    /// Accepted address range
    pub fn range(&self) -> &Range<u32> {
        &self.range
    }

    /// Payload of `record` if it is a data record inside the range
    pub fn accept<'a>(&self, record: &'a SRecord) -> Option<&'a [u8]> {
        match record {
            SRecord::Data {
                address, payload, ..
            } if self.range.contains(address) => Some(payload),
            _ => None,
        }
    }

    /// Write accepted payloads to `output` in file order
    ///
    /// Stops at the first read error or at a count record that disagrees
    /// with the file. Returns the number of bytes written.
    pub fn extract_to<I, W>(&self, records: I, output: &mut W) -> Result<usize, SRecordError>
    where
        I: IntoIterator<Item = Result<SRecord, SRecordError>>,
        W: Write,
    {
        let mut written = 0;
        for record in records {
            let record = record?;
            if let SRecord::Count {
                actual, expected, ..
            } = record
            {
                if actual != expected {
                    return Err(SRecordError::CountMismatch {
                        actual,
                        expected,
                    });
                }
            }
            match self.accept(&record) {
                Some(payload) => {
                    output.write_all(payload)?;
                    written += payload.len();
                }
                None => tracing::trace!("skipping {}", record),
            }
        }
        tracing::debug!("extracted {} bytes in {:#X}..{:#X}", written, self.range.start, self.range.end);
        Ok(written)
    }

    /// Collect accepted payloads into one image
    pub fn extract<I>(&self, records: I) -> Result<Vec<u8>, SRecordError>
    where
        I: IntoIterator<Item = Result<SRecord, SRecordError>>,
    {
        let mut image = Vec::new();
        self.extract_to(records, &mut image)?;
        Ok(image)
    }
}

impl Default for PayloadFilter {
    fn default() -> Self {
        Self::new(KERNEL_LOAD_RANGE)
    }
}

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};

use super::record::{address_width, SRecord};
use super::SRecordError;

/// Reads records from an S-Record stream, one line at a time
///
/// A checksum mismatch ends the read with an error; the caller is expected
/// to abandon the file rather than skip the line.
pub struct SRecordReader<R> {
    reader: R,
    line: usize,
    data_records: u32,
    text: String,
}

impl SRecordReader<BufReader<File>> {
    /// Open a file for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SRecordError> {
        let file = File::open(path.as_ref())?;
        tracing::debug!("reading S-Records from {}", path.as_ref().display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> SRecordReader<R> {
    /// Read from any buffered source
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            data_records: 0,
            text: String::new(),
        }
    }

    /// Number of the last line read, 1-based
    pub fn line_number(&self) -> usize {
        self.line
    }

    /// Data records read so far
    pub fn data_record_count(&self) -> u32 {
        self.data_records
    }

    /// Next record, or `None` at end of input. Blank lines are skipped.
    pub fn read_next(&mut self) -> Result<Option<SRecord>, SRecordError> {
        loop {
            self.text.clear();
            if self.reader.read_line(&mut self.text)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let trimmed_len = self.text.trim_end().len();
            self.text.truncate(trimmed_len);
            if !self.text.is_empty() {
                return self.parse_line().map(Some);
            }
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> SRecordError {
        SRecordError::Malformed {
            line: self.line,
            reason: reason.into(),
            text: self.text.clone(),
        }
    }

    fn parse_line(&mut self) -> Result<SRecord, SRecordError> {
        let line = self.text.as_str();
        let mut chars = line.chars();
        if chars.next() != Some('S') {
            return Ok(SRecord::unsupported('?', line, self.line));
        }
        let Some(type_char) = chars.next() else {
            return Ok(SRecord::unsupported('?', line, self.line));
        };
        let Some((type_code, width)) = type_char
            .to_digit(10)
            .and_then(|d| address_width(d as u8).map(|w| (d as u8, w)))
        else {
            return Ok(SRecord::unsupported(type_char, line, self.line));
        };

        let bytes = hex::decode(&line[2..]).map_err(|e| self.malformed(e.to_string()))?;
        let Some((&count, rest)) = bytes.split_first() else {
            return Err(self.malformed("missing byte count"));
        };
        let count = count as usize;
        if rest.len() != count {
            return Err(self.malformed(format!(
                "byte count is {} but the line holds {}",
                count,
                rest.len()
            )));
        }
        if count < width + 1 {
            return Err(self.malformed(format!(
                "byte count {} is too small for a {}-byte address",
                count, width
            )));
        }

        // count, address and data, not the checksum itself
        let (body, checksum) = bytes.split_at(count);
        let sum = body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        let expected = !sum;
        let actual = checksum[0];
        if actual != expected {
            return Err(SRecordError::ChecksumMismatch {
                line: self.line,
                actual,
                expected,
                text: self.text.clone(),
            });
        }

        let address = BigEndian::read_uint(&body[1..1 + width], width) as u32;
        let data = &body[1 + width..];

        Ok(match type_code {
            0 => SRecord::header(0, String::from_utf8_lossy(data).into_owned()),
            1..=3 => {
                self.data_records += 1;
                SRecord::data(type_code, address, data.to_vec())
            }
            5 | 6 => SRecord::count(type_code, self.data_records, address),
            _ => SRecord::entry_point(type_code, address),
        })
    }
}

impl<R: BufRead> Iterator for SRecordReader<R> {
    type Item = Result<SRecord, SRecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

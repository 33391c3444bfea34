//! VPW frame decoding
//!
//! A VPW frame is `<header> <destination> <source> <mode> <payload...> <crc>`.
//! The header byte packs:
//!
//! | bits | meaning |
//! |------|---------|
//! | 7-5  | priority (0 highest) |
//! | 4    | header style (0 = three-byte header) |
//! | 3    | in-frame response (0 = IFR required) |
//! | 2    | addressing (1 = physical) |
//! | 1-0  | message type |

use serde::Serialize;
use std::fmt;

use crate::hex::to_hex;
use crate::protocol::crc::{Crc8, CrcConvention};

/// Header byte layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderStyle {
    /// Priority, destination and source bytes
    ThreeByte,
    /// Header byte only
    SingleByte,
}

/// How the destination byte is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Addressing {
    /// Destination is a device address
    Physical,
    /// Destination is a function
    Functional,
}

/// Decoded header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VpwHeader {
    /// Raw header byte
    pub raw: u8,
    /// Priority, 0 (highest) to 7
    pub priority: u8,
    /// Header layout
    pub style: HeaderStyle,
    /// Receivers must answer inside the frame
    pub in_frame_response: bool,
    /// Destination interpretation
    pub addressing: Addressing,
    /// Message type bits
    pub message_type: u8,
}

impl VpwHeader {
    /// Decode a header byte
    pub fn decode(raw: u8) -> Self {
        Self {
            raw,
            priority: (raw & 0xE0) >> 5,
            style: if raw & 0x10 == 0 {
                HeaderStyle::ThreeByte
            } else {
                HeaderStyle::SingleByte
            },
            in_frame_response: raw & 0x08 == 0,
            addressing: if raw & 0x04 != 0 {
                Addressing::Physical
            } else {
                Addressing::Functional
            },
            message_type: raw & 0x03,
        }
    }
}

impl fmt::Display for VpwHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pri{} {} {} {} Type{}",
            self.priority,
            match self.style {
                HeaderStyle::ThreeByte => "3-byte",
                HeaderStyle::SingleByte => "1-byte",
            },
            if self.in_frame_response { "IFR" } else { "NoIFR" },
            match self.addressing {
                Addressing::Physical => "Phy",
                Addressing::Functional => "Fun",
            },
            self.message_type
        )
    }
}

/// Module family implied by a device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceClass {
    /// 0x00-0x0F
    PowertrainExpansion,
    /// 0x10-0x17
    Engine,
    /// 0x18-0x1F
    Transmission,
    /// 0x20-0x27
    ChassisExpansion,
    /// 0x28-0x2F
    Brake,
    /// 0x30-0x37
    Steering,
    /// 0x38-0x3F
    Suspension,
    /// 0x40-0x57
    BodyExpansion,
    /// 0x58-0x5F
    Restraint,
    /// 0x60-0x6F
    DriverInformation,
    /// 0x70-0x7F
    Lighting,
    /// 0x80-0x8F
    Entertainment,
    /// 0x90-0x97
    PersonalCommunication,
    /// 0x98-0x9F
    Climate,
    /// 0xA0-0xBF
    Convenience,
    /// 0xC0-0xC7
    Security,
    /// 0xC8
    Charging,
    /// 0xC9
    AcToAc,
    /// 0xCA
    DcToDc,
    /// 0xCB
    EnergyStorage,
    /// 0xCC-0xEF
    Unknown,
    /// 0xF0-0xFD
    OffBoardTool,
    /// 0xFE
    Broadcast,
    /// 0xFF
    Programmer,
}

impl DeviceClass {
    /// Class for a device address
    pub fn from_address(address: u8) -> Self {
        match address {
            0x00..=0x0F => DeviceClass::PowertrainExpansion,
            0x10..=0x17 => DeviceClass::Engine,
            0x18..=0x1F => DeviceClass::Transmission,
            0x20..=0x27 => DeviceClass::ChassisExpansion,
            0x28..=0x2F => DeviceClass::Brake,
            0x30..=0x37 => DeviceClass::Steering,
            0x38..=0x3F => DeviceClass::Suspension,
            0x40..=0x57 => DeviceClass::BodyExpansion,
            0x58..=0x5F => DeviceClass::Restraint,
            0x60..=0x6F => DeviceClass::DriverInformation,
            0x70..=0x7F => DeviceClass::Lighting,
            0x80..=0x8F => DeviceClass::Entertainment,
            0x90..=0x97 => DeviceClass::PersonalCommunication,
            0x98..=0x9F => DeviceClass::Climate,
            0xA0..=0xBF => DeviceClass::Convenience,
            0xC0..=0xC7 => DeviceClass::Security,
            0xC8 => DeviceClass::Charging,
            0xC9 => DeviceClass::AcToAc,
            0xCA => DeviceClass::DcToDc,
            0xCB => DeviceClass::EnergyStorage,
            0xCC..=0xEF => DeviceClass::Unknown,
            0xF0..=0xFD => DeviceClass::OffBoardTool,
            0xFE => DeviceClass::Broadcast,
            0xFF => DeviceClass::Programmer,
        }
    }

    /// Short display name
    pub fn name(self) -> &'static str {
        match self {
            DeviceClass::PowertrainExpansion => "Powertrain Exp",
            DeviceClass::Engine => "Engine",
            DeviceClass::Transmission => "Transmission",
            DeviceClass::ChassisExpansion => "Chassis Exp",
            DeviceClass::Brake => "Brake",
            DeviceClass::Steering => "Steering",
            DeviceClass::Suspension => "Suspension",
            DeviceClass::BodyExpansion => "Body Exp",
            DeviceClass::Restraint => "Restraints",
            DeviceClass::DriverInformation => "Driver Info",
            DeviceClass::Lighting => "Lighting",
            DeviceClass::Entertainment => "Entertainment",
            DeviceClass::PersonalCommunication => "Personal Communications",
            DeviceClass::Climate => "Climate Control",
            DeviceClass::Convenience => "Convenience",
            DeviceClass::Security => "Security",
            DeviceClass::Charging => "Charging",
            DeviceClass::AcToAc => "AC to AC",
            DeviceClass::DcToDc => "DC to DC",
            DeviceClass::EnergyStorage => "Battery",
            DeviceClass::Unknown => "Unknown",
            DeviceClass::OffBoardTool => "Tool",
            DeviceClass::Broadcast => "Broadcast",
            DeviceClass::Programmer => "Programmer",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of a mode under the given addressing
pub fn mode_name(addressing: Addressing, mode: u8) -> Option<&'static str> {
    match addressing {
        Addressing::Functional => functional_mode_name(mode),
        Addressing::Physical => physical_mode_name(mode),
    }
}

fn functional_mode_name(mode: u8) -> Option<&'static str> {
    Some(match mode {
        0x01 => "Request Current Powertrain Diagnostic Data",
        0x02 => "Request Powertrain Freeze Frame Data",
        0x03 => "Request Powertrain Diagnostic Trouble Codes",
        0x04 => "Request to Clear/Reset Diagnostic Trouble Codes",
        0x05 => "Request Oxygen Sensor Monitoring Test Results",
        0x06 => "Request On-Board Monitoring Test Results",
        0x07 => "Request Pending Powertrain Trouble Codes",
        0x08 => "Request Control of On-Board System, Test, or Component",
        0x09 => "Request Vehicle Information",
        _ => return None,
    })
}

fn physical_mode_name(mode: u8) -> Option<&'static str> {
    Some(match mode {
        0x10 => "Initiate Diagnostics Operation",
        0x11 => "Request Module Reset",
        0x12 => "Request Diagnostic Freeze Frame Data",
        0x13 => "Request Diagnostic Trouble Code Information",
        0x14 => "Clear Diagnostic Information",
        0x17 => "Request Status of Diagnostic Trouble Codes",
        0x19 => "Request Diagnostic Trouble Codes by Status",
        0x20 => "Return to Normal Mode",
        0x21 => "Request Diagnostic Data",
        0x22 => "Request Diagnostic Data by PID",
        0x23 => "Request Diagnostic Data by Memory Address",
        0x25 => "Stop Transmitting Requested Data",
        0x26 => "Specify Data Rates",
        0x27 => "Security Access Mode",
        0x28 => "Disable Normal Message Transmission",
        0x29 => "Enable Normal Message Transmission",
        0x2A => "Request Diagnostic Data Packets",
        0x2B => "Dynamically Define Data Packet by Single Data Offsets",
        0x2C => "Dynamically Define Diagnostic Data Packet",
        0x2F => "Input/Output Control by PID",
        0x30 => "Input/Output Control by Data Value ID",
        0x31 => "Enter/Start Diagnostic Routine by Test Number",
        0x32 => "Exit/Stop Diagnostic Routine by Test Number",
        0x33 => "Request Diagnostic Routine Results by Test Number",
        0x34 => "Request Download (tool to module)",
        0x35 => "Request Upload (module to tool)",
        0x36 => "Block Transfer Message",
        0x37 => "Request Data Transfer Exit",
        0x38 => "Enter Diagnostic Routine by Address",
        0x39 => "Exit Diagnostic Routine by Address",
        0x3A => "Request Diagnostic Routine Results",
        0x3B => "Write Data Block",
        0x3C => "Read Data Block",
        0x3F => "Test Device Present",
        0x7F => "General Response Message",
        0xA0 => "Request High Speed Mode",
        0xA1 => "Begin High Speed Mode",
        0xA2 => "Programming Prompt",
        0xAE => "Request Device Control",
        _ => return None,
    })
}

/// Result of comparing a frame's trailing byte with its computed CRC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrcCheck {
    /// Trailing byte is correct
    Match(u8),
    /// Trailing byte differs
    Mismatch {
        /// Byte found on the wire
        actual: u8,
        /// Byte the frame should have carried
        expected: u8,
    },
}

impl CrcCheck {
    /// True for [`CrcCheck::Match`]
    pub fn is_match(self) -> bool {
        matches!(self, CrcCheck::Match(_))
    }
}

impl fmt::Display for CrcCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrcCheck::Match(crc) => write!(f, "CRC {:02X}", crc),
            CrcCheck::Mismatch { actual, expected } => {
                write!(f, "Actual CRC {:02X}, expected {:02X}", actual, expected)
            }
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpwFrame {
    /// Header byte fields
    pub header: VpwHeader,
    /// Destination address
    pub destination: Option<u8>,
    /// Source address
    pub source: Option<u8>,
    /// Mode byte
    pub mode: Option<u8>,
    /// Bytes after the mode
    pub payload: Vec<u8>,
    /// Trailing CRC comparison, when a trailing byte was supplied
    pub crc: Option<CrcCheck>,
    /// Problems seen while decoding
    pub errors: Vec<String>,
}

impl VpwFrame {
    /// Decode a complete frame whose last byte is the CRC
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (&crc, body) = bytes.split_last()?;
        let mut builder = VpwFrameBuilder::new();
        for &b in body {
            builder.push(b);
        }
        builder.finish(Some(crc))
    }

    /// Class of the destination address
    pub fn destination_class(&self) -> Option<DeviceClass> {
        self.destination.map(DeviceClass::from_address)
    }

    /// Class of the source address
    pub fn source_class(&self) -> Option<DeviceClass> {
        self.source.map(DeviceClass::from_address)
    }

    /// Name of the mode byte under this frame's addressing
    pub fn mode_name(&self) -> Option<&'static str> {
        mode_name(self.header.addressing, self.mode?)
    }

    /// Decoded without problems and with a matching CRC
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.crc.is_some_and(CrcCheck::is_match)
    }
}

impl fmt::Display for VpwFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} ({})", self.header.raw, self.header)?;
        if let (Some(source), Some(destination)) = (self.source_class(), self.destination_class()) {
            write!(f, ", {} to {}", source, destination)?;
        }
        match (self.mode, self.mode_name()) {
            (_, Some(name)) => write!(f, ", {}", name)?,
            (Some(mode), None) => write!(f, ", Undefined mode: {:02X}", mode)?,
            (None, None) => {}
        }
        if !self.payload.is_empty() {
            write!(f, ", {}", to_hex(&self.payload))?;
        }
        if let Some(crc @ CrcCheck::Mismatch { .. }) = self.crc {
            write!(f, ", {}", crc)?;
        }
        for error in &self.errors {
            write!(f, ", {}", error)?;
        }
        Ok(())
    }
}

/// Accumulates the bytes of one frame
///
/// The trailing CRC byte is not pushed; it is handed to
/// [`finish`](VpwFrameBuilder::finish) once the frame boundary is known.
#[derive(Debug, Clone, Default)]
pub struct VpwFrameBuilder {
    crc: Crc8,
    header: Option<u8>,
    destination: Option<u8>,
    source: Option<u8>,
    mode: Option<u8>,
    payload: Vec<u8>,
    errors: Vec<String>,
}

impl VpwFrameBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing pushed yet
    pub fn is_empty(&self) -> bool {
        self.header.is_none()
    }

    /// Append one frame byte
    pub fn push(&mut self, byte: u8) {
        self.crc.update(byte);
        if self.header.is_none() {
            self.header = Some(byte);
        } else if self.destination.is_none() {
            self.destination = Some(byte);
        } else if self.source.is_none() {
            self.source = Some(byte);
        } else if self.mode.is_none() {
            self.mode = Some(byte);
        } else {
            self.payload.push(byte);
        }
    }

    /// Record a problem to report on the frame
    pub fn note_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// CRC the pushed bytes should carry
    pub fn expected_crc(&self) -> u8 {
        self.crc.finalize(CrcConvention::Vpw)
    }

    /// Close the frame and start over
    ///
    /// Returns `None` when no byte was pushed.
    pub fn finish(&mut self, trailing: Option<u8>) -> Option<VpwFrame> {
        let builder = std::mem::take(self);
        let raw = builder.header?;
        let expected = builder.expected_crc();
        let crc = trailing.map(|actual| {
            if actual == expected {
                CrcCheck::Match(actual)
            } else {
                CrcCheck::Mismatch { actual, expected }
            }
        });
        Some(VpwFrame {
            header: VpwHeader::decode(raw),
            destination: builder.destination,
            source: builder.source,
            mode: builder.mode,
            payload: builder.payload,
            crc,
            errors: builder.errors,
        })
    }
}

/// Decodes a text log of VPW traffic, one frame per line
///
/// Each line is whitespace-separated hex byte pairs, the last being the
/// frame's CRC. Input arrives one character at a time; a frame is
/// returned when its line ends.
#[derive(Debug, Clone)]
pub struct VpwLogParser {
    line: usize,
    token: String,
    bytes: Vec<u8>,
    errors: Vec<String>,
}

impl VpwLogParser {
    /// Parser at the start of line 1
    pub fn new() -> Self {
        Self {
            line: 1,
            token: String::new(),
            bytes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Line currently being read, 1-based
    pub fn line(&self) -> usize {
        self.line
    }

    fn end_token(&mut self) {
        if self.token.is_empty() {
            return;
        }
        let token = std::mem::take(&mut self.token);
        let parsed = if token.len() == 2 {
            u8::from_str_radix(&token, 16).ok()
        } else {
            None
        };
        match parsed {
            Some(byte) => self.bytes.push(byte),
            None => self
                .errors
                .push(format!("line {}: malformed byte {:?}", self.line, token)),
        }
    }

    fn end_line(&mut self) -> Option<VpwFrame> {
        self.end_token();
        let line = self.line;
        self.line += 1;
        let mut bytes = std::mem::take(&mut self.bytes);
        let errors = std::mem::take(&mut self.errors);
        let trailing = bytes.pop();

        let mut builder = VpwFrameBuilder::new();
        for b in bytes {
            builder.push(b);
        }
        if builder.is_empty() {
            if trailing.is_some() || !errors.is_empty() {
                tracing::debug!("line {} is too short for a frame", line);
            }
            return None;
        }
        for error in errors {
            builder.note_error(error);
        }
        builder.finish(trailing)
    }

    /// Consume one character of log text
    pub fn push(&mut self, byte: u8) -> Option<VpwFrame> {
        match byte {
            b'\n' => self.end_line(),
            b' ' | b'\t' | b'\r' => {
                self.end_token();
                None
            }
            _ => {
                self.token.push(byte as char);
                None
            }
        }
    }

    /// Flush a final line that has no line terminator
    pub fn finish(&mut self) -> Option<VpwFrame> {
        if self.token.is_empty() && self.bytes.is_empty() && self.errors.is_empty() {
            return None;
        }
        self.end_line()
    }

    /// Decode a whole log
    pub fn parse_log(text: &str) -> Vec<VpwFrame> {
        let mut parser = Self::new();
        let mut frames: Vec<VpwFrame> = text.bytes().filter_map(|b| parser.push(b)).collect();
        frames.extend(parser.finish());
        frames
    }
}

impl Default for VpwLogParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::vpw_crc;
    use pretty_assertions::assert_eq;

    const VIN1: [u8; 11] = [0x6C, 0xF0, 0x10, 0x7C, 0x01, 0x00, 0x31, 0x47, 0x31, 0x59, 0x59];

    #[test]
    fn test_header_bits() {
        let header = VpwHeader::decode(0x6C);
        assert_eq!(header.priority, 3);
        assert_eq!(header.style, HeaderStyle::ThreeByte);
        assert!(!header.in_frame_response);
        assert_eq!(header.addressing, Addressing::Physical);
        assert_eq!(header.message_type, 0);

        let header = VpwHeader::decode(0x68);
        assert_eq!(header.addressing, Addressing::Functional);

        let header = VpwHeader::decode(0x13);
        assert_eq!(header.priority, 0);
        assert_eq!(header.style, HeaderStyle::SingleByte);
        assert!(header.in_frame_response);
        assert_eq!(header.message_type, 3);
    }

    #[test]
    fn test_device_classes() {
        assert_eq!(DeviceClass::from_address(0x10), DeviceClass::Engine);
        assert_eq!(DeviceClass::from_address(0x17), DeviceClass::Engine);
        assert_eq!(DeviceClass::from_address(0x18), DeviceClass::Transmission);
        assert_eq!(DeviceClass::from_address(0x40), DeviceClass::BodyExpansion);
        assert_eq!(DeviceClass::from_address(0xCB), DeviceClass::EnergyStorage);
        assert_eq!(DeviceClass::from_address(0xCC), DeviceClass::Unknown);
        assert_eq!(DeviceClass::from_address(0xF0), DeviceClass::OffBoardTool);
        assert_eq!(DeviceClass::from_address(0xFE), DeviceClass::Broadcast);
        assert_eq!(DeviceClass::from_address(0xFF), DeviceClass::Programmer);
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(mode_name(Addressing::Physical, 0x3C), Some("Read Data Block"));
        assert_eq!(mode_name(Addressing::Functional, 0x3C), None);
        assert_eq!(
            mode_name(Addressing::Functional, 0x09),
            Some("Request Vehicle Information")
        );
    }

    #[test]
    fn test_parse_valid_frame() {
        let mut bytes = VIN1.to_vec();
        bytes.push(0xC3);
        let frame = VpwFrame::parse(&bytes).unwrap();
        assert_eq!(frame.destination, Some(0xF0));
        assert_eq!(frame.source, Some(0x10));
        assert_eq!(frame.mode, Some(0x7C));
        assert_eq!(frame.payload, VIN1[4..].to_vec());
        assert_eq!(frame.crc, Some(CrcCheck::Match(0xC3)));
        assert_eq!(frame.source_class(), Some(DeviceClass::Engine));
        assert_eq!(frame.destination_class(), Some(DeviceClass::OffBoardTool));
        assert!(frame.is_valid());
    }

    #[test]
    fn test_crc_mismatch_is_reported() {
        let mut bytes = VIN1.to_vec();
        bytes.push(0x00);
        let frame = VpwFrame::parse(&bytes).unwrap();
        assert_eq!(
            frame.crc,
            Some(CrcCheck::Mismatch {
                actual: 0x00,
                expected: 0xC3
            })
        );
        assert!(!frame.is_valid());
        assert!(frame.to_string().contains("Actual CRC 00, expected C3"));
    }

    #[test]
    fn test_log_parser() {
        let crc = vpw_crc(&[0x8C, 0xFE, 0xF0, 0x3F]);
        let log = format!(
            "6C F0 10 7C 01 00 31 47 31 59 59 C3\r\n\n8C FE F0 3F {:02X}\n6C 10 ZZ F0 3C 01 00",
            crc
        );
        let frames = VpwLogParser::parse_log(&log);
        assert_eq!(frames.len(), 3);

        assert!(frames[0].is_valid());
        assert_eq!(frames[1].mode_name(), Some("Test Device Present"));
        assert!(frames[1].is_valid());

        // final line has no terminator, a bad token and a bad CRC
        assert_eq!(frames[2].errors.len(), 1);
        assert!(frames[2].errors[0].starts_with("line 4"));
        assert!(!frames[2].crc.unwrap().is_match());
    }

    #[test]
    fn test_log_parser_byte_at_a_time() {
        let mut parser = VpwLogParser::new();
        let line = b"6C F0 10 7C 01 00 31 47 31 59 59 C3\n";
        let (last, rest) = line.split_last().unwrap();
        for &b in rest {
            assert!(parser.push(b).is_none());
        }
        let frame = parser.push(*last).unwrap();
        assert!(frame.is_valid());
        assert_eq!(parser.line(), 2);
    }
}

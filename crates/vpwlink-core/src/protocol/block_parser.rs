//! Block response parser
//!
//! Turns raw PCM responses into typed values. Every parse first checks the
//! response against the exact prefix it must start with: a response shorter
//! than the prefix is [`ResponseStatus::Truncated`], one whose bytes differ
//! is [`ResponseStatus::UnexpectedResponse`].

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{device, mode, priority, submode, BlockId};
use super::key::SeedByteOrder;
use super::{Response, ResponseStatus};
use crate::hex::printable;

/// Seed reply code meaning the PCM is already unlocked
const ALREADY_UNLOCKED: u8 = 0x37;

/// Where each part of a multi-block value sits in its response
struct Slice {
    block: BlockId,
    offset: usize,
    len: usize,
}

const VIN_LAYOUT: [Slice; 3] = [
    Slice { block: BlockId::Vin1, offset: 6, len: 5 },
    Slice { block: BlockId::Vin2, offset: 6, len: 4 },
    Slice { block: BlockId::Vin3, offset: 6, len: 4 },
];

const SERIAL_LAYOUT: [Slice; 3] = [
    Slice { block: BlockId::Serial1, offset: 6, len: 3 },
    Slice { block: BlockId::Serial2, offset: 5, len: 4 },
    Slice { block: BlockId::Serial3, offset: 5, len: 4 },
];

/// Check that `actual` starts with `expected`
pub fn verify_prefix(actual: &[u8], expected: &[u8]) -> ResponseStatus {
    if actual.len() < expected.len() {
        return ResponseStatus::Truncated;
    }
    if actual[..expected.len()] != *expected {
        return ResponseStatus::UnexpectedResponse;
    }
    ResponseStatus::Success
}

/// Reply to a seed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedReply {
    /// A seed to answer with a key
    Seed(u16),
    /// The PCM is unlocked already, no key needed
    AlreadyUnlocked,
}

impl Default for SeedReply {
    fn default() -> Self {
        SeedReply::Seed(0)
    }
}

/// Result code of an unlock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockOutcome {
    /// Key accepted, the PCM is unlocked
    Accepted,
    /// Wrong key
    KeyRejected,
    /// Wrong key too many times, the PCM refuses attempts for a while
    ///
    /// Reported as [`ResponseStatus::Refused`], not as a timeout: the PCM
    /// answered, so retrying the read would not help.
    TooManyAttempts,
    /// Code not in the known set
    Unrecognized(u8),
}

impl UnlockOutcome {
    /// Map the result byte of an unlock response
    pub fn from_code(code: u8) -> Self {
        match code {
            0x34 => UnlockOutcome::Accepted,
            0x36 => UnlockOutcome::KeyRejected,
            0x37 => UnlockOutcome::TooManyAttempts,
            other => UnlockOutcome::Unrecognized(other),
        }
    }

    /// Status reported for this outcome
    pub fn status(self) -> ResponseStatus {
        match self {
            UnlockOutcome::Accepted => ResponseStatus::Success,
            UnlockOutcome::KeyRejected => ResponseStatus::Error,
            UnlockOutcome::TooManyAttempts => ResponseStatus::Refused,
            UnlockOutcome::Unrecognized(_) => ResponseStatus::UnexpectedResponse,
        }
    }

    /// Text suitable for the user log
    pub fn message(self) -> String {
        match self {
            UnlockOutcome::Accepted => "PCM unlocked".to_string(),
            UnlockOutcome::KeyRejected => "The PCM didn't accept the unlock key value".to_string(),
            UnlockOutcome::TooManyAttempts => {
                "The PCM is refusing unlock attempts after too many bad keys, wait and try again"
                    .to_string()
            }
            UnlockOutcome::Unrecognized(code) => format!("Unknown unlock code {:#04x}", code),
        }
    }
}

impl Default for UnlockOutcome {
    fn default() -> Self {
        UnlockOutcome::Unrecognized(0)
    }
}

impl fmt::Display for UnlockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Parses responses addressed from one PCM to one tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockParser {
    tool: u8,
    pcm: u8,
    seed_order: SeedByteOrder,
}

impl BlockParser {
    /// Parser for an explicit tool/PCM address pair
    pub fn new(tool: u8, pcm: u8) -> Self {
        Self {
            tool,
            pcm,
            seed_order: SeedByteOrder::default(),
        }
    }

    /// Override the seed byte order
    pub fn with_seed_order(mut self, seed_order: SeedByteOrder) -> Self {
        self.seed_order = seed_order;
        self
    }

    fn response_prefix(&self, request_mode: u8, detail: u8) -> [u8; 5] {
        [
            priority::PHYSICAL,
            self.tool,
            self.pcm,
            request_mode | mode::RESPONSE,
            detail,
        ]
    }

    fn is_refusal(&self, response: &[u8], request_mode: u8, detail: u8) -> bool {
        let refusal = [
            priority::PHYSICAL,
            self.tool,
            self.pcm,
            mode::REJECTED,
            request_mode,
            detail,
        ];
        response.starts_with(&refusal)
    }

    /// Status of the prefix check, with general rejects reported as refused
    fn check(&self, response: &[u8], request_mode: u8, detail: u8) -> ResponseStatus {
        let status = verify_prefix(response, &self.response_prefix(request_mode, detail));
        if status == ResponseStatus::UnexpectedResponse
            && self.is_refusal(response, request_mode, detail)
        {
            return ResponseStatus::Refused;
        }
        status
    }

    /// Verify the prefix of a read-block response: `6C F0 10 7C <block>`
    pub fn verify_block(&self, response: &[u8], block: BlockId) -> ResponseStatus {
        self.check(response, mode::READ_BLOCK, block.code())
    }

    fn block_slice<'a>(&self, response: &'a [u8], slice: &Slice) -> Result<&'a [u8], ResponseStatus> {
        match self.verify_block(response, slice.block) {
            ResponseStatus::Success => response
                .get(slice.offset..slice.offset + slice.len)
                .ok_or(ResponseStatus::Truncated),
            status => Err(status),
        }
    }

    /// Big-endian 32-bit value following the block prefix
    pub fn parse_u32_block(&self, response: &[u8], block: BlockId) -> Response<u32> {
        let slice = Slice { block, offset: 5, len: 4 };
        match self.block_slice(response, &slice) {
            Ok(bytes) => Response::success(BigEndian::read_u32(bytes)),
            Err(status) => Response::failure(status),
        }
    }

    /// Operating system id
    pub fn parse_operating_system_id(&self, response: &[u8]) -> Response<u32> {
        self.parse_u32_block(response, BlockId::OperatingSystemId)
    }

    fn assemble(&self, responses: [&[u8]; 3], layout: &[Slice; 3], filter: bool) -> Response<String> {
        let mut bytes = Vec::with_capacity(13);
        // every part validates before any of them is used
        for (response, slice) in responses.iter().zip(layout.iter()) {
            match self.block_slice(response, slice) {
                Ok(part) => bytes.extend_from_slice(part),
                Err(status) => return Response::failure(status),
            }
        }
        if filter {
            bytes = printable(&bytes);
        }
        Response::success(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// VIN from the three VIN block responses, in order
    pub fn parse_vin(&self, vin1: &[u8], vin2: &[u8], vin3: &[u8]) -> Response<String> {
        self.assemble([vin1, vin2, vin3], &VIN_LAYOUT, false)
    }

    /// Serial number from the three serial block responses, in order
    pub fn parse_serial(&self, serial1: &[u8], serial2: &[u8], serial3: &[u8]) -> Response<String> {
        self.assemble([serial1, serial2, serial3], &SERIAL_LAYOUT, true)
    }

    /// Broadcast code, four printable characters
    pub fn parse_broadcast_code(&self, response: &[u8]) -> Response<String> {
        let slice = Slice { block: BlockId::BroadcastCode, offset: 5, len: 4 };
        match self.block_slice(response, &slice) {
            Ok(bytes) => Response::success(String::from_utf8_lossy(&printable(bytes)).into_owned()),
            Err(status) => Response::failure(status),
        }
    }

    /// Manufacturer enable counter
    pub fn parse_manufacturer_enable_counter(&self, response: &[u8]) -> Response<u8> {
        let slice = Slice { block: BlockId::ManufacturerEnableCounter, offset: 5, len: 1 };
        match self.block_slice(response, &slice) {
            Ok(bytes) => Response::success(bytes[0]),
            Err(status) => Response::failure(status),
        }
    }

    /// Single byte answer to `<mode> <submode>`
    pub fn parse_byte(&self, response: &[u8], request_mode: u8, request_submode: u8) -> Response<u8> {
        match self.check(response, request_mode, request_submode) {
            ResponseStatus::Success => match response.get(5) {
                Some(&value) => Response::success(value),
                None => Response::failure(ResponseStatus::Truncated),
            },
            status => Response::failure(status),
        }
    }

    /// Seed response: `6C F0 10 67 01 <seed> <seed>`
    pub fn parse_seed(&self, response: &[u8]) -> Response<SeedReply> {
        match self.check(response, mode::SEED, submode::GET_SEED) {
            ResponseStatus::Success => {}
            status => return Response::failure(status),
        }
        if response.len() == 6 && response[5] == ALREADY_UNLOCKED {
            return Response::success(SeedReply::AlreadyUnlocked);
        }
        match self.seed_order.read(&response[5..]) {
            Some(seed) => Response::success(SeedReply::Seed(seed)),
            None => Response::failure(ResponseStatus::Truncated),
        }
    }

    /// Unlock response: `6C F0 10 67 02 <code>`
    pub fn parse_unlock(&self, response: &[u8]) -> Response<UnlockOutcome> {
        match self.check(response, mode::SEED, submode::SEND_KEY) {
            ResponseStatus::Success => {}
            status => return Response::failure(status),
        }
        match response.get(5) {
            Some(&code) => {
                let outcome = UnlockOutcome::from_code(code);
                Response::new(outcome.status(), outcome)
            }
            None => Response::failure(ResponseStatus::Truncated),
        }
    }
}

impl Default for BlockParser {
    fn default() -> Self {
        Self::new(device::TOOL, device::PCM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn block_response(block: u8, data: &[u8]) -> Vec<u8> {
        let mut response = vec![0x6C, 0xF0, 0x10, 0x7C, block];
        response.extend_from_slice(data);
        response
    }

    #[test]
    fn test_verify_prefix() {
        let expected = [0x6C, 0xF0, 0x10, 0x7C, 0x01];
        assert_eq!(verify_prefix(&[0x6C, 0xF0], &expected), ResponseStatus::Truncated);
        assert_eq!(verify_prefix(&[], &expected), ResponseStatus::Truncated);
        assert_eq!(
            verify_prefix(&[0x6C, 0xF0, 0x10, 0x7C, 0x02], &expected),
            ResponseStatus::UnexpectedResponse
        );
        assert_eq!(
            verify_prefix(&[0x6C, 0xF0, 0x10, 0x7C, 0x01, 0x00], &expected),
            ResponseStatus::Success
        );
    }

    #[test]
    fn test_short_garbage_is_truncated() {
        // differs in the first byte but is shorter than the prefix
        let parser = BlockParser::default();
        assert_eq!(parser.verify_block(&[0x00, 0x00], BlockId::Vin1), ResponseStatus::Truncated);
    }

    #[test]
    fn test_operating_system_id() {
        let parser = BlockParser::default();
        let response = block_response(0x0A, &[0x00, 0xBE, 0xB5, 0x2A]);
        let result = parser.parse_operating_system_id(&response);
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.value, 12_498_218);
    }

    #[test]
    fn test_operating_system_id_truncated_after_prefix() {
        let parser = BlockParser::default();
        let response = block_response(0x0A, &[0x00, 0xBE]);
        assert_eq!(parser.parse_operating_system_id(&response).status, ResponseStatus::Truncated);
    }

    #[test]
    fn test_vin() {
        let parser = BlockParser::default();
        let vin1 = block_response(0x01, b"\x001G1YY");
        let vin2 = block_response(0x02, b"\x002236");
        let vin3 = block_response(0x03, b"\x00F5123456");
        let result = parser.parse_vin(&vin1, &vin2, &vin3);
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.value, "1G1YY2236F512");
    }

    #[test]
    fn test_vin_rejects_out_of_order_parts() {
        let parser = BlockParser::default();
        let vin1 = block_response(0x01, b"\x001G1YY");
        let vin2 = block_response(0x02, b"\x002236");
        let result = parser.parse_vin(&vin1, &vin2, &vin2);
        assert_eq!(result.status, ResponseStatus::UnexpectedResponse);
        assert_eq!(result.value, "");
    }

    #[test]
    fn test_serial_filters_unprintable() {
        let parser = BlockParser::default();
        let serial1 = block_response(0x04, b"\x00AB\x01");
        let serial2 = block_response(0x05, b"1234");
        let serial3 = block_response(0x06, b"56\x0078");
        let result = parser.parse_serial(&serial1, &serial2, &serial3);
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.value, "AB1234567");
    }

    #[test]
    fn test_broadcast_code_and_counter() {
        let parser = BlockParser::default();
        let bcc = parser.parse_broadcast_code(&block_response(0x14, b"ZXCV"));
        assert_eq!(bcc.value, "ZXCV");
        let mec = parser.parse_manufacturer_enable_counter(&block_response(0xA0, &[0x19]));
        assert_eq!(mec.value, 0x19);
    }

    #[test]
    fn test_refused_block() {
        let parser = BlockParser::default();
        let response = [0x6C, 0xF0, 0x10, 0x7F, 0x3C, 0x0A, 0x12];
        assert_eq!(parser.parse_operating_system_id(&response).status, ResponseStatus::Refused);
    }

    #[test]
    fn test_seed_byte_order() {
        let response = [0x6C, 0xF0, 0x10, 0x67, 0x01, 0x2A, 0xED];
        let little = BlockParser::default().parse_seed(&response);
        assert_eq!(little.value, SeedReply::Seed(0xED2A));
        let big = BlockParser::default()
            .with_seed_order(SeedByteOrder::Big)
            .parse_seed(&response);
        assert_eq!(big.value, SeedReply::Seed(0x2AED));
    }

    #[test]
    fn test_seed_already_unlocked() {
        let response = [0x6C, 0xF0, 0x10, 0x67, 0x01, 0x37];
        let result = BlockParser::default().parse_seed(&response);
        assert_eq!(result.status, ResponseStatus::Success);
        assert_eq!(result.value, SeedReply::AlreadyUnlocked);
    }

    #[test]
    fn test_seed_missing_byte() {
        let response = [0x6C, 0xF0, 0x10, 0x67, 0x01, 0x2A];
        assert_eq!(BlockParser::default().parse_seed(&response).status, ResponseStatus::Truncated);
    }

    #[test]
    fn test_unlock_outcomes() {
        let parser = BlockParser::default();
        let cases = [
            (0x34, UnlockOutcome::Accepted, ResponseStatus::Success),
            (0x36, UnlockOutcome::KeyRejected, ResponseStatus::Error),
            (0x37, UnlockOutcome::TooManyAttempts, ResponseStatus::Refused),
            (0x99, UnlockOutcome::Unrecognized(0x99), ResponseStatus::UnexpectedResponse),
        ];
        for (code, outcome, status) in cases {
            let result = parser.parse_unlock(&[0x6C, 0xF0, 0x10, 0x67, 0x02, code]);
            assert_eq!(result.value, outcome);
            assert_eq!(result.status, status);
        }
        assert_eq!(
            parser.parse_unlock(&[0x6C, 0xF0, 0x10, 0x67, 0x02]).status,
            ResponseStatus::Truncated
        );
    }

    #[test]
    fn test_unlock_messages() {
        assert_eq!(
            UnlockOutcome::KeyRejected.message(),
            "The PCM didn't accept the unlock key value"
        );
        assert_eq!(UnlockOutcome::Unrecognized(0x12).to_string(), "Unknown unlock code 0x12");
    }

    #[test]
    fn test_parse_byte() {
        let parser = BlockParser::default();
        let ok = parser.parse_byte(&[0x6C, 0xF0, 0x10, 0x62, 0x11, 0x42], 0x22, 0x11);
        assert_eq!(ok.value, 0x42);
        let refused = parser.parse_byte(&[0x6C, 0xF0, 0x10, 0x7F, 0x22, 0x11, 0x31], 0x22, 0x11);
        assert_eq!(refused.status, ResponseStatus::Refused);
    }
}

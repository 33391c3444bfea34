//! Owned PCM session
//!
//! A [`Session`] is created when a device is selected and dropped when it
//! is replaced or the host shuts down. Every orchestrated operation goes
//! through it, so there is never more than one exchange in flight on the
//! transport.

use tokio_util::sync::CancellationToken;

use crate::codec::Codec;
use crate::config::SessionConfig;
use crate::device::{AdapterInfo, Device};
use crate::logger::SharedLogger;
use crate::protocol::ids::{mode, submode};
use crate::protocol::{
    key_for_seed, BlockId, BlockParser, Message, ProtocolError, Query, RequestBuilder, Response,
    ResponseStatus, RetryPolicy, SeedReply, ToolPresentNotifier, UnlockOutcome,
};
use crate::transport::{PortConfig, Transport};

/// One adapter, one PCM, one exchange at a time
pub struct Session<T: Transport> {
    device: Device<T>,
    port: PortConfig,
    tool: u8,
    requests: RequestBuilder,
    parser: BlockParser,
    retry: RetryPolicy,
    notifier: ToolPresentNotifier,
    key_algorithm: u8,
    cancel: CancellationToken,
    logger: SharedLogger,
}

impl<T: Transport> Session<T> {
    /// Session over `transport`, configured but not yet opened
    pub fn new(transport: T, config: &SessionConfig, logger: SharedLogger) -> Self {
        let requests = RequestBuilder::new(config.tool_id, config.pcm_id);
        let device = Device::new(transport, Codec::for_adapter(config.adapter), logger.clone());
        Self {
            device,
            port: config.port,
            tool: config.tool_id,
            requests,
            parser: BlockParser::new(config.tool_id, config.pcm_id)
                .with_seed_order(config.seed_byte_order),
            retry: config.retry,
            notifier: ToolPresentNotifier::new(requests.tool_present(), config.keep_alive_interval()),
            key_algorithm: config.key_algorithm,
            cancel: CancellationToken::new(),
            logger,
        }
    }

    /// Open the transport and initialize the adapter
    pub fn open(&mut self) -> Result<AdapterInfo, ProtocolError> {
        self.device.open(&self.port)?;
        let info = self.device.initialize(self.tool)?;
        self.logger.user(&format!("Adapter ready: {}", info.name));
        Ok(info)
    }

    /// Release the transport
    pub fn close(&mut self) {
        self.device.close();
    }

    /// Underlying device
    pub fn device(&self) -> &Device<T> {
        &self.device
    }

    /// Underlying device, mutably
    pub fn device_mut(&mut self) -> &mut Device<T> {
        &mut self.device
    }

    /// Hand the device over, e.g. to a keep-alive worker
    pub fn into_device(self) -> Device<T> {
        self.device
    }

    /// Token that aborts the current and future exchanges when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the current exchange at the next retry boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Replace a cancelled token so the session can be used again
    pub fn reset_cancellation(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }

    fn exchange<V, G, F>(&mut self, generator: G, filter: F) -> Response<V>
    where
        V: Default,
        G: FnMut() -> Message,
        F: FnMut(&Message) -> Response<V>,
    {
        Query::new(generator, filter).execute(&mut self.device, &self.retry, &self.cancel)
    }

    /// Raw response to a read-block request, prefix-verified
    pub fn read_block(&mut self, block: BlockId) -> Response<Vec<u8>> {
        let requests = self.requests;
        let parser = self.parser;
        self.exchange(
            move || requests.read_block(block),
            move |message| match parser.verify_block(message.as_bytes(), block) {
                ResponseStatus::Success => Response::success(message.as_bytes().to_vec()),
                status => Response::failure(status),
            },
        )
    }

    /// Read three blocks in order, stopping at the first failure
    fn read_parts(&mut self, blocks: [BlockId; 3]) -> Result<[Vec<u8>; 3], Response<String>> {
        let mut parts: [Vec<u8>; 3] = Default::default();
        for (part, block) in parts.iter_mut().zip(blocks) {
            let response = self.read_block(block);
            if !response.is_success() {
                self.logger
                    .debug(&format!("reading {} failed: {}", block, response.status));
                return Err(Response::failure(response.status)
                    .with_retry_count(response.retry_count));
            }
            *part = response.value;
        }
        Ok(parts)
    }

    /// Operating system id
    pub fn query_operating_system_id(&mut self) -> Response<u32> {
        let requests = self.requests;
        let parser = self.parser;
        self.exchange(
            move || requests.read_block(BlockId::OperatingSystemId),
            move |message| parser.parse_operating_system_id(message.as_bytes()),
        )
    }

    /// One of the 32-bit calibration ids
    pub fn query_calibration_id(&mut self, block: BlockId) -> Response<u32> {
        if !block.is_calibration_id() {
            self.logger
                .debug(&format!("{} is not a calibration id block", block));
            return Response::failure(ResponseStatus::Error);
        }
        let requests = self.requests;
        let parser = self.parser;
        self.exchange(
            move || requests.read_block(block),
            move |message| parser.parse_u32_block(message.as_bytes(), block),
        )
    }

    /// Vehicle identification number
    pub fn query_vin(&mut self) -> Response<String> {
        match self.read_parts([BlockId::Vin1, BlockId::Vin2, BlockId::Vin3]) {
            Ok([vin1, vin2, vin3]) => self.parser.parse_vin(&vin1, &vin2, &vin3),
            Err(failure) => failure,
        }
    }

    /// PCM serial number
    pub fn query_serial(&mut self) -> Response<String> {
        match self.read_parts([BlockId::Serial1, BlockId::Serial2, BlockId::Serial3]) {
            Ok([serial1, serial2, serial3]) => self.parser.parse_serial(&serial1, &serial2, &serial3),
            Err(failure) => failure,
        }
    }

    /// Broadcast code
    pub fn query_broadcast_code(&mut self) -> Response<String> {
        let requests = self.requests;
        let parser = self.parser;
        self.exchange(
            move || requests.read_block(BlockId::BroadcastCode),
            move |message| parser.parse_broadcast_code(message.as_bytes()),
        )
    }

    /// Manufacturer enable counter
    pub fn query_manufacturer_enable_counter(&mut self) -> Response<u8> {
        let requests = self.requests;
        let parser = self.parser;
        self.exchange(
            move || requests.read_block(BlockId::ManufacturerEnableCounter),
            move |message| parser.parse_manufacturer_enable_counter(message.as_bytes()),
        )
    }

    /// Ask the PCM for a security seed
    pub fn request_seed(&mut self) -> Response<SeedReply> {
        let requests = self.requests;
        let parser = self.parser;
        self.exchange(
            move || requests.seed_request(),
            move |message| parser.parse_seed(message.as_bytes()),
        )
    }

    /// Send an unlock key
    ///
    /// A rejected key is a definitive answer, so it ends the exchange
    /// instead of being retried.
    pub fn send_key(&mut self, key: u16) -> Response<UnlockOutcome> {
        let requests = self.requests;
        let parser = self.parser;
        let response = self.exchange(
            move || requests.unlock_request(key),
            move |message| {
                let bytes = message.as_bytes();
                match parser.parse_byte(bytes, mode::SEED, submode::SEND_KEY).status {
                    // any answer from the PCM settles the exchange
                    ResponseStatus::Success | ResponseStatus::Refused => {
                        Response::success(Some(parser.parse_unlock(bytes)))
                    }
                    status => Response::failure(status),
                }
            },
        );
        let Response {
            status,
            value,
            retry_count,
        } = response;
        match value {
            Some(parsed) if status.is_success() => parsed.with_retry_count(retry_count),
            _ => Response::failure(status).with_retry_count(retry_count),
        }
    }

    /// Request a seed, derive the key and send it
    pub fn unlock(&mut self) -> Response<UnlockOutcome> {
        let seed = self.request_seed();
        if !seed.is_success() {
            self.logger.user("Unable to get a seed from the PCM.");
            return Response::failure(seed.status).with_retry_count(seed.retry_count);
        }
        let seed = match seed.value {
            SeedReply::AlreadyUnlocked => {
                self.logger.user("PCM is already unlocked.");
                return Response::success(UnlockOutcome::Accepted);
            }
            SeedReply::Seed(seed) => seed,
        };
        let Some(key) = key_for_seed(self.key_algorithm, seed) else {
            self.logger
                .user(&format!("Unknown key algorithm {}.", self.key_algorithm));
            return Response::failure(ResponseStatus::Error);
        };
        self.logger
            .debug(&format!("seed {:#06x}, key {:#06x}", seed, key));
        let response = self.send_key(key);
        self.logger.user(&response.value.message());
        response
    }

    /// Tell every module to stop normal traffic
    ///
    /// Nothing answers this broadcast, so only the write is checked.
    pub fn silence_bus(&mut self) -> Response<bool> {
        self.send_only(self.requests.silence_bus())
    }

    /// Clear diagnostic trouble codes on every module
    pub fn clear_dtcs(&mut self) -> Response<bool> {
        self.send_only(self.requests.clear_dtcs())
    }

    fn send_only(&mut self, message: Message) -> Response<bool> {
        if self.cancel.is_cancelled() {
            return Response::failure(ResponseStatus::Cancelled);
        }
        let mut last = ResponseStatus::Error;
        for attempt in 1..=self.retry.send_attempts {
            match self.device.send_message(&message) {
                Ok(()) => return Response::success(true).with_retry_count(attempt - 1),
                Err(e) => {
                    self.logger
                        .debug(&format!("send attempt {} failed: {}", attempt, e));
                    last = e.status();
                }
            }
        }
        self.logger.debug(&format!("giving up: {}", last));
        Response::failure(ResponseStatus::Error).with_retry_count(self.retry.send_attempts.saturating_sub(1))
    }

    /// Single byte answer to an arbitrary `<mode> <submode>` request
    pub fn query_byte(&mut self, request: Message) -> Response<u8> {
        let (Some(request_mode), Some(&request_submode)) = (request.mode(), request.as_bytes().get(4))
        else {
            return Response::failure(ResponseStatus::Error);
        };
        let parser = self.parser;
        self.exchange(
            move || request.clone(),
            move |message| parser.parse_byte(message.as_bytes(), request_mode, request_submode),
        )
    }

    /// Send tool-present if the keep-alive interval has elapsed
    pub fn notify_tool_present(&mut self) -> bool {
        self.notifier.notify(&mut self.device)
    }

    /// Send tool-present now
    pub fn force_notify_tool_present(&mut self) -> bool {
        self.notifier.force_notify(&mut self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AdapterKind;
    use crate::logger::MemoryLogger;
    use crate::protocol::crc::vpw_crc;
    use crate::transport::{MockHandle, MockTransport};
    use std::sync::Arc;

    fn frame(bytes: &[u8]) -> Vec<u8> {
        // AVT receive framing: length, status byte, message, CRC
        let mut out = vec![(bytes.len() + 1) as u8, 0x00];
        out.extend_from_slice(bytes);
        out.push(vpw_crc(bytes));
        out
    }

    fn open_session(transport: MockTransport) -> (Session<MockTransport>, MockHandle, Arc<MemoryLogger>) {
        let handle = transport.handle();
        let logger = Arc::new(MemoryLogger::new());
        let config = SessionConfig {
            adapter: AdapterKind::Binary,
            port: PortConfig::Plain,
            ..SessionConfig::default()
        };
        let mut session = Session::new(transport, &config, logger.clone());
        session.device_mut().open(&PortConfig::Plain).unwrap();
        (session, handle, logger)
    }

    /// Answers message bodies only; length headers are ignored
    fn pcm(request: &[u8]) -> Vec<Vec<u8>> {
        match request {
            [0x6C, 0x10, 0xF0, 0x3C, 0x0A] => {
                vec![frame(&[0x6C, 0xF0, 0x10, 0x7C, 0x0A, 0x00, 0xBE, 0xEF, 0x01])]
            }
            [0x6C, 0x10, 0xF0, 0x3C, block] if (0x01..=0x03).contains(block) => {
                let text: &[u8] = match block {
                    0x01 => b"\x001G1YY",
                    0x02 => b"2284",
                    _ => b"5123",
                };
                let mut body = vec![0x6C, 0xF0, 0x10, 0x7C, *block];
                if *block != 0x01 {
                    body.push(0x00);
                }
                body.extend_from_slice(text);
                vec![frame(&body)]
            }
            [0x6C, 0x10, 0xF0, 0x27, 0x01] => {
                vec![frame(&[0x6C, 0xF0, 0x10, 0x67, 0x01, 0x2A, 0xED])]
            }
            [0x6C, 0x10, 0xF0, 0x27, 0x02, ..] => {
                vec![frame(&[0x6C, 0xF0, 0x10, 0x67, 0x02, 0x34])]
            }
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_operating_system_id() {
        let (mut session, _, _) = open_session(MockTransport::with_responder(pcm));
        let response = session.query_operating_system_id();
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.value, 0x00BE_EF01);
    }

    #[test]
    fn test_vin() {
        let (mut session, _, _) = open_session(MockTransport::with_responder(pcm));
        let response = session.query_vin();
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.value, "1G1YY22845123");
    }

    #[test]
    fn test_unlock_sends_derived_key() {
        let (mut session, handle, logger) = open_session(MockTransport::with_responder(pcm));
        let response = session.unlock();
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.value, UnlockOutcome::Accepted);

        // seed 0xED2A, key 0x934D - 0xED2A
        let key = 0x934Du16.wrapping_sub(0xED2A);
        let unlock = handle
            .sent()
            .into_iter()
            .find(|bytes| bytes.starts_with(&[0x6C, 0x10, 0xF0, 0x27, 0x02]))
            .unwrap();
        assert_eq!(unlock[5..], [(key >> 8) as u8, key as u8]);
        assert!(!logger.user_lines().is_empty());
    }

    #[test]
    fn test_unlock_already_unlocked() {
        let transport = MockTransport::with_responder(|request| match request {
            [0x6C, 0x10, 0xF0, 0x27, 0x01] => vec![frame(&[0x6C, 0xF0, 0x10, 0x67, 0x01, 0x37])],
            _ => Vec::new(),
        });
        let (mut session, handle, _) = open_session(transport);
        let response = session.unlock();
        assert_eq!(response.value, UnlockOutcome::Accepted);
        assert!(!handle.sent().iter().any(|bytes| bytes.starts_with(&[0x6C, 0x10, 0xF0, 0x27, 0x02])));
    }

    #[test]
    fn test_key_rejected_is_not_retried() {
        let transport = MockTransport::with_responder(|request| match request {
            [0x6C, 0x10, 0xF0, 0x27, 0x02, ..] => vec![frame(&[0x6C, 0xF0, 0x10, 0x67, 0x02, 0x36])],
            _ => Vec::new(),
        });
        let (mut session, _, _) = open_session(transport);
        let response = session.send_key(0x1234);
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.value, UnlockOutcome::KeyRejected);
        assert_eq!(response.retry_count, 0);
    }

    #[test]
    fn test_silence_bus() {
        let (mut session, handle, _) = open_session(MockTransport::new());
        let response = session.silence_bus();
        assert!(response.is_success());
        assert_eq!(handle.sent()[1], vec![0x6C, 0xFE, 0xF0, 0x28, 0x00]);
    }

    #[test]
    fn test_cancelled_session() {
        let (mut session, handle, _) = open_session(MockTransport::with_responder(pcm));
        session.cancel();
        assert_eq!(session.query_vin().status, ResponseStatus::Cancelled);
        assert_eq!(session.clear_dtcs().status, ResponseStatus::Cancelled);
        assert!(handle.sent().is_empty());

        session.reset_cancellation();
        assert!(session.query_operating_system_id().is_success());
    }

    #[test]
    fn test_calibration_id_rejects_other_blocks() {
        let (mut session, handle, _) = open_session(MockTransport::new());
        assert_eq!(session.query_calibration_id(BlockId::Vin1).status, ResponseStatus::Error);
        assert!(handle.sent().is_empty());
    }
}

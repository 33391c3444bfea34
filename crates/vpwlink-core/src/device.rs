//! Adapter driver
//!
//! A [`Device`] owns one transport and one codec. It turns messages into
//! writes, reassembles replies from however many reads the transport needs,
//! and brings the adapter into VPW mode when opened.
//!
//! A device is not reentrant. Exactly one exchange may be in flight, so
//! anything that shares a device across threads must hold it behind a
//! single lock for the whole exchange.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::codec::Decoder;

use crate::codec::{AtCommandCodec, Codec, FrameCodec, HeaderMode, Reply};
use crate::hex::to_hex;
use crate::logger::SharedLogger;
use crate::protocol::{Message, ProtocolError};
use crate::transport::{PortConfig, Transport};

/// Bytes requested from the transport per read
const READ_CHUNK: usize = 256;

/// Adapter replies scanned while waiting for one initialization answer
const MAX_INIT_REPLIES: usize = 10;

/// What the adapter reported about itself during initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Model or identification string
    pub name: String,
    /// Firmware version, when reported
    pub firmware: Option<String>,
}

/// One adapter: a transport plus the codec that frames its traffic
pub struct Device<T: Transport> {
    transport: T,
    codec: Codec,
    buffer: BytesMut,
    queue: VecDeque<Message>,
    logger: SharedLogger,
    adapter: Option<AdapterInfo>,
}

impl<T: Transport> Device<T> {
    /// Create a device; nothing is opened yet
    pub fn new(transport: T, codec: Codec, logger: SharedLogger) -> Self {
        Self {
            transport,
            codec,
            buffer: BytesMut::with_capacity(READ_CHUNK * 4),
            queue: VecDeque::new(),
            logger,
            adapter: None,
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutable
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Codec in use
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Logger in use
    pub fn logger(&self) -> &SharedLogger {
        &self.logger
    }

    /// Adapter identification, once initialized
    pub fn adapter(&self) -> Option<&AdapterInfo> {
        self.adapter.as_ref()
    }

    /// Open the transport and drop anything stale on it
    pub fn open(&mut self, config: &PortConfig) -> Result<(), ProtocolError> {
        self.transport.open(config)?;
        if let PortConfig::Serial { timeout_ms, .. } = *config {
            self.transport.set_timeout(Duration::from_millis(timeout_ms))?;
        }
        self.clear_message_queue()
    }

    /// Close the transport
    pub fn close(&mut self) {
        self.transport.close();
        self.buffer.clear();
        self.queue.clear();
        self.codec.reset();
        self.adapter = None;
    }

    /// Per-read timeout
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        self.transport.set_timeout(timeout)
    }

    /// Forget everything received but not yet consumed
    pub fn clear_message_queue(&mut self) -> Result<(), ProtocolError> {
        self.transport.discard_buffers()?;
        self.buffer.clear();
        self.queue.clear();
        self.codec.clear_pending();
        Ok(())
    }

    /// Read until the codec yields one reply
    fn read_reply(&mut self) -> Result<Reply, ProtocolError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(reply) = self.codec.decode(&mut self.buffer)? {
                return Ok(reply);
            }
            let count = self.transport.receive(&mut chunk)?;
            self.buffer.extend_from_slice(&chunk[..count]);
        }
    }

    /// Transmit a message
    ///
    /// Adapters that acknowledge writes have their acknowledgement read
    /// here. Setup lines ahead of the payload must be answered with `OK`.
    /// A bus message that arrives in place of the payload line's
    /// acknowledgement is queued for [`Device::receive_message`].
    pub fn send_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let writes = self.codec.encode(message)?;
        self.logger.debug(&format!("TX: {}", message));
        let last = writes.len().saturating_sub(1);
        for (index, write) in writes.iter().enumerate() {
            self.transport.send(write)?;
            if !self.codec.acknowledges_writes() {
                continue;
            }
            let reply = self.read_reply()?;
            if index < last {
                if reply != Reply::Ack {
                    // the header was never confirmed, so it must be set again
                    self.codec.reset();
                    return Err(ProtocolError::UnexpectedResponse(format!(
                        "setup line {:?} answered with {:?}",
                        String::from_utf8_lossy(write).trim_end(),
                        reply
                    )));
                }
                continue;
            }
            match reply {
                Reply::Ack | Reply::NoData | Reply::Adapter(_) => {}
                Reply::Message(reply) => {
                    self.queue.push_back(reply.with_timestamp(Utc::now()));
                }
                Reply::Text(text) => {
                    return Err(ProtocolError::UnexpectedResponse(text));
                }
            }
        }
        Ok(())
    }

    /// Next message from the bus
    ///
    /// Fails with [`ProtocolError::Timeout`] when the transport times out
    /// or the adapter reports that nothing arrived.
    pub fn receive_message(&mut self) -> Result<Message, ProtocolError> {
        if let Some(message) = self.queue.pop_front() {
            self.logger.debug(&format!("RX: {}", message));
            return Ok(message);
        }
        loop {
            match self.read_reply()? {
                Reply::Message(message) => {
                    self.logger.debug(&format!("RX: {}", message));
                    return Ok(message.with_timestamp(Utc::now()));
                }
                Reply::NoData => return Err(ProtocolError::Timeout),
                Reply::Ack => continue,
                Reply::Adapter(packet) => {
                    self.logger
                        .debug(&format!("adapter packet ignored: {}", to_hex(&packet)));
                }
                Reply::Text(text) => return Err(ProtocolError::UnexpectedResponse(text)),
            }
        }
    }

    /// Send a raw adapter command and read one reply
    pub fn send_command(&mut self, command: &[u8]) -> Result<Reply, ProtocolError> {
        self.transport.send(command)?;
        self.read_reply()
    }

    /// Bring the adapter into VPW mode, addressed as `tool`
    pub fn initialize(&mut self, tool: u8) -> Result<AdapterInfo, ProtocolError> {
        self.clear_message_queue()?;
        self.logger
            .debug(&format!("Initializing {} adapter", self.codec.name()));
        let header_mode = match &self.codec {
            Codec::Binary(_) => None,
            Codec::AtCommand(codec) => Some(codec.header_mode()),
        };
        let info = match header_mode {
            None => self.initialize_binary(tool)?,
            Some(header_mode) => self.initialize_at_command(tool, header_mode)?,
        };
        self.logger.user(&format!(
            "{} ready{}",
            info.name,
            info.firmware
                .as_deref()
                .map(|f| format!(", firmware {}", f))
                .unwrap_or_default()
        ));
        self.adapter = Some(info.clone());
        Ok(info)
    }

    fn find_adapter_reply(&mut self, prefix: &[u8]) -> Result<Bytes, ProtocolError> {
        for _ in 0..MAX_INIT_REPLIES {
            match self.read_reply()? {
                Reply::Adapter(packet) if packet.starts_with(prefix) => return Ok(packet),
                other => self.logger.debug(&format!("skipping {:?}", other)),
            }
        }
        Err(ProtocolError::UnexpectedResponse(format!(
            "no adapter reply starting with {}",
            to_hex(prefix)
        )))
    }

    fn initialize_binary(&mut self, tool: u8) -> Result<AdapterInfo, ProtocolError> {
        self.transport.send(&[0xF1, 0xA5])?;
        let reset = self.find_adapter_reply(&[])?;
        let model = match reset.first() {
            Some(0x27) => 852,
            Some(0x12) => 842,
            Some(0x07) => 838,
            _ => {
                return Err(ProtocolError::UnexpectedResponse(format!(
                    "unsupported AVT model reply {}",
                    to_hex(&reset)
                )))
            }
        };
        self.logger.debug(&format!("AVT {} reset OK", model));

        // the 838 only reports firmware when asked
        if model == 838 {
            self.transport.send(&[0xB0])?;
        }
        let firmware = self
            .find_adapter_reply(&[0x04])?
            .get(1)
            .map(|&v| format!("{}.{}", v >> 4, v & 0x0F));

        // the 838 starts up in VPW mode
        if model != 838 {
            self.transport.send(&[0xE1, 0x33])?;
            self.find_adapter_reply(&[0x07])?;
        }

        self.transport.send(&[0x52, 0x40, 0x00])?;
        self.find_adapter_reply(&[0x40, 0x00])?;
        self.transport.send(&[0x52, 0x5B, tool])?;
        self.find_adapter_reply(&[0x5B, tool])?;

        Ok(AdapterInfo {
            name: format!("AVT {}", model),
            firmware,
        })
    }

    fn expect_ack(&mut self, command: &str) -> Result<(), ProtocolError> {
        match self.send_command(&AtCommandCodec::command(command))? {
            Reply::Ack => Ok(()),
            other => Err(ProtocolError::UnexpectedResponse(format!(
                "{}: {:?}",
                command, other
            ))),
        }
    }

    fn expect_text(&mut self, command: &str) -> Result<String, ProtocolError> {
        match self.send_command(&AtCommandCodec::command(command))? {
            Reply::Text(text) => Ok(text),
            other => Err(ProtocolError::UnexpectedResponse(format!(
                "{}: {:?}",
                command, other
            ))),
        }
    }

    fn initialize_at_command(
        &mut self,
        tool: u8,
        header_mode: HeaderMode,
    ) -> Result<AdapterInfo, ProtocolError> {
        let name = match self.send_command(&AtCommandCodec::command("AT Z"))? {
            Reply::Text(text) => text.trim_start_matches("AT Z").trim().to_string(),
            _ => "AT adapter".to_string(),
        };

        for command in ["AT E0", "AT S0", "AT AL", "AT SP2", "AT H1"] {
            self.expect_ack(command)?;
        }
        self.expect_ack(&format!("AT SR {:02X}", tool))?;

        let protocol = self.expect_text("AT DP")?;
        if !protocol.contains("VPW") {
            return Err(ProtocolError::UnexpectedResponse(format!(
                "adapter protocol is {}",
                protocol
            )));
        }

        let firmware = match header_mode {
            HeaderMode::Stpx => {
                let id = self.expect_text("ST I")?;
                if id == "?" {
                    return Err(ProtocolError::AdapterRejected(
                        "adapter does not understand ST commands".into(),
                    ));
                }
                Some(id)
            }
            HeaderMode::SetHeader => None,
        };
        self.codec.reset();

        Ok(AdapterInfo { name, firmware })
    }
}

//! AT-command adapter framing
//!
//! ScanTool and ELM327-family adapters speak ASCII. A message goes out as
//! hex text on a command line and whatever the adapter prints comes back
//! terminated by the `>` prompt.
//!
//! Two ways of setting the bus header are supported:
//! - [`HeaderMode::Stpx`]: one `STPX H:<header>, R:1, D:<data>` line per
//!   message (ScanTool OBDLink family)
//! - [`HeaderMode::SetHeader`]: `AT SH <header>` whenever the header
//!   changes, then the data bytes on their own line

use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio_util::codec::Decoder;

use super::{FrameCodec, Reply, MAX_FRAME_SIZE};
use crate::hex::{from_hex, is_hex};
use crate::protocol::crc::vpw_crc;
use crate::protocol::{Message, ProtocolError};

/// Character the adapter prints when it is ready for the next command
pub const PROMPT: u8 = b'>';

/// How the bus header is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMode {
    /// Header and data in one `STPX` command
    #[default]
    Stpx,
    /// `AT SH` line followed by a data line
    SetHeader,
}

/// ASCII command codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommandCodec {
    header_mode: HeaderMode,
    current_header: Option<[u8; 3]>,
    verify_crc: bool,
    pending: VecDeque<Message>,
}

impl AtCommandCodec {
    /// Codec using the given header mode
    pub fn new(header_mode: HeaderMode) -> Self {
        Self {
            header_mode,
            current_header: None,
            verify_crc: true,
            pending: VecDeque::new(),
        }
    }

    /// Skip CRC verification of received messages
    pub fn without_crc_check(mut self) -> Self {
        self.verify_crc = false;
        self
    }

    /// Header mode in use
    pub fn header_mode(&self) -> HeaderMode {
        self.header_mode
    }

    /// A plain command line, e.g. `AT Z`
    pub fn command(text: &str) -> Bytes {
        Bytes::from(format!("{}\r\n", text))
    }

    /// Prompt-terminated text as a single line: carriage returns become
    /// spaces, anything outside printable ASCII is dropped
    fn clean_line(raw: &[u8]) -> String {
        let text: String = raw
            .iter()
            .filter_map(|&b| match b {
                b'\r' => Some(' '),
                32..=126 if b != PROMPT => Some(b as char),
                _ => None,
            })
            .collect();
        text.trim().to_string()
    }

    fn parse_line(&mut self, line: String) -> Result<Reply, ProtocolError> {
        if line.is_empty() || line.contains("NO DATA") {
            return Ok(Reply::NoData);
        }
        if line.starts_with("OK") || line.ends_with("OK") {
            return Ok(Reply::Ack);
        }

        // adapters append error markers like "<DATA ERROR" after the data
        let data = line.split('<').next().unwrap_or_default();
        let tokens: Vec<&str> = data.split_whitespace().collect();
        if tokens.is_empty() || !tokens.iter().all(|t| is_hex(t)) {
            return Ok(Reply::Text(line));
        }

        for token in tokens {
            let mut bytes = from_hex(token)
                .map_err(|e| ProtocolError::UnexpectedResponse(format!("{}: {}", token, e)))?;
            // the last byte is the bus CRC
            let Some(actual) = bytes.pop() else {
                continue;
            };
            if self.verify_crc {
                let expected = vpw_crc(&bytes);
                if actual != expected {
                    self.pending.clear();
                    return Err(ProtocolError::CrcMismatch { expected, actual });
                }
            }
            self.pending.push_back(Message::new(bytes));
        }
        match self.pending.pop_front() {
            Some(message) => Ok(Reply::Message(message)),
            None => Ok(Reply::NoData),
        }
    }
}

impl Default for AtCommandCodec {
    fn default() -> Self {
        Self::new(HeaderMode::default())
    }
}

impl Decoder for AtCommandCodec {
    type Item = Reply;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Reply>, ProtocolError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(Reply::Message(message)));
        }
        let Some(end) = src.iter().position(|&b| b == PROMPT) else {
            if src.len() > MAX_FRAME_SIZE * 3 {
                src.clear();
                return Err(ProtocolError::BufferOverflow);
            }
            return Ok(None);
        };
        let raw = src.split_to(end);
        src.advance(1);
        let line = Self::clean_line(&raw);
        tracing::trace!("adapter line: {:?}", line);
        self.parse_line(line).map(Some)
    }
}

impl FrameCodec for AtCommandCodec {
    fn name(&self) -> &'static str {
        "at-command"
    }

    fn encode(&mut self, message: &Message) -> Result<Vec<Bytes>, ProtocolError> {
        let Some(header) = message.header() else {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} byte message has no header",
                message.len()
            )));
        };
        let header_hex = hex::encode_upper(header);
        let data_hex = hex::encode_upper(message.body());

        match self.header_mode {
            HeaderMode::Stpx => Ok(vec![Bytes::from(format!(
                "STPX H:{}, R:1, D:{} \r",
                header_hex, data_hex
            ))]),
            HeaderMode::SetHeader => {
                let mut writes = Vec::with_capacity(2);
                let header: [u8; 3] = [header[0], header[1], header[2]];
                if self.current_header != Some(header) {
                    writes.push(Self::command(&format!("AT SH {}", header_hex)));
                    self.current_header = Some(header);
                }
                writes.push(Self::command(&data_hex));
                Ok(writes)
            }
        }
    }

    fn acknowledges_writes(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.current_header = None;
        self.pending.clear();
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

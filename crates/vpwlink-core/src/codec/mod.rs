//! Frame codecs
//!
//! A codec turns a [`Message`] into the byte writes a particular adapter
//! expects, and turns the adapter's output back into [`Reply`] values.
//!
//! Decoding goes through [`tokio_util::codec::Decoder`] over a `BytesMut`
//! accumulation buffer, so a codec never sees anything but "bytes so far"
//! and only yields a reply once its own termination condition is met: the
//! declared length plus CRC for the binary adapter, the prompt character for
//! the AT-command adapter. Partial transport reads simply leave the buffer
//! incomplete until the next read.

pub mod at_command;
pub mod binary;

pub use at_command::{AtCommandCodec, HeaderMode};
pub use binary::BinaryCodec;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::Decoder;

use crate::protocol::{Message, ProtocolError, ResponseStatus};

/// Largest frame either codec accepts
pub const MAX_FRAME_SIZE: usize = 4096 + 16;

/// One decoded unit of adapter output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A bus message, CRC already verified and stripped
    Message(Message),
    /// Command acknowledged (`OK`)
    Ack,
    /// The adapter had nothing to report (`NO DATA` or an empty line)
    NoData,
    /// Binary adapter status packet (reset, version, filter confirmations)
    Adapter(Bytes),
    /// Any other text line from an AT-command adapter
    Text(String),
}

/// Which adapter family is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterKind {
    /// Length-prefixed binary framing (AVT 838/842/852)
    #[default]
    Binary,
    /// ASCII command adapter (ScanTool, ELM327 family)
    AtCommand {
        /// How the bus header is set for each message
        #[serde(default)]
        header_mode: HeaderMode,
    },
}

/// Shared capability of every adapter codec
pub trait FrameCodec: Decoder<Item = Reply, Error = ProtocolError> + Send {
    /// Short adapter family name for logs
    fn name(&self) -> &'static str;

    /// Byte buffers to write, in order, to transmit `message`
    fn encode(&mut self, message: &Message) -> Result<Vec<Bytes>, ProtocolError>;

    /// True when the adapter answers every write with a reply that must be
    /// read before continuing
    fn acknowledges_writes(&self) -> bool;

    /// Forget any cached adapter state
    fn reset(&mut self) {}

    /// Drop decoded replies not handed out yet
    fn clear_pending(&mut self) {}

    /// Decode one complete buffer into a message.
    ///
    /// Adapter chatter ahead of the message is skipped. A buffer that ends
    /// before a message is complete is [`ResponseStatus::Truncated`].
    fn decode_frame(&mut self, raw: &[u8]) -> Result<Message, ResponseStatus> {
        let mut buffer = BytesMut::from(raw);
        loop {
            match self.decode(&mut buffer) {
                Ok(Some(Reply::Message(message))) => return Ok(message),
                Ok(Some(_)) => continue,
                Ok(None) => return Err(ResponseStatus::Truncated),
                Err(e) => return Err(e.status()),
            }
        }
    }
}

/// The closed set of adapter codecs
#[derive(Debug, Clone)]
pub enum Codec {
    /// Binary length-prefixed framing
    Binary(BinaryCodec),
    /// ASCII command framing
    AtCommand(AtCommandCodec),
}

impl Codec {
    /// Codec for an adapter family
    pub fn for_adapter(kind: AdapterKind) -> Self {
        match kind {
            AdapterKind::Binary => Codec::Binary(BinaryCodec::avt()),
            AdapterKind::AtCommand { header_mode } => {
                Codec::AtCommand(AtCommandCodec::new(header_mode))
            }
        }
    }
}

impl Decoder for Codec {
    type Item = Reply;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Reply>, ProtocolError> {
        match self {
            Codec::Binary(codec) => codec.decode(src),
            Codec::AtCommand(codec) => codec.decode(src),
        }
    }
}

impl FrameCodec for Codec {
    fn name(&self) -> &'static str {
        match self {
            Codec::Binary(codec) => codec.name(),
            Codec::AtCommand(codec) => codec.name(),
        }
    }

    fn encode(&mut self, message: &Message) -> Result<Vec<Bytes>, ProtocolError> {
        match self {
            Codec::Binary(codec) => codec.encode(message),
            Codec::AtCommand(codec) => codec.encode(message),
        }
    }

    fn acknowledges_writes(&self) -> bool {
        match self {
            Codec::Binary(codec) => codec.acknowledges_writes(),
            Codec::AtCommand(codec) => codec.acknowledges_writes(),
        }
    }

    fn reset(&mut self) {
        match self {
            Codec::Binary(codec) => codec.reset(),
            Codec::AtCommand(codec) => codec.reset(),
        }
    }

    fn clear_pending(&mut self) {
        match self {
            Codec::Binary(codec) => codec.clear_pending(),
            Codec::AtCommand(codec) => codec.clear_pending(),
        }
    }
}

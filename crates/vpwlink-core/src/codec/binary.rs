//! Binary adapter framing
//!
//! Frame format (AVT 838/842/852):
//! - Length header: `n` for lengths up to 15, `0x11 n` up to 255,
//!   `0x12 hi lo` beyond
//! - Status byte (receive only, counted in the length, `0x00` when good)
//! - Message bytes
//! - CRC-8 over the message bytes
//!
//! A `0x2` high nibble marks a message the adapter generated itself in
//! answer to a bus command: no status byte and no CRC, passed up as a
//! [`Reply::Message`]. Headers with any other high nibble (besides
//! `0x0`/`0xF` and the `0x11`/`0x12` escapes) carry adapter status packets
//! rather than bus traffic. Those are passed up as [`Reply::Adapter`].

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use super::{FrameCodec, Reply, MAX_FRAME_SIZE};
use crate::hex::to_hex;
use crate::protocol::crc::{checksum, CrcConvention};
use crate::protocol::{Message, ProtocolError};

const LENGTH_8: u8 = 0x11;
const LENGTH_16: u8 = 0x12;

/// Packet families identified by the header's high nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketKind {
    Bus,
    Generated,
    Adapter,
    Rejected,
}

/// Length-prefixed binary codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryCodec {
    /// Received bus frames carry a status byte after the length
    status_byte: bool,
    /// Convention of the CRC trailing received bus frames
    receive_crc: CrcConvention,
    /// Append a CRC to transmitted messages
    transmit_crc: Option<CrcConvention>,
}

impl BinaryCodec {
    /// Framing used by AVT adapters. The adapter generates the bus CRC
    /// itself, so none is transmitted.
    pub fn avt() -> Self {
        Self {
            status_byte: true,
            receive_crc: CrcConvention::Vpw,
            transmit_crc: None,
        }
    }

    /// Symmetric framing: what `encode` writes, `decode` reads back
    pub fn loopback() -> Self {
        Self {
            status_byte: false,
            receive_crc: CrcConvention::Vpw,
            transmit_crc: Some(CrcConvention::Vpw),
        }
    }

    /// Use a different CRC convention in both directions
    pub fn with_crc(mut self, convention: CrcConvention) -> Self {
        self.receive_crc = convention;
        if self.transmit_crc.is_some() {
            self.transmit_crc = Some(convention);
        }
        self
    }

    /// Length header for a frame of `length` bytes
    fn length_header(length: usize) -> Result<Vec<u8>, ProtocolError> {
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::BufferOverflow);
        }
        Ok(if length > 0xFF {
            vec![LENGTH_16, (length >> 8) as u8, length as u8]
        } else if length > 0x0F {
            vec![LENGTH_8, length as u8]
        } else {
            vec![length as u8]
        })
    }

    /// Parse the length header at the front of `src`.
    ///
    /// Returns header size, declared length and packet family, or `None`
    /// when the header itself is not complete yet.
    fn parse_header(&self, src: &[u8]) -> Option<(usize, usize, PacketKind)> {
        let first = *src.first()?;
        match first {
            LENGTH_8 => Some((2, *src.get(1)? as usize, PacketKind::Bus)),
            LENGTH_16 => {
                let hi = *src.get(1)? as usize;
                let lo = *src.get(2)? as usize;
                Some((3, (hi << 8) | lo, PacketKind::Bus))
            }
            _ => {
                let low = (first & 0x0F) as usize;
                Some(match first >> 4 {
                    0x0 | 0xF => (1, low, PacketKind::Bus),
                    0x2 => (1, low, PacketKind::Generated),
                    0x3 => (1, low, PacketKind::Rejected),
                    // high speed notifications count the header byte
                    0x8 => (1, low.saturating_sub(1), PacketKind::Adapter),
                    _ => (1, low, PacketKind::Adapter),
                })
            }
        }
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::avt()
    }
}

impl Decoder for BinaryCodec {
    type Item = Reply;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Reply>, ProtocolError> {
        let Some((header_len, declared, kind)) = self.parse_header(src) else {
            return Ok(None);
        };
        if declared > MAX_FRAME_SIZE {
            src.clear();
            return Err(ProtocolError::BufferOverflow);
        }

        match kind {
            PacketKind::Adapter | PacketKind::Rejected => {
                if src.len() < header_len + declared {
                    return Ok(None);
                }
                src.advance(header_len);
                let packet = src.split_to(declared).freeze();
                if kind == PacketKind::Rejected {
                    return Err(ProtocolError::AdapterRejected(to_hex(&packet)));
                }
                Ok(Some(Reply::Adapter(packet)))
            }
            PacketKind::Generated => {
                if declared == 0 {
                    src.advance(header_len);
                    return Err(ProtocolError::UnexpectedResponse(
                        "empty adapter generated message".into(),
                    ));
                }
                if src.len() < header_len + declared {
                    return Ok(None);
                }
                src.advance(header_len);
                let message = src.split_to(declared).freeze();
                Ok(Some(Reply::Message(Message::new(message))))
            }
            PacketKind::Bus => {
                let status_len = usize::from(self.status_byte);
                if declared <= status_len {
                    src.advance(header_len.min(src.len()));
                    return Err(ProtocolError::UnexpectedResponse(format!(
                        "{} byte frame",
                        declared
                    )));
                }
                let total = header_len + declared + 1;
                if src.len() < total {
                    return Ok(None);
                }
                src.advance(header_len);
                if self.status_byte {
                    let status = src.get_u8();
                    if status != 0 {
                        tracing::warn!("binary adapter reported frame status {:#04x}", status);
                    }
                }
                let message = src.split_to(declared - status_len).freeze();
                let actual = src.get_u8();
                let expected = checksum(&message, self.receive_crc);
                if actual != expected {
                    return Err(ProtocolError::CrcMismatch { expected, actual });
                }
                Ok(Some(Reply::Message(Message::new(message))))
            }
        }
    }
}

impl FrameCodec for BinaryCodec {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn encode(&mut self, message: &Message) -> Result<Vec<Bytes>, ProtocolError> {
        if message.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty message".into()));
        }
        let header = Self::length_header(message.len())?;
        let body = match self.transmit_crc {
            Some(convention) => {
                let mut framed = Vec::with_capacity(message.len() + 1);
                framed.extend_from_slice(message.as_bytes());
                framed.push(checksum(message.as_bytes(), convention));
                Bytes::from(framed)
            }
            None => message.to_bytes(),
        };
        Ok(vec![Bytes::from(header), body])
    }

    fn acknowledges_writes(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseStatus;
    use pretty_assertions::assert_eq;

    const VIN1: [u8; 11] = [0x6C, 0xF0, 0x10, 0x7C, 0x01, 0x00, 0x31, 0x47, 0x31, 0x59, 0x59];

    #[test]
    fn test_encode_short() {
        let mut codec = BinaryCodec::avt();
        let message = Message::new(vec![0x6C, 0x10, 0xF0, 0x3C, 0x01]);
        let writes = codec.encode(&message).unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].as_ref(), &[0x05]);
        assert_eq!(writes[1].as_ref(), message.as_bytes());
    }

    #[test]
    fn test_length_headers() {
        assert_eq!(BinaryCodec::length_header(0x0F).unwrap(), vec![0x0F]);
        assert_eq!(BinaryCodec::length_header(0x10).unwrap(), vec![0x11, 0x10]);
        assert_eq!(BinaryCodec::length_header(0xFF).unwrap(), vec![0x11, 0xFF]);
        assert_eq!(BinaryCodec::length_header(0x100).unwrap(), vec![0x12, 0x01, 0x00]);
        assert!(matches!(
            BinaryCodec::length_header(MAX_FRAME_SIZE + 1),
            Err(ProtocolError::BufferOverflow)
        ));
    }

    #[test]
    fn test_loopback_appends_crc() {
        let mut codec = BinaryCodec::loopback();
        let writes = codec.encode(&Message::new(vec![0x6C, 0x10, 0xF0, 0x3C, 0x01])).unwrap();
        assert_eq!(writes[1].as_ref(), &[0x6C, 0x10, 0xF0, 0x3C, 0x01, 0x8A]);
    }

    #[test]
    fn test_decode_fixture() {
        let mut codec = BinaryCodec::avt();
        let mut raw = vec![0x11, 0x0C, 0x00];
        raw.extend_from_slice(&VIN1);
        raw.push(0xC3);
        let message = codec.decode_frame(&raw).unwrap();
        assert_eq!(message.as_bytes(), &VIN1);
    }

    #[test]
    fn test_decode_partial_reads() {
        let mut codec = BinaryCodec::avt();
        let mut raw = vec![0x11, 0x0C, 0x00];
        raw.extend_from_slice(&VIN1);
        raw.push(0xC3);

        let mut buffer = BytesMut::new();
        for chunk in raw.chunks(4) {
            assert_eq!(codec.decode(&mut buffer).unwrap(), None);
            buffer.extend_from_slice(chunk);
        }
        let reply = codec.decode(&mut buffer).unwrap();
        assert_eq!(reply, Some(Reply::Message(Message::new(VIN1.to_vec()))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_truncated() {
        let mut codec = BinaryCodec::avt();
        let raw = [0x11, 0x0C, 0x00, 0x6C, 0xF0];
        assert_eq!(codec.decode_frame(&raw), Err(ResponseStatus::Truncated));
        assert_eq!(codec.decode_frame(&[0x11]), Err(ResponseStatus::Truncated));
    }

    #[test]
    fn test_decode_bad_crc() {
        let mut codec = BinaryCodec::avt();
        let mut raw = vec![0x11, 0x0C, 0x00];
        raw.extend_from_slice(&VIN1);
        raw.push(0x3C);
        assert_eq!(codec.decode_frame(&raw), Err(ResponseStatus::UnexpectedResponse));

        let mut buffer = BytesMut::from(&raw[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(ProtocolError::CrcMismatch { expected: 0xC3, actual: 0x3C })
        ));
    }

    #[test]
    fn test_raw_crc_convention() {
        let mut codec = BinaryCodec::avt().with_crc(CrcConvention::Raw);
        let mut raw = vec![0x0C, 0x00];
        raw.extend_from_slice(&VIN1);
        raw.push(0x3C);
        assert_eq!(codec.decode_frame(&raw).unwrap().as_bytes(), &VIN1);
    }

    #[test]
    fn test_adapter_packets() {
        let mut codec = BinaryCodec::avt();
        let mut buffer = BytesMut::from(&[0x91, 0x27, 0x92, 0x04, 0x15, 0x62, 0x5B, 0xF0][..]);
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(Reply::Adapter(Bytes::from_static(&[0x27])))
        );
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(Reply::Adapter(Bytes::from_static(&[0x04, 0x15])))
        );
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(Reply::Adapter(Bytes::from_static(&[0x5B, 0xF0])))
        );
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_rejected_command() {
        let mut codec = BinaryCodec::avt();
        let mut buffer = BytesMut::from(&[0x31, 0xE1][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(ProtocolError::AdapterRejected(text)) if text == "E1"
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_generated_message_has_no_status_or_crc() {
        let mut codec = BinaryCodec::avt();
        let mut buffer = BytesMut::from(&[0x23, 0x83, 0x00, 0x20, 0x91][..]);
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(Reply::Message(Message::new(vec![0x83, 0x00, 0x20])))
        );
        assert_eq!(&buffer[..], &[0x91]);

        let mut partial = BytesMut::from(&[0x23, 0x83][..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        assert_eq!(partial.len(), 2);
    }

    #[test]
    fn test_adapter_chatter_before_message() {
        let mut codec = BinaryCodec::avt();
        let mut raw = vec![0x91, 0x07, 0x11, 0x0C, 0x00];
        raw.extend_from_slice(&VIN1);
        raw.push(0xC3);
        assert_eq!(codec.decode_frame(&raw).unwrap().as_bytes(), &VIN1);
    }

    #[test]
    fn test_zero_length_frame() {
        let mut codec = BinaryCodec::avt();
        let mut buffer = BytesMut::from(&[0x01, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(ProtocolError::UnexpectedResponse(_))
        ));
    }
}

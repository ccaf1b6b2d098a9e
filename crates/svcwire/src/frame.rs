//! # Protocol Frames
//!
//! Defines the envelope that crosses the transport: a kind byte, the header,
//! and a length-prefixed opaque payload.
//!
//! ## Wire Format
//! - Kind: u8 (`0x01` request, `0x02` response)
//! - Header: 32 bytes (see [`crate::header`])
//! - Length: u32 little-endian
//! - Payload: `length` bytes
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Exactness**: A frame must consume the whole buffer; trailing bytes are rejected.

use crate::error::Error;
use crate::error::Result;
use crate::header::Cursor;
use crate::header::Header;
use crate::header::HEADER_SIZE;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Bytes preceding the payload: kind, header, length.
pub const FRAME_OVERHEAD: usize = 1 + HEADER_SIZE + 4;

/// Direction of a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
}

impl FrameKind {
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Request => 0x01,
            Self::Response => 0x02,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::Request),
            0x02 => Ok(Self::Response),
            other => Err(Error::UnknownFrameKind(other)),
        }
    }
}

/// Encodes an outbound frame without copying the payload into an owned frame first.
pub struct FrameEncoder<'a> {
    pub kind: FrameKind,
    pub header: &'a Header,
    pub payload: &'a [u8],
}

impl<'a> FrameEncoder<'a> {
    pub fn new(kind: FrameKind, header: &'a Header, payload: &'a [u8]) -> Self {
        Self { kind, header, payload }
    }

    /// Encode this frame into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(self.payload.len()));
        }

        let mut out = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        out.push(self.kind.as_byte());
        self.header.encode(&mut out);
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(self.payload);
        Ok(out)
    }
}

/// A decoded frame borrowing its payload from the input buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub kind: FrameKind,
    pub header: Header,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Decode a frame that spans exactly `bytes`.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let kind = FrameKind::from_byte(cursor.u8()?)?;
        let header = Header::read(&mut cursor)?;

        let len = cursor.u32()? as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(len));
        }
        let payload = cursor.read_bytes(len)?;

        match cursor.remaining() {
            0 => Ok(Frame { kind, header, payload }),
            extra => Err(Error::TrailingBytes(extra)),
        }
    }
}

/// Decodes just the header from a raw frame.
/// This is useful for routing when the payload is not needed.
pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    let mut cursor = Cursor::new(bytes);
    FrameKind::from_byte(cursor.u8()?)?;
    Header::read(&mut cursor)
}

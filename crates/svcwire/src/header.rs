//! # Request Header
//!
//! The fixed-size envelope carried by every request and every response.
//!
//! ## Wire Format
//! All fields little-endian, 32 bytes total:
//!
//! | offset | field         | type |
//! |--------|---------------|------|
//! | 0      | `request_id`  | u64  |
//! | 8      | `tag`         | u32  |
//! | 12     | `source`      | u64  |
//! | 20     | `destination` | u64  |
//! | 28     | `status`      | i32  |

use crate::error::Error;
use crate::error::Result;
use crate::status::ErrorKind;

/// Size of an encoded [`Header`] in bytes.
pub const HEADER_SIZE: usize = 32;

/// Strong type for cluster-wide service identities.
///
/// Stable across restarts and unrelated to the network address.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{:#x}", self.0)
    }
}

/// Strong type for request identifiers.
///
/// One id names a logical RPC end to end, including every sub-request
/// of a multi-peer request.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Message-type tag. The layer never interprets it.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageTag(pub u32);

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tag-{}", self.0)
    }
}

/// Routing and status envelope for one message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub request_id: RequestId,
    pub tag: MessageTag,
    pub source: PeerId,
    pub destination: PeerId,
    /// `0` is success, anything else maps to an [`ErrorKind`].
    pub status: i32,
}

impl Header {
    pub fn new(request_id: RequestId, tag: MessageTag, source: PeerId, destination: PeerId) -> Self {
        Self { request_id, tag, source, destination, status: 0 }
    }

    /// Builds the response header for this request: endpoints swapped, status set.
    pub fn reply(&self, kind: ErrorKind) -> Self {
        Self {
            request_id: self.request_id,
            tag: self.tag,
            source: self.destination,
            destination: self.source,
            status: kind.code(),
        }
    }

    /// The status field interpreted as an error kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(self.status)
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// Appends the 32-byte encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.reserve(HEADER_SIZE);
        out.extend_from_slice(&self.request_id.0.to_le_bytes());
        out.extend_from_slice(&self.tag.0.to_le_bytes());
        out.extend_from_slice(&self.source.0.to_le_bytes());
        out.extend_from_slice(&self.destination.0.to_le_bytes());
        out.extend_from_slice(&self.status.to_le_bytes());
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        self.encode(&mut out);
        let mut bytes = [0u8; HEADER_SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }

    /// Decodes a header from the front of `bytes`. Extra bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        Self::read(&mut cursor)
    }

    pub(crate) fn read(cursor: &mut Cursor<'_>) -> Result<Self> {
        cursor.need(HEADER_SIZE)?;
        Ok(Self {
            request_id: RequestId(cursor.u64()?),
            tag: MessageTag(cursor.u32()?),
            source: PeerId(cursor.u64()?),
            destination: PeerId(cursor.u64()?),
            status: cursor.i32()?,
        })
    }
}

/// Tracks the read position within a borrowed buffer.
pub(crate) struct Cursor<'a> {
    slice: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(slice: &'a [u8]) -> Self {
        Self { slice, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.slice.len().saturating_sub(self.pos)
    }

    #[inline]
    pub(crate) fn need(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            Err(Error::Truncated { needed: n, available: self.remaining() })
        } else {
            Ok(())
        }
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.need(len)?;
        let slice = &self.slice[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

//! # Error Definitions
//!
//! Failures that can occur while encoding or decoding frames.

/// Codec failures for headers and frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The buffer ended before a complete value could be read.
    Truncated { needed: usize, available: usize },
    /// The frame kind byte is not one we know about.
    UnknownFrameKind(u8),
    /// The payload exceeds `MAX_PAYLOAD_SIZE`.
    PayloadTooLarge(usize),
    /// Bytes remained after a complete frame was decoded.
    TrailingBytes(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "truncated buffer: needed {} bytes, {} available", needed, available)
            }
            Self::UnknownFrameKind(kind) => write!(f, "unknown frame kind: {:#04x}", kind),
            Self::PayloadTooLarge(len) => write!(f, "payload of {} bytes exceeds frame limit", len),
            Self::TrailingBytes(len) => write!(f, "{} trailing bytes after frame", len),
        }
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

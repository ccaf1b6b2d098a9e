//! # Transport Abstraction
//!
//! A minimal, async interface for moving frames between services.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about request state or policies.
//!   It moves encoded frames.
//! - **One-Way**: Sending hands a frame to the network and returns. Responses come
//!   back as separate frames through [`crate::Mesh::receive`], never as return values.
//! - **Lazy**: Connections are created by a [`Connector`] on first use and dropped on
//!   the first failure.

use std::fmt;
use std::sync::Arc;

use crate::descriptor::PeerDescriptor;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// No connection could be established.
    ConnectionRefused(String),
    /// The frame could not be encoded.
    Encode(String),
    /// No peer is registered under the destination id.
    NoRoute(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::ConnectionRefused(msg) => write!(f, "Connection refused: {}", msg),
            Self::Encode(msg) => write!(f, "Encode error: {}", msg),
            Self::NoRoute(msg) => write!(f, "No route: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<svcwire::Error> for Error {
    fn from(e: svcwire::Error) -> Self {
        Self::Encode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A live client connection to one peer.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hands an encoded frame to the network.
    ///
    /// # invariants
    /// - Must return `Ok(())` once the frame is queued or written.
    /// - Must return `Err` if the connection is unusable.
    /// - Should not interpret the frame content.
    async fn send(&self, frame: &[u8]) -> Result<()>;
}

/// Creates client connections for peers.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a connection to the peer described by `descriptor`.
    async fn connect(&self, descriptor: &PeerDescriptor) -> Result<Arc<dyn Transport>>;
}

/// Connector for processes that never dial out. Every connection attempt fails.
pub struct NoConnector;

#[async_trait::async_trait]
impl Connector for NoConnector {
    async fn connect(&self, descriptor: &PeerDescriptor) -> Result<Arc<dyn Transport>> {
        Err(Error::ConnectionRefused(format!("no connector configured for {}", descriptor.id)))
    }
}

//! # Fault Injection
//!
//! A seam in the send path of every [`crate::peer::PeerHandle`]. Production
//! meshes use [`NoFaults`]; tests plug in their own injector to fail chosen
//! peers deterministically.

use svcwire::Header;

use crate::descriptor::PeerDescriptor;
use crate::transport;

/// Consulted before every send.
pub trait FaultInjector: Send + Sync + 'static {
    /// Returns an error to fail this send as if the transport had, or `None` to proceed.
    fn before_send(&self, peer: &PeerDescriptor, header: &Header) -> Option<transport::Error>;
}

/// Injects nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn before_send(&self, _peer: &PeerDescriptor, _header: &Header) -> Option<transport::Error> {
        None
    }
}

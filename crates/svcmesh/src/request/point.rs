//! Point-to-point: exactly one peer.

use svcwire::Header;
use svcwire::PeerId;
use tracing::trace;

use crate::request::Outcome;
use crate::request::call::Dispatch;
use crate::request::call::PeerCall;

pub(crate) struct PointToPoint {
    pub(crate) call: PeerCall,
}

impl PointToPoint {
    pub(crate) fn new(peer: PeerId) -> Self {
        Self { call: PeerCall::new(peer) }
    }

    /// Always attempts the send, even to a peer marked failed; the handle reconnects.
    pub(crate) fn invoke(&mut self, d: &Dispatch<'_>) -> Option<Outcome> {
        self.call.dispatch(d);
        None
    }

    pub(crate) fn handle_response(&mut self, d: &Dispatch<'_>, header: Header, payload: Vec<u8>) -> Option<Outcome> {
        if header.source != self.call.peer {
            trace!(request = %d.id, source = %header.source, "response from unexpected peer");
            return None;
        }

        let kind = d.classify(&header, &payload);
        self.call.complete(kind);
        Some(Outcome { kind, header, payload })
    }
}

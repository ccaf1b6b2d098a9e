//! Failover: candidates tried one at a time, in order, until one succeeds.

use svcwire::ErrorKind;
use svcwire::Header;
use svcwire::PeerId;
use tracing::debug;
use tracing::trace;

use crate::request::Outcome;
use crate::request::call::Dispatch;
use crate::request::call::PeerCall;

pub(crate) struct Failover {
    pub(crate) calls: Vec<PeerCall>,
    /// Next candidate to consider. Never decreases.
    next: usize,
    /// Candidate currently waiting on a response.
    active: Option<usize>,
    /// Most recent failure, reported if every candidate fails.
    last_error: Option<(Header, Vec<u8>)>,
}

impl Failover {
    pub(crate) fn new(peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self {
            calls: PeerCall::distinct(peers),
            next: 0,
            active: None,
            last_error: None,
        }
    }

    pub(crate) fn invoke(&mut self, d: &Dispatch<'_>) -> Option<Outcome> {
        if self.calls.is_empty() {
            return Some(d.synthetic(ErrorKind::RequestInvocationFailed));
        }
        self.advance(d)
    }

    /// Sends to the next candidate not known to be failed, or gives up.
    fn advance(&mut self, d: &Dispatch<'_>) -> Option<Outcome> {
        self.active = None;

        while self.next < self.calls.len() {
            let index = self.next;
            self.next += 1;
            let peer = self.calls[index].peer;

            if d.ctx.peers.is_failed(peer) {
                debug!(request = %d.id, %peer, "skipping failed candidate");
                let header = d.header_for(peer).reply(ErrorKind::RequestInvocationFailed);
                self.last_error = Some((header, Vec::new()));
                // The last candidate is settled together with the whole request.
                if self.next < self.calls.len() {
                    self.calls[index].complete(ErrorKind::RequestInvocationFailed);
                }
                continue;
            }

            self.active = Some(index);
            self.calls[index].dispatch(d);
            return None;
        }

        Some(self.exhausted(d))
    }

    fn exhausted(&mut self, d: &Dispatch<'_>) -> Outcome {
        let (header, payload) = match self.last_error.take() {
            Some(last) => last,
            None => (d.header_for(d.source).reply(ErrorKind::RequestInvocationFailed), Vec::new()),
        };
        if let Some(last) = self.calls.last_mut() {
            last.complete(header.kind());
        }
        debug!(request = %d.id, cause = %header.kind(), "all candidates failed");
        Outcome { kind: ErrorKind::RequestFailed, header, payload }
    }

    pub(crate) fn handle_response(&mut self, d: &Dispatch<'_>, header: Header, payload: Vec<u8>) -> Option<Outcome> {
        let Some(index) = self.active else {
            trace!(request = %d.id, source = %header.source, "no active candidate");
            return None;
        };
        if header.source != self.calls[index].peer {
            trace!(request = %d.id, source = %header.source, "stale response from earlier candidate");
            return None;
        }

        let kind = d.classify(&header, &payload);
        self.calls[index].complete(kind);
        if kind.is_ok() {
            return Some(Outcome { kind, header, payload });
        }

        debug!(request = %d.id, peer = %header.source, %kind, "candidate failed, failing over");
        self.last_error = Some((header, payload));
        self.advance(d)
    }
}

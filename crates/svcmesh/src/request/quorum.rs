//! Quorum: every candidate at once, done when enough of them agree.

use svcwire::ErrorKind;
use svcwire::Header;
use svcwire::PeerId;
use tracing::debug;
use tracing::trace;

use crate::request::Outcome;
use crate::request::call::Dispatch;
use crate::request::call::PeerCall;

pub(crate) struct Quorum {
    pub(crate) calls: Vec<PeerCall>,
    quorum: usize,
    successes: usize,
    errors: usize,
}

impl Quorum {
    /// `quorum` defaults to every distinct candidate and is clamped to `1..=candidates`.
    pub(crate) fn new(peers: impl IntoIterator<Item = PeerId>, quorum: Option<usize>) -> Self {
        let calls = PeerCall::distinct(peers);
        let quorum = quorum.unwrap_or(calls.len()).clamp(1, calls.len().max(1));
        Self {
            calls,
            quorum,
            successes: 0,
            errors: 0,
        }
    }

    /// Acks that may fail before the quorum becomes unreachable.
    fn tolerated_errors(&self) -> usize {
        self.calls.len() - self.quorum
    }

    pub(crate) fn invoke(&mut self, d: &Dispatch<'_>) -> Option<Outcome> {
        if self.calls.is_empty() {
            return Some(d.synthetic(ErrorKind::RequestInvocationFailed));
        }
        for call in &mut self.calls {
            call.dispatch(d);
        }
        None
    }

    pub(crate) fn handle_response(&mut self, d: &Dispatch<'_>, header: Header, payload: Vec<u8>) -> Option<Outcome> {
        let kind = d.classify(&header, &payload);
        let Some(call) = self.calls.iter_mut().find(|c| c.peer == header.source && !c.is_complete()) else {
            trace!(request = %d.id, source = %header.source, "response from unknown or settled candidate");
            return None;
        };
        call.complete(kind);

        if kind.is_ok() {
            self.successes += 1;
            if self.successes == self.quorum {
                return Some(Outcome { kind, header, payload });
            }
            return None;
        }

        self.errors += 1;
        if self.errors > self.tolerated_errors() {
            debug!(request = %d.id, errors = self.errors, quorum = self.quorum, "quorum unreachable");
            return Some(Outcome { kind: ErrorKind::RequestFailed, header, payload });
        }
        None
    }
}

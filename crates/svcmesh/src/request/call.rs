//! Sub-requests: one peer's share of a request.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use svcwire::ErrorKind;
use svcwire::Header;
use svcwire::MessageTag;
use svcwire::PeerId;
use svcwire::RequestId;
use tokio::task::JoinHandle;

use crate::lanes::LaneContext;
use crate::request::CallRecord;
use crate::request::Classifier;
use crate::request::Outcome;
use crate::request::RequestState;
use crate::timer::TimerHandle;

/// Borrowed view of the parent request handed to policy hooks.
pub(crate) struct Dispatch<'a> {
    pub(crate) ctx: &'a LaneContext,
    pub(crate) id: RequestId,
    pub(crate) tag: MessageTag,
    pub(crate) source: PeerId,
    pub(crate) payload: &'a Arc<[u8]>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) classifier: Option<&'a Classifier>,
}

impl Dispatch<'_> {
    /// Outbound header for the sub-request sent to `peer`.
    pub(crate) fn header_for(&self, peer: PeerId) -> Header {
        Header::new(self.id, self.tag, self.source, peer)
    }

    /// A response we make up ourselves when there is nobody to ask.
    pub(crate) fn synthetic(&self, kind: ErrorKind) -> Outcome {
        Outcome {
            kind,
            header: self.header_for(self.source).reply(kind),
            payload: Vec::new(),
        }
    }

    /// Error kind of a response after the caller's classifier had its say.
    pub(crate) fn classify(&self, header: &Header, payload: &[u8]) -> ErrorKind {
        let kind = header.kind();
        if kind.is_local() {
            return kind;
        }
        match self.classifier {
            Some(classify) => classify(header, payload),
            None => kind,
        }
    }
}

/// The part of a request addressed to a single peer.
pub(crate) struct PeerCall {
    pub(crate) peer: PeerId,
    pub(crate) state: RequestState,
    pub(crate) outcome: Option<ErrorKind>,
    timer: Option<TimerHandle>,
    send: Option<JoinHandle<()>>,
}

impl PeerCall {
    pub(crate) fn new(peer: PeerId) -> Self {
        Self {
            peer,
            state: RequestState::PriorInvocation,
            outcome: None,
            timer: None,
            send: None,
        }
    }

    /// One call per distinct peer, first occurrence wins.
    pub(crate) fn distinct(peers: impl IntoIterator<Item = PeerId>) -> Vec<Self> {
        let mut seen = HashSet::new();
        peers.into_iter().filter(|peer| seen.insert(*peer)).map(Self::new).collect()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state == RequestState::Complete
    }

    /// Arms the timeout and starts the send on its own task.
    ///
    /// The lane never waits on the network. A send failure comes back as a
    /// synthetic `RequestInvocationFailed` response for this peer; a send that
    /// never finishes is ended by the timer.
    pub(crate) fn dispatch(&mut self, d: &Dispatch<'_>) {
        self.state = RequestState::InvocationProgress;
        let header = d.header_for(self.peer);

        if let Some(timeout) = d.timeout {
            let requests = d.ctx.requests.clone();
            self.timer = Some(d.ctx.timer.schedule(timeout, move || {
                requests.post_error(&header, ErrorKind::RequestTimeout);
            }));
        }

        let peers = d.ctx.peers.clone();
        let payload = d.payload.clone();
        self.send = Some(tokio::spawn(async move {
            let _ = peers.route(&header, &payload).await;
        }));
    }

    /// Marks the call complete with `kind`. Returns false if it already was.
    pub(crate) fn complete(&mut self, kind: ErrorKind) -> bool {
        if self.is_complete() {
            return false;
        }
        self.state = RequestState::Complete;
        self.outcome = Some(kind);
        self.cancel_timer();
        // A send still in flight is abandoned; the frame is no longer wanted.
        if let Some(send) = self.send.take() {
            send.abort();
        }
        true
    }

    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    pub(crate) fn record(&self) -> CallRecord {
        CallRecord {
            peer: self.peer,
            state: self.state,
            outcome: self.outcome,
        }
    }
}

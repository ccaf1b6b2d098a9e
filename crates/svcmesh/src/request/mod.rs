//! # Service Requests
//!
//! One outstanding RPC and the state machine that drives it to exactly one
//! completion.
//!
//! ## Lifecycle
//!
//! ```text
//! PriorInvocation --start--> InvocationProgress --complete--> Complete
//! ```
//!
//! A request is configured by the caller, handed to its lane by
//! [`ServiceRequest::invoke`], and from then on only touched by that lane.
//! Every outcome (a peer's response, a send failure, a fired timer, exhausted
//! alternatives) arrives as a response on the same lane, so completion can never
//! race with itself.
//!
//! ## Policies
//!
//! The dispatch policy is a closed set ([`point::PointToPoint`],
//! [`failover::Failover`], [`quorum::Quorum`]), each contributing an invoke hook
//! and a response hook. Multi-peer policies own one [`call::PeerCall`] per
//! candidate; all of them share the parent's request id.

pub(crate) mod call;
pub(crate) mod failover;
pub(crate) mod point;
pub(crate) mod quorum;

use std::sync::Arc;
use std::time::Duration;

use svcwire::ErrorKind;
use svcwire::Header;
use svcwire::MessageTag;
use svcwire::PeerId;
use svcwire::RequestId;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use crate::lanes::LaneContext;
use crate::registry::RequestRegistry;
use crate::request::call::Dispatch;
use crate::request::call::PeerCall;
use crate::request::failover::Failover;
use crate::request::point::PointToPoint;
use crate::request::quorum::Quorum;

/// Completion callback. Runs exactly once, on the request's lane.
pub type ResponseCallback = Box<dyn FnOnce(Response) + Send + 'static>;

/// Reclassifies a peer's response, e.g. by reading a domain error out of the payload.
///
/// Only consulted for statuses reported by peers, never for the layer's own
/// kinds. A peer replying with a reserved code (`-1003..=-1001`) is treated
/// as if the layer had produced that kind.
pub type Classifier = Arc<dyn Fn(&Header, &[u8]) -> ErrorKind + Send + Sync + 'static>;

/// Position of a request (or sub-request) in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    PriorInvocation,
    InvocationProgress,
    Complete,
}

/// Outcome of one sub-request, as seen when the parent completed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    pub peer: PeerId,
    pub state: RequestState,
    /// Set once the sub-request completed.
    pub outcome: Option<ErrorKind>,
}

/// What the caller receives, once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Terminal error kind of the whole request.
    pub kind: ErrorKind,
    /// Header of the response that decided the outcome. For aggregate failures,
    /// the last error seen.
    pub header: Header,
    pub payload: Vec<u8>,
    /// Per-peer sub-request outcomes, in candidate order.
    pub calls: Vec<CallRecord>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.kind.is_ok()
    }

    /// The status carried by the deciding header.
    pub fn cause(&self) -> ErrorKind {
        self.header.kind()
    }

    /// Record for `peer`'s sub-request, if it was a candidate.
    pub fn call(&self, peer: PeerId) -> Option<&CallRecord> {
        self.calls.iter().find(|c| c.peer == peer)
    }
}

/// An outcome decided by a policy hook; `calls` is filled in at completion.
pub(crate) struct Outcome {
    pub(crate) kind: ErrorKind,
    pub(crate) header: Header,
    pub(crate) payload: Vec<u8>,
}

pub(crate) enum Policy {
    PointToPoint(PointToPoint),
    Failover(Failover),
    Quorum(Quorum),
}

impl Policy {
    fn name(&self) -> &'static str {
        match self {
            Self::PointToPoint(_) => "point-to-point",
            Self::Failover(_) => "failover",
            Self::Quorum(_) => "quorum",
        }
    }

    fn calls_mut(&mut self) -> &mut [PeerCall] {
        match self {
            Self::PointToPoint(p) => std::slice::from_mut(&mut p.call),
            Self::Failover(f) => &mut f.calls,
            Self::Quorum(q) => &mut q.calls,
        }
    }
}

/// One logical RPC to one or more peers.
///
/// Built through [`RequestRegistry`] (or [`crate::Mesh`]), configured with the
/// `set_*`/`on_response` methods, then consumed by [`invoke`](Self::invoke) or
/// [`call`](Self::call).
pub struct ServiceRequest {
    id: RequestId,
    source: PeerId,
    tag: MessageTag,
    payload: Arc<[u8]>,
    timeout: Option<Duration>,
    state: RequestState,
    callback: Option<ResponseCallback>,
    classifier: Option<Classifier>,
    policy: Policy,
    registry: Arc<RequestRegistry>,
}

impl ServiceRequest {
    pub(crate) fn new(registry: Arc<RequestRegistry>, policy: Policy) -> Self {
        Self {
            id: registry.next_id(),
            source: registry.local_id(),
            tag: MessageTag(0),
            payload: Arc::from(Vec::new()),
            timeout: registry.default_timeout(),
            state: RequestState::PriorInvocation,
            callback: None,
            classifier: None,
            policy,
            registry,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == RequestState::Complete
    }

    /// Target peers in candidate order. Repeated candidates appear once.
    pub fn targets(&self) -> Vec<PeerId> {
        match &self.policy {
            Policy::PointToPoint(p) => vec![p.call.peer],
            Policy::Failover(f) => f.calls.iter().map(|c| c.peer).collect(),
            Policy::Quorum(q) => q.calls.iter().map(|c| c.peer).collect(),
        }
    }

    pub fn set_payload(mut self, tag: MessageTag, payload: impl Into<Vec<u8>>) -> Self {
        self.tag = tag;
        self.payload = Arc::from(payload.into());
        self
    }

    /// Arms a timer per sub-request as its send starts. Zero disables it.
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn on_response(mut self, callback: impl FnOnce(Response) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn classify_with(mut self, classifier: impl Fn(&Header, &[u8]) -> ErrorKind + Send + Sync + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Hands the request to its lane and returns immediately.
    pub fn invoke(self) {
        let registry = self.registry.clone();
        registry.submit(self);
    }

    /// Invokes and waits for the single response. Replaces any callback set with
    /// [`on_response`](Self::on_response).
    pub async fn call(mut self) -> Response {
        let (tx, rx) = oneshot::channel();
        let id = self.id;
        let source = self.source;
        let tag = self.tag;
        self.callback = Some(Box::new(move |response| {
            let _ = tx.send(response);
        }));
        self.invoke();

        // The callback runs exactly once unless its lane is torn down mid-flight.
        match rx.await {
            Ok(response) => response,
            Err(_) => Response {
                kind: ErrorKind::RequestInvocationFailed,
                header: Header::new(id, tag, source, source).reply(ErrorKind::RequestInvocationFailed),
                payload: Vec::new(),
                calls: Vec::new(),
            },
        }
    }

    /// `PriorInvocation -> InvocationProgress`, then the policy's invoke hook.
    pub(crate) fn start(&mut self, ctx: &LaneContext) {
        if self.state != RequestState::PriorInvocation {
            return;
        }
        self.state = RequestState::InvocationProgress;
        debug!(request = %self.id, policy = self.policy.name(), tag = %self.tag, "invoking");

        let dispatch = Dispatch {
            ctx,
            id: self.id,
            tag: self.tag,
            source: self.source,
            payload: &self.payload,
            timeout: self.timeout,
            classifier: self.classifier.as_ref(),
        };
        let outcome = match &mut self.policy {
            Policy::PointToPoint(p) => p.invoke(&dispatch),
            Policy::Failover(f) => f.invoke(&dispatch),
            Policy::Quorum(q) => q.invoke(&dispatch),
        };

        if let Some(outcome) = outcome {
            self.complete(outcome);
        }
    }

    /// Feeds one response (genuine or synthetic) to the policy's response hook.
    pub(crate) fn handle_response(&mut self, ctx: &LaneContext, header: Header, payload: Vec<u8>) {
        if self.state == RequestState::Complete {
            trace!(request = %self.id, source = %header.source, "response after completion");
            return;
        }

        let dispatch = Dispatch {
            ctx,
            id: self.id,
            tag: self.tag,
            source: self.source,
            payload: &self.payload,
            timeout: self.timeout,
            classifier: self.classifier.as_ref(),
        };
        let outcome = match &mut self.policy {
            Policy::PointToPoint(p) => p.handle_response(&dispatch, header, payload),
            Policy::Failover(f) => f.handle_response(&dispatch, header, payload),
            Policy::Quorum(q) => q.handle_response(&dispatch, header, payload),
        };

        if let Some(outcome) = outcome {
            self.complete(outcome);
        }
    }

    /// Terminal transition: cancels timers and runs the callback exactly once.
    pub(crate) fn complete(&mut self, outcome: Outcome) {
        if self.state == RequestState::Complete {
            return;
        }
        self.state = RequestState::Complete;

        let calls = self
            .policy
            .calls_mut()
            .iter_mut()
            .map(|call| {
                call.cancel_timer();
                call.record()
            })
            .collect();

        debug!(request = %self.id, kind = %outcome.kind, cause = %outcome.header.kind(), "complete");
        if let Some(callback) = self.callback.take() {
            callback(Response {
                kind: outcome.kind,
                header: outcome.header,
                payload: outcome.payload,
                calls,
            });
        }
    }

    /// Completes the request without a peer verdict, e.g. when its lane stops.
    pub(crate) fn abandon(&mut self) {
        let header = Header::new(self.id, self.tag, self.source, self.source).reply(ErrorKind::RequestInvocationFailed);
        self.complete(Outcome {
            kind: ErrorKind::RequestInvocationFailed,
            header,
            payload: Vec::new(),
        });
    }
}

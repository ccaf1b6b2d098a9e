//! # Request Registry
//!
//! Allocates request ids, builds headers, constructs requests, and is the
//! single entry point for responses: genuine ones from the transport
//! ([`deliver`](RequestRegistry::deliver)) and synthetic ones from send
//! failures, missing peers and timers ([`post_error`](RequestRegistry::post_error)).
//! Both land on the lane owning the request id, so every failure source takes
//! the same path as a real network response.
//!
//! One registry exists per [`crate::Mesh`]; components that need it receive an
//! `Arc` at construction.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use svcwire::ErrorKind;
use svcwire::Header;
use svcwire::MessageTag;
use svcwire::PeerId;
use svcwire::RequestId;
use tracing::debug;
use tracing::warn;

use crate::lanes::LaneTask;
use crate::lanes::Lanes;
use crate::request::Policy;
use crate::request::ServiceRequest;
use crate::request::failover::Failover;
use crate::request::point::PointToPoint;
use crate::request::quorum::Quorum;

pub struct RequestRegistry {
    local: PeerId,
    next_id: AtomicU64,
    default_timeout: Option<Duration>,
    lanes: Lanes,
}

impl RequestRegistry {
    pub(crate) fn new(local: PeerId, default_timeout: Option<Duration>, lanes: Lanes) -> Self {
        Self {
            local,
            next_id: AtomicU64::new(1),
            default_timeout,
            lanes,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Allocates the next request id. Ids start at 1 and only grow.
    pub fn next_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Outbound header from this process to `destination`.
    pub fn header(&self, id: RequestId, tag: MessageTag, destination: PeerId) -> Header {
        Header::new(id, tag, self.local, destination)
    }

    pub fn point_to_point(self: &Arc<Self>, peer: PeerId) -> ServiceRequest {
        ServiceRequest::new(self.clone(), Policy::PointToPoint(PointToPoint::new(peer)))
    }

    pub fn failover(self: &Arc<Self>, peers: impl IntoIterator<Item = PeerId>) -> ServiceRequest {
        ServiceRequest::new(self.clone(), Policy::Failover(Failover::new(peers)))
    }

    /// Quorum over `peers`; `quorum` of `None` means every peer.
    pub fn quorum(self: &Arc<Self>, peers: impl IntoIterator<Item = PeerId>, quorum: Option<usize>) -> ServiceRequest {
        ServiceRequest::new(self.clone(), Policy::Quorum(Quorum::new(peers, quorum)))
    }

    /// Queues a configured request on its lane. If the lanes are gone the request
    /// fails on the spot, so its callback still runs.
    pub(crate) fn submit(&self, request: ServiceRequest) {
        let id = request.id();
        if let Err(task) = self.lanes.submit(id, LaneTask::Invoke(request)) {
            warn!(request = %id, "lanes stopped, failing request");
            if let LaneTask::Invoke(mut request) = task {
                request.abandon();
            }
        }
    }

    /// Feeds a response for an outstanding request.
    pub fn deliver(&self, header: Header, payload: Vec<u8>) {
        let id = header.request_id;
        if self.lanes.submit(id, LaneTask::Response { header, payload }).is_err() {
            debug!(request = %id, "lanes stopped, dropping response");
        }
    }

    /// Injects a synthetic error response for the request sent with `request_header`.
    ///
    /// The response appears to come from the request's destination, so policies
    /// attribute it to the right sub-request.
    pub fn post_error(&self, request_header: &Header, kind: ErrorKind) {
        debug!(
            request = %request_header.request_id,
            peer = %request_header.destination,
            %kind,
            "posting synthetic response"
        );
        self.deliver(request_header.reply(kind), Vec::new());
    }

    /// Requests invoked and not yet complete.
    pub fn outstanding(&self) -> usize {
        self.lanes.in_flight()
    }

    /// Resolves once every lane has processed the work queued before the call.
    pub async fn settle(&self) {
        self.lanes.settle().await;
    }

    pub(crate) fn shutdown(&self) {
        self.lanes.shutdown();
    }
}

//! # Peer Registry
//!
//! The per-process service mesh: one [`PeerHandle`] per peer ever seen, this
//! process included.
//!
//! ## Invariants
//!
//! - Handles are created on first sighting and never removed; a departed peer
//!   is only ever marked failed or stopped.
//! - The map lock covers lookups and insertions only. Descriptor updates and
//!   sends happen on the handle, after the map lock is released.
//! - Routing never reports failure by panicking or by returning into the
//!   request: an unreachable destination becomes a synthetic
//!   `RequestInvocationFailed` response on the request's lane.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use futures::future::join_all;
use svcwire::ErrorKind;
use svcwire::FrameKind;
use svcwire::Header;
use svcwire::PeerId;
use tracing::debug;
use tracing::warn;

use crate::descriptor::IncarnationPolicy;
use crate::descriptor::PeerDescriptor;
use crate::descriptor::UpdateDecision;
use crate::fault::FaultInjector;
use crate::handler::RequestHandler;
use crate::peer::DownNotifier;
use crate::peer::PeerHandle;
use crate::registry::RequestRegistry;
use crate::transport;
use crate::transport::Connector;

/// Collaborators every handle is created with.
pub(crate) struct Seams {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) faults: Arc<dyn FaultInjector>,
    pub(crate) notifier: Arc<dyn DownNotifier>,
    pub(crate) handler: Arc<dyn RequestHandler>,
}

pub struct PeerRegistry {
    local: Arc<PeerHandle>,
    policy: IncarnationPolicy,
    peers: Mutex<BTreeMap<PeerId, Arc<PeerHandle>>>,
    seams: Seams,
    requests: Arc<RequestRegistry>,
}

impl PeerRegistry {
    pub(crate) fn new(
        local: PeerDescriptor,
        policy: IncarnationPolicy,
        seams: Seams,
        requests: Arc<RequestRegistry>,
    ) -> Self {
        let local = Arc::new(PeerHandle::new(
            local,
            seams.connector.clone(),
            seams.faults.clone(),
            seams.notifier.clone(),
        ));
        let peers = BTreeMap::from([(local.id(), local.clone())]);
        Self {
            local,
            policy,
            peers: Mutex::new(peers),
            seams,
            requests,
        }
    }

    fn lock_peers(&self) -> MutexGuard<'_, BTreeMap<PeerId, Arc<PeerHandle>>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn new_handle(&self, descriptor: PeerDescriptor) -> Arc<PeerHandle> {
        Arc::new(PeerHandle::new(
            descriptor,
            self.seams.connector.clone(),
            self.seams.faults.clone(),
            self.seams.notifier.clone(),
        ))
    }

    /// Applies a batch of descriptors. Returns how many were accepted.
    pub fn update_membership(&self, descriptors: impl IntoIterator<Item = PeerDescriptor>) -> usize {
        let mut accepted = 0;
        for incoming in descriptors {
            let id = incoming.id;
            let existing = {
                let mut peers = self.lock_peers();
                match peers.get(&id) {
                    Some(handle) => Some((handle.clone(), incoming)),
                    None => {
                        debug!(peer = %id, role = ?incoming.role, endpoint = %incoming.endpoint(), "new peer");
                        let handle = self.new_handle(incoming);
                        peers.insert(id, handle);
                        None
                    }
                }
            };

            let Some((handle, incoming)) = existing else {
                accepted += 1;
                continue;
            };

            let incarnation = incoming.incarnation;
            let status = incoming.status;
            match handle.apply(incoming, self.policy) {
                UpdateDecision::Reject => {
                    let current = handle.descriptor();
                    warn!(
                        peer = %id,
                        incarnation,
                        current = current.incarnation,
                        ?status,
                        "rejecting stale membership update"
                    );
                }
                decision => {
                    debug!(peer = %id, incarnation, ?status, ?decision, "membership updated");
                    accepted += 1;
                }
            }
        }
        accepted
    }

    pub fn self_id(&self) -> PeerId {
        self.local.id()
    }

    pub fn self_descriptor(&self) -> PeerDescriptor {
        self.local.descriptor()
    }

    pub fn handle(&self, id: PeerId) -> Option<Arc<PeerHandle>> {
        self.lock_peers().get(&id).cloned()
    }

    pub fn descriptor(&self, id: PeerId) -> Option<PeerDescriptor> {
        self.handle(id).map(|handle| handle.descriptor())
    }

    /// Every known descriptor, ordered by id.
    pub fn descriptors(&self) -> Vec<PeerDescriptor> {
        self.snapshot().iter().map(|handle| handle.descriptor()).collect()
    }

    /// False for unknown peers.
    pub fn is_healthy(&self, id: PeerId) -> bool {
        self.handle(id).is_some_and(|handle| handle.is_healthy())
    }

    /// Known and not healthy. Unknown peers are not failed, just unroutable.
    pub fn is_failed(&self, id: PeerId) -> bool {
        self.handle(id).is_some_and(|handle| !handle.is_healthy())
    }

    fn snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.lock_peers().values().cloned().collect()
    }

    /// Sends a request frame to `header.destination`.
    ///
    /// Requests addressed to this process are served by the local handler and
    /// never touch the network. On failure a synthetic `RequestInvocationFailed`
    /// has already been posted for `header` when this returns `Err`.
    pub async fn route(self: &Arc<Self>, header: &Header, payload: &[u8]) -> transport::Result<()> {
        if header.destination == self.self_id() {
            self.serve(*header, payload.to_vec());
            return Ok(());
        }

        let result = match self.handle(header.destination) {
            Some(handle) => handle.send(FrameKind::Request, header, payload).await,
            None => Err(transport::Error::NoRoute(header.destination.to_string())),
        };

        if let Err(e) = &result {
            warn!(request = %header.request_id, peer = %header.destination, error = %e, "send failed");
            self.requests.post_error(header, ErrorKind::RequestInvocationFailed);
        }
        result
    }

    /// Sends a response back to its requester, or delivers it locally when the
    /// requester is this process.
    pub async fn reply(&self, header: &Header, payload: &[u8]) {
        if header.destination == self.self_id() {
            self.requests.deliver(*header, payload.to_vec());
            return;
        }

        let Some(handle) = self.handle(header.destination) else {
            warn!(request = %header.request_id, peer = %header.destination, "no route for response");
            return;
        };
        if let Err(e) = handle.send(FrameKind::Response, header, payload).await {
            warn!(request = %header.request_id, peer = %header.destination, error = %e, "response lost");
        }
    }

    /// Runs the local handler for an inbound request and sends back its reply.
    pub(crate) fn serve(self: &Arc<Self>, header: Header, payload: Vec<u8>) {
        let peers = self.clone();
        tokio::spawn(async move {
            let reply = peers.seams.handler.handle(&header, payload).await;
            peers.reply(&header.reply(reply.status), &reply.payload).await;
        });
    }

    /// Sends a request frame to every other peer whose descriptor satisfies
    /// `predicate`. Each copy is addressed to its recipient.
    ///
    /// Returns how many peers the frame was handed to.
    pub async fn broadcast<P>(&self, header: &Header, payload: &[u8], predicate: P) -> usize
    where
        P: Fn(&PeerDescriptor) -> bool,
    {
        let targets: Vec<Arc<PeerHandle>> = self
            .snapshot()
            .into_iter()
            .filter(|handle| handle.id() != self.self_id() && predicate(&handle.descriptor()))
            .collect();

        let sends = targets.iter().map(|handle| async move {
            let header = Header {
                destination: handle.id(),
                ..*header
            };
            match handle.send(FrameKind::Request, &header, payload).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(peer = %handle.id(), error = %e, "broadcast send failed");
                    false
                }
            }
        });
        let delivered = join_all(sends).await.into_iter().filter(|sent| *sent).count();
        debug!(candidates = targets.len(), delivered, "broadcast");
        delivered
    }
}

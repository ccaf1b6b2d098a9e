//! # Mesh
//!
//! One process's view of the cluster: the peer registry, the request registry
//! and the lanes that run requests, wired together.
//!
//! ## Lifecycle
//!
//! `MeshBuilder::build` spawns the lane workers. They run until
//! [`Mesh::shutdown`] or until the last `Mesh` clone is dropped; either way,
//! requests still in flight complete with `RequestInvocationFailed`.
//!
//! ## Inbound traffic
//!
//! The transport hands every received frame to [`Mesh::receive`]. Requests go
//! to the local [`crate::RequestHandler`], whose reply is sent back to the
//! requester; responses go to the lane of the request they answer.

use std::sync::Arc;
use std::sync::Mutex;

use svcwire::Frame;
use svcwire::FrameKind;
use svcwire::MessageTag;
use svcwire::PeerId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;

use crate::builder::MeshBuilder;
use crate::config::MeshConfig;
use crate::descriptor::PeerDescriptor;
use crate::lanes::LaneContext;
use crate::lanes::Lanes;
use crate::lanes::spawn_workers;
use crate::mesh::PeerRegistry;
use crate::mesh::Seams;
use crate::registry::RequestRegistry;
use crate::request::ServiceRequest;
use crate::timer::Timer;

/// Cheap to clone; all clones share one process mesh.
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

struct MeshInner {
    peers: Arc<PeerRegistry>,
    requests: Arc<RequestRegistry>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for MeshInner {
    fn drop(&mut self) {
        self.requests.shutdown();
    }
}

impl Mesh {
    pub fn builder(local: PeerDescriptor) -> MeshBuilder {
        MeshBuilder::new(local)
    }

    pub(crate) fn start(local: PeerDescriptor, config: MeshConfig, seams: Seams) -> Self {
        let id = local.id;
        let (lanes, receivers) = Lanes::new(config.lanes);
        let requests = Arc::new(RequestRegistry::new(id, config.default_timeout, lanes.clone()));
        let peers = Arc::new(PeerRegistry::new(local, config.incarnation_policy, seams, requests.clone()));

        let ctx = Arc::new(LaneContext {
            peers: peers.clone(),
            requests: requests.clone(),
            timer: Timer::new(),
        });
        let workers = spawn_workers(receivers, ctx, &lanes);
        debug!(peer = %id, lanes = lanes.count(), "mesh started");

        Self {
            inner: Arc::new(MeshInner {
                peers,
                requests,
                workers: Mutex::new(workers),
            }),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.inner.requests.local_id()
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.inner.peers
    }

    pub fn requests(&self) -> &Arc<RequestRegistry> {
        &self.inner.requests
    }

    pub fn point_to_point(&self, peer: PeerId) -> ServiceRequest {
        self.inner.requests.point_to_point(peer)
    }

    pub fn failover(&self, peers: impl IntoIterator<Item = PeerId>) -> ServiceRequest {
        self.inner.requests.failover(peers)
    }

    /// Quorum request that needs every peer to succeed.
    pub fn quorum(&self, peers: impl IntoIterator<Item = PeerId>) -> ServiceRequest {
        self.inner.requests.quorum(peers, None)
    }

    pub fn quorum_of(&self, peers: impl IntoIterator<Item = PeerId>, quorum: usize) -> ServiceRequest {
        self.inner.requests.quorum(peers, Some(quorum))
    }

    pub fn update_membership(&self, descriptors: impl IntoIterator<Item = PeerDescriptor>) -> usize {
        self.inner.peers.update_membership(descriptors)
    }

    /// Applies every batch pushed on `updates` until the sender goes away.
    pub fn follow_membership(&self, mut updates: mpsc::Receiver<Vec<PeerDescriptor>>) -> JoinHandle<()> {
        let peers = self.inner.peers.clone();
        tokio::spawn(async move {
            while let Some(batch) = updates.recv().await {
                let offered = batch.len();
                let accepted = peers.update_membership(batch);
                debug!(offered, accepted, "membership push");
            }
            debug!("membership feed closed");
        })
    }

    /// Sends one fire-and-forget request to every other peer matching
    /// `predicate`. Returns how many peers it was handed to.
    pub async fn broadcast<P>(&self, tag: MessageTag, payload: &[u8], predicate: P) -> usize
    where
        P: Fn(&PeerDescriptor) -> bool,
    {
        let requests = &self.inner.requests;
        let header = requests.header(requests.next_id(), tag, self.local_id());
        self.inner.peers.broadcast(&header, payload, predicate).await
    }

    /// Entry point for frames read off the network.
    pub fn receive(&self, bytes: &[u8]) -> svcwire::Result<()> {
        let frame = Frame::decode(bytes)?;
        trace!(kind = ?frame.kind, request = %frame.header.request_id, source = %frame.header.source, "frame received");
        match frame.kind {
            FrameKind::Request => self.inner.peers.serve(frame.header, frame.payload.to_vec()),
            FrameKind::Response => self.inner.requests.deliver(frame.header, frame.payload.to_vec()),
        }
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        self.inner.requests.outstanding()
    }

    pub async fn settle(&self) {
        self.inner.requests.settle().await;
    }

    /// Stops the lanes and waits for them. In-flight requests fail with
    /// `RequestInvocationFailed`; requests invoked afterwards fail immediately.
    pub async fn shutdown(&self) {
        self.inner.requests.shutdown();
        let workers = std::mem::take(&mut *self.inner.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for worker in workers {
            let _ = worker.await;
        }
        debug!(peer = %self.local_id(), "mesh stopped");
    }
}

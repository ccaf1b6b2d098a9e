//! In-process transports and scripted collaborators for testing.
//!
//! Only built for tests and behind the `test-util` feature.
//!
//! - [`RecordingConnector`] swallows every frame and remembers it per peer.
//!   Connections to a stalled peer never complete.
//! - [`LoopbackNetwork`] connects several [`Mesh`]es in one process.
//! - [`ScriptedFaults`] fails sends to chosen peers.
//! - [`RecordingNotifier`] remembers peer-down reports.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use dashmap::DashMap;
use dashmap::DashSet;
use svcwire::Header;
use svcwire::PeerId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::descriptor::PeerDescriptor;
use crate::fault::FaultInjector;
use crate::node::Mesh;
use crate::peer::DownNotifier;
use crate::transport;
use crate::transport::Connector;
use crate::transport::Transport;

/// Connector whose transports record frames instead of sending them.
#[derive(Default)]
pub struct RecordingConnector {
    frames: Arc<DashMap<PeerId, Vec<Vec<u8>>>>,
    broken: Arc<DashSet<PeerId>>,
    refused: DashSet<PeerId>,
    stalled: DashSet<PeerId>,
    connects: DashMap<PeerId, usize>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame sent to `peer`, oldest first.
    pub fn frames(&self, peer: PeerId) -> Vec<Vec<u8>> {
        self.frames.get(&peer).map(|f| f.value().clone()).unwrap_or_default()
    }

    /// Headers of every frame sent to `peer`.
    pub fn headers(&self, peer: PeerId) -> Vec<Header> {
        self.frames(peer)
            .iter()
            .filter_map(|bytes| svcwire::decode_header(bytes).ok())
            .collect()
    }

    /// How many connections were opened to `peer`.
    pub fn connects(&self, peer: PeerId) -> usize {
        self.connects.get(&peer).map_or(0, |n| *n)
    }

    /// Future connection attempts to `peer` fail.
    pub fn refuse(&self, peer: PeerId) {
        self.refused.insert(peer);
    }

    /// Sends on existing and future connections to `peer` fail.
    pub fn break_link(&self, peer: PeerId) {
        self.broken.insert(peer);
    }

    /// Future connection attempts to `peer` hang forever.
    pub fn stall(&self, peer: PeerId) {
        self.stalled.insert(peer);
    }

    pub fn restore(&self, peer: PeerId) {
        self.refused.remove(&peer);
        self.stalled.remove(&peer);
        self.broken.remove(&peer);
    }
}

struct RecordingTransport {
    peer: PeerId,
    frames: Arc<DashMap<PeerId, Vec<Vec<u8>>>>,
    broken: Arc<DashSet<PeerId>>,
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, frame: &[u8]) -> transport::Result<()> {
        if self.broken.contains(&self.peer) {
            return Err(transport::Error::ConnectionLost(format!("link to {} is broken", self.peer)));
        }
        self.frames.entry(self.peer).or_default().push(frame.to_vec());
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self, descriptor: &PeerDescriptor) -> transport::Result<Arc<dyn Transport>> {
        if self.refused.contains(&descriptor.id) {
            return Err(transport::Error::ConnectionRefused(descriptor.endpoint()));
        }
        if self.stalled.contains(&descriptor.id) {
            std::future::pending::<()>().await;
        }
        *self.connects.entry(descriptor.id).or_default() += 1;
        Ok(Arc::new(RecordingTransport {
            peer: descriptor.id,
            frames: self.frames.clone(),
            broken: self.broken.clone(),
        }))
    }
}

type Routes = DashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>;

/// An in-process network. Every attached mesh can reach every other one.
///
/// Meshes dial through [`LoopbackNetwork::connector`], which only holds a weak
/// reference, so dropping the network stops every pump.
#[derive(Default)]
pub struct LoopbackNetwork {
    routes: Arc<Routes>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(LoopbackConnector {
            routes: Arc::downgrade(&self.routes),
        })
    }

    /// Starts feeding frames addressed to `mesh` into [`Mesh::receive`].
    pub fn attach(&self, mesh: &Mesh) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.routes.insert(mesh.local_id(), tx);
        let mesh = mesh.clone();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(e) = mesh.receive(&bytes) {
                    warn!(peer = %mesh.local_id(), error = %e, "dropping malformed frame");
                }
            }
        })
    }

    /// Takes `peer` off the network. Its pump stops and sends to it fail.
    pub fn detach(&self, peer: PeerId) {
        self.routes.remove(&peer);
    }
}

struct LoopbackConnector {
    routes: Weak<Routes>,
}

#[async_trait::async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, descriptor: &PeerDescriptor) -> transport::Result<Arc<dyn Transport>> {
        let attached = self.routes.upgrade().is_some_and(|routes| routes.contains_key(&descriptor.id));
        if !attached {
            return Err(transport::Error::ConnectionRefused(descriptor.endpoint()));
        }
        Ok(Arc::new(LoopbackTransport {
            peer: descriptor.id,
            routes: self.routes.clone(),
        }))
    }
}

struct LoopbackTransport {
    peer: PeerId,
    routes: Weak<Routes>,
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, frame: &[u8]) -> transport::Result<()> {
        let lost = || transport::Error::ConnectionLost(format!("{} is not attached", self.peer));
        let routes = self.routes.upgrade().ok_or_else(lost)?;
        let route = routes.get(&self.peer).ok_or_else(lost)?;
        route.send(frame.to_vec()).map_err(|_| lost())
    }
}

/// Fails sends to chosen peers, either always or a fixed number of times.
#[derive(Default)]
pub struct ScriptedFaults {
    always: DashSet<PeerId>,
    remaining: DashMap<PeerId, usize>,
}

impl ScriptedFaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, peer: PeerId) {
        self.always.insert(peer);
    }

    /// Fails the next `times` sends to `peer`.
    pub fn fail_times(&self, peer: PeerId, times: usize) {
        self.remaining.insert(peer, times);
    }

    pub fn heal(&self, peer: PeerId) {
        self.always.remove(&peer);
        self.remaining.remove(&peer);
    }
}

impl FaultInjector for ScriptedFaults {
    fn before_send(&self, peer: &PeerDescriptor, header: &Header) -> Option<transport::Error> {
        let injected = || Some(transport::Error::Io(format!("injected fault for {} to {}", header.request_id, peer.id)));
        if self.always.contains(&peer.id) {
            return injected();
        }
        let mut left = self.remaining.get_mut(&peer.id)?;
        if *left == 0 {
            return None;
        }
        *left -= 1;
        injected()
    }
}

/// Remembers every peer reported down.
#[derive(Default)]
pub struct RecordingNotifier {
    reported: Mutex<Vec<PeerDescriptor>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reported(&self) -> Vec<PeerId> {
        self.reported
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|d| d.id)
            .collect()
    }
}

impl DownNotifier for RecordingNotifier {
    fn notify_peer_down(&self, descriptor: &PeerDescriptor) {
        self.reported.lock().unwrap_or_else(|p| p.into_inner()).push(descriptor.clone());
    }
}

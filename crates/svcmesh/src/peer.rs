//! # Peer Handles
//!
//! A `PeerHandle` wraps the latest accepted descriptor of one peer together
//! with a lazily created client connection to it.
//!
//! ## Locking
//!
//! - `state` (descriptor, cached client, generation) is a short-lived sync lock,
//!   never held across an await.
//! - `send_lock` serializes connect + send on this handle only, so sends to
//!   different peers never contend.
//!
//! ## Failure
//!
//! Any transport error marks the peer `Failed`, drops the cached client so the
//! next send reconnects, and tells the orchestration manager. A failure observed
//! on a connection that was already replaced by a membership update is ignored.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use svcwire::FrameEncoder;
use svcwire::FrameKind;
use svcwire::Header;
use svcwire::PeerId;
use tracing::debug;
use tracing::warn;

use crate::descriptor::should_update;
use crate::descriptor::IncarnationPolicy;
use crate::descriptor::PeerDescriptor;
use crate::descriptor::PeerRole;
use crate::descriptor::PeerStatus;
use crate::descriptor::UpdateDecision;
use crate::fault::FaultInjector;
use crate::transport;
use crate::transport::Connector;
use crate::transport::Transport;

/// Receives peer-down reports. Implemented by the orchestration manager client.
pub trait DownNotifier: Send + Sync + 'static {
    /// Best-effort; must not block.
    fn notify_peer_down(&self, descriptor: &PeerDescriptor);
}

/// Drops every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl DownNotifier for NoopNotifier {
    fn notify_peer_down(&self, _descriptor: &PeerDescriptor) {}
}

struct PeerState {
    descriptor: PeerDescriptor,
    client: Option<Arc<dyn Transport>>,
    /// Bumped on every accepted descriptor update.
    generation: u64,
}

/// Mutable view of one peer, owned by the [`crate::mesh::PeerRegistry`].
pub struct PeerHandle {
    id: PeerId,
    state: Mutex<PeerState>,
    send_lock: tokio::sync::Mutex<()>,
    connector: Arc<dyn Connector>,
    faults: Arc<dyn FaultInjector>,
    notifier: Arc<dyn DownNotifier>,
}

impl PeerHandle {
    pub fn new(
        descriptor: PeerDescriptor,
        connector: Arc<dyn Connector>,
        faults: Arc<dyn FaultInjector>,
        notifier: Arc<dyn DownNotifier>,
    ) -> Self {
        Self {
            id: descriptor.id,
            state: Mutex::new(PeerState { descriptor, client: None, generation: 0 }),
            send_lock: tokio::sync::Mutex::new(()),
            connector,
            faults,
            notifier,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Snapshot of the current descriptor.
    pub fn descriptor(&self) -> PeerDescriptor {
        self.lock_state().descriptor.clone()
    }

    pub fn status(&self) -> PeerStatus {
        self.lock_state().descriptor.status
    }

    pub fn is_healthy(&self) -> bool {
        self.status().is_healthy()
    }

    /// Whether a client connection is currently cached.
    pub fn is_connected(&self) -> bool {
        self.lock_state().client.is_some()
    }

    /// Applies a membership update if it wins conflict resolution.
    ///
    /// An accepted update drops the cached client; the address or the process
    /// behind it may have changed.
    pub fn apply(&self, incoming: PeerDescriptor, policy: IncarnationPolicy) -> UpdateDecision {
        let mut state = self.lock_state();
        let decision = should_update(&state.descriptor, &incoming, policy);
        if decision.accepted() {
            state.descriptor = incoming;
            state.client = None;
            state.generation += 1;
        }
        decision
    }

    /// Encodes and sends one frame, connecting first if needed.
    pub async fn send(&self, kind: FrameKind, header: &Header, payload: &[u8]) -> transport::Result<()> {
        let bytes = FrameEncoder::new(kind, header, payload).encode()?;

        let _guard = self.send_lock.lock().await;
        let (descriptor, cached, generation) = {
            let state = self.lock_state();
            (state.descriptor.clone(), state.client.clone(), state.generation)
        };

        if let Some(e) = self.faults.before_send(&descriptor, header) {
            self.mark_failed(generation, &e);
            return Err(e);
        }

        let client = match cached {
            Some(client) => client,
            None => {
                debug!(peer = %self.id, endpoint = %descriptor.endpoint(), "connecting");
                let client = match self.connector.connect(&descriptor).await {
                    Ok(client) => client,
                    Err(e) => {
                        self.mark_failed(generation, &e);
                        return Err(e);
                    }
                };
                let mut state = self.lock_state();
                if state.generation == generation {
                    state.client = Some(client.clone());
                }
                client
            }
        };

        if let Err(e) = client.send(&bytes).await {
            self.mark_failed(generation, &e);
            return Err(e);
        }
        Ok(())
    }

    /// Marks the peer failed and drops its client, unless the descriptor moved on
    /// since `generation` was read.
    fn mark_failed(&self, generation: u64, error: &transport::Error) {
        let descriptor = {
            let mut state = self.lock_state();
            if state.generation != generation {
                debug!(peer = %self.id, %error, "ignoring failure on a superseded connection");
                return;
            }
            state.client = None;
            if state.descriptor.status == PeerStatus::Failed {
                return;
            }
            state.descriptor.status = PeerStatus::Failed;
            state.descriptor.clone()
        };

        warn!(peer = %self.id, %error, "peer marked failed");
        // The manager never reports itself failed to itself.
        if descriptor.role != PeerRole::Manager {
            self.notifier.notify_peer_down(&descriptor);
        }
    }
}

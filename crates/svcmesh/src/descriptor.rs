//! # Peer Descriptors
//!
//! Immutable snapshots of a service's identity, address and health, as pushed
//! by the orchestration manager and exchanged between nodes.
//!
//! ## Conflict Resolution
//!
//! Membership updates can arrive out of order. [`should_update`] decides
//! whether an incoming snapshot replaces the stored one:
//!
//! - a strictly newer incarnation always wins;
//! - an equal incarnation wins only if it changes the status
//!   (failed → recovered via heartbeat, failed → restarting);
//! - the unknown incarnation wins unconditionally when the policy allows it,
//!   since not every sender tags its descriptors yet.

use std::collections::BTreeMap;

use svcwire::PeerId;

/// Incarnation value of descriptors whose sender does not track restarts.
pub const UNKNOWN_INCARNATION: u64 = 0;

/// The kind of service a peer runs.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum PeerRole {
    /// The orchestration manager.
    Manager,
    Platform,
    Data,
    Storage,
    Access,
    Other(u32),
}

/// Last-known health of a peer.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum PeerStatus {
    Active,
    Starting,
    Failed,
    Stopped,
    Removed,
}

impl PeerStatus {
    /// Whether requests should still be steered towards a peer in this status.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Active | Self::Starting)
    }
}

/// Snapshot of one service instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub id: PeerId,
    pub address: String,
    pub port: u16,
    pub role: PeerRole,
    /// Strictly increases every time the peer process restarts.
    pub incarnation: u64,
    pub status: PeerStatus,
    pub properties: BTreeMap<String, String>,
}

impl PeerDescriptor {
    /// Creates an active descriptor with no properties.
    pub fn new(id: PeerId, role: PeerRole, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
            role,
            incarnation: UNKNOWN_INCARNATION,
            status: PeerStatus::Active,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_incarnation(mut self, incarnation: u64) -> Self {
        self.incarnation = incarnation;
        self
    }

    pub fn with_status(mut self, status: PeerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// `address:port`, as handed to connectors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// How membership treats descriptors carrying [`UNKNOWN_INCARNATION`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IncarnationPolicy {
    /// Unknown incarnations are always applied.
    AcceptUnknown,
    /// Unknown incarnations are ordered like any other value.
    Strict,
}

impl Default for IncarnationPolicy {
    fn default() -> Self {
        Self::AcceptUnknown
    }
}

/// Outcome of comparing an incoming descriptor with the stored one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Incoming incarnation is newer.
    Newer,
    /// Same incarnation, different status.
    StatusChange,
    /// Incoming incarnation is unknown and the policy lets it through.
    UnknownIncarnation,
    /// Stale or redundant; the stored descriptor is kept.
    Reject,
}

impl UpdateDecision {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Reject)
    }
}

/// Decides whether `incoming` should replace `current`.
pub fn should_update(current: &PeerDescriptor, incoming: &PeerDescriptor, policy: IncarnationPolicy) -> UpdateDecision {
    if incoming.incarnation == UNKNOWN_INCARNATION && policy == IncarnationPolicy::AcceptUnknown {
        return UpdateDecision::UnknownIncarnation;
    }
    if incoming.incarnation > current.incarnation {
        return UpdateDecision::Newer;
    }
    if incoming.incarnation == current.incarnation && incoming.status != current.status {
        return UpdateDecision::StatusChange;
    }
    UpdateDecision::Reject
}

//! # Mesh Builder
//!
//! Fluent assembly of a [`Mesh`]: the local descriptor, tunables, and the
//! collaborators at each seam. Anything left unset gets an inert default
//! (no outbound connections, no faults, no down reports, no request handling).

use std::sync::Arc;
use std::time::Duration;

use crate::config;
use crate::config::MeshConfig;
use crate::descriptor::IncarnationPolicy;
use crate::descriptor::PeerDescriptor;
use crate::fault::FaultInjector;
use crate::fault::NoFaults;
use crate::handler::RequestHandler;
use crate::handler::Unhandled;
use crate::mesh::Seams;
use crate::node::Mesh;
use crate::peer::DownNotifier;
use crate::peer::NoopNotifier;
use crate::transport::Connector;
use crate::transport::NoConnector;

pub struct MeshBuilder {
    local: PeerDescriptor,
    config: MeshConfig,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn RequestHandler>,
    notifier: Arc<dyn DownNotifier>,
    faults: Arc<dyn FaultInjector>,
}

impl MeshBuilder {
    pub fn new(local: PeerDescriptor) -> Self {
        Self {
            local,
            config: MeshConfig::default(),
            connector: Arc::new(NoConnector),
            handler: Arc::new(Unhandled),
            notifier: Arc::new(NoopNotifier),
            faults: Arc::new(NoFaults),
        }
    }

    /// Replaces every tunable at once.
    pub fn config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    pub fn lanes(mut self, lanes: usize) -> Self {
        self.config.lanes = lanes;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Orders the unknown incarnation like any other value instead of always
    /// accepting it.
    pub fn strict_incarnation(mut self) -> Self {
        self.config.incarnation_policy = IncarnationPolicy::Strict;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn DownNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    /// Validates the configuration and starts the lanes.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> config::Result<Mesh> {
        self.config.validate()?;
        let seams = Seams {
            connector: self.connector,
            faults: self.faults,
            notifier: self.notifier,
            handler: self.handler,
        };
        Ok(Mesh::start(self.local, self.config, seams))
    }
}

//! # svcmesh
//!
//! Asynchronous requests between the services of a storage cluster.
//!
//! A service sends a request to one peer ([`Mesh::point_to_point`]), to an
//! ordered list of peers until one succeeds ([`Mesh::failover`]), or to a
//! group of peers until enough of them acknowledge ([`Mesh::quorum`]). Every
//! request completes exactly once, with the peer's response or with one of the
//! layer's own error kinds (timeout, invocation failure, aggregate failure).
//!
//! ## Architecture
//!
//! - [`PeerRegistry`] holds one [`PeerHandle`] per known peer and applies
//!   membership updates from the orchestration manager.
//! - [`RequestRegistry`] allocates ids and funnels every response, real or
//!   synthetic, to the lane that owns the request.
//! - Lanes run the request state machines, one tokio task per lane, with no
//!   locks inside a request.
//! - Collaborators plug in through traits: [`Connector`]/[`Transport`] for the
//!   network, [`RequestHandler`] for serving, [`DownNotifier`] for failure
//!   reports, [`FaultInjector`] for tests.

pub mod builder;
pub mod config;
pub mod descriptor;
pub mod fault;
pub mod handler;
mod lanes;
pub mod mesh;
#[cfg(any(test, feature = "test-util"))]
pub mod mock_transport;
mod node;
pub mod peer;
pub mod registry;
pub mod request;
pub mod timer;
pub mod transport;

pub use builder::MeshBuilder;
pub use config::MeshConfig;
pub use descriptor::IncarnationPolicy;
pub use descriptor::PeerDescriptor;
pub use descriptor::PeerRole;
pub use descriptor::PeerStatus;
pub use fault::FaultInjector;
pub use handler::RequestHandler;
pub use handler::Reply;
pub use handler::handler_fn;
pub use mesh::PeerRegistry;
pub use node::Mesh;
pub use peer::DownNotifier;
pub use peer::PeerHandle;
pub use registry::RequestRegistry;
pub use request::CallRecord;
pub use request::RequestState;
pub use request::Response;
pub use request::ServiceRequest;
pub use transport::Connector;
pub use transport::Transport;

pub use svcwire::ErrorKind;
pub use svcwire::Header;
pub use svcwire::MessageTag;
pub use svcwire::PeerId;
pub use svcwire::RequestId;

#[cfg(test)]
mod tests;

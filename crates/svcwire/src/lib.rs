//! # svcwire
//!
//! The wire vocabulary shared by every service in the cluster: identities,
//! the fixed request header, status codes, and the frame envelope.
//!
//! ## Architecture
//!
//! Payloads are opaque. This crate only describes who a message is from,
//! who it is for, which logical request it belongs to, and how it ended.
//! Business encodings live with the services that own them.

pub mod error;
pub mod frame;
pub mod header;
pub mod status;

pub use error::Error;
pub use error::Result;
pub use frame::decode_header;
pub use frame::Frame;
pub use frame::FrameEncoder;
pub use frame::FrameKind;
pub use frame::FRAME_OVERHEAD;
pub use frame::MAX_PAYLOAD_SIZE;
pub use header::Header;
pub use header::MessageTag;
pub use header::PeerId;
pub use header::RequestId;
pub use header::HEADER_SIZE;
pub use status::ErrorKind;

//! Serving inbound requests.

use std::future::Future;
use std::pin::Pin;

use svcwire::ErrorKind;
use svcwire::Header;

/// What a handler sends back to the requester.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: ErrorKind,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn ok(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: ErrorKind::Ok,
            payload: payload.into(),
        }
    }

    /// An error reply. `App` codes in the reserved range `-1003..=-1001` are
    /// replaced by the layer kind the requester will decode them as.
    pub fn error(status: ErrorKind) -> Self {
        Self {
            status: ErrorKind::from_code(status.code()),
            payload: Vec::new(),
        }
    }
}

/// Serves requests addressed to this process, both from the network and from
/// requests this process sends to itself.
///
/// A reply carrying `RequestTimeout`, `RequestInvocationFailed` or
/// `RequestFailed` is taken by the requester as a layer outcome and bypasses
/// its classifier. Domain errors belong in `ErrorKind::App` outside the
/// reserved range.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, header: &Header, payload: Vec<u8>) -> Reply;
}

/// Refuses everything with `RequestInvocationFailed`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unhandled;

#[async_trait::async_trait]
impl RequestHandler for Unhandled {
    async fn handle(&self, _header: &Header, _payload: Vec<u8>) -> Reply {
        Reply::error(ErrorKind::RequestInvocationFailed)
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = Reply> + Send + 'static>>;

/// A [`RequestHandler`] backed by an async closure. See [`handler_fn`].
pub struct HandlerFn {
    f: Box<dyn Fn(Header, Vec<u8>) -> BoxFuture + Send + Sync + 'static>,
}

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Header, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    HandlerFn {
        f: Box::new(move |header, payload| Box::pin(f(header, payload)) as BoxFuture),
    }
}

#[async_trait::async_trait]
impl RequestHandler for HandlerFn {
    async fn handle(&self, header: &Header, payload: Vec<u8>) -> Reply {
        (self.f)(*header, payload).await
    }
}

//! # Status Codes
//!
//! Error kinds carried in `Header::status`.
//!
//! The request layer owns three kinds and reserves negative codes for them.
//! Every other non-zero code is an application error reported by the peer
//! and passed through untouched.

/// Status code for a request whose timer fired before completion.
pub const REQUEST_TIMEOUT: i32 = -1001;
/// Status code for a local send-side failure.
pub const REQUEST_INVOCATION_FAILED: i32 = -1002;
/// Status code for an aggregate failure of a multi-peer request.
pub const REQUEST_FAILED: i32 = -1003;

/// True for codes owned by the request layer. An `App` error must not use them:
/// on the wire they decode as the layer's own kinds.
pub fn is_reserved(code: i32) -> bool {
    (REQUEST_FAILED..=REQUEST_TIMEOUT).contains(&code)
}

/// Terminal outcome of a request as observed by callers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    /// The timer fired before a response arrived.
    RequestTimeout,
    /// Encoding failure, no connection, no route, or no healthy candidate.
    RequestInvocationFailed,
    /// Failover candidates exhausted or quorum unreachable.
    RequestFailed,
    /// Opaque error reported by the peer. Codes in the reserved range are not
    /// application errors; see [`is_reserved`].
    App(i32),
}

impl ErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::RequestTimeout => REQUEST_TIMEOUT,
            Self::RequestInvocationFailed => REQUEST_INVOCATION_FAILED,
            Self::RequestFailed => REQUEST_FAILED,
            Self::App(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            REQUEST_TIMEOUT => Self::RequestTimeout,
            REQUEST_INVOCATION_FAILED => Self::RequestInvocationFailed,
            REQUEST_FAILED => Self::RequestFailed,
            other => Self::App(other),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// True for the kinds synthesized by the request layer itself.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::RequestTimeout | Self::RequestInvocationFailed | Self::RequestFailed)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::RequestTimeout => write!(f, "request timed out"),
            Self::RequestInvocationFailed => write!(f, "request invocation failed"),
            Self::RequestFailed => write!(f, "request failed"),
            Self::App(code) => write!(f, "application error {}", code),
        }
    }
}

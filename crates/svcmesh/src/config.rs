//! Tunables of a [`crate::Mesh`].

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::descriptor::IncarnationPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// At least one lane is needed to run requests.
    ZeroLanes,
    /// A timeout of zero would fail every request on the spot.
    ZeroTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroLanes => write!(f, "Invalid config: lane count must be at least 1"),
            Self::ZeroTimeout => write!(f, "Invalid config: default timeout must be non-zero"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    /// Number of request lanes. Defaults to the available parallelism.
    pub lanes: usize,
    /// Timeout applied to requests that do not set their own. `None` waits forever.
    pub default_timeout: Option<Duration>,
    pub incarnation_policy: IncarnationPolicy,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            lanes: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            default_timeout: None,
            incarnation_policy: IncarnationPolicy::default(),
        }
    }
}

impl MeshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lanes == 0 {
            return Err(Error::ZeroLanes);
        }
        if self.default_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::ZeroTimeout);
        }
        Ok(())
    }
}

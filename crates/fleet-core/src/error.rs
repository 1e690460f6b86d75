//! Typed errors surfaced by the fleet core

use thiserror::Error;

/// Failure talking to the container daemon
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DaemonError {
    /// Transport failure or daemon not reachable
    #[error("container daemon unavailable: {0}")]
    Unavailable(String),

    /// The daemon answered but rejected the request
    #[error("container daemon error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl DaemonError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DaemonError::Unavailable(_))
    }
}

impl From<bollard::errors::Error> for DaemonError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => DaemonError::Api {
                status: status_code,
                message,
            },
            other => DaemonError::Unavailable(other.to_string()),
        }
    }
}

pub type DaemonResult<T> = std::result::Result<T, DaemonError>;

/// Errors returned by fleet operations
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("invalid unit name: {0}")]
    InvalidUnitName(String),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;

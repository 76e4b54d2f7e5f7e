//! Backend-local error type (spec §4.1's "Error semantics" paragraph),
//! grounded on the teacher's `backend/error.rs` shape: a small `thiserror`
//! enum with a single opaque escape hatch, rather than one variant per
//! underlying client library.

use thiserror::Error;

/// Errors a backend's mutation path (`register`, `deregister`, `updateStatus`)
/// may propagate. Enumeration operations never return this — they degrade to
/// an empty result and log instead (spec §4.1).
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend's connection/session is not established. Distinguishable
    /// per spec §4.1.2 so callers can tell "unreachable" from "rejected".
    #[error("backend not connected: {0}")]
    NotConnected(String),

    /// Any other backend-specific failure (HTTP, Kubernetes API, Redis
    /// protocol error, ...), wrapped opaquely.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<BackendError> for crate::error::DiscoveryError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotConnected(detail) => crate::error::DiscoveryError::NotConnected(detail),
            BackendError::Other(e) => crate::error::DiscoveryError::BackendTransient(e),
        }
    }
}

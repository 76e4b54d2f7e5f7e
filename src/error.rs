//! Error taxonomy (spec §7). `NotFound` is deliberately absent: a missed
//! `getInstance` lookup is an absent sentinel (`Option::None`), never an
//! error, per spec.md.

use thiserror::Error;

/// Errors raised to foreground callers. Background timers never propagate
/// these — they log via [`crate::log`] and continue, per spec §7's
/// propagation policy.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Structural configuration violation. Terminal; raised by constructors.
    #[error("invalid configuration: {0}")]
    ConfigValidation(#[from] crate::config::ConfigValidationError),

    /// The backend is unreachable. Raised to the caller of a mutating
    /// operation; enumeration operations return an empty result instead.
    #[error("backend not connected: {0}")]
    NotConnected(String),

    /// Network/transport failure, or a response in {408, 429, 502, 503, 504}.
    /// Retryable by the service client's retry policy.
    #[error("transient transport error: {0}")]
    TransportTransient(String),

    /// Any other non-2xx HTTP response. Propagated immediately, never retried.
    #[error("terminal HTTP error: status {status}")]
    HttpTerminal { status: u16 },

    /// Discovery returned no matching instance for `service`. Not retryable.
    #[error("no instances available for service '{service}'")]
    NoInstances { service: String },

    /// A backend call failed mid-operation. Enumeration operations return
    /// empty and log; mutation operations propagate this.
    #[error("backend operation failed: {0}")]
    BackendTransient(#[from] anyhow::Error),
}

impl DiscoveryError {
    /// Spec §4.5 retry predicate: retry iff the error is a transient
    /// transport failure. `NoInstances` and any `HttpTerminal` are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DiscoveryError::TransportTransient(_))
            || matches!(self, DiscoveryError::HttpTerminal { status } if matches!(status, 408 | 429 | 502 | 503 | 504))
    }
}

//! Error types for external-dns-docker.

use std::time::Duration;

use hickory_proto::op::ResponseCode;
use thiserror::Error;

/// Errors that can occur in the daemon.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// DNS protocol error from the wire codec
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::error::ProtoError),

    /// Docker Engine API error
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A DNS operation exceeded its timeout
    #[error("DNS operation timed out after {0:?}")]
    Timeout(Duration),

    /// An endpoint could not be converted to wire records
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The DNS server answered with a non-success response code
    #[error("{op} failed: server {server} answered {code:?}")]
    ResponseCode {
        /// Operation that was rejected (e.g. "dns update", "preflight SOA query").
        op: &'static str,
        /// Server the message was sent to ("host:port").
        server: String,
        /// Response code returned by the server.
        code: ResponseCode,
    },

    /// Fetching desired endpoints from the source failed
    #[error("fetch desired endpoints: {0}")]
    FetchDesired(#[source] Box<Error>),

    /// Fetching current records from the provider failed
    #[error("fetch current records: {0}")]
    FetchCurrent(#[source] Box<Error>),

    /// Applying the computed change set failed
    #[error("apply changes: {0}")]
    Apply(#[source] Box<Error>),

    /// A per-zone operation failed in the multi-zone router
    #[error("zone {zone}: {source}")]
    Zone {
        /// Zone FQDN the failing sub-provider manages.
        zone: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// The reconciliation loop was cancelled by the shutdown signal
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True when this error is the clean-shutdown cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

//! Error types for glimpse-dns.

use thiserror::Error;

/// Errors that can occur while running the agent.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error (from upstream client initialization)
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Telemetry setup or exporter error
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Upstream internals scrape error
    #[error("Upstream info error: {0}")]
    Collector(String),

    /// Received a termination signal
    #[error("received {0}")]
    Signal(&'static str),
}

/// Tagged error kind, used as a metrics label and for negative-cache
/// decisions in the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The upstream catalog could not be reached or answered abnormally.
    CatalogUnreachable,
    /// An upstream entry carried an unparsable IPv4 address.
    InvalidIp,
    /// The query matched no healthy instances.
    NoInstances,
    /// An unexpected failure outside the tracked taxonomy.
    Untracked,
}

impl ErrorKind {
    /// Stable label for metrics and logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::CatalogUnreachable => "catalog_unreachable",
            ErrorKind::InvalidIp => "invalid_ip",
            ErrorKind::NoInstances => "no_instances",
            ErrorKind::Untracked => "untracked",
        }
    }
}

/// Errors surfaced by the catalog store port.
///
/// The kind is the contract: middleware labels by it and the DNS
/// handler picks rcodes from it, so wrapping layers must preserve it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The upstream catalog could not be reached or answered abnormally.
    #[error("catalog unreachable: {0}")]
    CatalogUnreachable(String),

    /// An upstream entry carried an unparsable IPv4 address.
    #[error("invalid ip: {0}")]
    InvalidIp(String),

    /// The query matched no healthy instances.
    #[error("no instances: {0}")]
    NoInstances(String),

    /// An unexpected failure outside the tracked taxonomy.
    #[error("untracked: {0}")]
    Untracked(String),
}

impl StoreError {
    /// The tagged kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::CatalogUnreachable(_) => ErrorKind::CatalogUnreachable,
            StoreError::InvalidIp(_) => ErrorKind::InvalidIp,
            StoreError::NoInstances(_) => ErrorKind::NoInstances,
            StoreError::Untracked(_) => ErrorKind::Untracked,
        }
    }

    /// Whether this is the no-instances case, which negative paths
    /// treat as an empty result rather than a failure.
    pub fn is_no_instances(&self) -> bool {
        matches!(self, StoreError::NoInstances(_))
    }
}

//! Error types for lease-dns.

use thiserror::Error;

/// Errors that can occur while starting or running the server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),
}

/// Reasons a registration call is rejected.
///
/// Each variant maps to exactly one HTTP status on the registration listener.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The `secret` header was absent or empty.
    #[error("missing secret")]
    MissingSecret,

    /// The `secret` header did not match the configured secret.
    #[error("invalid secret")]
    InvalidSecret,

    /// The `backend` header was absent or blank.
    #[error("missing backend name")]
    MissingBackend,

    /// The caller's transport address could not be parsed as an IP.
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}

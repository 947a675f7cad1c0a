//! Error types for the postern-smtp server side.

use std::io;

use thiserror::Error;

/// Errors that can occur during connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors that can occur during TLS operations.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// The handshake finished without negotiating a version or cipher suite.
    #[error("Negotiated TLS parameters missing: {0}")]
    ProtocolInfoMissing(&'static str),

    #[error("Connection is already using TLS")]
    AlreadyTls,

    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

pub type TlsResult<T> = std::result::Result<T, TlsError>;

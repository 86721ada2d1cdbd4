//! Error types for the etcd client

use thiserror::Error;

use crate::types::EtcdError;

/// Boxed error produced by a [`Transport`](crate::transport::Transport)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when talking to etcd.
///
/// A rejected call carries at most one of an HTTP status
/// ([`Error::HttpStatus`]) or a parsed service error ([`Error::Service`]).
/// Transport failures carry neither, only their cause.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection or I/O failure, never retried
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// The awaited request was cancelled before it completed
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Response status outside the accepted set
    #[error("Error response from etcd: {status} {reason}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Reason phrase
        reason: String,
    },

    /// Body could not be parsed as an etcd result
    #[error("Error parsing response from etcd: {0}")]
    BodyParse(#[from] serde_json::Error),

    /// etcd reported an error code the operation does not accept
    #[error("etcd error: {0}")]
    Service(EtcdError),

    /// Endpoint or request URL is invalid
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable tokio runtime
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// HTTP status of an [`Error::HttpStatus`]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Service error of an [`Error::Service`]
    pub fn etcd_error(&self) -> Option<&EtcdError> {
        match self {
            Error::Service(err) => Some(err),
            _ => None,
        }
    }

    /// True if this is an HTTP status rejection with the given status
    pub fn is_http_error(&self, status: u16) -> bool {
        self.http_status() == Some(status)
    }

    /// True if this is a service error with the given code
    pub fn is_etcd_error(&self, code: u32) -> bool {
        self.etcd_error().map(|e| e.code) == Some(code)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

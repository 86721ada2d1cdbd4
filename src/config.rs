use std::env;

use crate::error::{Error, Result};

/// Endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4001/";

/// Configuration options for the etcd client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the etcd member (default: http://127.0.0.1:4001/)
    pub endpoint: String,
    /// TCP connect timeout in milliseconds. Requests themselves have no
    /// timeout, so watches can wait as long as the server holds them.
    pub connect_timeout_ms: Option<u64>,
    /// Optional SHA-256 fingerprint (hex, colons allowed) of the server
    /// certificate. Replaces CA verification. Requires an https:// endpoint.
    pub ssl_fingerprint: Option<String>,
    /// Verify server certificates against the webpki roots (default: true).
    /// When false any certificate is accepted.
    pub reject_unauthorized: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: None,
            ssl_fingerprint: None,
            reject_unauthorized: true,
        }
    }
}

impl ClientConfig {
    /// Config pointing at `endpoint` with every other option defaulted
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    /// Read configuration from `ETCD_*` environment variables.
    ///
    /// `ETCD_ENDPOINT`, `ETCD_CONNECT_TIMEOUT_MS`, `ETCD_SSL_FINGERPRINT`,
    /// `ETCD_REJECT_UNAUTHORIZED`. An unparsable timeout falls back to none;
    /// an unparsable boolean is an error.
    pub fn from_env() -> Result<Self> {
        let endpoint = env::var("ETCD_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let connect_timeout_ms = env::var("ETCD_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok());

        let ssl_fingerprint = env::var("ETCD_SSL_FINGERPRINT")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let reject_unauthorized = match env::var("ETCD_REJECT_UNAUTHORIZED") {
            Ok(s) => parse_bool(&s).ok_or_else(|| {
                Error::Config(format!("ETCD_REJECT_UNAUTHORIZED must be a boolean, got '{}'", s))
            })?,
            Err(_) => true,
        };

        Ok(ClientConfig {
            endpoint,
            connect_timeout_ms,
            ssl_fingerprint,
            reject_unauthorized,
        })
    }
}

/// Parse a boolean flag (true/false, 1/0, yes/no, on/off)
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

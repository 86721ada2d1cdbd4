//! Data types returned by the etcd v2 keys API

use std::fmt;

use chrono::{DateTime, FixedOffset};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Service error codes defined by etcd.
pub mod codes {
    /// Key not found
    pub const KEY_NOT_FOUND: u32 = 100;
    /// Compare failed (CAS mismatch)
    pub const TEST_FAILED: u32 = 101;
    /// Not a file
    pub const NOT_FILE: u32 = 102;
    /// Not a directory
    pub const NOT_DIR: u32 = 104;
    /// Key already exists
    pub const NODE_EXIST: u32 = 105;
    /// Root is read only
    pub const ROOT_READ_ONLY: u32 = 107;
    /// Directory not empty
    pub const DIR_NOT_EMPTY: u32 = 108;
    /// Raft internal error
    pub const RAFT_INTERNAL: u32 = 300;
    /// Watcher cleared due to etcd recovery
    pub const WATCHER_CLEARED: u32 = 400;
    /// The event in the requested index is outdated and cleared
    pub const EVENT_INDEX_CLEARED: u32 = 401;
}

/// One entry in the key space: a leaf value or a directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Full key, e.g. `/dir/key`
    #[serde(default)]
    pub key: String,
    /// Value of a leaf; always `None` for directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Whether this node is a directory
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dir: bool,
    /// Index at which the node was created
    #[serde(default)]
    pub created_index: u64,
    /// Index of the last modification
    #[serde(default)]
    pub modified_index: u64,
    /// Remaining time to live in seconds, for TTL keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    /// Expiration time, for TTL keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<FixedOffset>>,
    /// Children of a directory listing, in the order the service reported them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Node>>,
}

impl Node {
    /// Children of this node, empty for leaves and unlisted directories
    pub fn children(&self) -> &[Node] {
        self.nodes.as_deref().unwrap_or(&[])
    }

    /// Last path segment of the key
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or("")
    }
}

/// Cluster metadata carried in response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// `X-Etcd-Index`
    pub etcd_index: Option<u64>,
    /// `X-Raft-Index`
    pub raft_index: Option<u64>,
    /// `X-Raft-Term`
    pub raft_term: Option<u64>,
}

impl ResponseMeta {
    /// Read index headers, skipping any that are missing or malformed
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            etcd_index: header_u64(headers, "x-etcd-index"),
            raft_index: header_u64(headers, "x-raft-index"),
            raft_term: header_u64(headers, "x-raft-term"),
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    let raw = headers.get(name)?;
    match raw.to_str().ok().and_then(|v| v.trim().parse().ok()) {
        Some(n) => Some(n),
        None => {
            warn!("Ignoring malformed {} header: {:?}", name, raw);
            None
        }
    }
}

/// Parsed response envelope for one operation.
///
/// A result is either a success (`node` and optionally `prev_node` set) or,
/// when the caller declared the code acceptable, a service error with
/// `error_code` set and no nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdResult {
    /// Verb reported by the service: get, set, delete, compareAndSwap, ...
    #[serde(default)]
    pub action: String,
    /// State after the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    /// State before the operation, for overwrites, deletes and CAS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_node: Option<Node>,

    /// Service error code, set only on error bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
    /// Error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error cause, usually the offending key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Index at which the error was raised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    /// Same as `index`, under the name some releases use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_index: Option<u64>,

    /// Header metadata of the response that produced this result
    #[serde(skip)]
    pub meta: ResponseMeta,
}

impl EtcdResult {
    /// True when the service reported an error code
    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// The service error carried by this result, if any
    pub fn error(&self) -> Option<EtcdError> {
        self.error_code.map(|code| EtcdError {
            code,
            message: self.message.clone().unwrap_or_default(),
            cause: self.cause.clone(),
            index: self.index.or(self.error_index),
        })
    }

    /// Value of the resulting node
    pub fn value(&self) -> Option<&str> {
        self.node.as_ref().and_then(|n| n.value.as_deref())
    }

    /// Value of the node before the operation
    pub fn prev_value(&self) -> Option<&str> {
        self.prev_node.as_ref().and_then(|n| n.value.as_deref())
    }

    /// Best known cluster index: the `X-Etcd-Index` header, else the body index
    pub fn etcd_index(&self) -> Option<u64> {
        self.meta.etcd_index.or(self.index).or(self.error_index)
    }
}

/// A service-level error returned by etcd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdError {
    /// Numeric code, see [`codes`]
    pub code: u32,
    /// Human readable message
    pub message: String,
    /// Offending key or detail
    pub cause: Option<String>,
    /// Cluster index at the time of the error
    pub index: Option<u64>,
}

impl fmt::Display for EtcdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(cause) = &self.cause {
            write!(f, " [{}]", cause)?;
        }
        Ok(())
    }
}

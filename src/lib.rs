//! An HTTP client for the etcd v2 keys API
//!
//! Reads, writes, compare-and-swap, directories and long-poll watches against
//! a single etcd endpoint, over HTTP/1.1 or HTTP/2 with rustls.
//!
//! # Features
//! - Async API on tokio, plus a [`blocking`] facade
//! - Typed results and one error enum for HTTP, service and transport failures
//! - Watches submitted eagerly and cancelled on drop
//! - Optional certificate pinning by SHA-256 fingerprint
//! - Pluggable [`Transport`] for tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use etcd_rest_client::{Client, WatchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), etcd_rest_client::Error> {
//!     let client = Client::new("http://127.0.0.1:4001")?;
//!
//!     let set = client.set("/app/leader", "node-1").await?;
//!     let next = set.node.map(|n| n.modified_index + 1).unwrap_or_default();
//!
//!     // Resolves on the next change after the write above
//!     let watch = client.watch_with("/app/leader", WatchOptions::new().wait_index(next))?;
//!     client.set("/app/leader", "node-2").await?;
//!     println!("changed to {:?}", watch.await?.value());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod response;
mod tls;
pub mod transport;
pub mod types;
pub mod watch;

pub use client::{Client, ResponseFuture};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use response::Acceptance;
pub use transport::{HttpRequest, HyperTransport, RawResponse, Transport, TransportFuture};
pub use types::*;
pub use watch::{Watch, WatchOptions};

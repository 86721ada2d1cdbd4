//! Blocking client
//!
//! Wraps the async [`Client`](crate::Client) around a private tokio runtime.
//! Every call runs on that runtime and only the calling thread blocks.
//! Do not use it from inside another tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{EtcdResult, Node};
use crate::watch::{join_error, WatchOptions};

/// Blocking client for one etcd endpoint.
///
/// # Example
/// ```rust,no_run
/// use etcd_rest_client::blocking::Client;
///
/// # fn main() -> Result<(), etcd_rest_client::Error> {
/// let client = Client::new("http://127.0.0.1:4001")?;
/// client.set("/jobs/1", "queued")?;
/// assert!(client.get("/jobs/2")?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: crate::Client,
    runtime: Arc<Runtime>,
}

impl Client {
    /// Blocking client for `endpoint` with default options
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_config(ClientConfig::with_endpoint(endpoint))
    }

    /// Blocking client with custom configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Self::wrap(crate::Client::with_config(config)?)
    }

    /// Blocking client that sends everything through `transport`
    pub fn with_transport<T: Transport>(endpoint: &str, transport: T) -> Result<Self> {
        Self::wrap(crate::Client::with_transport(endpoint, transport)?)
    }

    fn wrap(inner: crate::Client) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("etcd-client")
            .build()
            .map_err(|e| Error::Runtime(format!("Failed to start runtime: {}", e)))?;
        Ok(Self {
            inner,
            runtime: Arc::new(runtime),
        })
    }

    /// The async client used underneath
    pub fn as_async(&self) -> &crate::Client {
        &self.inner
    }

    /// Run `future` on the client runtime and wait for it.
    ///
    /// Errors come back as they were produced. A task cancelled before it
    /// finished (runtime shutting down) is [`Error::Interrupted`].
    fn wait<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.runtime.spawn(future);
        self.runtime
            .block_on(task)
            .unwrap_or_else(|e| Err(join_error(e)))
    }

    /// See [`crate::Client::get`]
    pub fn get(&self, key: &str) -> Result<Option<EtcdResult>> {
        let (client, key) = (self.inner.clone(), key.to_string());
        self.wait(async move { client.get(&key).await })
    }

    /// See [`crate::Client::delete`]
    pub fn delete(&self, key: &str) -> Result<EtcdResult> {
        let (client, key) = (self.inner.clone(), key.to_string());
        self.wait(async move { client.delete(&key).await })
    }

    /// See [`crate::Client::set`]
    pub fn set(&self, key: &str, value: &str) -> Result<EtcdResult> {
        let (client, key, value) = (self.inner.clone(), key.to_string(), value.to_string());
        self.wait(async move { client.set(&key, &value).await })
    }

    /// See [`crate::Client::set_with_ttl`]
    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: u64) -> Result<EtcdResult> {
        let (client, key, value) = (self.inner.clone(), key.to_string(), value.to_string());
        self.wait(async move { client.set_with_ttl(&key, &value, ttl).await })
    }

    /// See [`crate::Client::create_directory`]
    pub fn create_directory(&self, key: &str) -> Result<EtcdResult> {
        let (client, key) = (self.inner.clone(), key.to_string());
        self.wait(async move { client.create_directory(&key).await })
    }

    /// See [`crate::Client::cas`]
    pub fn cas(&self, key: &str, prev_value: &str, value: &str) -> Result<EtcdResult> {
        let client = self.inner.clone();
        let (key, prev_value, value) = (key.to_string(), prev_value.to_string(), value.to_string());
        self.wait(async move { client.cas(&key, &prev_value, &value).await })
    }

    /// See [`crate::Client::delete_directory`]
    pub fn delete_directory(&self, key: &str) -> Result<EtcdResult> {
        let (client, key) = (self.inner.clone(), key.to_string());
        self.wait(async move { client.delete_directory(&key).await })
    }

    /// See [`crate::Client::list_children`]
    pub fn list_children(&self, key: &str) -> Result<EtcdResult> {
        let (client, key) = (self.inner.clone(), key.to_string());
        self.wait(async move { client.list_children(&key).await })
    }

    /// See [`crate::Client::list_directory`]
    pub fn list_directory(&self, key: &str) -> Result<Option<Vec<Node>>> {
        let (client, key) = (self.inner.clone(), key.to_string());
        self.wait(async move { client.list_directory(&key).await })
    }

    /// See [`crate::Client::version`]
    pub fn version(&self) -> Result<String> {
        let client = self.inner.clone();
        self.wait(async move { client.version().await })
    }

    /// Submit a watch for the next change of `key` without blocking
    pub fn watch(&self, key: &str) -> Result<Watch> {
        self.watch_with(key, WatchOptions::default())
    }

    /// Submit a watch without blocking; block later with [`Watch::wait`]
    pub fn watch_with(&self, key: &str, options: WatchOptions) -> Result<Watch> {
        let watch = self.inner.watch_on(self.runtime.handle(), key, options)?;
        Ok(Watch {
            watch,
            runtime: self.runtime.clone(),
        })
    }
}

/// Blocking handle of a submitted watch. Dropping it aborts the request.
#[derive(Debug)]
pub struct Watch {
    watch: crate::Watch,
    runtime: Arc<Runtime>,
}

impl Watch {
    /// Block until the server answers
    pub fn wait(self) -> Result<EtcdResult> {
        let Watch { watch, runtime } = self;
        runtime.block_on(watch)
    }

    /// Block for at most `timeout`. `Ok(None)` means the watch is still
    /// pending and can be waited on again. Once a result was returned, later
    /// calls return [`Error::Interrupted`].
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<EtcdResult>> {
        let watch = &mut self.watch;
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, watch).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            }
        })
    }

    /// True once the server answered or the request failed
    pub fn is_finished(&self) -> bool {
        self.watch.is_finished()
    }

    /// Cancel the request; a later wait returns [`Error::Interrupted`]
    pub fn abort(&self) {
        self.watch.abort();
    }
}

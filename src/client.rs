//! Async client for the etcd v2 keys API

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hyper::StatusCode;
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::keys::{build_key_uri, encode_form, normalize_base, KEYS_PREFIX};
use crate::response::{translate, Acceptance};
use crate::transport::{HttpRequest, HyperTransport, RawResponse, Transport};
use crate::types::{codes, EtcdResult, Node};
use crate::watch::{Watch, WatchOptions};

/// Future returned by [`Client::execute`]
pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<EtcdResult>> + Send + 'static>>;

const GET: Acceptance = Acceptance::new(&[200, 404], &[codes::KEY_NOT_FOUND]);
const DELETE: Acceptance = Acceptance::new(&[200, 404], &[]);
const SET: Acceptance = Acceptance::new(&[200, 201], &[]);
const CAS: Acceptance = Acceptance::new(&[200, 412], &[codes::TEST_FAILED]);
const DELETE_DIR: Acceptance = Acceptance::new(&[202], &[]);
const LIST: Acceptance = Acceptance::new(&[200], &[]);
const WATCH: Acceptance = Acceptance::new(&[200], &[]);

/// Async client for one etcd endpoint.
///
/// Cheap to clone; clones share the transport. Holds no state besides the
/// base URL, so concurrent calls are independent requests.
///
/// # Example
/// ```rust,no_run
/// use etcd_rest_client::Client;
///
/// #[tokio::main]
/// async fn main() -> Result<(), etcd_rest_client::Error> {
///     let client = Client::new("http://127.0.0.1:4001")?;
///
///     client.set("/config/mode", "active").await?;
///     if let Some(result) = client.get("/config/mode").await? {
///         println!("mode = {:?}", result.value());
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    base: Url,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Client for `endpoint` with default options
    ///
    /// # Errors
    /// Returns an error if the endpoint URL is invalid
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_config(ClientConfig::with_endpoint(endpoint))
    }

    /// Client with custom configuration, using [`HyperTransport`]
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let base = normalize_base(&config.endpoint)?;
        let transport = HyperTransport::new(&config)?;
        Ok(Self {
            base,
            transport: Arc::new(transport),
        })
    }

    /// Client that sends everything through `transport`
    pub fn with_transport<T: Transport>(endpoint: &str, transport: T) -> Result<Self> {
        Ok(Self {
            base: normalize_base(endpoint)?,
            transport: Arc::new(transport),
        })
    }

    /// Base URL, always ending in `/`
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn key_uri(&self, key: &str, suffix: &str) -> Result<Url> {
        build_key_uri(&self.base, KEYS_PREFIX, key, suffix)
    }

    /// Submit `request` and translate the response under `acceptance`.
    ///
    /// The returned future owns everything it needs, so it can be awaited,
    /// spawned, or blocked on.
    pub fn execute(&self, request: HttpRequest, acceptance: Acceptance) -> ResponseFuture {
        let response = self.submit_raw(request);
        Box::pin(async move { translate(response.await?, &acceptance) })
    }

    /// Submit `request` and hand back the untranslated response
    fn submit_raw(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<RawResponse>> + Send + 'static {
        debug!("Sending request: {}", request);
        let response = self.transport.submit(request);
        async move { response.await.map_err(Error::Transport) }
    }

    /// Retrieve a key.
    ///
    /// A missing key is not an error here: it returns `Ok(None)`.
    pub async fn get(&self, key: &str) -> Result<Option<EtcdResult>> {
        let uri = self.key_uri(key, "")?;
        let result = self.execute(HttpRequest::get(uri), GET).await?;
        if result.error_code == Some(codes::KEY_NOT_FOUND) {
            return Ok(None);
        }
        Ok(Some(result))
    }

    /// Delete a key.
    ///
    /// Unlike [`Client::get`], a missing key is an error (code 100).
    pub async fn delete(&self, key: &str) -> Result<EtcdResult> {
        let uri = self.key_uri(key, "")?;
        self.execute(HttpRequest::delete(uri), DELETE).await
    }

    /// Set a key to a new value
    pub async fn set(&self, key: &str, value: &str) -> Result<EtcdResult> {
        self.put_form(key, &[("value", value)], SET).await
    }

    /// Set a key to a new value that expires after `ttl` seconds
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: u64) -> Result<EtcdResult> {
        let ttl = ttl.to_string();
        self.put_form(key, &[("value", value), ("ttl", ttl.as_str())], SET).await
    }

    /// Create a directory
    pub async fn create_directory(&self, key: &str) -> Result<EtcdResult> {
        self.put_form(key, &[("dir", "true")], SET).await
    }

    /// Set a key only if its current value is `prev_value`.
    ///
    /// A mismatch is not an error: the result has `is_error()` set with
    /// code 101 and the stored value is untouched.
    pub async fn cas(&self, key: &str, prev_value: &str, value: &str) -> Result<EtcdResult> {
        self.put_form(key, &[("value", value), ("prevValue", prev_value)], CAS)
            .await
    }

    /// Delete an empty directory. A non-empty one is an error (code 108).
    pub async fn delete_directory(&self, key: &str) -> Result<EtcdResult> {
        let uri = self.key_uri(key, "?dir=true")?;
        self.execute(HttpRequest::delete(uri), DELETE_DIR).await
    }

    /// List the immediate children of a directory.
    ///
    /// `node.nodes` of the result holds them in the order etcd returned.
    pub async fn list_children(&self, key: &str) -> Result<EtcdResult> {
        let uri = self.key_uri(key, "/")?;
        self.execute(HttpRequest::get(uri), LIST).await
    }

    /// Children of a directory, or `None` if the directory does not exist
    pub async fn list_directory(&self, key: &str) -> Result<Option<Vec<Node>>> {
        let result = self.get(&format!("{}/", key)).await?;
        Ok(result
            .and_then(|r| r.node)
            .map(|node| node.nodes.unwrap_or_default()))
    }

    /// Wait for the next change of `key`
    pub fn watch(&self, key: &str) -> Result<Watch> {
        self.watch_with(key, WatchOptions::default())
    }

    /// Wait for a change of `key` as described by `options`.
    ///
    /// The request is submitted right away on the current tokio runtime and
    /// the pending [`Watch`] is returned without waiting.
    ///
    /// # Errors
    /// Returns [`Error::Runtime`] when called outside a tokio runtime
    pub fn watch_with(&self, key: &str, options: WatchOptions) -> Result<Watch> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("watch needs a tokio runtime: {}", e)))?;
        self.watch_on(&runtime, key, options)
    }

    pub(crate) fn watch_on(&self, runtime: &Handle, key: &str, options: WatchOptions) -> Result<Watch> {
        let uri = self.key_uri(key, &options.query())?;
        let request = self.execute(HttpRequest::get(uri), WATCH);
        Ok(Watch::spawn(runtime, request))
    }

    /// Version string reported by the server.
    ///
    /// The body is returned as is; it is not parsed as a result.
    pub async fn version(&self) -> Result<String> {
        let uri = self
            .base
            .join("version")
            .map_err(|e| Error::InvalidUrl(format!("Invalid version URL: {}", e)))?;
        let raw = self.submit_raw(HttpRequest::get(uri)).await?;
        if raw.status != StatusCode::OK {
            return Err(Error::HttpStatus {
                status: raw.status.as_u16(),
                reason: raw.reason,
            });
        }
        Ok(raw.body)
    }

    async fn put_form(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        acceptance: Acceptance,
    ) -> Result<EtcdResult> {
        let uri = self.key_uri(key, "")?;
        let body = encode_form(fields.iter().copied());
        self.execute(HttpRequest::put(uri, body), acceptance).await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("base", &self.base.as_str()).finish()
    }
}

//! HTTP transport used by the client
//!
//! The client only needs "submit a request, eventually get status, headers and
//! body back". [`Transport`] is that seam; [`HyperTransport`] is the default
//! implementation on hyper-util's pooled client with rustls.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::rt::TokioExecutor;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{BoxError, Error, Result};
use crate::tls::build_tls_config;

/// Content type of every request body sent to etcd
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A request ready to be submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub uri: Url,
    /// Optional form-encoded body
    pub body: Option<String>,
}

impl HttpRequest {
    /// GET without a body
    pub fn get(uri: Url) -> Self {
        Self {
            method: Method::GET,
            uri,
            body: None,
        }
    }

    /// DELETE without a body
    pub fn delete(uri: Url) -> Self {
        Self {
            method: Method::DELETE,
            uri,
            body: None,
        }
    }

    /// PUT with a form body
    pub fn put(uri: Url, body: String) -> Self {
        Self {
            method: Method::PUT,
            uri,
            body: Some(body),
        }
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)?;
        if let Some(body) = &self.body {
            write!(f, " --> {}", body)?;
        }
        Ok(())
    }
}

/// A fully read response. The connection has been released by the time a
/// transport hands this out.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Status code
    pub status: StatusCode,
    /// Reason phrase sent by the server, or the canonical one
    pub reason: String,
    /// Response headers
    pub headers: HeaderMap,
    /// Body decoded as UTF-8 (lossy)
    pub body: String,
}

impl RawResponse {
    /// Response with the canonical reason phrase and no headers
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            reason: status.canonical_reason().unwrap_or("").to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Future returned by [`Transport::submit`]
pub type TransportFuture =
    Pin<Box<dyn Future<Output = std::result::Result<RawResponse, BoxError>> + Send + 'static>>;

/// Something that can carry a request to etcd and bring the response back.
///
/// Implementations must be safe to call concurrently and must complete every
/// future exactly once, with the body already read.
pub trait Transport: Send + Sync + 'static {
    /// Submit `request`
    fn submit(&self, request: HttpRequest) -> TransportFuture;
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

/// Default transport: hyper-util pooled client, http or https.
#[derive(Clone)]
pub struct HyperTransport {
    http_client: HttpClient<HttpsConnector, Full<Bytes>>,
}

impl HyperTransport {
    /// Build a transport from the TLS and connect options of `config`
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.ssl_fingerprint.is_some() && !config.endpoint.starts_with("https://") {
            return Err(Error::Tls(
                "ssl_fingerprint requires an https:// endpoint".to_string(),
            ));
        }

        let tls_config =
            build_tls_config(config.ssl_fingerprint.as_deref(), config.reject_unauthorized)?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(config.connect_timeout_ms.map(Duration::from_millis));

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(http);

        let http_client = HttpClient::builder(TokioExecutor::new()).build(https_connector);

        Ok(Self { http_client })
    }

    async fn send(
        http_client: HttpClient<HttpsConnector, Full<Bytes>>,
        request: HttpRequest,
    ) -> std::result::Result<RawResponse, BoxError> {
        let uri: Uri = request.uri.as_str().parse()?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        let body = match request.body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, FORM_CONTENT_TYPE);
                Full::new(Bytes::from(body))
            }
            None => Full::new(Bytes::new()),
        };
        let req = builder.body(body)?;

        let response = http_client.request(req).await?;
        let (parts, body) = response.into_parts();

        // Reading the whole body returns the connection to the pool.
        let bytes = body.collect().await?.to_bytes();

        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .and_then(|r| std::str::from_utf8(r.as_bytes()).ok())
            .or_else(|| parts.status.canonical_reason())
            .unwrap_or("")
            .to_string();

        debug!("Received {} ({} bytes)", parts.status, bytes.len());

        Ok(RawResponse {
            status: parts.status,
            reason,
            headers: parts.headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

impl Transport for HyperTransport {
    fn submit(&self, request: HttpRequest) -> TransportFuture {
        Box::pin(Self::send(self.http_client.clone(), request))
    }
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport").finish()
    }
}

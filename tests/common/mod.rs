//! Shared test support: a scripted transport and an in-process etcd v2 server.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Utc};
use etcd_rest_client::{
    codes, EtcdResult, HttpRequest, Node, RawResponse, Transport, TransportFuture,
};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use url::form_urlencoded;

pub const VERSION: &str = "etcd 0.4.6";

/// Install a test log subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ========== Scripted transport ==========

/// Replays queued responses in order and records every request.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<RawResponse>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response with the canonical reason phrase
    pub fn respond(&self, status: u16, body: &str) -> &Self {
        let status = StatusCode::from_u16(status).unwrap();
        self.respond_with(RawResponse::new(status, body))
    }

    pub fn respond_with(&self, response: RawResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request was submitted")
    }
}

impl Transport for ScriptedTransport {
    fn submit(&self, request: HttpRequest) -> TransportFuture {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        Box::pin(async move { next.ok_or_else(|| "no scripted response left".into()) })
    }
}

/// Fails every request as if the connection was refused.
#[derive(Clone, Copy, Default)]
pub struct RefusingTransport;

impl Transport for RefusingTransport {
    fn submit(&self, _request: HttpRequest) -> TransportFuture {
        Box::pin(async {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused").into())
        })
    }
}

// ========== In-process etcd ==========

/// A minimal etcd v2 keys API served over HTTP/1.1 on a random local port.
///
/// Keeps the key tree in memory with a global index, TTL expiry, directory
/// rules and an event history that watches (with `waitIndex` and
/// `recursive`) are answered from.
pub struct MockEtcd {
    addr: SocketAddr,
    shared: Arc<Shared>,
    server: JoinHandle<()>,
}

impl MockEtcd {
    /// Bind and start serving on the current runtime
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::new());
        let server = tokio::spawn(serve(listener, shared.clone()));
        Self { addr, shared, server }
    }

    /// Start on a dedicated runtime, for tests of the blocking client.
    /// Keep the runtime alive as long as the server is used.
    pub fn start_blocking() -> (tokio::runtime::Runtime, Self) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let etcd = runtime.block_on(Self::start());
        (runtime, etcd)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Current cluster index
    pub fn index(&self) -> u64 {
        self.shared.store.lock().unwrap().index
    }
}

impl Drop for MockEtcd {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let shared = shared.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle(shared.clone(), req));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("Connection from {} error: {}", addr, e);
                    }
                });
            }
            Err(e) => error!("Accept error: {}", e),
        }
    }
}

struct Shared {
    store: Mutex<Store>,
    changes: watch::Sender<u64>,
}

impl Shared {
    fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            store: Mutex::new(Store::default()),
            changes,
        }
    }

    /// Run a mutation and wake watchers
    fn mutate(&self, f: impl FnOnce(&mut Store) -> Reply) -> (Reply, u64) {
        let mut store = self.store.lock().unwrap();
        let reply = f(&mut store);
        let index = store.index;
        drop(store);
        self.changes.send_replace(index);
        (reply, index)
    }

    fn read(&self, f: impl FnOnce(&mut Store) -> Reply) -> (Reply, u64) {
        let mut store = self.store.lock().unwrap();
        let reply = f(&mut store);
        (reply, store.index)
    }
}

type Reply = (StatusCode, EtcdResult);

#[derive(Debug, Clone)]
struct Entry {
    value: Option<String>,
    created_index: u64,
    modified_index: u64,
    expires: Option<(Instant, DateTime<FixedOffset>)>,
}

impl Entry {
    fn is_dir(&self) -> bool {
        self.value.is_none()
    }
}

struct Event {
    index: u64,
    key: String,
    result: EtcdResult,
}

#[derive(Default)]
struct Store {
    index: u64,
    entries: BTreeMap<String, Entry>,
    history: Vec<Event>,
}

fn parent(key: &str) -> &str {
    match key.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

fn ancestors(key: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = parent(key);
    while current != "/" {
        out.push(current);
        current = parent(current);
    }
    out.reverse();
    out
}

impl Store {
    fn error(&self, status: StatusCode, code: u32, message: &str, cause: &str) -> Reply {
        (
            status,
            EtcdResult {
                error_code: Some(code),
                message: Some(message.to_string()),
                cause: Some(cause.to_string()),
                index: Some(self.index),
                ..Default::default()
            },
        )
    }

    fn not_found(&self, key: &str) -> Reply {
        self.error(StatusCode::NOT_FOUND, codes::KEY_NOT_FOUND, "Key not found", key)
    }

    fn node(&self, key: &str, entry: &Entry) -> Node {
        let (ttl, expiration) = match entry.expires {
            Some((at, expiration)) => {
                let remaining = at.saturating_duration_since(Instant::now());
                (Some(remaining.as_millis().div_ceil(1000) as i64), Some(expiration))
            }
            None => (None, None),
        };
        Node {
            key: key.to_string(),
            value: entry.value.clone(),
            dir: entry.is_dir(),
            created_index: entry.created_index,
            modified_index: entry.modified_index,
            ttl,
            expiration,
            nodes: None,
        }
    }

    fn children(&self, key: &str) -> Vec<Node> {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key && parent(k) == key)
            .map(|(k, e)| self.node(k, e))
            .collect()
    }

    fn has_children(&self, key: &str) -> bool {
        self.entries.keys().any(|k| k.as_str() != key && parent(k) == key)
    }

    fn record(&mut self, key: &str, action: &str, node: Node, prev_node: Option<Node>) -> EtcdResult {
        let result = EtcdResult {
            action: action.to_string(),
            node: Some(node),
            prev_node,
            ..Default::default()
        };
        self.history.push(Event {
            index: self.index,
            key: key.to_string(),
            result: result.clone(),
        });
        result
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.expires, Some((at, _)) if at <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(entry) = self.entries.remove(&key) {
                self.index += 1;
                let prev = self.node(&key, &entry);
                let node = Node {
                    key: key.clone(),
                    created_index: entry.created_index,
                    modified_index: self.index,
                    ..Default::default()
                };
                self.record(&key, "expire", node, Some(prev));
            }
        }
    }

    fn get(&mut self, key: &str) -> Reply {
        self.purge_expired();
        if key == "/" {
            let node = Node {
                key: key.to_string(),
                dir: true,
                nodes: Some(self.children(key)),
                ..Default::default()
            };
            return (StatusCode::OK, get_result(node));
        }
        let Some(entry) = self.entries.get(key) else {
            return self.not_found(key);
        };
        let mut node = self.node(key, entry);
        if entry.is_dir() {
            node.nodes = Some(self.children(key));
        }
        (StatusCode::OK, get_result(node))
    }

    fn set(&mut self, key: &str, value: Option<String>, ttl: Option<u64>) -> Reply {
        self.purge_expired();
        if key == "/" {
            return self.error(StatusCode::FORBIDDEN, codes::ROOT_READ_ONLY, "Root is read only", key);
        }
        for ancestor in ancestors(key) {
            if self.entries.get(ancestor).is_some_and(|e| !e.is_dir()) {
                return self.error(StatusCode::FORBIDDEN, codes::NOT_DIR, "Not a directory", ancestor);
            }
        }
        let existing = self.entries.get(key).cloned();
        match &existing {
            Some(e) if e.is_dir() => {
                return self.error(StatusCode::FORBIDDEN, codes::NOT_FILE, "Not a file", key);
            }
            Some(_) if value.is_none() => {
                return self.error(StatusCode::FORBIDDEN, codes::NODE_EXIST, "Key already exists", key);
            }
            _ => {}
        }

        self.index += 1;
        let index = self.index;
        for ancestor in ancestors(key) {
            self.entries.entry(ancestor.to_string()).or_insert(Entry {
                value: None,
                created_index: index,
                modified_index: index,
                expires: None,
            });
        }
        let expires = ttl.map(|secs| {
            let expiration = Utc::now() + chrono::Duration::seconds(secs as i64);
            (Instant::now() + Duration::from_secs(secs), expiration.fixed_offset())
        });
        let entry = Entry {
            value,
            created_index: index,
            modified_index: index,
            expires,
        };
        let node = self.node(key, &entry);
        let prev_node = existing.map(|e| self.node(key, &e));
        self.entries.insert(key.to_string(), entry);

        let status = if prev_node.is_some() { StatusCode::OK } else { StatusCode::CREATED };
        (status, self.record(key, "set", node, prev_node))
    }

    fn compare_and_swap(&mut self, key: &str, prev_value: &str, value: String) -> Reply {
        self.purge_expired();
        let Some(existing) = self.entries.get(key).cloned() else {
            return self.not_found(key);
        };
        let Some(current) = existing.value.clone() else {
            return self.error(StatusCode::FORBIDDEN, codes::NOT_FILE, "Not a file", key);
        };
        if current != prev_value {
            let cause = format!("[{} != {}]", prev_value, current);
            return self.error(StatusCode::PRECONDITION_FAILED, codes::TEST_FAILED, "Compare failed", &cause);
        }

        self.index += 1;
        let prev_node = self.node(key, &existing);
        let entry = Entry {
            value: Some(value),
            modified_index: self.index,
            expires: None,
            ..existing
        };
        let node = self.node(key, &entry);
        self.entries.insert(key.to_string(), entry);
        (StatusCode::OK, self.record(key, "compareAndSwap", node, Some(prev_node)))
    }

    fn delete(&mut self, key: &str, dir: bool) -> Reply {
        self.purge_expired();
        if key == "/" {
            return self.error(StatusCode::FORBIDDEN, codes::ROOT_READ_ONLY, "Root is read only", key);
        }
        let Some(existing) = self.entries.get(key).cloned() else {
            return self.not_found(key);
        };
        if existing.is_dir() && !dir {
            return self.error(StatusCode::FORBIDDEN, codes::NOT_FILE, "Not a file", key);
        }
        if existing.is_dir() && self.has_children(key) {
            return self.error(StatusCode::FORBIDDEN, codes::DIR_NOT_EMPTY, "Directory not empty", key);
        }

        self.index += 1;
        let prev_node = self.node(key, &existing);
        self.entries.remove(key);
        let node = Node {
            key: key.to_string(),
            dir: existing.is_dir(),
            created_index: existing.created_index,
            modified_index: self.index,
            ..Default::default()
        };
        let status = if dir { StatusCode::ACCEPTED } else { StatusCode::OK };
        (status, self.record(key, "delete", node, Some(prev_node)))
    }

    fn find_event(&self, key: &str, since: u64, recursive: bool) -> Option<EtcdResult> {
        let below = format!("{}/", key.trim_end_matches('/'));
        self.history
            .iter()
            .find(|e| e.index >= since && (e.key == key || (recursive && e.key.starts_with(&below))))
            .map(|e| e.result.clone())
    }
}

fn get_result(node: Node) -> EtcdResult {
    EtcdResult {
        action: "get".to_string(),
        node: Some(node),
        ..Default::default()
    }
}

/// Turn an escaped request path below `/v2/keys` into a key
fn decode_key(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    let mut key = String::new();
    for segment in trimmed.split('/').skip(1) {
        key.push('/');
        key.push_str(&percent_decode_str(segment).decode_utf8_lossy());
    }
    key
}

async fn wait_for_change(shared: Arc<Shared>, key: String, wait_index: Option<u64>, recursive: bool) -> (Reply, u64) {
    let mut changes = shared.changes.subscribe();
    let since = wait_index.unwrap_or_else(|| shared.store.lock().unwrap().index + 1);
    loop {
        {
            let mut store = shared.store.lock().unwrap();
            store.purge_expired();
            if let Some(result) = store.find_event(&key, since, recursive) {
                return ((StatusCode::OK, result), store.index);
            }
        }
        // Woken by writes; the timeout lets TTL expiry show up too.
        let _ = tokio::time::timeout(Duration::from_millis(100), changes.changed()).await;
    }
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn json((status, result): Reply, index: u64) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(&result).unwrap();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Etcd-Index", index)
        .header("X-Raft-Index", index + 1000)
        .header("X-Raft-Term", 1)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

async fn handle(shared: Arc<Shared>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query: HashMap<String, String> = req
        .uri()
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    debug!("{} {} {:?}", method, path, query);

    if method == Method::GET && path == "/version" {
        return Ok(text(StatusCode::OK, VERSION));
    }
    let Some(raw_key) = path.strip_prefix("/v2/keys") else {
        return Ok(text(StatusCode::NOT_FOUND, "404 page not found"));
    };
    let key = decode_key(raw_key);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Ok(text(StatusCode::BAD_REQUEST, "")),
    };
    let form: HashMap<String, String> = form_urlencoded::parse(&body).into_owned().collect();

    let flag = |name: &str| query.get(name).is_some_and(|v| v == "true");

    let (reply, index) = match method {
        Method::GET if flag("wait") => {
            let wait_index = query.get("waitIndex").and_then(|v| v.parse().ok());
            wait_for_change(shared, key, wait_index, flag("recursive")).await
        }
        Method::GET => shared.read(|store| store.get(&key)),
        Method::PUT => {
            let ttl = match form.get("ttl").map(|v| v.parse::<u64>()) {
                Some(Ok(ttl)) => Some(ttl),
                Some(Err(_)) => {
                    let (reply, index) = shared.read(|s| {
                        s.error(StatusCode::BAD_REQUEST, 209, "Invalid field", "invalid value for \"ttl\"")
                    });
                    return Ok(json(reply, index));
                }
                None => None,
            };
            match (form.get("prevValue"), form.get("value"), form.get("dir")) {
                (Some(prev), Some(value), _) => {
                    shared.mutate(|store| store.compare_and_swap(&key, prev, value.clone()))
                }
                (None, _, Some(dir)) if dir == "true" => shared.mutate(|store| store.set(&key, None, ttl)),
                (None, Some(value), _) => shared.mutate(|store| store.set(&key, Some(value.clone()), ttl)),
                _ => shared.read(|s| {
                    s.error(StatusCode::BAD_REQUEST, 200, "Value is Required in POST form", "Set")
                }),
            }
        }
        Method::DELETE => shared.mutate(|store| store.delete(&key, flag("dir"))),
        _ => return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")),
    };

    Ok(json(reply, index))
}

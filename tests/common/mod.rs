#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use archive_proxy::{ArchiveProxy, ProxyConfig, ReaderConfig};
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

/// Files served by the fake origin, by path.
#[derive(Default)]
pub struct Origin {
    files: HashMap<String, Vec<u8>>,
    pub range_requests: AtomicUsize,
    /// Headers of every GET that reached a range-capable route.
    pub requests: Mutex<Vec<HeaderMap>>,
}

impl Origin {
    pub fn with(mut self, name: &str, data: Vec<u8>) -> Self {
        self.files.insert(name.to_string(), data);
        self
    }

    pub fn requests(&self) -> Vec<HeaderMap> {
        self.requests.lock().unwrap().clone()
    }
}

fn advertise(data: &[u8]) -> [(axum::http::HeaderName, String); 2] {
    [(ACCEPT_RANGES, "bytes".to_string()), (CONTENT_LENGTH, data.len().to_string())]
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Honors `Range: bytes=a-b` like a static file server.
async fn ranged(State(origin): State<Arc<Origin>>, Path(name): Path<String>, headers: HeaderMap) -> Response {
    origin.requests.lock().unwrap().push(headers.clone());
    let Some(data) = origin.files.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let range = headers.get(RANGE).and_then(|v| v.to_str().ok()).and_then(parse_range);
    match range {
        Some((start, end)) if start < data.len() && start <= end => {
            origin.range_requests.fetch_add(1, Ordering::SeqCst);
            let end = end.min(data.len() - 1);
            (
                StatusCode::PARTIAL_CONTENT,
                [(CONTENT_RANGE, format!("bytes {start}-{end}/{}", data.len()))],
                data[start..=end].to_vec(),
            )
                .into_response()
        }
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => (advertise(data), data.clone()).into_response(),
    }
}

/// Serves ranges, but answers the `bytes=0-0` length check with the whole
/// file and no range support. Only HEAD advertises ranges.
async fn head_ranges(State(origin): State<Arc<Origin>>, Path(name): Path<String>, headers: HeaderMap) -> Response {
    if headers.get(RANGE).is_some_and(|v| v.as_bytes() == b"bytes=0-0") {
        if let Some(data) = origin.files.get(&name) {
            return data.clone().into_response();
        }
    }
    ranged(State(origin), Path(name), headers).await
}

async fn head(State(origin): State<Arc<Origin>>, Path(name): Path<String>) -> Response {
    match origin.files.get(&name) {
        Some(data) => (StatusCode::OK, advertise(data)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Ignores `Range` and never advertises range support.
async fn plain(State(origin): State<Arc<Origin>>, Path(name): Path<String>) -> Response {
    match origin.files.get(&name) {
        Some(data) => data.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub async fn spawn_origin(origin: Arc<Origin>) -> SocketAddr {
    let router = Router::new()
        .route("/files/*name", get(ranged))
        .route("/plain/*name", get(plain))
        .route("/head/*name", get(head_ranges).head(head))
        .with_state(origin);
    serve(router).await
}

/// Reader sizing small enough that every fixture needs several refills.
pub fn small_reader() -> ReaderConfig {
    ReaderConfig {
        buffer_size: 64,
        fetch_size: 16,
        fanout: 2,
    }
}

pub async fn spawn_proxy(config: ProxyConfig) -> SocketAddr {
    let proxy = ArchiveProxy::new(reqwest::Client::new(), config).unwrap();
    serve(proxy.router()).await
}

pub fn test_config() -> ProxyConfig {
    ProxyConfig {
        reader: small_reader(),
        max_retry: 0,
        ..Default::default()
    }
}

/// Percent-encodes everything but unreserved characters.
pub fn encode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

pub struct Setup {
    pub origin: Arc<Origin>,
    pub origin_addr: SocketAddr,
    pub proxy_addr: SocketAddr,
    pub client: reqwest::Client,
}

impl Setup {
    pub async fn new(origin: Origin, config: ProxyConfig) -> Self {
        let origin = Arc::new(origin);
        let origin_addr = spawn_origin(origin.clone()).await;
        let proxy_addr = spawn_proxy(config).await;
        Self {
            origin,
            origin_addr,
            proxy_addr,
            client: reqwest::Client::new(),
        }
    }

    pub fn file_url(&self, name: &str) -> String {
        format!("http://{}/files/{name}", self.origin_addr)
    }

    pub fn plain_url(&self, name: &str) -> String {
        format!("http://{}/plain/{name}", self.origin_addr)
    }

    pub fn head_url(&self, name: &str) -> String {
        format!("http://{}/head/{name}", self.origin_addr)
    }

    /// Proxy URL for `route` with the given query pairs, encoded.
    pub fn proxy_url(&self, route: &str, query: &[(&str, &str)]) -> String {
        let query: Vec<String> = query.iter().map(|(k, v)| format!("{k}={}", encode(v))).collect();
        format!("http://{}{route}?{}", self.proxy_addr, query.join("&"))
    }

    pub async fn get(&self, route: &str, query: &[(&str, &str)]) -> reqwest::Response {
        self.client.get(self.proxy_url(route, query)).send().await.unwrap()
    }
}

use std::io;

use axum::extract::{Path, Query, State};
use axum::http::header::REFERER;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::streaming::stream_response;
use super::{ArchiveProxy, Target};
use crate::archive::{ArchiveAdapter, ArchiveFormat, EntryStream};
use crate::error::{Error, Result};

const OCTET_STREAM: &str = "application/octet-stream";
const ZIP: &str = "application/zip";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ArchiveQuery {
    url: Option<String>,
    format: Option<String>,
    charset: Option<String>,
    index: Option<String>,
}

/// Body of a `/list` response.
#[derive(Debug, Serialize)]
pub(crate) struct Listing {
    #[serde(rename = "FileType")]
    file_type: String,
    #[serde(rename = "Files")]
    files: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ArchiveQuery {
    fn target(&self) -> Result<Target> {
        let raw = non_empty(&self.url).ok_or_else(|| Error::BadRequest("url must not be empty".to_string()))?;
        let url = Url::parse(raw).map_err(|e| Error::BadRequest(format!("invalid target url {raw}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::BadRequest(format!("unsupported url scheme {}", url.scheme())));
        }
        let format = non_empty(&self.format).map(str::parse::<ArchiveFormat>).transpose()?;
        Ok(Target {
            url,
            format,
            charset: non_empty(&self.charset).map(str::to_string),
        })
    }

    fn index(&self) -> Result<usize> {
        let raw = non_empty(&self.index).ok_or_else(|| Error::BadRequest("index must be given".to_string()))?;
        raw.parse()
            .map_err(|_| Error::BadRequest(format!("index must be a non-negative integer, got {raw}")))
    }
}

impl ArchiveProxy {
    /// Validates the query and applies the access policy.
    fn authorize(&self, query: &ArchiveQuery, headers: &HeaderMap) -> Result<Target> {
        let target = query.target()?;
        let referer = headers.get(REFERER).and_then(|v| v.to_str().ok());
        self.config.policy.check(&target.url, referer)?;
        Ok(target)
    }

    /// Streams the entry chosen by `open_entry` as the response body.
    async fn stream_entry<F>(&self, target: Target, headers: HeaderMap, open_entry: F) -> Result<Response>
    where
        F: FnOnce(Box<dyn ArchiveAdapter>, Option<&str>) -> Result<EntryStream> + Send + 'static,
    {
        let proxy = self.clone();
        stream_response(OCTET_STREAM, CancellationToken::new(), move |runtime, cancel, out| {
            let (_, adapter) = proxy.open(&target, &headers, runtime, cancel)?;
            let mut entry = open_entry(adapter, target.charset.as_deref())?;
            io::copy(&mut entry, out)?;
            Ok(())
        })
        .await
    }
}

pub(crate) async fn healthz() -> &'static str {
    "OK"
}

pub(crate) async fn list(
    State(proxy): State<ArchiveProxy>,
    Query(query): Query<ArchiveQuery>,
    headers: HeaderMap,
) -> Result<Json<Listing>> {
    let target = proxy.authorize(&query, &headers)?;
    info!(route = "list", url = %target.url, format = ?target.format, "archive request");

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let runtime = Handle::current();
    let listing = tokio::task::spawn_blocking(move || {
        let (format, mut adapter) = proxy.open(&target, &headers, runtime, cancel)?;
        let files = adapter.list(target.charset.as_deref())?;
        Ok::<_, Error>(Listing {
            file_type: format.tag().to_string(),
            files,
        })
    })
    .await
    .map_err(|e| Error::Io(io::Error::other(e)))??;
    Ok(Json(listing))
}

pub(crate) async fn stream_by_index(
    State(proxy): State<ArchiveProxy>,
    Query(query): Query<ArchiveQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let target = proxy.authorize(&query, &headers)?;
    let index = query.index()?;
    info!(route = "stream", url = %target.url, format = ?target.format, index, "archive request");
    proxy
        .stream_entry(target, headers, move |adapter, _| adapter.open_by_index(index))
        .await
}

pub(crate) async fn stream_by_name(
    State(proxy): State<ArchiveProxy>,
    Path(name): Path<String>,
    Query(query): Query<ArchiveQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let target = proxy.authorize(&query, &headers)?;
    info!(route = "stream", url = %target.url, format = ?target.format, name = %name, "archive request");
    proxy
        .stream_entry(target, headers, move |adapter, charset| adapter.open_by_name(&name, charset))
        .await
}

pub(crate) async fn pack(
    State(proxy): State<ArchiveProxy>,
    method: Method,
    Query(query): Query<ArchiveQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    if method != Method::POST {
        return Err(Error::MethodNotAllowed);
    }
    let target = proxy.authorize(&query, &headers)?;
    let names: Vec<String> =
        serde_json::from_slice(&body).map_err(|e| Error::BadRequest(format!("body must be a JSON array of names: {e}")))?;
    info!(route = "pack", url = %target.url, format = ?target.format, count = names.len(), "archive request");

    stream_response(ZIP, CancellationToken::new(), move |runtime, cancel, out| {
        let (_, mut adapter) = proxy.open(&target, &headers, runtime, cancel)?;
        adapter.pack(&names, target.charset.as_deref(), out)
    })
    .await
}

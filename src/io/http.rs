use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE, REFERER};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::{fetch_in_order, Block, ByteRange, RangeFetcher};
use crate::error::{Error, Result};

/// Which inbound request headers are copied onto origin requests.
#[derive(Debug, Clone, Default)]
pub struct ForwardHeaders {
    pub include_referer: bool,
    pub names: Vec<HeaderName>,
}

impl ForwardHeaders {
    /// Picks the forwarded headers out of an inbound request, keeping repeated values.
    pub fn select(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::new();
        let referer = REFERER;
        let referer = self.include_referer.then_some(&referer);
        for name in referer.into_iter().chain(self.names.iter()) {
            for value in inbound.get_all(name) {
                out.append(name.clone(), value.clone());
            }
        }
        out
    }
}

/// HTTP Range fetcher for a remote archive
pub struct HttpRanger {
    client: Client,
    url: Url,
    headers: HeaderMap,
    transferred_bytes: AtomicU64,
}

impl HttpRanger {
    /// The client is shared; its timeouts bound every request made here.
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            headers: HeaderMap::new(),
            transferred_bytes: AtomicU64::new(0),
        }
    }

    /// Extra headers sent with every origin request.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    async fn fetch_one(&self, range: ByteRange) -> Result<Block> {
        let resp = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(RANGE, range.header_value())
            .send()
            .await?;

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(Error::OriginStatus(resp.status().as_u16()));
        }

        let mut data = resp.bytes().await?;
        data.truncate(range.len() as usize);
        self.transferred_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(Block { data })
    }

    /// Fallback when the origin ignores the one-byte range request: a HEAD request must
    /// advertise byte ranges and carry a Content-Length.
    async fn length_from_head(&self) -> Result<u64> {
        let resp = self
            .client
            .head(self.url.clone())
            .headers(self.headers.clone())
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::LengthUnknown(format!(
                "HEAD request failed with status: {}",
                resp.status()
            )));
        }

        let accept_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !accept_ranges.contains("bytes") {
            return Err(Error::LengthUnknown(
                "remote server does not support Range requests".to_string(),
            ));
        }

        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::LengthUnknown("remote server did not return Content-Length".to_string()))
    }
}

/// Total length from a `Content-Range: bytes 0-0/1234` header.
fn total_from_content_range(value: &str) -> Option<u64> {
    let (unit, rest) = value.trim().split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (_, total) = rest.split_once('/')?;
    total.trim().parse().ok()
}

#[async_trait]
impl RangeFetcher for HttpRanger {
    async fn expected_length(&self) -> Result<u64> {
        let first = ByteRange::new(0, 0);
        let resp = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(RANGE, first.header_value())
            .send()
            .await?;

        if resp.status() == StatusCode::PARTIAL_CONTENT {
            return resp
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(total_from_content_range)
                .ok_or_else(|| Error::LengthUnknown("unparsable Content-Range in length response".to_string()));
        }
        // Dropping the response closes the connection instead of reading a full body.
        drop(resp);
        self.length_from_head().await
    }

    async fn fetch_ranges(&self, ranges: &[ByteRange], fanout: usize) -> Result<Vec<Block>> {
        debug!(url = %self.url, count = ranges.len(), fanout, first = ?ranges.first(), last = ?ranges.last(), "fetching ranges");
        fetch_in_order(ranges, fanout, |range| self.fetch_one(range)).await
    }
}

impl Drop for HttpRanger {
    fn drop(&mut self) {
        debug!(url = %self.url, transferred = self.transferred_bytes(), "range fetcher released");
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderValue, COOKIE};

    use super::*;

    #[test]
    fn parses_content_range_total() {
        assert_eq!(total_from_content_range("bytes 0-0/1234"), Some(1234));
        assert_eq!(total_from_content_range("bytes 0-0/*"), None);
        assert_eq!(total_from_content_range("items 0-0/5"), None);
        assert_eq!(total_from_content_range("garbage"), None);
    }

    #[test]
    fn forwards_only_selected_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(REFERER, HeaderValue::from_static("https://app.example.com/"));
        inbound.append(COOKIE, HeaderValue::from_static("a=1"));
        inbound.append(COOKIE, HeaderValue::from_static("b=2"));
        inbound.insert("x-secret", HeaderValue::from_static("nope"));

        let forward = ForwardHeaders {
            include_referer: true,
            names: vec![COOKIE],
        };
        let out = forward.select(&inbound);
        assert_eq!(out.get(REFERER).unwrap(), "https://app.example.com/");
        assert_eq!(out.get_all(COOKIE).iter().count(), 2);
        assert!(out.get("x-secret").is_none());

        let no_referer = ForwardHeaders::default().select(&inbound);
        assert!(no_referer.is_empty());
    }
}

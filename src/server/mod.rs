//! HTTP surface of the proxy.
//!
//! Every archive request resolves its target URL, checks the access policy,
//! then runs the archive work on a blocking thread that owns one
//! [`RingBufferReader`] over one [`HttpRanger`]. Nothing is shared between
//! requests except the injected HTTP client.

mod handlers;
mod policy;
mod streaming;

pub use policy::{AccessPolicy, HostPattern};

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::archive::{detect, open_adapter, ArchiveAdapter, ArchiveFormat};
use crate::error::{Error, Result};
use crate::io::{ForwardHeaders, HttpRanger, ReaderConfig, Retrying, RingBufferReader};

/// Per-deployment settings of an [`ArchiveProxy`].
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub reader: ReaderConfig,
    pub policy: AccessPolicy,
    pub forward: ForwardHeaders,
    /// Retries of a failed range batch; zero disables retrying.
    pub max_retry: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            policy: AccessPolicy::default(),
            forward: ForwardHeaders {
                include_referer: true,
                names: Vec::new(),
            },
            max_retry: 3,
        }
    }
}

/// Request dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct ArchiveProxy {
    client: Client,
    config: Arc<ProxyConfig>,
}

/// A validated archive request target.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub url: Url,
    pub format: Option<ArchiveFormat>,
    pub charset: Option<String>,
}

impl ArchiveProxy {
    pub fn new(client: Client, config: ProxyConfig) -> Result<Self> {
        config.reader.validate()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(handlers::healthz))
            .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
            .route("/list", get(handlers::list))
            .route("/pack", any(handlers::pack))
            .route("/stream", get(handlers::stream_by_index))
            .route("/stream/*name", get(handlers::stream_by_name))
            .fallback(|| async { (StatusCode::NOT_FOUND, "not found") })
            .with_state(self.clone())
    }

    /// Opens the remote resource and resolves its format, sniffing when the
    /// request did not name one. Blocks; call from a blocking thread.
    pub(crate) fn open(
        &self,
        target: &Target,
        inbound: &HeaderMap,
        runtime: Handle,
        cancel: CancellationToken,
    ) -> Result<(ArchiveFormat, Box<dyn ArchiveAdapter>)> {
        let ranger = HttpRanger::new(self.client.clone(), target.url.clone())
            .with_headers(self.config.forward.select(inbound));
        let fetcher = Retrying::new(ranger, self.config.max_retry);
        let mut reader = RingBufferReader::open(fetcher, self.config.reader, runtime, cancel)?;
        let format = match target.format {
            Some(format) => format,
            None => detect::sniff(&mut reader)?,
        };
        debug!(url = %target.url, %format, length = reader.len(), "opened remote archive");
        Ok((format, open_adapter(format, reader)))
    }
}

/// HTTP status for each error class. The body always carries the message.
pub fn status_code(err: &Error) -> StatusCode {
    match err {
        Error::BadRequest(_) | Error::OutOfRange { .. } => StatusCode::BAD_REQUEST,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::EntryNotFound(_) | Error::IndexOutOfRange { .. } => StatusCode::NOT_FOUND,
        Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        Error::UnsupportedFormat(_) | Error::MimeDetection(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::Archive(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::LengthUnknown(_) | Error::Transport(_) | Error::OriginStatus(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::InvalidConfiguration(_) | Error::Canceled | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if status.is_server_error() {
            warn!(%status, error = %self, "request failed");
        } else {
            debug!(%status, error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_origin_failures_are_distinguished() {
        assert_eq!(status_code(&Error::BadRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_code(&Error::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_code(&Error::EntryNotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_code(&Error::IndexOutOfRange { index: 3, count: 3 }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_code(&Error::MethodNotAllowed), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            status_code(&Error::MimeDetection("x".into())),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(status_code(&Error::Archive("x".into())), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_code(&Error::OriginStatus(404)), StatusCode::BAD_GATEWAY);
        assert_eq!(status_code(&Error::Timeout("x".into())), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_code(&Error::Canceled), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn error_body_is_the_message() {
        let response = Error::EntryNotFound("a.txt".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"file not found in archive: a.txt");
    }

    #[test]
    fn rejects_invalid_reader_sizing() {
        let config = ProxyConfig {
            reader: ReaderConfig {
                buffer_size: 8,
                fetch_size: 16,
                fanout: 2,
            },
            ..Default::default()
        };
        assert!(matches!(
            ArchiveProxy::new(Client::new(), config),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}

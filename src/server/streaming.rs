use std::io::{self, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 4;

type Chunk = io::Result<Bytes>;

/// `Write` end of a response body, used from a blocking worker.
struct ChannelWriter {
    tx: mpsc::Sender<Chunk>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `work` on a blocking thread and streams what it writes as the body.
///
/// The first chunk (or the outcome of an empty body) is awaited before the
/// response is built, so failures while opening the archive still produce an
/// error status. Later failures, panics included, abort the body. Dropping
/// the response body cancels `cancel`.
pub(crate) async fn stream_response<F>(content_type: &'static str, cancel: CancellationToken, work: F) -> Result<Response>
where
    F: FnOnce(Handle, CancellationToken, &mut dyn Write) -> Result<()> + Send + 'static,
{
    let guard = cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel::<Chunk>(CHANNEL_DEPTH);
    let runtime = Handle::current();

    tokio::task::spawn_blocking(move || {
        let mut out = BufWriter::with_capacity(CHUNK_SIZE, ChannelWriter { tx: tx.clone() });
        // A panicking adapter is reported like any other failure.
        let result = panic::catch_unwind(AssertUnwindSafe(|| work(runtime, cancel, &mut out)))
            .unwrap_or_else(|_| Err(Error::Io(io::Error::other("archive worker panicked"))))
            .and_then(|()| Ok(out.flush()?));
        // Whatever is still buffered after a failure is discarded.
        let (_, _unflushed) = out.into_parts();
        if let Err(e) = result {
            warn!(error = %e, "archive stream failed");
            let _ = tx.blocking_send(Err(e.into()));
        }
    });

    let first = match rx.recv().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(e)) => return Err(Error::from(e)),
        None => None,
    };

    let body = futures::stream::unfold((rx, first, guard), |(mut rx, pending, guard)| async move {
        let chunk = match pending {
            Some(chunk) => Ok(chunk),
            None => rx.recv().await?,
        };
        Some((chunk, (rx, None, guard)))
    });
    Ok(([(CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response())
}

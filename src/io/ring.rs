//! Seekable reader over a remote resource, backed by a fixed-size ring buffer.
//!
//! The reader keeps a sliding window of the resource in memory. The window
//! covers the absolute offsets `[window_start, write_point)` and is stored
//! circularly, offset `o` living at `o % buffer_size`.
//!
//! - A read inside the window copies straight out of the ring.
//! - A read that drains the window triggers a refill anchored at
//!   `write_point`. The refill only overwrites bytes the reader has already
//!   consumed, so `write_point - cursor <= buffer_size` always holds.
//! - A read whose cursor lies before or beyond the window discards it and
//!   refills from the cursor.
//!
//! Each refill asks the [`RangeFetcher`] for at most `buffer_size` bytes,
//! split into chunks of `fetch_size` bytes that are fetched with up to
//! `fanout` concurrent requests and laid into the ring in ascending order.
//!
//! Archive libraries consume this through [`Read`], [`Seek`] and [`ReadAt`];
//! none of them can observe the windowing. The reader is used from a blocking
//! thread and drives the async fetcher through a runtime [`Handle`].

use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{out_of_range, ByteRange, RangeFetcher, ReadAt};
use crate::error::{Error, Result};

pub const DEFAULT_BUFFER_SIZE: usize = 512 * 1024;
pub const DEFAULT_FETCH_SIZE: usize = 128 * 1024;
pub const DEFAULT_FANOUT: usize = 2;

/// Sizing of a [`RingBufferReader`].
///
/// A good shape is `buffer_size = N * fetch_size * fanout`, so one refill
/// keeps every concurrent request busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    pub buffer_size: usize,
    pub fetch_size: usize,
    pub fanout: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            fetch_size: DEFAULT_FETCH_SIZE,
            fanout: DEFAULT_FANOUT,
        }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "fetch size must be greater than 0".to_string(),
            ));
        }
        if self.buffer_size < self.fetch_size {
            return Err(Error::InvalidConfiguration(format!(
                "buffer size ({}) must be greater than or equal to fetch size ({})",
                self.buffer_size, self.fetch_size
            )));
        }
        if self.fanout == 0 {
            return Err(Error::InvalidConfiguration(
                "fanout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of [`RingBufferReader::read_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes copied into the caller's buffer.
    pub n: usize,
    /// Set exactly when this read left the cursor at the end of the resource.
    pub eof: bool,
}

pub struct RingBufferReader<F> {
    fetcher: F,
    runtime: Handle,
    cancel: CancellationToken,
    config: ReaderConfig,
    buff: Box<[u8]>,
    read_point: u64,
    write_point: u64,
    window_start: u64,
    length: u64,
}

impl<F: RangeFetcher> RingBufferReader<F> {
    /// Creates a reader that can only be stopped by dropping it.
    pub fn new(fetcher: F, config: ReaderConfig, runtime: Handle) -> Result<Self> {
        Self::open(fetcher, config, runtime, CancellationToken::new())
    }

    /// Validates the sizing, asks the fetcher for the resource length and
    /// allocates the ring.
    ///
    /// Once `cancel` fires, in-flight fetches are abandoned and every later
    /// operation fails with [`Error::Canceled`].
    pub fn open(
        fetcher: F,
        config: ReaderConfig,
        runtime: Handle,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let length = block_on_cancellable(&runtime, &cancel, fetcher.expected_length())?;
        Ok(Self {
            fetcher,
            runtime,
            cancel,
            buff: vec![0u8; config.buffer_size].into_boxed_slice(),
            config,
            read_point: 0,
            write_point: 0,
            window_start: 0,
            length,
        })
    }

    /// Total length of the remote resource.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Next byte a sequential read will return.
    pub fn position(&self) -> u64 {
        self.read_point
    }

    /// Next byte a refill will fetch.
    pub fn write_point(&self) -> u64 {
        self.write_point
    }

    /// First offset still held by the ring.
    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fills `buf` from the read cursor, refilling the window as often as needed.
    ///
    /// Copies until `buf` is full or the cursor reaches the end. On error the
    /// cursor is left where it was.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let n = self.read_from(self.read_point, buf)?;
        self.read_point += n as u64;
        Ok(ReadOutcome {
            n,
            eof: self.read_point == self.length,
        })
    }

    /// Repositions the read cursor. Never fetches.
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_live()?;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.read_point as i128 + delta as i128,
            SeekFrom::End(delta) => self.length as i128 + delta as i128,
        };
        if target < 0 || target > self.length as i128 {
            return Err(out_of_range(target, self.length));
        }
        self.read_point = target as u64;
        Ok(self.read_point)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        Ok(())
    }

    fn holds(&self, offset: u64) -> bool {
        self.window_start <= offset && offset < self.write_point
    }

    /// Copies bytes starting at absolute `offset` without touching the read cursor.
    fn read_from(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        let mut cursor = offset;
        let mut copied = 0;
        while copied < buf.len() && cursor < self.length {
            if !self.holds(cursor) {
                if cursor < self.window_start || cursor > self.write_point {
                    // The cursor left the window: everything buffered is stale.
                    self.write_point = cursor;
                    self.window_start = cursor;
                }
                self.fill_window(cursor)?;
            }
            let available = (self.write_point - cursor) as usize;
            let take = available.min(buf.len() - copied);
            self.ring_read(cursor, &mut buf[copied..copied + take]);
            cursor += take as u64;
            copied += take;
        }
        Ok(copied)
    }

    /// Fetches the span after `write_point` that fits in the ring without
    /// overwriting `[anchor, write_point)`.
    fn fill_window(&mut self, anchor: u64) -> Result<()> {
        if self.write_point >= self.length {
            return Ok(());
        }
        let size = self.buff.len() as u64;
        let space = size - (self.write_point - anchor);
        let want = space.min(self.length - self.write_point);
        if want == 0 {
            return Ok(());
        }

        let ranges = ByteRange::split(self.write_point, want, self.config.fetch_size as u64);
        trace!(anchor, start = self.write_point, len = want, chunks = ranges.len(), "refilling window");
        let blocks = block_on_cancellable(
            &self.runtime,
            &self.cancel,
            self.fetcher.fetch_ranges(&ranges, self.config.fanout),
        )?;

        let before = self.write_point;
        for (range, block) in ranges.iter().zip(&blocks) {
            let take = block.len().min(range.len() as usize);
            self.ring_write(&block.data[..take]);
            self.write_point += take as u64;
            // Later blocks would land at the wrong offset after a short one.
            if (take as u64) < range.len() {
                break;
            }
        }
        self.window_start = self.window_start.max(self.write_point.saturating_sub(size));

        if self.write_point == before {
            return Err(Error::Transport(format!(
                "origin returned no data for bytes {}-{}",
                before,
                before + want - 1
            )));
        }
        Ok(())
    }

    /// Writes `data` at `write_point`, wrapping at the end of the ring.
    fn ring_write(&mut self, data: &[u8]) {
        let size = self.buff.len();
        let start = (self.write_point % size as u64) as usize;
        let first = data.len().min(size - start);
        self.buff[start..start + first].copy_from_slice(&data[..first]);
        self.buff[..data.len() - first].copy_from_slice(&data[first..]);
    }

    fn ring_read(&self, offset: u64, dst: &mut [u8]) {
        let size = self.buff.len();
        let start = (offset % size as u64) as usize;
        let first = dst.len().min(size - start);
        let rest = dst.len() - first;
        dst[..first].copy_from_slice(&self.buff[start..start + first]);
        dst[first..].copy_from_slice(&self.buff[..rest]);
    }
}

fn block_on_cancellable<T>(
    runtime: &Handle,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Canceled);
    }
    runtime.block_on(async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Canceled),
            result = fut => result,
        }
    })
}

impl<F: RangeFetcher> Read for RingBufferReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?.n)
    }
}

impl<F: RangeFetcher> Seek for RingBufferReader<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_to(pos)?)
    }
}

impl<F: RangeFetcher> ReadAt for RingBufferReader<F> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset > self.length {
            return Err(out_of_range(offset as i128, self.length).into());
        }
        Ok(self.read_from(offset, buf)?)
    }

    fn size(&self) -> u64 {
        self.length
    }
}

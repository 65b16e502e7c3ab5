mod fetch;
mod http;
mod ring;
mod section;

pub use fetch::{fetch_in_order, Retrying};
pub use http::{ForwardHeaders, HttpRanger};
pub use ring::{ReadOutcome, ReaderConfig, RingBufferReader, DEFAULT_BUFFER_SIZE, DEFAULT_FANOUT, DEFAULT_FETCH_SIZE};
pub use section::SectionReader;

use std::io::{self, Cursor};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Random access reads from a data source of known size.
///
/// This is the capability the ZIP adapter depends on. It does not move any
/// sequential cursor the source may also have.
pub trait ReadAt {
    /// Read data at the specified offset into the buffer. Short only at the end of the source.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let n = self.read_at(offset, buf)?;
        if n < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted {} bytes at offset {offset}, got {n}", buf.len()),
            ));
        }
        Ok(())
    }
}

impl<R: ReadAt + ?Sized> ReadAt for &mut R {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

impl<T: AsRef<[u8]>> ReadAt for Cursor<T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.get_ref().as_ref();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.get_ref().as_ref().len() as u64
    }
}

/// Inclusive byte span `[start, end]` of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Splits `[start, start + len)` into ascending ranges of at most `chunk` bytes.
    pub fn split(start: u64, len: u64, chunk: u64) -> Vec<ByteRange> {
        let mut ranges = Vec::with_capacity(len.div_ceil(chunk.max(1)) as usize);
        let end = start + len;
        let mut at = start;
        while at < end {
            let next = (at + chunk).min(end);
            ranges.push(ByteRange::new(at, next - 1));
            at = next;
        }
        ranges
    }

    /// Value for an HTTP `Range` header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Data returned for one [`ByteRange`]. May be shorter than the range.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub data: Bytes,
}

impl Block {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Fetches byte ranges of a remote resource.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Total length of the resource.
    async fn expected_length(&self) -> Result<u64>;

    /// Fetches disjoint ascending `ranges` with at most `fanout` requests in flight.
    ///
    /// Blocks come back in the order of `ranges`. One failing range fails the
    /// whole call.
    async fn fetch_ranges(&self, ranges: &[ByteRange], fanout: usize) -> Result<Vec<Block>>;
}

pub(crate) fn out_of_range(offset: i128, length: u64) -> Error {
    Error::OutOfRange { offset, length }
}

use std::io::{Read, Write};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use xz2::read::XzDecoder;

use super::{ArchiveAdapter, ArchiveFormat, EntryStream};
use crate::error::{Error, Result};

/// A gzip, bzip2 or xz stream exposed as a single unnamed entry.
///
/// There is nothing to list or pack; opening any entry yields the decoded
/// stream.
pub struct CodecStream<R> {
    format: ArchiveFormat,
    source: R,
}

impl<R: Read + Send + 'static> CodecStream<R> {
    pub fn new(format: ArchiveFormat, source: R) -> Self {
        debug_assert!(format.is_codec());
        Self { format, source }
    }

    fn decode(self) -> Result<EntryStream> {
        match self.format {
            ArchiveFormat::Gzip => Ok(Box::new(MultiGzDecoder::new(self.source))),
            ArchiveFormat::Bzip2 => Ok(Box::new(MultiBzDecoder::new(self.source))),
            ArchiveFormat::Xz => Ok(Box::new(XzDecoder::new_multi_decoder(self.source))),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

impl<R: Read + Send + 'static> ArchiveAdapter for CodecStream<R> {
    fn list(&mut self, _charset: Option<&str>) -> Result<Vec<String>> {
        Err(Error::UnsupportedFormat(format!("listing {}", self.format)))
    }

    fn open_by_name(self: Box<Self>, _name: &str, _charset: Option<&str>) -> Result<EntryStream> {
        self.decode()
    }

    fn open_by_index(self: Box<Self>, _index: usize) -> Result<EntryStream> {
        self.decode()
    }

    fn pack(&mut self, _names: &[String], _charset: Option<&str>, _out: &mut dyn Write) -> Result<()> {
        Err(Error::UnsupportedFormat(format!("packing {}", self.format)))
    }
}

//! Format adapters over seekable sources.
//!
//! Each adapter depends only on the capability it needs:
//!
//! - ZIP reads a trailing directory and needs [`ReadAt`].
//! - TAR, RAR and 7z walk headers from the start and need [`Read`] + [`Seek`].
//! - gzip, bzip2 and xz decode a single stream and need [`Read`].
//!
//! [`open_adapter`] selects the adapter for a resolved [`ArchiveFormat`].

pub mod charset;
mod codec;
pub mod detect;
mod pipe;
mod rar;
mod sevenz;
mod tar;
pub mod zip;

pub use self::codec::CodecStream;
pub use self::rar::RarArchive;
pub use self::sevenz::SevenZArchive;
pub use self::tar::TarArchive;
pub use self::zip::ZipArchive;

use std::fmt;
use std::io::{Read, Seek, Write};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::io::ReadAt;

/// Decoded bytes of one archive entry.
pub type EntryStream = Box<dyn Read + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    Rar,
    SevenZ,
    Gzip,
    Bzip2,
    Xz,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 7] = [
        ArchiveFormat::Rar,
        ArchiveFormat::Zip,
        ArchiveFormat::Tar,
        ArchiveFormat::SevenZ,
        ArchiveFormat::Gzip,
        ArchiveFormat::Bzip2,
        ArchiveFormat::Xz,
    ];

    /// Tag used in query strings and listing responses.
    pub fn tag(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Rar => "rar",
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Gzip => "gzip",
            ArchiveFormat::Bzip2 => "bzip2",
            ArchiveFormat::Xz => "xz",
        }
    }

    /// Single-stream compression without entries.
    pub fn is_codec(self) -> bool {
        matches!(self, ArchiveFormat::Gzip | ArchiveFormat::Bzip2 | ArchiveFormat::Xz)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedFormat(s.to_string()))
    }
}

/// Listing and extraction for one archive.
///
/// Opening an entry consumes the adapter: the returned stream owns the source.
pub trait ArchiveAdapter: Send {
    /// Entry names in the archive's own order; directories end with `/`.
    fn list(&mut self, charset: Option<&str>) -> Result<Vec<String>>;

    /// Opens the first entry whose decoded name equals `name`.
    fn open_by_name(self: Box<Self>, name: &str, charset: Option<&str>) -> Result<EntryStream>;

    fn open_by_index(self: Box<Self>, index: usize) -> Result<EntryStream>;

    /// Writes the entries named in `names` to `out` as a new ZIP archive.
    ///
    /// Unknown names are skipped.
    fn pack(&mut self, names: &[String], charset: Option<&str>, out: &mut dyn Write) -> Result<()>;
}

/// Anything the adapters can read from.
pub trait ArchiveSource: Read + Seek + ReadAt + Send + 'static {}

impl<T: Read + Seek + ReadAt + Send + 'static> ArchiveSource for T {}

pub fn open_adapter<R: ArchiveSource>(format: ArchiveFormat, source: R) -> Box<dyn ArchiveAdapter> {
    match format {
        ArchiveFormat::Zip => Box::new(ZipArchive::new(source)),
        ArchiveFormat::Tar => Box::new(TarArchive::new(source)),
        ArchiveFormat::Rar => Box::new(RarArchive::new(source)),
        ArchiveFormat::SevenZ => Box::new(SevenZArchive::new(source)),
        ArchiveFormat::Gzip | ArchiveFormat::Bzip2 | ArchiveFormat::Xz => Box::new(CodecStream::new(format, source)),
    }
}

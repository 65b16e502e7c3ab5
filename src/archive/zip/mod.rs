//! ZIP archives over a random-access source.
//!
//! Only the end record, the central directory and the local headers of
//! opened entries are read, so a remote archive is listed with a handful of
//! range requests.
//!
//! ## Supported Features
//!
//! - ZIP64 end records and extra fields
//! - Archive comments
//! - STORED, DEFLATE and BZIP2 entries
//! - UTF-8 flagged names, legacy names decoded with a caller charset
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support

mod parser;
mod structures;
mod writer;

pub use parser::ZipParser;
pub use structures::*;
pub use writer::ZipWriter;

use std::collections::HashSet;
use std::io::{Read, Write};

use bzip2::read::BzDecoder;
use flate2::read::DeflateDecoder;
use tracing::debug;

use super::charset::NameDecoder;
use super::{ArchiveAdapter, EntryStream};
use crate::error::{Error, Result};
use crate::io::{ReadAt, SectionReader};

pub struct ZipArchive<R> {
    parser: ZipParser<R>,
    entries: Option<Vec<ZipFileEntry>>,
}

impl<R: ReadAt + Send + 'static> ZipArchive<R> {
    pub fn new(source: R) -> Self {
        Self {
            parser: ZipParser::new(source),
            entries: None,
        }
    }

    /// Central directory, read once.
    pub fn entries(&mut self) -> Result<&[ZipFileEntry]> {
        if self.entries.is_none() {
            let entries = self.parser.list_files()?;
            debug!(count = entries.len(), "read ZIP central directory");
            self.entries = Some(entries);
        }
        Ok(self.entries.as_deref().unwrap_or_default())
    }

    fn open_entry(mut self, index: usize) -> Result<EntryStream> {
        let entry = self.entry_at(index)?;
        let offset = self.parser.data_offset(&entry)?;
        let section = SectionReader::new(self.parser.into_reader(), offset, entry.compressed_size);
        entry_reader(&entry, section)
    }

    fn entry_at(&mut self, index: usize) -> Result<ZipFileEntry> {
        let entries = self.entries()?;
        entries.get(index).cloned().ok_or(Error::IndexOutOfRange {
            index,
            count: entries.len(),
        })
    }
}

/// Wraps an entry's data span in the decoder its method needs.
fn entry_reader<'a, S: Read + Send + 'a>(entry: &ZipFileEntry, section: S) -> Result<Box<dyn Read + Send + 'a>> {
    if entry.is_encrypted() {
        return Err(Error::archive("encrypted entries are not supported"));
    }
    match entry.compression_method {
        CompressionMethod::Stored => Ok(Box::new(section)),
        CompressionMethod::Deflate => Ok(Box::new(DeflateDecoder::new(section))),
        CompressionMethod::Bzip2 => Ok(Box::new(BzDecoder::new(section))),
        CompressionMethod::Unknown(method) => Err(Error::archive(format!(
            "unsupported compression method {method}"
        ))),
    }
}

impl<R: ReadAt + Send + 'static> ArchiveAdapter for ZipArchive<R> {
    fn list(&mut self, charset: Option<&str>) -> Result<Vec<String>> {
        let names = NameDecoder::new(charset);
        Ok(self.entries()?.iter().map(|e| e.name.decode(&names)).collect())
    }

    fn open_by_name(mut self: Box<Self>, name: &str, charset: Option<&str>) -> Result<EntryStream> {
        let names = NameDecoder::new(charset);
        let index = self
            .entries()?
            .iter()
            .position(|e| e.name.decode(&names) == name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        self.open_entry(index)
    }

    fn open_by_index(self: Box<Self>, index: usize) -> Result<EntryStream> {
        self.open_entry(index)
    }

    fn pack(&mut self, names: &[String], charset: Option<&str>, out: &mut dyn Write) -> Result<()> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let names = NameDecoder::new(charset);
        let selected: Vec<(String, ZipFileEntry)> = self
            .entries()?
            .iter()
            .map(|e| (e.name.decode(&names), e))
            .filter(|(name, _)| wanted.contains(name.as_str()))
            .map(|(name, e)| (name, e.clone()))
            .collect();

        let mut writer = ZipWriter::new(out);
        for (name, entry) in &selected {
            if entry.is_directory {
                writer.add_directory(name)?;
                continue;
            }
            let offset = self.parser.data_offset(entry)?;
            let section = SectionReader::new(self.parser.reader_mut(), offset, entry.compressed_size);
            let mut data = entry_reader(entry, section)?;
            writer.add_file(name, &mut data)?;
        }
        writer.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;

    fn sample(method: zip::CompressionMethod) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().compression_method(method);
        writer.start_file("a.txt", options).unwrap();
        writer.write_all(b"hi").unwrap();
        writer.add_directory("b/", options).unwrap();
        writer.start_file("c.bin", options).unwrap();
        writer.write_all(&[0xAB; 16]).unwrap();
        writer.set_comment("trailing comment");
        writer.finish().unwrap().into_inner()
    }

    fn read_all(mut stream: EntryStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn lists_in_directory_order() {
        let mut archive = ZipArchive::new(Cursor::new(sample(zip::CompressionMethod::Deflated)));
        assert_eq!(archive.list(None).unwrap(), ["a.txt", "b/", "c.bin"]);
    }

    #[test]
    fn opens_stored_and_deflated_entries() {
        for method in [zip::CompressionMethod::Stored, zip::CompressionMethod::Deflated] {
            let bytes = sample(method);
            let archive = Box::new(ZipArchive::new(Cursor::new(bytes.clone())));
            assert_eq!(read_all(archive.open_by_name("a.txt", None).unwrap()), b"hi");
            let archive = Box::new(ZipArchive::new(Cursor::new(bytes.clone())));
            assert_eq!(read_all(archive.open_by_index(2).unwrap()), [0xAB; 16]);
            let archive = Box::new(ZipArchive::new(Cursor::new(bytes)));
            assert!(read_all(archive.open_by_index(1).unwrap()).is_empty());
        }
    }

    #[test]
    fn missing_entries_are_reported() {
        let bytes = sample(zip::CompressionMethod::Deflated);
        let archive = Box::new(ZipArchive::new(Cursor::new(bytes.clone())));
        assert!(matches!(archive.open_by_name("nope", None), Err(Error::EntryNotFound(_))));
        let archive = Box::new(ZipArchive::new(Cursor::new(bytes)));
        assert!(matches!(
            archive.open_by_index(3),
            Err(Error::IndexOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn legacy_names_use_the_charset() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("x.txt", options).unwrap();
        writer.write_all(b"x").unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();

        // Rewrite the stored name to GBK "中文" without the UTF-8 flag.
        let gbk = [0xD6u8, 0xD0, 0xCE, 0xC4, b'.', b't', b'x', b't'];
        let mut i = 0;
        while i + 5 <= bytes.len() {
            if &bytes[i..i + 5] == b"x.txt" {
                bytes.splice(i..i + 5, gbk.iter().copied());
            }
            i += 1;
        }
        bytes[26] = gbk.len() as u8;
        let cd = bytes.windows(4).position(|w| w == CDFH_SIGNATURE).unwrap();
        bytes[cd + 28] = gbk.len() as u8;
        let eocd = bytes.windows(4).rposition(|w| w == EndOfCentralDirectory::SIGNATURE).unwrap();
        let cd_offset = cd as u32;
        bytes[eocd + 16..eocd + 20].copy_from_slice(&cd_offset.to_le_bytes());
        let cd_size = (eocd - cd) as u32;
        bytes[eocd + 12..eocd + 16].copy_from_slice(&cd_size.to_le_bytes());

        let mut archive = ZipArchive::new(Cursor::new(bytes.clone()));
        assert_eq!(archive.list(Some("gbk")).unwrap(), ["中文.txt"]);
        let archive = Box::new(ZipArchive::new(Cursor::new(bytes)));
        assert_eq!(read_all(archive.open_by_name("中文.txt", Some("gbk")).unwrap()), b"x");
    }

    #[test]
    fn pack_copies_only_requested_entries() {
        let mut archive = ZipArchive::new(Cursor::new(sample(zip::CompressionMethod::Deflated)));
        let mut out = Vec::new();
        archive
            .pack(&["c.bin".to_string(), "b/".to_string(), "missing".to_string()], None, &mut out)
            .unwrap();

        let mut packed = ZipArchive::new(Cursor::new(out));
        assert_eq!(packed.list(None).unwrap(), ["b/", "c.bin"]);
        let packed = Box::new(packed);
        assert_eq!(read_all(packed.open_by_name("c.bin", None).unwrap()), [0xAB; 16]);
    }

    #[test]
    fn garbage_is_not_a_zip() {
        let mut archive = ZipArchive::new(Cursor::new(vec![0x55u8; 100]));
        assert!(matches!(archive.list(None), Err(Error::Archive(_))));
        let mut tiny = ZipArchive::new(Cursor::new(b"PK".to_vec()));
        assert!(matches!(tiny.list(None), Err(Error::Archive(_))));
    }
}

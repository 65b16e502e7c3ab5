use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::debug;

use super::charset::{NameDecoder, RawName};
use super::zip::ZipWriter;
use super::{ArchiveAdapter, EntryStream};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct TarEntry {
    name: RawName,
    is_directory: bool,
    /// Offset of the entry payload in the archive.
    data_offset: u64,
    size: u64,
}

/// TAR archive walked header by header; payloads are skipped with forward seeks.
pub struct TarArchive<R> {
    source: R,
    entries: Option<Vec<TarEntry>>,
}

impl<R: Read + Seek + Send + 'static> TarArchive<R> {
    pub fn new(source: R) -> Self {
        Self { source, entries: None }
    }

    fn entries(&mut self) -> Result<&[TarEntry]> {
        if self.entries.is_none() {
            let entries = scan(&mut self.source)?;
            debug!(count = entries.len(), "walked TAR headers");
            self.entries = Some(entries);
        }
        Ok(self.entries.as_deref().unwrap_or_default())
    }

    fn entry_reader(&mut self, entry: &TarEntry) -> Result<io::Take<&mut R>> {
        self.source.seek(SeekFrom::Start(entry.data_offset))?;
        Ok(self.source.by_ref().take(entry.size))
    }

    fn open_entry(mut self, index: usize) -> Result<EntryStream> {
        let entries = self.entries()?;
        let entry = entries.get(index).cloned().ok_or(Error::IndexOutOfRange {
            index,
            count: entries.len(),
        })?;
        self.source.seek(SeekFrom::Start(entry.data_offset))?;
        Ok(Box::new(self.source.take(entry.size)))
    }
}

fn scan<R: Read + Seek>(source: &mut R) -> Result<Vec<TarEntry>> {
    source.seek(SeekFrom::Start(0))?;
    let mut archive = ::tar::Archive::new(source);
    let mut entries = Vec::new();
    for entry in archive.entries_with_seek()? {
        let entry = entry?;
        let is_directory = entry.header().entry_type().is_dir();
        let mut name = entry.path_bytes().into_owned();
        if is_directory && name.last() != Some(&b'/') {
            name.push(b'/');
        }
        entries.push(TarEntry {
            name: RawName::legacy(name),
            is_directory,
            data_offset: entry.raw_file_position(),
            size: entry.header().entry_size()?,
        });
    }
    Ok(entries)
}

impl<R: Read + Seek + Send + 'static> ArchiveAdapter for TarArchive<R> {
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
        let decoder = NameDecoder::new(charset);
        let selected: Vec<(String, TarEntry)> = self
            .entries()?
            .iter()
            .map(|e| (e.name.decode(&decoder), e))
            .filter(|(name, _)| wanted.contains(name.as_str()))
            .map(|(name, e)| (name, e.clone()))
            .collect();

        let mut writer = ZipWriter::new(out);
        for (name, entry) in &selected {
            if entry.is_directory {
                writer.add_directory(name)?;
            } else {
                let mut data = self.entry_reader(entry)?;
                writer.add_file(name, &mut data)?;
            }
        }
        writer.finish()?;
        Ok(())
    }
}

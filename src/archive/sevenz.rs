//! 7z archives through `sevenz-rust`.
//!
//! The header database is read once. Entries are decoded on a worker thread by
//! walking the folders from their start, and are streamed back through a pipe.
//! `/pack` writes entries in decoder order: folder contents first, then the
//! entries without data (empty files and directories), whatever the header
//! order is.

use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};

use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader};
use tracing::debug;

use super::pipe;
use super::zip::ZipWriter;
use super::{ArchiveAdapter, EntryStream};
use crate::error::{Error, Result};

pub struct SevenZArchive<R: Read + Seek> {
    source: Option<R>,
    reader: Option<SevenZReader<R>>,
}

fn seven_zip_error(e: sevenz_rust::Error) -> Error {
    Error::archive(format!("7z: {e}"))
}

fn entry_name(entry: &SevenZArchiveEntry) -> String {
    let mut name = entry.name().to_string();
    if entry.is_directory() && !name.ends_with('/') {
        name.push('/');
    }
    name
}

impl<R: Read + Seek + Send + 'static> SevenZArchive<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: Some(source),
            reader: None,
        }
    }

    fn reader(&mut self) -> Result<&mut SevenZReader<R>> {
        if self.reader.is_none() {
            let mut source = self
                .source
                .take()
                .ok_or_else(|| Error::archive("7z header could not be read"))?;
            let len = source.seek(SeekFrom::End(0))?;
            source.seek(SeekFrom::Start(0))?;
            let reader = SevenZReader::new(source, len, Password::empty()).map_err(seven_zip_error)?;
            debug!(count = reader.archive().files.len(), "read 7z header");
            self.reader = Some(reader);
        }
        self.reader
            .as_mut()
            .ok_or_else(|| Error::archive("7z header could not be read"))
    }

    fn names(&mut self) -> Result<Vec<String>> {
        Ok(self.reader()?.archive().files.iter().map(entry_name).collect())
    }

    /// Streams the entry at header position `index`.
    fn open_entry(mut self, index: usize) -> Result<EntryStream> {
        let count = self.reader()?.archive().files.len();
        if index >= count {
            return Err(Error::IndexOutOfRange { index, count });
        }
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| Error::archive("7z header could not be read"))?;

        let stream = pipe::spawn("7z-extract", move |mut out| {
            // The walk hands out references into the header's file table, so
            // the entry is identified by address, not by name.
            let target: *const SevenZArchiveEntry = &reader.archive().files[index];
            let mut found = false;
            let mut failure = None;
            reader
                .for_each_entries(|entry, data| {
                    if found {
                        return Ok(false);
                    }
                    if !std::ptr::eq(entry, target) {
                        io::copy(data, &mut io::sink())?;
                        return Ok(true);
                    }
                    found = true;
                    if let Err(e) = io::copy(data, &mut out) {
                        failure = Some(e);
                    }
                    Ok(false)
                })
                .map_err(seven_zip_error)?;
            if let Some(e) = failure {
                return Err(e.into());
            }
            if !found {
                return Err(Error::archive(format!("7z entry {index} was not decoded")));
            }
            Ok(())
        })?;
        Ok(Box::new(stream))
    }
}

impl<R: Read + Seek + Send + 'static> ArchiveAdapter for SevenZArchive<R> {
    fn list(&mut self, _charset: Option<&str>) -> Result<Vec<String>> {
        // Names are stored as UTF-16; no charset applies.
        self.names()
    }

    fn open_by_name(mut self: Box<Self>, name: &str, _charset: Option<&str>) -> Result<EntryStream> {
        let index = self
            .names()?
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        self.open_entry(index)
    }

    fn open_by_index(self: Box<Self>, index: usize) -> Result<EntryStream> {
        self.open_entry(index)
    }

    fn pack(&mut self, names: &[String], _charset: Option<&str>, out: &mut dyn Write) -> Result<()> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut writer = ZipWriter::new(out);
        let mut failure = None;
        self.reader()?
            .for_each_entries(|entry, data| {
                let name = entry_name(entry);
                let written = if !wanted.contains(name.as_str()) {
                    io::copy(data, &mut io::sink()).map(|_| ()).map_err(Error::from)
                } else if entry.is_directory() {
                    writer.add_directory(&name)
                } else {
                    writer.add_file(&name, data)
                };
                match written {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        failure = Some(e);
                        Ok(false)
                    }
                }
            })
            .map_err(seven_zip_error)?;
        if let Some(e) = failure {
            return Err(e);
        }
        writer.finish()?;
        Ok(())
    }
}

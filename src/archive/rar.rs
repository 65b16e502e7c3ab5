//! RAR 1.3 through RAR 5.0 archives through `rars`.
//!
//! Headers are parsed once. Entries are decoded on a worker thread and read
//! back through a pipe, so compressed entries stream like stored ones. In a
//! solid archive every entry before the requested one is decoded and
//! discarded. Encrypted and multi-volume entries are listed but fail to open.

use std::collections::HashSet;
use std::io::{self, Read, Seek, Write};

use rars::{ArchiveMember, ArchiveReadOptions, ArchiveReader, ExtractionDecision};
use tracing::debug;

use super::charset::{NameDecoder, RawName};
use super::pipe;
use super::zip::ZipWriter;
use super::{ArchiveAdapter, EntryStream};
use crate::error::{Error, Result};

/// RAR5 members up to this size are decoded in one piece; larger ones stream.
const RAR5_BUFFERED_DECODE_LIMIT: u64 = 16 * 1024 * 1024;

fn read_options() -> ArchiveReadOptions<'static> {
    ArchiveReadOptions::new().with_rar50_buffered_decode_limit(RAR5_BUFFERED_DECODE_LIMIT)
}

/// Maps a `rars` failure, recovering errors raised by our own source.
fn rar_error(err: rars::Error) -> Error {
    if let rars::Error::Io(failure) = err.root_cause() {
        let ours = failure
            .source()
            .downcast_ref::<io::Error>()
            .and_then(|inner| inner.get_ref())
            .and_then(|inner| inner.downcast_ref::<Error>());
        return match ours {
            Some(ours) => ours.reissue(),
            None => Error::from(io::Error::new(failure.kind, failure.message.clone())),
        };
    }
    Error::archive(format!("rar: {err}"))
}

/// Display name with `/` separators and a trailing `/` on directories.
fn display_name(member: &ArchiveMember, decoder: &NameDecoder) -> String {
    let raw = if member.name_is_unicode() {
        RawName::utf8(String::from_utf8_lossy(&member.meta.name).into_owned())
    } else {
        RawName::legacy(member.meta.name.clone())
    };
    let mut name = raw.decode(decoder).replace('\\', "/");
    if member.meta.is_directory && !name.ends_with('/') {
        name.push('/');
    }
    name
}

fn ensure_extractable(member: &ArchiveMember) -> Result<()> {
    let name = String::from_utf8_lossy(&member.meta.name);
    if member.meta.is_encrypted {
        return Err(Error::archive(format!("{name} is encrypted")));
    }
    if member.meta.is_split_before || member.meta.is_split_after {
        return Err(Error::archive(format!("{name} spans multiple volumes")));
    }
    Ok(())
}

fn is_solid(archive: &rars::Archive, members: &[ArchiveMember]) -> bool {
    let main = match archive {
        rars::Archive::Rar13(legacy) => legacy.main.is_solid(),
        rars::Archive::Rar15To40(legacy) => legacy.main.is_solid(),
        rars::Archive::Rar50Plus(current) => current.main.is_solid(),
        _ => true,
    };
    main || members.iter().any(ArchiveMember::is_solid)
}

/// Decision for a member nobody asked for. Solid history has to be decoded.
fn pass_over(member: &ArchiveMember, solid: bool) -> ExtractionDecision {
    if solid && !member.meta.is_directory && !member.meta.is_redirection {
        ExtractionDecision::Extract(Box::new(io::sink()))
    } else {
        ExtractionDecision::Skip
    }
}

pub struct RarArchive<R> {
    source: Option<R>,
    archive: Option<rars::Archive>,
}

impl<R: Read + Seek + Send + 'static> RarArchive<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: Some(source),
            archive: None,
        }
    }

    fn archive(&mut self) -> Result<&rars::Archive> {
        if self.archive.is_none() {
            let source = self
                .source
                .take()
                .ok_or_else(|| Error::archive("RAR headers could not be read"))?;
            let archive = ArchiveReader::read_reader(source).map_err(rar_error)?;
            debug!(count = archive.members().count(), family = ?archive.family(), "parsed RAR headers");
            self.archive = Some(archive);
        }
        self.archive
            .as_ref()
            .ok_or_else(|| Error::archive("RAR headers could not be read"))
    }

    fn members(&mut self) -> Result<Vec<ArchiveMember>> {
        Ok(self.archive()?.members().collect())
    }

    fn open_entry(mut self, index: usize) -> Result<EntryStream> {
        let members = self.members()?;
        let target = members.get(index).cloned().ok_or(Error::IndexOutOfRange {
            index,
            count: members.len(),
        })?;
        if target.meta.is_directory {
            return Ok(Box::new(io::empty()));
        }
        ensure_extractable(&target)?;
        // Identical headers are told apart by how many precede the target.
        let occurrence = members[..index].iter().filter(|m| **m == target).count();
        let solid = self.archive().map(|archive| is_solid(archive, &members))?;
        let archive = self
            .archive
            .take()
            .ok_or_else(|| Error::archive("RAR headers could not be read"))?;

        let reader = pipe::spawn("rar-extract", move |out| {
            let mut seen = 0;
            let mut found = false;
            archive
                .extract_with_control(read_options(), |member| {
                    if found {
                        return Ok(ExtractionDecision::Stop);
                    }
                    if *member == target {
                        if seen == occurrence {
                            found = true;
                            return Ok(ExtractionDecision::Extract(Box::new(out.clone())));
                        }
                        seen += 1;
                    }
                    Ok(pass_over(member, solid))
                })
                .map_err(rar_error)?;
            if !found {
                return Err(Error::EntryNotFound(String::from_utf8_lossy(&target.meta.name).into_owned()));
            }
            Ok(())
        })?;
        Ok(Box::new(reader))
    }
}

impl<R: Read + Seek + Send + 'static> ArchiveAdapter for RarArchive<R> {
    fn list(&mut self, charset: Option<&str>) -> Result<Vec<String>> {
        let decoder = NameDecoder::new(charset);
        Ok(self.archive()?.members().map(|m| display_name(&m, &decoder)).collect())
    }

    fn open_by_name(mut self: Box<Self>, name: &str, charset: Option<&str>) -> Result<EntryStream> {
        let decoder = NameDecoder::new(charset);
        let index = self
            .members()?
            .iter()
            .position(|m| display_name(m, &decoder) == name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        self.open_entry(index)
    }

    fn open_by_index(self: Box<Self>, index: usize) -> Result<EntryStream> {
        self.open_entry(index)
    }

    fn pack(&mut self, names: &[String], charset: Option<&str>, out: &mut dyn Write) -> Result<()> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let decoder = NameDecoder::new(charset);
        let members = self.members()?;
        let mut selected = Vec::with_capacity(members.len());
        for member in &members {
            let name = display_name(member, &decoder);
            if !wanted.contains(name.as_str()) {
                selected.push(None);
                continue;
            }
            if !member.meta.is_directory {
                ensure_extractable(member)?;
            }
            selected.push(Some(name));
        }
        let archive = self.archive()?.clone();
        let solid = is_solid(&archive, &members);

        let mut entries = pipe::spawn("rar-pack", move |out| {
            let mut position = 0;
            archive
                .extract_with_control(read_options(), |member| {
                    let name = match members.get(position) {
                        Some(expected) if expected == member => selected[position].clone(),
                        _ => None,
                    };
                    position += 1;
                    let Some(name) = name else {
                        return Ok(pass_over(member, solid));
                    };
                    out.begin_entry(name, member.meta.is_directory)?;
                    if member.meta.is_directory {
                        return Ok(ExtractionDecision::Skip);
                    }
                    Ok(ExtractionDecision::Extract(Box::new(out.clone())))
                })
                .map_err(rar_error)?;
            Ok(())
        })?;

        let mut writer = ZipWriter::new(out);
        while let Some((name, is_directory)) = entries.next_entry()? {
            if is_directory {
                writer.add_directory(&name)?;
            } else {
                writer.add_file(&name, &mut entries)?;
            }
        }
        writer.finish()?;
        Ok(())
    }
}

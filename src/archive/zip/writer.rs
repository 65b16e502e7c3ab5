//! Streaming ZIP writer for `/pack` responses.
//!
//! The output is never seeked: file entries are Deflate-compressed with sizes
//! and CRC in a trailing data descriptor, then the central directory and EOCD
//! close the archive. Offsets are tracked by counting written bytes.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::io::{self, Read, Write};

use crate::error::{Error, Result};

use super::structures::{
    CompressionMethod, CDFH_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE, FLAG_DATA_DESCRIPTOR, FLAG_UTF8, LFH_SIGNATURE,
};

const VERSION: u16 = 20;
/// 1980-01-01 00:00:00
const DOS_DATE: u16 = (1 << 5) | 1;
const DOS_TIME: u16 = 0;
const ATTR_DIRECTORY: u32 = 0x10;
const COPY_BUFFER: usize = 64 * 1024;

struct CentralRecord {
    name: String,
    flags: u16,
    method: CompressionMethod,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    lfh_offset: u32,
    external_attrs: u32,
}

/// Counts bytes on their way to the inner writer.
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct ZipWriter<W: Write> {
    out: CountingWriter<W>,
    records: Vec<CentralRecord>,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: CountingWriter { inner: out, written: 0 },
            records: Vec::new(),
        }
    }

    /// Adds an empty stored entry; a trailing `/` is appended when missing.
    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{name}/")
        };
        let lfh_offset = self.offset32()?;
        self.write_local_header(&name, FLAG_UTF8, CompressionMethod::Stored)?;
        self.records.push(CentralRecord {
            name,
            flags: FLAG_UTF8,
            method: CompressionMethod::Stored,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            lfh_offset,
            external_attrs: ATTR_DIRECTORY,
        });
        Ok(())
    }

    /// Compresses everything `data` yields into a new entry.
    pub fn add_file(&mut self, name: &str, data: &mut dyn Read) -> Result<()> {
        let flags = FLAG_UTF8 | FLAG_DATA_DESCRIPTOR;
        let lfh_offset = self.offset32()?;
        self.write_local_header(name, flags, CompressionMethod::Deflate)?;

        let data_start = self.out.written;
        let mut crc = Crc::new();
        let mut total = 0u64;
        let mut encoder = DeflateEncoder::new(&mut self.out, Compression::default());
        let mut buf = vec![0u8; COPY_BUFFER];
        loop {
            let n = match data.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            crc.update(&buf[..n]);
            total += n as u64;
            encoder.write_all(&buf[..n])?;
        }
        encoder.finish()?;

        let compressed = self.out.written - data_start;
        let (compressed_size, uncompressed_size) = match (u32::try_from(compressed), u32::try_from(total)) {
            (Ok(c), Ok(u)) if c != u32::MAX && u != u32::MAX => (c, u),
            _ => return Err(Error::archive(format!("{name} is too large for a packed archive"))),
        };

        self.out.write_all(DATA_DESCRIPTOR_SIGNATURE)?;
        self.out.write_u32::<LittleEndian>(crc.sum())?;
        self.out.write_u32::<LittleEndian>(compressed_size)?;
        self.out.write_u32::<LittleEndian>(uncompressed_size)?;

        self.records.push(CentralRecord {
            name: name.to_string(),
            flags,
            method: CompressionMethod::Deflate,
            crc32: crc.sum(),
            compressed_size,
            uncompressed_size,
            lfh_offset,
            external_attrs: 0,
        });
        Ok(())
    }

    /// Writes the central directory and end record, returning the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let cd_offset = self.offset32()?;
        let count = u16::try_from(self.records.len())
            .map_err(|_| Error::archive("too many entries for a packed archive"))?;

        for record in &self.records {
            let out = &mut self.out;
            out.write_all(CDFH_SIGNATURE)?;
            out.write_u16::<LittleEndian>(VERSION)?;
            out.write_u16::<LittleEndian>(VERSION)?;
            out.write_u16::<LittleEndian>(record.flags)?;
            out.write_u16::<LittleEndian>(record.method.as_u16())?;
            out.write_u16::<LittleEndian>(DOS_TIME)?;
            out.write_u16::<LittleEndian>(DOS_DATE)?;
            out.write_u32::<LittleEndian>(record.crc32)?;
            out.write_u32::<LittleEndian>(record.compressed_size)?;
            out.write_u32::<LittleEndian>(record.uncompressed_size)?;
            out.write_u16::<LittleEndian>(record.name.len() as u16)?;
            out.write_u16::<LittleEndian>(0)?; // extra
            out.write_u16::<LittleEndian>(0)?; // comment
            out.write_u16::<LittleEndian>(0)?; // disk
            out.write_u16::<LittleEndian>(0)?; // internal attrs
            out.write_u32::<LittleEndian>(record.external_attrs)?;
            out.write_u32::<LittleEndian>(record.lfh_offset)?;
            out.write_all(record.name.as_bytes())?;
        }

        let cd_size = u32::try_from(self.out.written - cd_offset as u64)
            .map_err(|_| Error::archive("central directory is too large"))?;
        let out = &mut self.out;
        out.write_all(b"PK\x05\x06")?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u32::<LittleEndian>(cd_size)?;
        out.write_u32::<LittleEndian>(cd_offset)?;
        out.write_u16::<LittleEndian>(0)?;
        out.flush()?;

        Ok(self.out.inner)
    }

    fn offset32(&self) -> Result<u32> {
        u32::try_from(self.out.written)
            .ok()
            .filter(|offset| *offset != u32::MAX)
            .ok_or_else(|| Error::archive("packed archive exceeds 4 GiB"))
    }

    fn write_local_header(&mut self, name: &str, flags: u16, method: CompressionMethod) -> Result<()> {
        let name_len =
            u16::try_from(name.len()).map_err(|_| Error::archive(format!("entry name too long: {name}")))?;
        let out = &mut self.out;
        out.write_all(LFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(VERSION)?;
        out.write_u16::<LittleEndian>(flags)?;
        out.write_u16::<LittleEndian>(method.as_u16())?;
        out.write_u16::<LittleEndian>(DOS_TIME)?;
        out.write_u16::<LittleEndian>(DOS_DATE)?;
        // CRC and sizes are zero here: either empty or deferred to the descriptor.
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(name_len)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_all(name.as_bytes())?;
        Ok(())
    }
}

//! Low-level ZIP archive parser.
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Listing only touches the tail of the archive, so a remote source fetches a
//! few ranges instead of the whole file.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::archive::charset::RawName;
use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Reads ZIP structures from a [`ReadAt`] source.
pub struct ZipParser<R> {
    reader: R,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: R) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Returns the record and its offset in the archive.
    pub fn find_eocd(&mut self) -> Result<(EndOfCentralDirectory, u64)> {
        // Common case first: no archive comment.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_exact_at(offset, &mut buf)?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        // The EOCD sits before a comment of up to 64 KiB.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        let last = buf.len().checked_sub(EndOfCentralDirectory::SIZE);
        for i in last.into_iter().flat_map(|last| (0..=last).rev()) {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length must account for every remaining byte.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(Error::archive("not a valid ZIP file"))
    }

    /// Read the ZIP64 End of Central Directory record that the locator right
    /// before the regular EOCD points to.
    pub fn read_zip64_eocd(&mut self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::archive("ZIP64 locator is missing"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader.read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// List all entries in central directory order.
    pub fn list_files(&mut self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset)?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > eocd_offset {
            return Err(Error::archive("central directory overlaps its end record"));
        }
        // Every header takes at least CDFH_MIN_SIZE bytes.
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            return Err(Error::archive("central directory is too small for its entry count"));
        }

        // One read for the whole directory.
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data)?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..total_entries {
            entries.push(parse_cdfh(&mut cursor)?);
        }

        Ok(entries)
    }

    /// Offset of an entry's data, past its Local File Header.
    ///
    /// The LFH name and extra fields may differ in length from the central
    /// directory copy, so the header itself is read.
    pub fn data_offset(&mut self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf)?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::archive("invalid local file header"));
        }

        let mut cursor = Cursor::new(&lfh_buf[26..]);
        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_reader(self) -> R {
        self.reader
    }
}

/// Parse a Central Directory File Header from a cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(Error::archive("invalid central directory file header"));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    let is_directory = file_name_bytes.last() == Some(&b'/');
    let name = if flags & FLAG_UTF8 != 0 {
        RawName::utf8(String::from_utf8_lossy(&file_name_bytes).into_owned())
    } else {
        RawName::legacy(file_name_bytes)
    };

    // ZIP64 extended information lives in extra field 0x0001.
    let extra_field_end = cursor.position() + extra_field_length as u64;

    while cursor.position() + 4 <= extra_field_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()?;
        let field_end = cursor.position() + field_size as u64;

        if header_id == 0x0001 {
            // Present only for header fields saturated at 0xFFFFFFFF, in this order.
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                lfh_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }

    cursor.set_position(extra_field_end + file_comment_length as u64);

    Ok(ZipFileEntry {
        name,
        flags,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        is_directory,
    })
}

use std::io::{Read, Seek, SeekFrom};

use super::ArchiveFormat;
use crate::error::{Error, Result};

/// Bytes inspected when no format was declared.
pub const SNIFF_LEN: usize = 512;

const MAGICS: &[(&[u8], ArchiveFormat)] = &[
    (b"PK\x03\x04", ArchiveFormat::Zip),
    (b"PK\x05\x06", ArchiveFormat::Zip),
    (b"PK\x07\x08", ArchiveFormat::Zip),
    (b"Rar!\x1a\x07", ArchiveFormat::Rar),
    (b"7z\xbc\xaf\x27\x1c", ArchiveFormat::SevenZ),
    (b"\x1f\x8b", ArchiveFormat::Gzip),
    (b"BZh", ArchiveFormat::Bzip2),
    (b"\xfd7zXZ\x00", ArchiveFormat::Xz),
];

/// Identifies the format from the leading bytes of a resource.
pub fn detect(head: &[u8]) -> Result<ArchiveFormat> {
    if let Some((_, format)) = MAGICS.iter().find(|(magic, _)| head.starts_with(magic)) {
        return Ok(*format);
    }
    if is_tar_header(head) {
        return Ok(ArchiveFormat::Tar);
    }
    Err(Error::MimeDetection(describe(head)))
}

/// Detects the format from the first [`SNIFF_LEN`] bytes and leaves the
/// source rewound to offset 0.
pub fn sniff<R: Read + Seek>(source: &mut R) -> Result<ArchiveFormat> {
    source.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    source.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    source.seek(SeekFrom::Start(0))?;
    detect(&head)
}

fn is_tar_header(head: &[u8]) -> bool {
    if head.len() < 512 {
        return false;
    }
    if &head[257..262] == b"ustar" {
        return true;
    }
    // Pre-POSIX archives only carry the header checksum.
    let Some(stored) = parse_octal(&head[148..156]) else {
        return false;
    };
    let computed: u64 = head[..512]
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { b' ' as u64 } else { *b as u64 })
        .sum();
    head[0] != 0 && stored == computed
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits = std::str::from_utf8(field)
        .ok()?
        .trim_matches(|c: char| c == ' ' || c == '\0');
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 8).ok()
}

fn describe(head: &[u8]) -> String {
    let shown: Vec<String> = head.iter().take(8).map(|b| format!("{b:02x}")).collect();
    if shown.is_empty() {
        "empty resource".to_string()
    } else {
        format!("unrecognized leading bytes {}", shown.join(" "))
    }
}

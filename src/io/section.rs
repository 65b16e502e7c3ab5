use std::io::{self, Read};

use super::ReadAt;

/// Sequential reader over `[offset, offset + len)` of a [`ReadAt`] source.
pub struct SectionReader<R> {
    source: R,
    pos: u64,
    end: u64,
}

impl<R: ReadAt> SectionReader<R> {
    pub fn new(source: R, offset: u64, len: u64) -> Self {
        Self {
            source,
            pos: offset,
            end: offset.saturating_add(len),
        }
    }

    /// Bytes left in the section.
    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: ReadAt> Read for SectionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (self.remaining().min(buf.len() as u64)) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self.source.read_at(self.pos, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended at {} inside a section ending at {}", self.pos, self.end),
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn reads_only_the_section() {
        let mut section = SectionReader::new(Cursor::new(b"0123456789".to_vec()), 3, 4);
        let mut out = String::new();
        section.read_to_string(&mut out).unwrap();
        assert_eq!(out, "3456");
        assert_eq!(section.remaining(), 0);
    }

    #[test]
    fn truncated_source_is_an_error() {
        let mut section = SectionReader::new(Cursor::new(b"0123".to_vec()), 2, 10);
        let mut out = Vec::new();
        let err = section.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(out, b"23");
    }
}

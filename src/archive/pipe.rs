//! Decoding on a dedicated thread, read back through a bounded channel.
//!
//! Some decoders only push their output into a `Write`. They run on a worker
//! thread here and the caller reads the entries back as a plain `Read`. Every
//! run ends with an explicit end or failure frame; a worker that disappears
//! without one (a panic) is reported as an error, never as a short entry.

use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use tracing::debug;

use crate::error::{Error, Result};

const PIPE_DEPTH: usize = 8;
const FRAME_SIZE: usize = 64 * 1024;

enum Frame {
    Entry { name: String, is_directory: bool },
    Data(Vec<u8>),
    End,
    Failed(Error),
}

/// Worker side of a pipe. Clones feed the same reader.
#[derive(Clone)]
pub(crate) struct PipeWriter {
    tx: SyncSender<Frame>,
}

impl PipeWriter {
    /// Starts a new entry; data written afterwards belongs to it.
    pub(crate) fn begin_entry(&self, name: String, is_directory: bool) -> io::Result<()> {
        self.send(Frame::Entry { name, is_directory })
    }

    fn send(&self, frame: Frame) -> io::Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive reader went away"))
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(FRAME_SIZE);
        self.send(Frame::Data(buf[..n].to_vec()))?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader side of a pipe.
///
/// `read` returns the bytes of the current entry and `Ok(0)` at its end.
/// Runs that announce entries are walked with [`PipeReader::next_entry`].
pub(crate) struct PipeReader {
    rx: Receiver<Frame>,
    current: Vec<u8>,
    pos: usize,
    pending: Option<(String, bool)>,
    finished: bool,
}

impl PipeReader {
    fn recv(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv() {
            Ok(Frame::End) => {
                self.finished = true;
                Ok(None)
            }
            Ok(Frame::Failed(e)) => {
                self.finished = true;
                Err(e)
            }
            Ok(frame) => Ok(Some(frame)),
            Err(_) => {
                self.finished = true;
                Err(Error::Io(io::Error::other("archive decoder stopped unexpectedly")))
            }
        }
    }

    /// Moves to the next announced entry, dropping what is left of the
    /// current one. `None` once the worker is done.
    pub(crate) fn next_entry(&mut self) -> Result<Option<(String, bool)>> {
        self.current.clear();
        self.pos = 0;
        if let Some(entry) = self.pending.take() {
            return Ok(Some(entry));
        }
        while let Some(frame) = self.recv()? {
            if let Frame::Entry { name, is_directory } = frame {
                return Ok(Some((name, is_directory)));
            }
        }
        Ok(None)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            if self.pending.is_some() {
                return Ok(0);
            }
            match self.recv()? {
                None => return Ok(0),
                Some(Frame::Data(data)) => {
                    self.current = data;
                    self.pos = 0;
                }
                Some(Frame::Entry { name, is_directory }) => {
                    self.pending = Some((name, is_directory));
                    return Ok(0);
                }
                Some(Frame::End | Frame::Failed(_)) => {}
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Runs `work` on a named thread and returns the reading end of its output.
pub(crate) fn spawn<F>(name: &str, work: F) -> Result<PipeReader>
where
    F: FnOnce(PipeWriter) -> Result<()> + Send + 'static,
{
    let (tx, rx) = sync_channel(PIPE_DEPTH);
    let writer = PipeWriter { tx: tx.clone() };
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let last = match work(writer) {
            Ok(()) => Frame::End,
            Err(e) => {
                debug!(error = %e, "archive decoder failed");
                Frame::Failed(e)
            }
        };
        // The reader may already be gone.
        let _ = tx.send(last);
    })?;
    Ok(PipeReader {
        rx,
        current: Vec::new(),
        pos: 0,
        pending: None,
        finished: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(reader: &mut PipeReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn single_run_reads_to_the_end() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
        let expected = data.clone();
        let mut reader = spawn("pipe-test", move |mut out| {
            out.write_all(&data)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(read_all(&mut reader), expected);
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn entries_split_the_stream() {
        let mut reader = spawn("pipe-test", |mut out| {
            out.begin_entry("a.txt".to_string(), false)?;
            out.write_all(b"alpha")?;
            out.begin_entry("d/".to_string(), true)?;
            out.begin_entry("b.txt".to_string(), false)?;
            out.write_all(b"bravo, long enough to be left unread")?;
            out.begin_entry("c.txt".to_string(), false)?;
            out.write_all(b"charlie")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(reader.next_entry().unwrap(), Some(("a.txt".to_string(), false)));
        assert_eq!(read_all(&mut reader), b"alpha");
        assert_eq!(reader.next_entry().unwrap(), Some(("d/".to_string(), true)));
        assert!(read_all(&mut reader).is_empty());
        assert_eq!(reader.next_entry().unwrap(), Some(("b.txt".to_string(), false)));
        let mut head = [0u8; 5];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"bravo");
        assert_eq!(reader.next_entry().unwrap(), Some(("c.txt".to_string(), false)));
        assert_eq!(read_all(&mut reader), b"charlie");
        assert_eq!(reader.next_entry().unwrap(), None);
    }

    #[test]
    fn failures_reach_the_reader() {
        let mut reader = spawn("pipe-test", |mut out| {
            out.write_all(b"partial")?;
            Err(Error::archive("checksum mismatch"))
        })
        .unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert!(matches!(Error::from(err), Error::Archive(_)));
    }

    #[test]
    fn a_panicking_worker_is_an_error() {
        let mut reader = spawn("pipe-test", |mut out| {
            out.write_all(b"partial")?;
            panic!("decoder bug");
        })
        .unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn dropping_the_reader_stops_the_worker() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let reader = spawn("pipe-test", move |mut out| {
            let result = (0..1_000).try_for_each(|_| out.write_all(&[0u8; FRAME_SIZE]));
            let _ = done_tx.send(result.is_err());
            Ok(())
        })
        .unwrap();
        drop(reader);
        assert!(done_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap());
    }
}

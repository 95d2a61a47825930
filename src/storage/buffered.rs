//! Buffered sequential file access.
//!
//! [`BufferedFile`] wraps a file with a fixed 4 KiB buffer, used for
//! pending output in write mode and read-ahead in read mode. Tables are
//! written once front to back and read the same way, so there is no seek
//! API beyond [`BufferedFile::rewind`].

use std::fs::{File, OpenOptions};
use std::io::{self, IoSlice, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{NaginataError, Result};

const BUF_SIZE: usize = 4096;

/// A 4 KiB-buffered sequential byte stream over a single file.
pub struct BufferedFile {
    file: File,
    read_only: bool,
    buf: Box<[u8; BUF_SIZE]>,
    /// Write mode: `buf[..pending]` holds bytes not yet written out.
    pending: usize,
    /// Read mode: `buf[pos..filled]` holds bytes read ahead of the consumer.
    pos: usize,
    filled: usize,
    /// The underlying file offset, as this wrapper has moved it.
    file_pos: u64,
}

impl BufferedFile {
    /// Create `path` anew for writing, truncating any existing file.
    ///
    /// The file is also opened for reading so that [`BufferedFile::rewind`]
    /// can switch it to read mode later.
    pub fn create(path: &Path) -> Result<BufferedFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| NaginataError::create(format!("{}: {e}", path.display())))?;

        Ok(BufferedFile::from_parts(file, false, 0))
    }

    /// Open an existing `path` read-only, positioned at `offset`.
    pub fn open_at(path: &Path, offset: u64) -> Result<BufferedFile> {
        let mut file = File::open(path)?;
        if offset != 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(BufferedFile::from_parts(file, true, offset))
    }

    /// Wrap `file` for writing at its current end.
    ///
    /// Used for single-file destinations, where several tables append into
    /// one shared file.
    pub fn append_to(mut file: File) -> Result<BufferedFile> {
        let end = file.seek(SeekFrom::End(0))?;
        Ok(BufferedFile::from_parts(file, false, end))
    }

    fn from_parts(file: File, read_only: bool, file_pos: u64) -> BufferedFile {
        BufferedFile {
            file,
            read_only,
            buf: Box::new([0u8; BUF_SIZE]),
            pending: 0,
            pos: 0,
            filled: 0,
            file_pos,
        }
    }

    /// The logical byte position: what the next read would consume, or
    /// where the next write would land.
    pub fn get_pos(&self) -> u64 {
        if self.read_only {
            self.file_pos - (self.filled - self.pos) as u64
        } else {
            self.file_pos + self.pending as u64
        }
    }

    /// True iff the underlying file is zero length and nothing is buffered.
    pub fn empty(&self) -> Result<bool> {
        if self.pending != 0 {
            return Ok(false);
        }
        Ok(self.file.metadata()?.len() == 0)
    }

    /// Append one byte.
    pub fn write_u8(&mut self, byte: u8) -> Result<()> {
        if self.pending == BUF_SIZE {
            self.flush_buf()?;
        }
        self.buf[self.pending] = byte;
        self.pending += 1;
        Ok(())
    }

    /// Append `data`, spilling to the file when the buffer cannot hold it.
    ///
    /// A large write drains the buffer tail and the payload with vectored
    /// writes, retrying short writes until everything is down.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.pending + data.len() <= BUF_SIZE {
            self.buf[self.pending..self.pending + data.len()].copy_from_slice(data);
            self.pending += data.len();
            return Ok(());
        }

        let mut buf_off = 0;
        let mut data_off = 0;
        while buf_off < self.pending || data_off < data.len() {
            let slices = [
                IoSlice::new(&self.buf[buf_off..self.pending]),
                IoSlice::new(&data[data_off..]),
            ];
            let n = match self.file.write_vectored(&slices) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "file refused further writes",
                    )
                    .into());
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.file_pos += n as u64;
            let from_buf = n.min(self.pending - buf_off);
            buf_off += from_buf;
            data_off += n - from_buf;
        }
        self.pending = 0;
        Ok(())
    }

    /// Read one byte, or `None` at end of stream.
    pub fn read_u8(&mut self) -> Result<Option<u8>> {
        if self.pos == self.filled && !self.refill()? {
            return Ok(None);
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Read exactly `out.len()` bytes.
    ///
    /// Returns `Ok(false)` if the stream ends first; the caller decides
    /// whether that means corruption.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<bool> {
        let mut done = (self.filled - self.pos).min(out.len());
        out[..done].copy_from_slice(&self.buf[self.pos..self.pos + done]);
        self.pos += done;

        if done == out.len() {
            return Ok(true);
        }

        if out.len() - done >= BUF_SIZE {
            // Too big to be worth staging through the buffer.
            let rest = &mut out[done..];
            return match self.file.read_exact(rest) {
                Ok(()) => {
                    self.file_pos += rest.len() as u64;
                    Ok(true)
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
                Err(e) => Err(e.into()),
            };
        }

        while done < out.len() {
            if !self.refill()? {
                return Ok(false);
            }
            let take = (self.filled - self.pos).min(out.len() - done);
            out[done..done + take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            done += take;
        }
        Ok(true)
    }

    fn refill(&mut self) -> Result<bool> {
        self.pos = 0;
        self.filled = 0;
        loop {
            match self.file.read(&mut self.buf[..]) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.filled = n;
                    self.file_pos += n as u64;
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn flush_buf(&mut self) -> Result<()> {
        if self.pending != 0 {
            self.file.write_all(&self.buf[..self.pending])?;
            self.file_pos += self.pending as u64;
            self.pending = 0;
        }
        Ok(())
    }

    /// Drain the write buffer to the file.
    pub fn flush(&mut self) -> Result<()> {
        if !self.read_only {
            self.flush_buf()?;
        }
        Ok(())
    }

    /// Force the OS to durably persist the file contents.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Switch to read mode and seek back to the start of the file.
    pub fn rewind(&mut self) -> Result<()> {
        self.flush()?;
        self.read_only = true;
        self.file.seek(SeekFrom::Start(0))?;
        self.file_pos = 0;
        self.pending = 0;
        self.pos = 0;
        self.filled = 0;
        Ok(())
    }
}

impl std::fmt::Debug for BufferedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedFile")
            .field("read_only", &self.read_only)
            .field("pos", &self.get_pos())
            .finish()
    }
}

// The seek/read engine.
//
// `position` is the logical offset seen by the caller. While the engine is
// `Synced` the decoder sits at `position` plus whatever is still buffered in
// `pending`, the read-ahead used by `readline` and `BufRead`. Anything that
// moves the decoder behind the caller's back (building or importing an
// index) drops the engine to `Unpositioned`, and the next read seeks back to
// `position` first.

use crate::builder;
use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::index::{Checkpoint, Index};
use crate::options::{IndexSource, Options};
use crate::serialize;
use std::cmp::min;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const PENDING_CHUNK: usize = 16 * 1024;
const SKIP_CHUNK: usize = 32 * 1024;
const READ_CHUNK: usize = 1 << 20;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    Unpositioned,
    Synced,
    Closed,
}

/// A gzip or zlib stream that can be read from any offset.
///
/// Reads and seeks are in uncompressed bytes. See the [crate docs](crate)
/// for how the index behind it works.
#[derive(Debug)]
pub struct IndexedGzip<R = File> {
    handle: Handle<R>,
    decoder: Decoder,
    index: Index,
    auto_build: bool,
    position: u64,
    state: State,
    pending: Vec<u8>,
    pending_start: usize,
}

impl IndexedGzip<File> {
    /// Open the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        Self::new(Some(path.as_ref()), None, options)
    }

    /// Open from exactly one of a path or an already open file.
    pub fn new(path: Option<&Path>, file: Option<File>, options: Options) -> Result<Self> {
        match (path, file) {
            (None, None) => Err(Error::NoSource),
            (Some(_), Some(_)) => Err(Error::AmbiguousSource),
            (None, Some(file)) => Self::from_reader(file, options),
            (Some(path), None) => {
                options.validate()?;
                let handle = Handle::open(PathBuf::from(path), options.drop_handles)?;
                Self::with_handle(handle, options)
            }
        }
    }
}

impl<R: Read + Seek> IndexedGzip<R> {
    /// Wrap a reader the caller keeps ownership of. It is never closed by
    /// the engine; [`IndexedGzip::into_inner`] hands it back.
    pub fn from_reader(reader: R, options: Options) -> Result<Self> {
        options.validate()?;
        if options.drop_handles {
            return Err(Error::DropExternalHandle);
        }
        Self::with_handle(Handle::external(reader), options)
    }

    fn with_handle(handle: Handle<R>, options: Options) -> Result<Self> {
        let mut index = Index::new(options.spacing, options.concatenated);
        index.append(Checkpoint::origin())?;
        let mut gz = Self {
            handle,
            decoder: Decoder::new(options.concatenated, options.buffer_size),
            index,
            auto_build: options.auto_build,
            position: 0,
            state: State::Unpositioned,
            pending: Vec::new(),
            pending_start: 0,
        };
        match options.index {
            Some(IndexSource::Path(path)) => gz.import_index(path)?,
            Some(IndexSource::Bytes(bytes)) => gz.import_index_from(&bytes[..])?,
            None => {}
        }
        gz.handle.release();
        Ok(gz)
    }

    // ---- positioning ----

    /// Move to `offset` uncompressed bytes into the stream. Offsets past the
    /// end clamp to the end once its length is known.
    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        let result = self.check_open().and_then(|_| self.seek_inner(offset));
        self.finish(result)
    }

    pub fn seek_from(&mut self, pos: SeekFrom) -> Result<u64> {
        let result = self.check_open().and_then(|_| {
            let target = match pos {
                SeekFrom::Start(offset) => offset,
                SeekFrom::Current(delta) => self.position.saturating_add_signed(delta),
                SeekFrom::End(_) => return Err(Error::UnsupportedSeek),
            };
            self.seek_inner(target)
        });
        self.finish(result)
    }

    pub fn tell(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.position)
    }

    fn seek_inner(&mut self, mut target: u64) -> Result<u64> {
        if self.state == State::Synced && target >= self.position {
            let ahead = target - self.position;
            if ahead <= self.pending_len() as u64 {
                self.consume_pending(ahead as usize);
                return Ok(self.position);
            }
        }

        if !self.index.covers(target) {
            if !self.auto_build {
                return Err(Error::NotCovered {
                    offset: target,
                    coverage: self.index.coverage(),
                });
            }
            self.unsync();
            builder::extend_to(
                &mut self.index,
                &mut self.decoder,
                &mut self.handle,
                target,
                true,
            )?;
        }
        if let Some(total) = self.index.total_uncompressed_length() {
            target = min(target, total);
        }
        self.replay_to(target)?;
        Ok(self.position)
    }

    /// Put the decoder at `target`, restoring the nearest checkpoint unless
    /// the decoder can get there by reading forward.
    fn replay_to(&mut self, target: u64) -> Result<()> {
        self.unsync();
        let floor = self.index.find_floor(target).ok_or(Error::NotCovered {
            offset: target,
            coverage: self.index.coverage(),
        })?;
        let current = self.decoder.uncompressed_position();
        let reuse = self.decoder.is_positioned()
            && current <= target
            && current >= floor.uncompressed_offset;
        if !reuse {
            self.decoder.restore(&mut self.handle, floor)?;
        }

        let mut scratch = vec![0u8; SKIP_CHUNK];
        while self.decoder.uncompressed_position() < target {
            let left = target - self.decoder.uncompressed_position();
            let want = min(left, SKIP_CHUNK as u64);
            let written = self.decode_into(&mut scratch[..want as usize])?;
            if written == 0 && self.decoder.is_finished() {
                break;
            }
        }
        self.position = self.decoder.uncompressed_position();
        self.state = State::Synced;
        Ok(())
    }

    fn ensure_synced(&mut self) -> Result<()> {
        if self.state == State::Synced && self.decoder.is_positioned() {
            return Ok(());
        }
        self.seek_inner(self.position).map(|_| ())
    }

    /// Decode into `out`, growing the index on every block boundary when
    /// auto-build is on.
    fn decode_into(&mut self, out: &mut [u8]) -> Result<usize> {
        let observing = self.auto_build && !self.index.is_complete();
        let step = match self.decoder.decode(&mut self.handle, out, observing) {
            Ok(step) => step,
            Err(err) => {
                self.decoder.invalidate();
                self.unsync();
                return Err(err);
            }
        };
        if observing {
            if step.boundary {
                builder::observe(&mut self.index, &self.decoder)?;
            }
            builder::observe_end(&mut self.index, &self.decoder);
        }
        Ok(step.written)
    }

    // ---- reading ----

    /// Read up to `n` bytes. Fewer are returned only at the end of the
    /// stream. With auto-build off, fails with [`Error::NotCovered`] if the
    /// current position is past the index coverage.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let result = self.read_up_to(n);
        self.finish(result)
    }

    /// Read everything from the current position to the end of the stream.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let result = self.read_up_to(usize::MAX);
        self.finish(result)
    }

    /// Fill `buf` as far as the stream allows and return the byte count.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = if buf.is_empty() {
            self.check_open().map(|_| 0)
        } else {
            self.readable().and_then(|_| self.read_inner(buf))
        };
        self.finish(result)
    }

    fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        if n == 0 {
            self.check_open()?;
            return Ok(Vec::new());
        }
        self.readable()?;
        let mut out = Vec::new();
        while out.len() < n {
            let chunk = min(n - out.len(), READ_CHUNK);
            let start = out.len();
            out.resize(start + chunk, 0);
            let got = self.read_inner(&mut out[start..])?;
            out.truncate(start + got);
            if got < chunk {
                break;
            }
        }
        Ok(out)
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_synced()?;

        let mut n = min(self.pending_len(), buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pending_start..][..n]);
        self.consume_pending(n);

        let mut decoded = 0;
        while n + decoded < buf.len() {
            let written = self.decode_into(&mut buf[n + decoded..])?;
            if written == 0 && self.decoder.is_finished() {
                break;
            }
            decoded += written;
        }
        self.position += decoded as u64;
        n += decoded;
        Ok(n)
    }

    /// Read one line, including its `\n`. Stops early after `limit` bytes or
    /// at the end of the stream; an empty result means end of stream.
    pub fn readline(&mut self, limit: Option<usize>) -> Result<Vec<u8>> {
        let result = self.readable().and_then(|_| self.readline_inner(limit));
        self.finish(result)
    }

    fn readline_inner(&mut self, limit: Option<usize>) -> Result<Vec<u8>> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut line = Vec::new();
        while line.len() < limit {
            let available = self.fill_pending()?;
            if available.is_empty() {
                break;
            }
            let want = min(available.len(), limit - line.len());
            let (take, done) = match available[..want].iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (want, false),
            };
            line.extend_from_slice(&available[..take]);
            self.consume_pending(take);
            if done {
                break;
            }
        }
        Ok(line)
    }

    /// Read lines until the end of the stream, or until at least `hint`
    /// bytes were returned. `None` and `Some(0)` read everything.
    pub fn readlines(&mut self, hint: Option<usize>) -> Result<Vec<Vec<u8>>> {
        let hint = hint.filter(|&h| h > 0).unwrap_or(usize::MAX);
        let result = self.readable().and_then(|_| self.readlines_inner(hint));
        self.finish(result)
    }

    fn readlines_inner(&mut self, hint: usize) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        let mut total = 0usize;
        while total < hint {
            let line = self.readline_inner(None)?;
            if line.is_empty() {
                break;
            }
            total += line.len();
            lines.push(line);
        }
        Ok(lines)
    }

    /// Iterate over the remaining lines.
    pub fn lines(&mut self) -> Lines<'_, R> {
        Lines { inner: self }
    }

    fn pending_len(&self) -> usize {
        self.pending.len() - self.pending_start
    }

    fn consume_pending(&mut self, amt: usize) {
        debug_assert!(amt <= self.pending_len());
        self.pending_start += amt;
        self.position += amt as u64;
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.pending_start = 0;
    }

    /// Buffered bytes at the current position, decoding more if there are
    /// none. Empty only at the end of the stream.
    fn fill_pending(&mut self) -> Result<&[u8]> {
        if self.pending_len() == 0 {
            self.ensure_synced()?;
            let mut chunk = std::mem::take(&mut self.pending);
            chunk.resize(PENDING_CHUNK, 0);
            let mut filled = 0;
            let result = loop {
                match self.decode_into(&mut chunk) {
                    Ok(0) if !self.decoder.is_finished() => continue,
                    Ok(written) => {
                        filled = written;
                        break Ok(());
                    }
                    Err(err) => break Err(err),
                }
            };
            chunk.truncate(filled);
            self.pending = chunk;
            self.pending_start = 0;
            result?;
        }
        Ok(&self.pending[self.pending_start..])
    }

    fn unsync(&mut self) {
        if self.state != State::Closed {
            self.state = State::Unpositioned;
        }
        self.clear_pending();
    }

    // ---- index control ----

    /// Scan the rest of the stream so every offset can be reached directly.
    pub fn build_full_index(&mut self) -> Result<()> {
        let result = self.check_open().and_then(|_| {
            self.unsync();
            builder::build_full(
                &mut self.index,
                &mut self.decoder,
                &mut self.handle,
                self.auto_build,
            )
        });
        self.finish(result)
    }

    /// Grow the index until it covers `target` or the stream ends.
    pub fn extend_index(&mut self, target: u64) -> Result<bool> {
        let result = self.check_open().and_then(|_| {
            self.unsync();
            builder::extend_to(
                &mut self.index,
                &mut self.decoder,
                &mut self.handle,
                target,
                self.auto_build,
            )
        });
        self.finish(result)
    }

    /// Write the index to a new file at `path`, replacing any existing one.
    pub fn export_index<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.check_open()?;
        let file = File::create(path.as_ref())?;
        serialize::export(&self.index, BufWriter::new(file))?;
        log::debug!("exported index to {}", path.as_ref().display());
        Ok(())
    }

    pub fn export_index_to<W: Write>(&mut self, writer: W) -> Result<()> {
        self.check_open()?;
        serialize::export(&self.index, writer)
    }

    /// Replace the index with one read from `path`. On failure the current
    /// index is kept.
    pub fn import_index<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.check_open()?;
        let file = File::open(path.as_ref())?;
        log::debug!("importing index from {}", path.as_ref().display());
        self.import_index_from(BufReader::new(file))
    }

    pub fn import_index_from<I: Read>(&mut self, reader: I) -> Result<()> {
        self.check_open()?;
        let index = serialize::import(reader, self.index.concatenated())?;
        self.index = index;
        self.decoder.invalidate();
        self.unsync();
        Ok(())
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// `(uncompressed_offset, compressed_offset)` of every checkpoint.
    pub fn seek_points(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.index.seek_points()
    }

    // ---- handle ----

    /// Release the source. Files opened from a path are closed.
    pub fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.handle.close();
        self.decoder.invalidate();
        self.clear_pending();
        self.state = State::Closed;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// The underlying reader. Fails with [`Error::NoHandle`] while a file
    /// opened with `drop_handles` is released, and with [`Error::Closed`]
    /// after [`IndexedGzip::close`].
    pub fn get_ref(&self) -> Result<&R> {
        self.handle.get_ref()
    }

    /// Path the stream was opened from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.handle.path()
    }

    /// Hand back a reader passed to [`IndexedGzip::from_reader`]. `None` for
    /// files the engine opened itself.
    pub fn into_inner(self) -> Option<R> {
        self.handle.into_inner()
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            State::Closed => Err(Error::Closed),
            _ => Ok(()),
        }
    }

    /// Reads start where a seek could go. With auto-build off that is within
    /// the index coverage.
    fn readable(&self) -> Result<()> {
        self.check_open()?;
        let coverage = self.index.coverage();
        if !self.auto_build && !self.index.is_complete() && self.position > coverage {
            return Err(Error::NotCovered {
                offset: self.position,
                coverage,
            });
        }
        Ok(())
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        self.handle.release();
        result
    }
}

/// Iterator over the lines of an [`IndexedGzip`], from
/// [`IndexedGzip::lines`].
pub struct Lines<'a, R> {
    inner: &'a mut IndexedGzip<R>,
}

impl<R: Read + Seek> Iterator for Lines<'_, R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.readline(None) {
            Ok(line) if line.is_empty() => None,
            other => Some(other),
        }
    }
}

impl<R: Read + Seek> Read for IndexedGzip<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl<R: Read + Seek> BufRead for IndexedGzip<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let result = match self.pending_len() {
            0 => self.readable().and_then(|_| self.fill_pending().map(drop)),
            _ => Ok(()),
        };
        self.handle.release();
        result?;
        Ok(&self.pending[self.pending_start..])
    }

    fn consume(&mut self, amt: usize) {
        self.consume_pending(min(amt, self.pending_len()));
    }
}

impl<R: Read + Seek> Seek for IndexedGzip<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_from(pos)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // gzip of "hello\n" with FNAME "a.txt"
    const HELLO_GZ: [u8; 32] = [
        0x1f, 0x8b, 0x08, 0x08, 0x00, 0x00, 0x00, 0x00, 0x02, 0xff, 0x61, 0x2e, 0x74, 0x78, 0x74,
        0x00, 0xcb, 0x48, 0xcd, 0xc9, 0xc9, 0xe7, 0x02, 0x00, 0x20, 0x30, 0x3a, 0x36, 0x06, 0x00,
        0x00, 0x00,
    ];

    fn hello() -> IndexedGzip<Cursor<Vec<u8>>> {
        IndexedGzip::from_reader(Cursor::new(HELLO_GZ.to_vec()), Options::default()).unwrap()
    }

    #[test]
    fn read_and_tell() {
        let mut gz = hello();
        assert_eq!(gz.tell().unwrap(), 0);
        assert_eq!(gz.read(3).unwrap(), b"hel");
        assert_eq!(gz.tell().unwrap(), 3);
        assert_eq!(gz.read_all().unwrap(), b"lo\n");
        assert_eq!(gz.read(10).unwrap(), b"");
        assert!(gz.index().is_complete());
    }

    #[test]
    fn seek_clamps_and_rewinds() {
        let mut gz = hello();
        assert_eq!(gz.seek(100).unwrap(), 6);
        assert_eq!(gz.seek_from(SeekFrom::Current(-4)).unwrap(), 2);
        assert_eq!(gz.read(2).unwrap(), b"ll");
        assert_eq!(gz.seek_from(SeekFrom::Current(-100)).unwrap(), 0);
        assert!(matches!(gz.seek_from(SeekFrom::End(0)), Err(Error::UnsupportedSeek)));
        assert_eq!(gz.tell().unwrap(), 0);
    }

    #[test]
    fn readline_shares_the_read_ahead() {
        let mut gz = hello();
        assert_eq!(gz.readline(Some(2)).unwrap(), b"he");
        assert_eq!(gz.read(1).unwrap(), b"l");
        assert_eq!(gz.tell().unwrap(), 3);
        assert_eq!(gz.readline(None).unwrap(), b"lo\n");
        assert_eq!(gz.readline(None).unwrap(), b"");
    }

    #[test]
    fn close_twice() {
        let mut gz = hello();
        gz.close().unwrap();
        assert!(gz.is_closed());
        assert!(matches!(gz.close(), Err(Error::Closed)));
        assert!(matches!(gz.read(1), Err(Error::Closed)));
        assert!(matches!(gz.tell(), Err(Error::Closed)));
        assert!(matches!(gz.get_ref(), Err(Error::Closed)));
        assert_eq!(gz.into_inner().unwrap().into_inner(), HELLO_GZ.to_vec());
    }

    #[test]
    fn construction_errors() {
        assert!(matches!(
            IndexedGzip::new(None, None, Options::default()),
            Err(Error::NoSource)
        ));
        assert!(matches!(
            IndexedGzip::from_reader(
                Cursor::new(Vec::new()),
                Options::default().drop_handles(true)
            ),
            Err(Error::DropExternalHandle)
        ));
        assert!(matches!(
            IndexedGzip::from_reader(Cursor::new(Vec::new()), Options::default().mode("wb")),
            Err(Error::WriteMode(_))
        ));
    }
}

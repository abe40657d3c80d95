// Ownership of the compressed byte source.
//
// A source opened from a path belongs to the engine. With `drop_handles`
// the file is closed after every public operation and reopened, then
// repositioned to the last known offset, the next time bytes are needed.
// A caller-supplied reader is never closed or reopened.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

type Opener<R> = fn(&Path) -> io::Result<R>;

#[derive(Debug)]
pub(crate) struct Handle<R> {
    inner: Option<R>,
    /// Set when the engine opened the source itself.
    path: Option<PathBuf>,
    reopen: Opener<R>,
    drop_handles: bool,
    position: u64,
    closed: bool,
}

fn open_read_only(path: &Path) -> io::Result<File> {
    File::open(path)
}

impl Handle<File> {
    pub fn open(path: PathBuf, drop_handles: bool) -> Result<Self> {
        let file = open_read_only(&path)?;
        let mut handle = Self {
            inner: Some(file),
            path: Some(path),
            reopen: open_read_only,
            drop_handles,
            position: 0,
            closed: false,
        };
        handle.release();
        Ok(handle)
    }
}

impl<R: Read + Seek> Handle<R> {
    pub fn external(reader: R) -> Self {
        Self {
            inner: Some(reader),
            path: None,
            reopen: |_| Err(io::Error::other("external readers cannot be reopened")),
            drop_handles: false,
            position: 0,
            closed: false,
        }
    }

    pub fn owned(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn acquire(&mut self) -> io::Result<&mut R> {
        if self.closed {
            return Err(io::Error::other(Error::Closed));
        }
        if self.inner.is_none() {
            let path = self
                .path
                .as_deref()
                .ok_or_else(|| io::Error::other(Error::NoHandle))?;
            let mut reader = (self.reopen)(path)?;
            reader.seek(SeekFrom::Start(self.position))?;
            log::debug!("reopened {} at {}", path.display(), self.position);
            self.inner = Some(reader);
        }
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other(Error::NoHandle))
    }

    /// Close the underlying file between operations in drop mode.
    pub fn release(&mut self) {
        if self.drop_handles && self.inner.take().is_some() {
            log::trace!("dropped handle at {}", self.position);
        }
    }

    pub fn get_ref(&self) -> Result<&R> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.inner.as_ref().ok_or(Error::NoHandle)
    }

    /// Give up the source. Owned files are closed, external readers are kept
    /// for `into_inner`.
    pub fn close(&mut self) {
        self.closed = true;
        if self.owned() {
            self.inner = None;
        }
    }

    pub fn into_inner(self) -> Option<R> {
        if self.owned() {
            None
        } else {
            self.inner
        }
    }
}

impl<R: Read + Seek> Read for Handle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.acquire()?.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for Handle<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = self.acquire()?.seek(pos)?;
        Ok(self.position)
    }
}

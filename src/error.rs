use std::io;
use thiserror::Error;

/// Everything that can go wrong while opening, indexing or reading a stream.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("mode {0:?} would write; indexed streams are read-only")]
    WriteMode(String),

    #[error("invalid mode {0:?}")]
    InvalidMode(String),

    #[error("one of a path or a reader must be supplied")]
    NoSource,

    #[error("a path and a reader cannot both be supplied")]
    AmbiguousSource,

    #[error("handles can only be dropped for streams opened from a path")]
    DropExternalHandle,

    #[error(
        "checkpoint spacing {0} is smaller than the {window} byte window",
        window = crate::WINDOW_SIZE
    )]
    InvalidSpacing(u64),

    #[error("offset {offset} is beyond the index coverage ({coverage}) and auto-build is disabled")]
    NotCovered { offset: u64, coverage: u64 },

    #[error("operation on a closed stream")]
    Closed,

    #[error("the file handle is currently dropped")]
    NoHandle,

    #[error("seeking relative to the end of the stream is not supported")]
    UnsupportedSeek,

    #[error("corrupt stream at compressed offset {offset}: {reason}")]
    CorruptStream { offset: u64, reason: &'static str },

    #[error("index data does not start with the expected magic bytes")]
    IndexMagic,

    #[error("unsupported index version {0}")]
    IndexVersion(u32),

    #[error("index is incompatible with this stream: {0}")]
    IndexIncompatible(String),

    #[error("malformed index: {0}")]
    IndexMalformed(String),

    #[error("checkpoint at {offset} does not follow the last checkpoint at {last}")]
    CheckpointOrder { offset: u64, last: u64 },
}

impl Error {
    pub(crate) fn corrupt(offset: u64, reason: &'static str) -> Self {
        Error::CorruptStream { offset, reason }
    }

    pub(crate) fn malformed<T: std::fmt::Display>(msg: T) -> Self {
        Error::IndexMalformed(msg.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(inner) => return io::Error::new(inner.kind(), err),
            Error::CorruptStream { .. } | Error::IndexMagic | Error::IndexMalformed(_) => {
                io::ErrorKind::InvalidData
            }
            Error::UnsupportedSeek => io::ErrorKind::Unsupported,
            Error::NotCovered { .. } | Error::IndexIncompatible(_) | Error::IndexVersion(_) => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Random access into gzip and zlib streams.
//!
//! Deflate data can only be decompressed front to back: every byte may refer
//! back to the 32KB of output before it, and deflate blocks do not start on
//! byte boundaries. [`IndexedGzip`] keeps a sparse index of *checkpoints*,
//! each one holding the exact compressed bit position of a block boundary
//! plus the 32KB window that precedes it. Seeking restores the inflater at the
//! nearest checkpoint and only replays the bytes between that checkpoint and
//! the target.
//!
//! The index is built lazily as reads and seeks move past the known part of
//! the stream, or eagerly with [`IndexedGzip::build_full_index`]. It can be
//! exported and imported again so a large file only has to be scanned once.
//!
//! ```no_run
//! use gzindex::{IndexedGzip, Options};
//!
//! # fn main() -> gzindex::Result<()> {
//! let mut gz = IndexedGzip::open("big.gz", Options::default().spacing(4 << 20))?;
//! gz.seek(1_000_000_000)?;
//! let bytes = gz.read(4096)?;
//! gz.export_index("big.gz.gzix")?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

mod builder;
mod decoder;
mod error;
mod handle;
mod huffman_tree;
mod index;
mod inflater;
mod input_buffer;
mod options;
mod output_window;
mod reader;
mod serialize;

pub use error::{Error, Result};
pub use index::{Checkpoint, Index};
pub use options::{IndexSource, Options};
pub use reader::{IndexedGzip, Lines};

/// Size of the deflate history window.
pub const WINDOW_SIZE: usize = 32768;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum InternalErr {
    DataNeeded,
    DataError,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum BlockType {
    Uncompressed = 0,
    Static = 1,
    Dynamic = 2,
}

impl BlockType {
    pub fn from_int(int: u16) -> Option<BlockType> {
        match int {
            0 => Some(Self::Uncompressed),
            1 => Some(Self::Static),
            2 => Some(Self::Dynamic),
            _ => None,
        }
    }
}

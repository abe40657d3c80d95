use crate::error::{Error, Result};
use std::path::PathBuf;

/// Default distance between checkpoints, in uncompressed bytes.
pub const DEFAULT_SPACING: u64 = 1 << 20;

/// Default size of the compressed read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// A previously exported index to load when the stream is opened.
#[derive(Clone, Debug)]
pub enum IndexSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Options for [`IndexedGzip`](crate::IndexedGzip).
///
/// ```
/// use gzindex::Options;
///
/// let options = Options::default()
///     .spacing(4 << 20)
///     .auto_build(false);
/// assert_eq!(options.spacing, 4 << 20);
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// File mode, as in `fopen`. Only read modes are accepted.
    pub mode: String,
    /// Minimum number of uncompressed bytes between checkpoints.
    pub spacing: u64,
    /// Grow the index on demand when reads and seeks go past it.
    pub auto_build: bool,
    /// Close the file between operations. Requires opening from a path.
    pub drop_handles: bool,
    /// Treat concatenated gzip members as one stream.
    pub concatenated: bool,
    /// Size of the compressed read buffer.
    pub buffer_size: usize,
    pub index: Option<IndexSource>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: "rb".to_string(),
            spacing: DEFAULT_SPACING,
            auto_build: true,
            drop_handles: false,
            concatenated: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            index: None,
        }
    }
}

impl Options {
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn spacing(mut self, spacing: u64) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn auto_build(mut self, auto_build: bool) -> Self {
        self.auto_build = auto_build;
        self
    }

    pub fn drop_handles(mut self, drop_handles: bool) -> Self {
        self.drop_handles = drop_handles;
        self
    }

    pub fn concatenated(mut self, concatenated: bool) -> Self {
        self.concatenated = concatenated;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn index(mut self, index: IndexSource) -> Self {
        self.index = Some(index);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let mode = self.mode.as_str();
        if mode.chars().any(|c| matches!(c, 'w' | 'a' | 'x' | '+')) {
            return Err(Error::WriteMode(self.mode.clone()));
        }
        if !mode.contains('r') || mode.chars().any(|c| !matches!(c, 'r' | 'b' | 't')) {
            return Err(Error::InvalidMode(self.mode.clone()));
        }
        if self.spacing < crate::WINDOW_SIZE as u64 {
            return Err(Error::InvalidSpacing(self.spacing));
        }
        Ok(())
    }
}

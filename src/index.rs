use crate::error::{Error, Result};
use std::fmt;

/// Everything needed to restart inflation in the middle of a stream: the
/// exact bit position of a deflate block boundary and the output that
/// preceded it.
#[derive(Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Offset of the byte holding the next unread bit.
    pub compressed_offset: u64,
    /// Low-order bits of that byte which were already consumed (0 - 7).
    pub bit_offset: u8,
    pub uncompressed_offset: u64,
    /// The last `min(32768, uncompressed_offset)` bytes of output.
    pub window: Vec<u8>,
    /// Member of a concatenated stream the checkpoint falls into.
    pub member_index: u32,
}

impl Checkpoint {
    /// The start of the stream. Restoring it means decoding from scratch.
    pub fn origin() -> Self {
        Self {
            compressed_offset: 0,
            bit_offset: 0,
            uncompressed_offset: 0,
            window: Vec::new(),
            member_index: 0,
        }
    }

    pub fn is_origin(&self) -> bool {
        self.uncompressed_offset == 0
    }

    pub(crate) fn compressed_bits(&self) -> u64 {
        self.compressed_offset * 8 + self.bit_offset as u64
    }
}

// Windows are 32KB each; keep them out of debug output.
impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("compressed_offset", &self.compressed_offset)
            .field("bit_offset", &self.bit_offset)
            .field("uncompressed_offset", &self.uncompressed_offset)
            .field("window_len", &self.window.len())
            .field("member_index", &self.member_index)
            .finish()
    }
}

/// Ordered, append-only list of checkpoints.
///
/// Until the stream has been read to its end the index only describes a
/// prefix of it; [`Index::is_complete`] tells the two apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index {
    checkpoints: Vec<Checkpoint>,
    spacing: u64,
    concatenated: bool,
    total_compressed_length: Option<u64>,
    total_uncompressed_length: Option<u64>,
}

impl Index {
    pub fn new(spacing: u64, concatenated: bool) -> Self {
        Self {
            checkpoints: Vec::new(),
            spacing,
            concatenated,
            total_compressed_length: None,
            total_uncompressed_length: None,
        }
    }

    pub(crate) fn from_parts(
        spacing: u64,
        concatenated: bool,
        totals: Option<(u64, u64)>,
        checkpoints: Vec<Checkpoint>,
    ) -> Result<Self> {
        let mut index = Self::new(spacing, concatenated);
        for checkpoint in checkpoints {
            index.append(checkpoint)?;
        }
        if let Some((compressed, uncompressed)) = totals {
            if uncompressed < index.coverage() {
                return Err(Error::malformed(format!(
                    "total length {uncompressed} is before the last checkpoint at {}",
                    index.coverage()
                )));
            }
            index.mark_complete(compressed, uncompressed);
        }
        Ok(index)
    }

    /// Add a checkpoint past the current end of the index.
    pub fn append(&mut self, checkpoint: Checkpoint) -> Result<()> {
        match self.checkpoints.last() {
            None if !checkpoint.is_origin() => {
                return Err(Error::CheckpointOrder {
                    offset: checkpoint.uncompressed_offset,
                    last: 0,
                });
            }
            Some(last)
                if checkpoint.uncompressed_offset <= last.uncompressed_offset
                    || checkpoint.compressed_bits() < last.compressed_bits() =>
            {
                return Err(Error::CheckpointOrder {
                    offset: checkpoint.uncompressed_offset,
                    last: last.uncompressed_offset,
                });
            }
            _ => {}
        }
        self.checkpoints.push(checkpoint);
        Ok(())
    }

    /// The checkpoint with the greatest uncompressed offset not after
    /// `offset`.
    pub fn find_floor(&self, offset: u64) -> Option<&Checkpoint> {
        let partition = self
            .checkpoints
            .partition_point(|c| c.uncompressed_offset <= offset);
        partition.checked_sub(1).map(|i| &self.checkpoints[i])
    }

    /// Uncompressed offset of the last checkpoint.
    pub fn coverage(&self) -> u64 {
        self.checkpoints
            .last()
            .map_or(0, |c| c.uncompressed_offset)
    }

    /// Whether `offset` can be reached without growing the index.
    pub fn covers(&self, offset: u64) -> bool {
        match self.total_uncompressed_length {
            Some(_) => true,
            None => !self.checkpoints.is_empty() && offset <= self.coverage(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_uncompressed_length.is_some()
    }

    pub(crate) fn mark_complete(&mut self, compressed: u64, uncompressed: u64) {
        if !self.is_complete() {
            let count = self.checkpoints.len();
            log::debug!("index complete: {count} checkpoints, {compressed} -> {uncompressed}");
        }
        self.total_compressed_length = Some(compressed);
        self.total_uncompressed_length = Some(uncompressed);
    }

    pub fn spacing(&self) -> u64 {
        self.spacing
    }

    pub fn concatenated(&self) -> bool {
        self.concatenated
    }

    pub fn total_compressed_length(&self) -> Option<u64> {
        self.total_compressed_length
    }

    pub fn total_uncompressed_length(&self) -> Option<u64> {
        self.total_uncompressed_length
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Checkpoint> {
        self.checkpoints.get(i)
    }

    pub fn last(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// `(uncompressed_offset, compressed_offset)` of every checkpoint.
    pub fn seek_points(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.checkpoints
            .iter()
            .map(|c| (c.uncompressed_offset, c.compressed_offset))
    }
}

// Growing the index.
//
// Checkpoints are only ever taken on deflate block boundaries, and a new one
// is taken at the first boundary at least `spacing` uncompressed bytes after
// the previous checkpoint. Because the rule only looks at the decoder's own
// position, decoding the same stretch of the stream always yields the same
// checkpoints, no matter whether it happens in one full scan or piecemeal
// while serving reads.

use crate::decoder::Decoder;
use crate::error::Result;
use crate::index::{Checkpoint, Index};
use std::io::{Read, Seek};

const SCRATCH_SIZE: usize = 32 * 1024;

/// Record a checkpoint if the decoder, stopped on a block boundary, is far
/// enough past the last one.
pub(crate) fn observe(index: &mut Index, decoder: &Decoder) -> Result<()> {
    if index.is_complete() {
        return Ok(());
    }
    let Some(last) = index.last() else {
        return Ok(());
    };
    let position = decoder.uncompressed_position();
    if position >= last.uncompressed_offset.saturating_add(index.spacing()) {
        let checkpoint = decoder.capture();
        log::debug!(
            "checkpoint {} at {}:{} -> {}",
            index.len(),
            checkpoint.compressed_offset,
            checkpoint.bit_offset,
            checkpoint.uncompressed_offset
        );
        index.append(checkpoint)?;
    }
    Ok(())
}

/// Record the stream totals once the decoder reached the end.
pub(crate) fn observe_end(index: &mut Index, decoder: &Decoder) {
    if decoder.is_finished() {
        let compressed = decoder.compressed_position();
        index.mark_complete(compressed, decoder.uncompressed_position());
    }
}

/// Grow the index until it covers `target` or the stream ends.
///
/// With `resume`, a positioned decoder that is already past the last
/// checkpoint carries on from where it is; it must have been observed on
/// every boundary since it was restored. Otherwise decoding restarts from
/// the last checkpoint.
pub(crate) fn extend_to<R: Read + Seek>(
    index: &mut Index,
    decoder: &mut Decoder,
    source: &mut R,
    target: u64,
    resume: bool,
) -> Result<bool> {
    if index.is_empty() {
        index.append(Checkpoint::origin())?;
    }
    if index.is_complete() || index.coverage() >= target {
        return Ok(true);
    }

    let frontier = index.coverage();
    if !(resume && decoder.is_positioned() && decoder.uncompressed_position() >= frontier) {
        if let Some(last) = index.last() {
            decoder.restore(source, last)?;
        }
    }

    let mut scratch = vec![0u8; SCRATCH_SIZE];
    while !index.is_complete() && index.coverage() < target {
        let step = match decoder.decode(source, &mut scratch, true) {
            Ok(step) => step,
            Err(err) => {
                decoder.invalidate();
                return Err(err);
            }
        };
        if step.boundary {
            observe(index, decoder)?;
        }
        observe_end(index, decoder);
    }
    Ok(true)
}

/// Scan the whole stream.
pub(crate) fn build_full<R: Read + Seek>(
    index: &mut Index,
    decoder: &mut Decoder,
    source: &mut R,
    resume: bool,
) -> Result<()> {
    extend_to(index, decoder, source, u64::MAX, resume)?;
    Ok(())
}

// Index file format, all integers little-endian:
//
//   Offset  Size  Field
//   0       4     magic "GZIX"
//   4       4     version (1)
//   8       8     spacing
//   16      1     concatenated (0 / 1)
//   17      8     total compressed length, 0 if unknown
//   25      8     total uncompressed length, 0 if unknown
//   33      8     checkpoint count
//   41      var   checkpoints
//
// Each checkpoint:
//
//   0       8     compressed offset
//   8       8     uncompressed offset
//   16      1     bit offset
//   17      4     window length
//   21      var   window
//
// Both totals are written as zero while the index does not reach the end of
// the stream. The compressed total is the marker: every stream has at least
// a header, so a finished one never has zero compressed bytes, while an
// empty member does have zero uncompressed bytes.

use crate::error::{Error, Result};
use crate::index::{Checkpoint, Index};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

const MAGIC: [u8; 4] = *b"GZIX";
const VERSION: u32 = 1;

pub(crate) fn export<W: Write>(index: &Index, mut w: W) -> Result<()> {
    w.write_all(&MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u64::<LittleEndian>(index.spacing())?;
    w.write_u8(index.concatenated() as u8)?;
    w.write_u64::<LittleEndian>(index.total_compressed_length().unwrap_or(0))?;
    w.write_u64::<LittleEndian>(index.total_uncompressed_length().unwrap_or(0))?;
    w.write_u64::<LittleEndian>(index.len() as u64)?;

    for checkpoint in index.checkpoints() {
        w.write_u64::<LittleEndian>(checkpoint.compressed_offset)?;
        w.write_u64::<LittleEndian>(checkpoint.uncompressed_offset)?;
        w.write_u8(checkpoint.bit_offset)?;
        w.write_u32::<LittleEndian>(checkpoint.window.len() as u32)?;
        w.write_all(&checkpoint.window)?;
    }
    w.flush()?;
    Ok(())
}

/// Read an index. `concatenated` is what the stream it will be used with
/// expects.
pub(crate) fn import<R: Read>(mut r: R, concatenated: bool) -> Result<Index> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(truncated)?;
    if magic != MAGIC {
        return Err(Error::IndexMagic);
    }
    let version = r.read_u32::<LittleEndian>().map_err(truncated)?;
    if version != VERSION {
        return Err(Error::IndexVersion(version));
    }

    let spacing = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let declared_concatenated = match r.read_u8().map_err(truncated)? {
        0 => false,
        1 => true,
        other => return Err(Error::malformed(format!("concatenated flag is {other}"))),
    };
    if spacing < crate::WINDOW_SIZE as u64 {
        return Err(Error::IndexIncompatible(format!(
            "spacing {spacing} is smaller than the window"
        )));
    }
    if declared_concatenated != concatenated {
        return Err(Error::IndexIncompatible(format!(
            "index has concatenated={declared_concatenated}, stream has {concatenated}"
        )));
    }

    let total_compressed = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let total_uncompressed = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let count = r.read_u64::<LittleEndian>().map_err(truncated)?;

    let mut checkpoints = Vec::new();
    for i in 0..count {
        let compressed_offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let uncompressed_offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let bit_offset = r.read_u8().map_err(truncated)?;
        let window_len = r.read_u32::<LittleEndian>().map_err(truncated)?;

        if bit_offset > 7 {
            let message = format!("checkpoint {i} has bit offset {bit_offset}");
            return Err(Error::malformed(message));
        }
        let expected = uncompressed_offset.min(crate::WINDOW_SIZE as u64);
        if window_len as u64 != expected {
            return Err(Error::malformed(format!(
                "checkpoint {i} has a {window_len} byte window, expected {expected}"
            )));
        }
        if uncompressed_offset == 0 && (compressed_offset != 0 || bit_offset != 0) {
            return Err(Error::malformed("origin checkpoint does not start the stream"));
        }

        let mut window = vec![0u8; window_len as usize];
        r.read_exact(&mut window).map_err(truncated)?;
        checkpoints.push(Checkpoint {
            compressed_offset,
            bit_offset,
            uncompressed_offset,
            window,
            member_index: 0,
        });
    }

    if checkpoints.is_empty() {
        return Err(Error::malformed("index has no origin checkpoint"));
    }

    let totals = match total_compressed {
        0 => None,
        _ => Some((total_compressed, total_uncompressed)),
    };
    let index = match Index::from_parts(spacing, concatenated, totals, checkpoints) {
        Ok(index) => index,
        Err(Error::CheckpointOrder { offset, last }) => {
            return Err(Error::malformed(format!(
                "checkpoint at {offset} is out of order after {last}"
            )));
        }
        Err(other) => return Err(other),
    };
    log::debug!(
        "imported index: {} checkpoints, complete: {}",
        index.len(),
        index.is_complete()
    );
    Ok(index)
}

fn truncated(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::malformed("index data is truncated"),
        _ => Error::Io(e),
    }
}

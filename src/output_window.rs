use crate::input_buffer::InputBuffer;
use std::cmp::min;

// Deflate matches reach back at most 32768 bytes and copy at most 258 bytes.
// A 64KB ring keeps the full history behind the write position while still
// leaving room for output the caller has not collected yet. It is fine for
// a match copy to overwrite history further back than 32KB.
pub(crate) const WINDOW_SIZE: usize = 65536;
const WINDOW_MASK: usize = WINDOW_SIZE - 1;
pub(crate) const MAX_HISTORY: usize = crate::WINDOW_SIZE;

/// Ring buffer of decompressed output. Length/distance pairs copy from
/// earlier output, so everything written stays here until it is both handed
/// to the caller and more than 32KB old.
#[derive(Debug)]
pub(crate) struct OutputWindow {
    window: Box<[u8]>,
    end: usize,
    // written but not yet copied out
    bytes_used: usize,
    // valid bytes behind `end`, capped at WINDOW_SIZE
    history: usize,
}

impl OutputWindow {
    pub fn new() -> Self {
        Self {
            window: vec![0; WINDOW_SIZE].into_boxed_slice(),
            end: 0,
            bytes_used: 0,
            history: 0,
        }
    }

    /// Append a literal.
    #[inline(always)]
    pub fn write(&mut self, b: u8) {
        debug_assert!(self.bytes_used < WINDOW_SIZE, "output window is full");
        self.window[self.end] = b;
        self.end = (self.end + 1) & WINDOW_MASK;
        self.bytes_used += 1;
        self.history = min(self.history + 1, WINDOW_SIZE);
    }

    #[inline(always)]
    pub fn write_length_distance(&mut self, length: usize, distance: usize) {
        debug_assert!(length <= self.free_bytes(), "match does not fit");
        debug_assert!(distance <= self.history, "distance reaches before history");

        // Copy forward byte by byte; overlapping copies (distance < length)
        // repeat the most recent bytes, which is what deflate wants.
        self.bytes_used += length;
        self.history = min(self.history + length, WINDOW_SIZE);
        let mut from = self.end.wrapping_sub(distance) & WINDOW_MASK;
        let mut to = self.end;

        for _ in 0..length {
            self.window[to] = self.window[from];
            to = (to + 1) & WINDOW_MASK;
            from = (from + 1) & WINDOW_MASK;
        }

        self.end = to;
    }

    /// Stored block data, straight from the input. Returns how much of
    /// `length` fit.
    pub fn copy_from(&mut self, input: &mut InputBuffer<'_>, mut length: usize) -> usize {
        length = min(
            min(length, WINDOW_SIZE - self.bytes_used),
            input.available_bytes(),
        );
        let mut copied: usize;

        let tail_len = WINDOW_SIZE - self.end;
        if length > tail_len {
            copied = input.copy_to(&mut self.window[self.end..][..tail_len]);
            if copied == tail_len {
                copied += input.copy_to(&mut self.window[..length - tail_len]);
            }
        } else {
            copied = input.copy_to(&mut self.window[self.end..][..length]);
        }

        self.end = (self.end + copied) & WINDOW_MASK;
        self.bytes_used += copied;
        self.history = min(self.history + copied, WINDOW_SIZE);
        copied
    }

    pub fn free_bytes(&self) -> usize {
        WINDOW_SIZE - self.bytes_used
    }

    /// Output not handed to the caller yet.
    pub fn available_bytes(&self) -> usize {
        self.bytes_used
    }

    /// Bytes a match may refer back to.
    pub fn history_len(&self) -> usize {
        min(self.history, MAX_HISTORY)
    }

    /// Drain pending output into `output`, oldest first.
    pub fn copy_to(&mut self, output: &mut [u8]) -> usize {
        let copied = min(output.len(), self.bytes_used);
        let start = (self.end + WINDOW_SIZE - self.bytes_used) & WINDOW_MASK;
        let first = min(copied, WINDOW_SIZE - start);
        output[..first].copy_from_slice(&self.window[start..][..first]);
        output[first..copied].copy_from_slice(&self.window[..copied - first]);
        self.bytes_used -= copied;
        copied
    }

    /// The newest `len` bytes of output, split in two when the ring wraps.
    pub(crate) fn history(&self, len: usize) -> (&[u8], &[u8]) {
        debug_assert!(len <= self.history_len());
        let start = (self.end + WINDOW_SIZE - len) & WINDOW_MASK;
        if len <= WINDOW_SIZE - start {
            (&self.window[start..][..len], &[])
        } else {
            (&self.window[start..], &self.window[..self.end])
        }
    }

    /// Replace the contents with `data` as history and nothing pending.
    pub(crate) fn restore(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= MAX_HISTORY);
        self.window[..data.len()].copy_from_slice(data);
        self.end = data.len();
        self.bytes_used = 0;
        self.history = data.len();
    }

    pub(crate) fn clear(&mut self) {
        self.end = 0;
        self.bytes_used = 0;
        self.history = 0;
    }
}

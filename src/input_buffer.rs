use crate::InternalErr;
use std::cmp::min;

/// Bits loaded from input but not yet consumed. Deflate packs bits starting at
/// the least significant bit of each byte, so new bytes are shifted in above
/// the bits already buffered.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct BitsBuffer {
    pub bit_buffer: u32,
    pub bits_in_buffer: i32,
}

impl BitsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load `count` bits, masking off anything above them.
    pub fn from_bits(value: u32, count: i32) -> Self {
        debug_assert!((0..=8).contains(&count));
        Self {
            bit_buffer: value & ((1u32 << count) - 1),
            bits_in_buffer: count,
        }
    }
}

#[derive(Debug)]
pub(crate) struct InputBuffer<'a> {
    pub bits: BitsBuffer,
    pub buffer: &'a [u8],
    pub read_bytes: usize,
}

impl<'a> InputBuffer<'a> {
    pub fn new(bits: BitsBuffer, buffer: &'a [u8]) -> Self {
        Self {
            bits,
            buffer,
            read_bytes: 0,
        }
    }

    pub fn available_bits(&self) -> i32 {
        self.bits.bits_in_buffer
    }

    /// Whole bytes left, counting the ones already shifted into the bit buffer.
    pub fn available_bytes(&self) -> usize {
        self.buffer.len() - self.read_bytes + (self.bits.bits_in_buffer / 8) as usize
    }

    #[inline(always)]
    fn load_byte(&mut self) -> bool {
        match self.buffer.get(self.read_bytes) {
            Some(&byte) => {
                self.bits.bit_buffer |= (byte as u32) << self.bits.bits_in_buffer;
                self.bits.bits_in_buffer += 8;
                self.read_bytes += 1;
                true
            }
            None => false,
        }
    }

    pub fn ensure_bits_available(&mut self, count: i32) -> bool {
        debug_assert!(0 < count && count <= 16, "count is invalid.");
        while self.bits.bits_in_buffer < count {
            if !self.load_byte() {
                return false;
            }
        }
        true
    }

    /// Load up to 16 bits if possible and return the whole bit buffer. Fewer
    /// bits are returned when input runs out; the caller checks
    /// `available_bits()`.
    #[inline(always)]
    pub fn try_load_16bits(&mut self) -> u32 {
        while self.bits.bits_in_buffer < 16 && self.load_byte() {}
        self.bits.bit_buffer
    }

    pub fn get_bits(&mut self, count: i32) -> Result<u16, InternalErr> {
        if !self.ensure_bits_available(count) {
            return Err(InternalErr::DataNeeded);
        }
        let result = (self.bits.bit_buffer & ((1 << count) - 1)) as u16;
        self.skip_bits(count);
        Ok(result)
    }

    #[inline(always)]
    pub fn skip_bits(&mut self, n: i32) {
        debug_assert!(
            self.bits.bits_in_buffer >= n,
            "No enough bits in the buffer, Did you call ensure_bits_available?"
        );
        self.bits.bit_buffer >>= n;
        self.bits.bits_in_buffer -= n;
    }

    /// Drop the bits left in the current partial byte. Stored blocks start on
    /// a byte boundary.
    pub fn skip_to_byte_boundary(&mut self) {
        let partial = self.bits.bits_in_buffer % 8;
        self.skip_bits(partial);
    }

    /// Copy whole bytes to `output`, draining the bit buffer first. Only valid
    /// on a byte boundary.
    pub fn copy_to(&mut self, output: &mut [u8]) -> usize {
        debug_assert_eq!(self.bits.bits_in_buffer % 8, 0);
        let mut copied = 0;
        while self.bits.bits_in_buffer >= 8 && copied < output.len() {
            output[copied] = self.bits.bit_buffer as u8;
            self.bits.bit_buffer >>= 8;
            self.bits.bits_in_buffer -= 8;
            copied += 1;
        }
        if copied == output.len() {
            return copied;
        }

        let length = min(output.len() - copied, self.buffer.len() - self.read_bytes);
        output[copied..][..length].copy_from_slice(&self.buffer[self.read_bytes..][..length]);
        self.read_bytes += length;
        copied + length
    }
}

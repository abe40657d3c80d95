// Canonical Huffman decoding tables.
//
// Codes are looked up LSB-first, the order deflate packs them in. A primary
// table indexed by the next `PRIMARY_BITS` input bits resolves every short
// code in one step; longer codes go through a link to a subtable indexed by
// the bits that follow.

use crate::input_buffer::InputBuffer;
use crate::InternalErr;

const PRIMARY_BITS: u32 = 9;
const PRIMARY_SIZE: usize = 1 << PRIMARY_BITS;
const MAX_CODE_LENGTH: usize = 15;

// Entry layout: bits 0-15 symbol or subtable offset, bits 16-20 code length
// or subtable index width, bit 31 set for links. Zero is an unused slot.
const LINK: u32 = 1 << 31;

fn symbol_entry(symbol: usize, len: u8) -> u32 {
    symbol as u32 | (len as u32) << 16
}

fn link_entry(offset: usize, bits: u32) -> u32 {
    LINK | offset as u32 | bits << 16
}

fn entry_len(entry: u32) -> u32 {
    (entry >> 16) & 0x1F
}

#[derive(Debug)]
pub(crate) struct HuffmanTree {
    primary: [u32; PRIMARY_SIZE],
    subtables: Vec<u32>,
    max_len: u32,
}

impl HuffmanTree {
    pub(crate) const MAX_LITERAL_TREE_ELEMENTS: usize = 288;
    pub(crate) const MAX_DIST_TREE_ELEMENTS: usize = 32;
    pub(crate) const END_OF_BLOCK_CODE: usize = 256;
    pub(crate) const NUMBER_OF_CODE_LENGTH_TREE_ELEMENTS: usize = 19;

    /// A table that decodes nothing, for trees not read yet.
    pub fn invalid() -> Self {
        HuffmanTree {
            primary: [0; PRIMARY_SIZE],
            subtables: Vec::new(),
            max_len: 0,
        }
    }

    pub fn static_literal_length_tree() -> Self {
        // RFC 1951 section 3.2.6
        let mut lengths = [0u8; Self::MAX_LITERAL_TREE_ELEMENTS];
        lengths[..144].fill(8);
        lengths[144..256].fill(9);
        lengths[256..280].fill(7);
        lengths[280..].fill(8);
        HuffmanTree::new(&lengths).expect("fixed literal/length code lengths form a valid tree")
    }

    pub fn static_distance_tree() -> Self {
        // Codes 30 and 31 complete the tree; the inflater rejects them.
        HuffmanTree::new(&[5; Self::MAX_DIST_TREE_ELEMENTS])
            .expect("fixed distance code lengths form a valid tree")
    }

    pub fn new(code_lengths: &[u8]) -> Result<HuffmanTree, InternalErr> {
        let mut tree = Self::invalid();
        tree.new_in_place(code_lengths)?;
        Ok(tree)
    }

    /// Rebuild the table for `code_lengths`, reusing the allocation.
    pub fn new_in_place(&mut self, code_lengths: &[u8]) -> Result<(), InternalErr> {
        debug_assert!(code_lengths.len() <= Self::MAX_LITERAL_TREE_ELEMENTS);
        self.primary.fill(0);
        self.subtables.clear();
        self.max_len = 0;

        let mut count = [0u32; MAX_CODE_LENGTH + 1];
        for &len in code_lengths {
            if len as usize > MAX_CODE_LENGTH {
                return Err(InternalErr::DataError);
            }
            count[len as usize] += 1;
        }
        count[0] = 0;

        // Kraft inequality: more codes of a length than the prefixes left
        // over means two symbols would share a code. Incomplete codes are
        // allowed (a single distance code is common).
        let mut left: i64 = 1;
        for &n in &count[1..] {
            left = (left << 1) - n as i64;
            if left < 0 {
                return Err(InternalErr::DataError);
            }
        }

        let mut next_code = [0u32; MAX_CODE_LENGTH + 1];
        let mut code = 0;
        for len in 1..=MAX_CODE_LENGTH {
            code = (code + count[len - 1]) << 1;
            next_code[len] = code;
        }

        // Reversed codes, and for every primary slot the longest code behind
        // it so subtables can be sized before they are filled.
        let mut reversed = [0u32; Self::MAX_LITERAL_TREE_ELEMENTS];
        let mut longest = [0u8; PRIMARY_SIZE];
        for (symbol, &len) in code_lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let canonical = next_code[len as usize];
            next_code[len as usize] += 1;
            let rev = canonical.reverse_bits() >> (32 - len as u32);
            reversed[symbol] = rev;
            self.max_len = self.max_len.max(len as u32);
            if len as u32 > PRIMARY_BITS {
                let slot = (rev as usize) & (PRIMARY_SIZE - 1);
                longest[slot] = longest[slot].max(len);
            }
        }

        for (slot, &len) in longest.iter().enumerate() {
            if len > 0 {
                let bits = len as u32 - PRIMARY_BITS;
                self.primary[slot] = link_entry(self.subtables.len(), bits);
                self.subtables.resize(self.subtables.len() + (1 << bits), 0);
            }
        }

        for (symbol, &len) in code_lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let rev = reversed[symbol] as usize;
            let entry = symbol_entry(symbol, len);
            if len as u32 <= PRIMARY_BITS {
                for slot in (rev..PRIMARY_SIZE).step_by(1 << len) {
                    self.primary[slot] = entry;
                }
            } else {
                let link = self.primary[rev & (PRIMARY_SIZE - 1)];
                let offset = (link & 0xFFFF) as usize;
                let size = 1usize << entry_len(link);
                let high = rev >> PRIMARY_BITS;
                for i in (high..size).step_by(1 << (len as u32 - PRIMARY_BITS)) {
                    self.subtables[offset + i] = entry;
                }
            }
        }
        Ok(())
    }

    pub fn get_next_symbol(&self, input: &mut InputBuffer<'_>) -> Result<u16, InternalErr> {
        // Loads up to 16 bits; missing bits read as zero.
        let bits = input.try_load_16bits();
        let available = input.available_bits() as u32;
        if available == 0 {
            return Err(InternalErr::DataNeeded);
        }

        let mut entry = self.primary[bits as usize & (PRIMARY_SIZE - 1)];
        if entry & LINK != 0 {
            let offset = (entry & 0xFFFF) as usize;
            let mask = (1 << entry_len(entry)) - 1;
            entry = self.subtables[offset + ((bits >> PRIMARY_BITS) & mask) as usize];
        }

        let len = entry_len(entry);
        if len == 0 {
            // unused code, unless the zero padding landed us here
            return Err(if available < self.max_len {
                InternalErr::DataNeeded
            } else {
                InternalErr::DataError
            });
        }
        if len > available {
            return Err(InternalErr::DataNeeded);
        }
        input.skip_bits(len as i32);
        Ok((entry & 0xFFFF) as u16)
    }
}

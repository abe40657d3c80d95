// Resumable RFC 1951 inflater.
//
// The state machine can be fed input and drained of output in chunks of any
// size, including a single byte. When asked to, it stops at every deflate
// block boundary so the caller can record a checkpoint there: the bit position
// of the boundary (derived from `buffered_bits()`) and the window returned by
// `history()` are everything needed to resume with `restore()`.

use crate::huffman_tree::HuffmanTree;
use crate::input_buffer::{BitsBuffer, InputBuffer};
use crate::output_window::OutputWindow;
use crate::{BlockType, InternalErr};

// Literal/length code lengths followed by distance code lengths.
const MAX_CODES: usize = HuffmanTree::MAX_LITERAL_TREE_ELEMENTS + 32;

// Extra bits for length code 257 - 285.
const EXTRA_LENGTH_BITS: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

// The base length for length code 257 - 285.
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];

// The base distance for distance code 0 - 29.
const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

const EXTRA_DISTANCE_BITS: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

// Order in which code length code lengths are sent.
const CODE_ORDER: [u8; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

const MAX_MATCH: usize = 258;
const MAX_LITERAL_LENGTH_CODES: u32 = 286;
const MAX_DISTANCE_CODES: u32 = 30;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum InflaterState {
    ReadingBFinal,
    ReadingBType,

    ReadingNumLitCodes,
    ReadingNumDistCodes,
    ReadingNumCodeLengthCodes,
    ReadingCodeLengthCodes,
    ReadingTreeCodesBefore,
    ReadingTreeCodesAfter,

    DecodeTop,
    HaveInitialLength,
    HaveFullLength,
    HaveDistCode,

    UncompressedAligning,
    UncompressedByte1,
    UncompressedByte2,
    UncompressedByte3,
    UncompressedByte4,
    DecodingUncompressed,

    Done,
    DataErrored,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub(crate) struct InflateResult {
    /// The number of bytes consumed from the input slice.
    pub bytes_consumed: usize,
    /// The number of bytes written to the output slice.
    pub bytes_written: usize,
    /// Stopped right after the end of a non-final block, with no output
    /// pending.
    pub block_boundary: bool,
}

#[derive(Debug)]
pub(crate) struct Inflater {
    output: OutputWindow,
    bits: BitsBuffer,
    state: InflaterState,
    bfinal: bool,
    block_type: BlockType,
    boundary_pending: bool,

    // uncompressed block
    block_length_buffer: [u8; 4],
    block_length: usize,

    // compressed block
    length: usize,
    distance_code: u16,
    extra_bits: i32,

    loop_counter: u32,
    literal_length_code_count: u32,
    distance_code_count: u32,
    code_length_code_count: u32,
    code_array_size: u32,
    length_code: u16,

    code_list: [u8; MAX_CODES],
    code_length_tree_code_length: [u8; HuffmanTree::NUMBER_OF_CODE_LENGTH_TREE_ELEMENTS],
    code_length_tree: HuffmanTree,
    literal_length_tree: HuffmanTree,
    distance_tree: HuffmanTree,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            output: OutputWindow::new(),
            bits: BitsBuffer::new(),
            state: InflaterState::ReadingBFinal,
            bfinal: false,
            block_type: BlockType::Uncompressed,
            boundary_pending: false,
            block_length_buffer: [0; 4],
            block_length: 0,
            length: 0,
            distance_code: 0,
            extra_bits: 0,
            loop_counter: 0,
            literal_length_code_count: 0,
            distance_code_count: 0,
            code_length_code_count: 0,
            code_array_size: 0,
            length_code: 0,
            code_list: [0; MAX_CODES],
            code_length_tree_code_length: [0; HuffmanTree::NUMBER_OF_CODE_LENGTH_TREE_ELEMENTS],
            code_length_tree: HuffmanTree::invalid(),
            literal_length_tree: HuffmanTree::invalid(),
            distance_tree: HuffmanTree::invalid(),
        }
    }

    /// Start a new deflate stream. History is kept: it is harmless for a
    /// fresh stream and it lets a checkpoint taken shortly after a member
    /// boundary still carry a full window.
    pub fn reset(&mut self) {
        self.bits = BitsBuffer::new();
        self.state = InflaterState::ReadingBFinal;
        self.bfinal = false;
        self.boundary_pending = false;
    }

    /// Forget everything, including history.
    pub fn clear(&mut self) {
        self.reset();
        self.output.clear();
    }

    /// Resume at a block boundary. `bit_count` low bits of `bits` are the
    /// unread remainder of the byte the boundary falls into; `window` is the
    /// output that preceded the boundary.
    pub fn restore(&mut self, bits: u8, bit_count: u8, window: &[u8]) {
        self.reset();
        self.bits = BitsBuffer::from_bits(bits as u32, bit_count as i32);
        self.output.restore(window);
    }

    pub fn finished(&self) -> bool {
        self.state == InflaterState::Done && self.output.available_bytes() == 0
    }

    pub fn errored(&self) -> bool {
        self.state == InflaterState::DataErrored
    }

    /// Bits loaded from input and not consumed yet.
    pub fn buffered_bits(&self) -> u32 {
        self.bits.bits_in_buffer as u32
    }

    /// The newest `len` bytes of output.
    pub fn history(&self, len: usize) -> (&[u8], &[u8]) {
        self.output.history(len)
    }

    pub fn history_len(&self) -> usize {
        self.output.history_len()
    }

    /// After the final block, hand back the whole bytes that were loaded
    /// into the bit buffer but belong to whatever follows the deflate data.
    pub fn take_unused_bytes(&mut self) -> Vec<u8> {
        debug_assert_eq!(self.state, InflaterState::Done);
        let partial = self.bits.bits_in_buffer % 8;
        self.bits.bit_buffer >>= partial;
        self.bits.bits_in_buffer -= partial;
        let mut unused = Vec::with_capacity((self.bits.bits_in_buffer / 8) as usize);
        while self.bits.bits_in_buffer >= 8 {
            unused.push(self.bits.bit_buffer as u8);
            self.bits.bit_buffer >>= 8;
            self.bits.bits_in_buffer -= 8;
        }
        unused
    }

    pub fn inflate(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        stop_at_block_boundary: bool,
    ) -> Result<InflateResult, InternalErr> {
        if self.errored() {
            return Err(InternalErr::DataError);
        }
        let mut input = InputBuffer::new(self.bits, input);
        let mut result = InflateResult::default();
        let outcome = self.inflate_loop(&mut input, output, stop_at_block_boundary, &mut result);
        self.bits = input.bits;
        result.bytes_consumed = input.read_bytes;
        match outcome {
            Ok(()) => Ok(result),
            Err(err) => {
                self.state = InflaterState::DataErrored;
                Err(err)
            }
        }
    }

    fn inflate_loop(
        &mut self,
        input: &mut InputBuffer<'_>,
        output: &mut [u8],
        stop_at_block_boundary: bool,
        result: &mut InflateResult,
    ) -> Result<(), InternalErr> {
        loop {
            result.bytes_written += self.output.copy_to(&mut output[result.bytes_written..]);

            if self.boundary_pending && self.output.available_bytes() == 0 {
                self.boundary_pending = false;
                result.block_boundary = true;
                return Ok(());
            }
            if result.bytes_written == output.len() || self.state == InflaterState::Done {
                return Ok(());
            }

            match self.decode(input) {
                Ok(true) => {
                    if stop_at_block_boundary && self.state == InflaterState::ReadingBFinal {
                        self.boundary_pending = true;
                    }
                }
                Ok(false) => {}
                Err(InternalErr::DataNeeded) => {
                    let rest = &mut output[result.bytes_written..];
                    result.bytes_written += self.output.copy_to(rest);
                    return Ok(());
                }
                Err(InternalErr::DataError) => return Err(InternalErr::DataError),
            }
        }
    }

    /// Decode until a block ends (`Ok(true)`), the window fills up
    /// (`Ok(false)`) or input runs out (`Err(DataNeeded)`).
    fn decode(&mut self, input: &mut InputBuffer<'_>) -> Result<bool, InternalErr> {
        if self.state == InflaterState::ReadingBFinal {
            self.bfinal = input.get_bits(1)? != 0;
            self.state = InflaterState::ReadingBType;
        }

        if self.state == InflaterState::ReadingBType {
            let bits = input.get_bits(2)?;
            self.block_type = BlockType::from_int(bits).ok_or(InternalErr::DataError)?;
            self.state = match self.block_type {
                BlockType::Dynamic => InflaterState::ReadingNumLitCodes,
                BlockType::Static => {
                    self.literal_length_tree = HuffmanTree::static_literal_length_tree();
                    self.distance_tree = HuffmanTree::static_distance_tree();
                    InflaterState::DecodeTop
                }
                BlockType::Uncompressed => InflaterState::UncompressedAligning,
            };
        }

        let end_of_block = match self.block_type {
            BlockType::Dynamic => {
                if matches!(
                    self.state,
                    InflaterState::ReadingNumLitCodes
                        | InflaterState::ReadingNumDistCodes
                        | InflaterState::ReadingNumCodeLengthCodes
                        | InflaterState::ReadingCodeLengthCodes
                        | InflaterState::ReadingTreeCodesBefore
                        | InflaterState::ReadingTreeCodesAfter
                ) {
                    self.decode_dynamic_block_header(input)?;
                }
                self.decode_block(input)?
            }
            BlockType::Static => self.decode_block(input)?,
            BlockType::Uncompressed => self.decode_uncompressed_block(input)?,
        };

        if end_of_block {
            self.state = if self.bfinal {
                InflaterState::Done
            } else {
                InflaterState::ReadingBFinal
            };
        }
        Ok(end_of_block)
    }

    fn decode_uncompressed_block(
        &mut self,
        input: &mut InputBuffer<'_>,
    ) -> Result<bool, InternalErr> {
        loop {
            match self.state {
                InflaterState::UncompressedAligning => {
                    input.skip_to_byte_boundary();
                    self.state = InflaterState::UncompressedByte1;
                }
                InflaterState::UncompressedByte1
                | InflaterState::UncompressedByte2
                | InflaterState::UncompressedByte3
                | InflaterState::UncompressedByte4 => {
                    let index = self.state as usize - InflaterState::UncompressedByte1 as usize;
                    self.block_length_buffer[index] = input.get_bits(8)? as u8;
                    if self.state != InflaterState::UncompressedByte4 {
                        self.state = match self.state {
                            InflaterState::UncompressedByte1 => InflaterState::UncompressedByte2,
                            InflaterState::UncompressedByte2 => InflaterState::UncompressedByte3,
                            _ => InflaterState::UncompressedByte4,
                        };
                        continue;
                    }

                    let [l0, l1, n0, n1] = self.block_length_buffer;
                    let len = u16::from_le_bytes([l0, l1]);
                    let nlen = u16::from_le_bytes([n0, n1]);
                    if len != !nlen {
                        return Err(InternalErr::DataError);
                    }
                    self.block_length = len as usize;
                    self.state = InflaterState::DecodingUncompressed;
                }
                InflaterState::DecodingUncompressed => {
                    if self.block_length == 0 {
                        return Ok(true);
                    }
                    let copied = self.output.copy_from(input, self.block_length);
                    self.block_length -= copied;
                    if self.block_length == 0 {
                        return Ok(true);
                    }
                    if self.output.free_bytes() == 0 {
                        return Ok(false);
                    }
                    if copied == 0 {
                        return Err(InternalErr::DataNeeded);
                    }
                }
                _ => unreachable!("unknown state in stored block: {:?}", self.state),
            }
        }
    }

    fn decode_block(&mut self, input: &mut InputBuffer<'_>) -> Result<bool, InternalErr> {
        loop {
            if self.output.free_bytes() < MAX_MATCH {
                return Ok(false);
            }

            match self.state {
                InflaterState::DecodeTop => {
                    let symbol = self.literal_length_tree.get_next_symbol(input)? as usize;
                    if symbol < 256 {
                        self.output.write(symbol as u8);
                        continue;
                    }
                    if symbol == HuffmanTree::END_OF_BLOCK_CODE {
                        return Ok(true);
                    }
                    let code = symbol - 257;
                    if code >= LENGTH_BASE.len() {
                        return Err(InternalErr::DataError);
                    }
                    self.length = LENGTH_BASE[code] as usize;
                    self.extra_bits = EXTRA_LENGTH_BITS[code] as i32;
                    self.state = InflaterState::HaveInitialLength;
                }
                InflaterState::HaveInitialLength => {
                    if self.extra_bits > 0 {
                        self.length += input.get_bits(self.extra_bits)? as usize;
                    }
                    self.state = InflaterState::HaveFullLength;
                }
                InflaterState::HaveFullLength => {
                    let code = self.distance_tree.get_next_symbol(input)?;
                    if code as usize >= DISTANCE_BASE.len() {
                        return Err(InternalErr::DataError);
                    }
                    self.distance_code = code;
                    self.state = InflaterState::HaveDistCode;
                }
                InflaterState::HaveDistCode => {
                    let code = self.distance_code as usize;
                    let extra = EXTRA_DISTANCE_BITS[code] as i32;
                    let mut distance = DISTANCE_BASE[code] as usize;
                    if extra > 0 {
                        distance += input.get_bits(extra)? as usize;
                    }
                    if distance > self.output.history_len() {
                        return Err(InternalErr::DataError);
                    }
                    self.output.write_length_distance(self.length, distance);
                    self.state = InflaterState::DecodeTop;
                }
                _ => unreachable!("unknown state in compressed block: {:?}", self.state),
            }
        }
    }

    fn decode_dynamic_block_header(
        &mut self,
        input: &mut InputBuffer<'_>,
    ) -> Result<(), InternalErr> {
        loop {
            match self.state {
                InflaterState::ReadingNumLitCodes => {
                    self.literal_length_code_count = input.get_bits(5)? as u32 + 257;
                    if self.literal_length_code_count > MAX_LITERAL_LENGTH_CODES {
                        return Err(InternalErr::DataError);
                    }
                    self.state = InflaterState::ReadingNumDistCodes;
                }
                InflaterState::ReadingNumDistCodes => {
                    self.distance_code_count = input.get_bits(5)? as u32 + 1;
                    if self.distance_code_count > MAX_DISTANCE_CODES {
                        return Err(InternalErr::DataError);
                    }
                    self.state = InflaterState::ReadingNumCodeLengthCodes;
                }
                InflaterState::ReadingNumCodeLengthCodes => {
                    self.code_length_code_count = input.get_bits(4)? as u32 + 4;
                    self.loop_counter = 0;
                    self.state = InflaterState::ReadingCodeLengthCodes;
                }
                InflaterState::ReadingCodeLengthCodes => {
                    while self.loop_counter < self.code_length_code_count {
                        let bits = input.get_bits(3)?;
                        let slot = CODE_ORDER[self.loop_counter as usize] as usize;
                        self.code_length_tree_code_length[slot] = bits as u8;
                        self.loop_counter += 1;
                    }
                    for &order in &CODE_ORDER[self.code_length_code_count as usize..] {
                        self.code_length_tree_code_length[order as usize] = 0;
                    }

                    self.code_length_tree
                        .new_in_place(&self.code_length_tree_code_length)?;
                    self.code_array_size =
                        self.literal_length_code_count + self.distance_code_count;
                    self.loop_counter = 0;
                    self.state = InflaterState::ReadingTreeCodesBefore;
                }
                InflaterState::ReadingTreeCodesBefore | InflaterState::ReadingTreeCodesAfter => {
                    while self.loop_counter < self.code_array_size {
                        if self.state == InflaterState::ReadingTreeCodesBefore {
                            self.length_code = self.code_length_tree.get_next_symbol(input)?;
                        }

                        // 0 - 15: literal code lengths; 16 - 18: repeats
                        if self.length_code <= 15 {
                            self.code_list[self.loop_counter as usize] = self.length_code as u8;
                            self.loop_counter += 1;
                            self.state = InflaterState::ReadingTreeCodesBefore;
                            continue;
                        }

                        self.state = InflaterState::ReadingTreeCodesAfter;
                        let (repeat, value) = match self.length_code {
                            16 => {
                                if self.loop_counter == 0 {
                                    return Err(InternalErr::DataError);
                                }
                                let previous = self.code_list[self.loop_counter as usize - 1];
                                (input.get_bits(2)? as u32 + 3, previous)
                            }
                            17 => (input.get_bits(3)? as u32 + 3, 0),
                            _ => (input.get_bits(7)? as u32 + 11, 0),
                        };

                        if self.loop_counter + repeat > self.code_array_size {
                            return Err(InternalErr::DataError);
                        }
                        let start = self.loop_counter as usize;
                        self.code_list[start..][..repeat as usize].fill(value);
                        self.loop_counter += repeat;
                        self.state = InflaterState::ReadingTreeCodesBefore;
                    }

                    let literal_count = self.literal_length_code_count as usize;
                    let distance_count = self.distance_code_count as usize;

                    let mut literal_lengths = [0u8; HuffmanTree::MAX_LITERAL_TREE_ELEMENTS];
                    let mut distance_lengths = [0u8; HuffmanTree::MAX_DIST_TREE_ELEMENTS];
                    literal_lengths[..literal_count]
                        .copy_from_slice(&self.code_list[..literal_count]);
                    distance_lengths[..distance_count]
                        .copy_from_slice(&self.code_list[literal_count..][..distance_count]);

                    // a block without an end-of-block code can never finish
                    if literal_lengths[HuffmanTree::END_OF_BLOCK_CODE] == 0 {
                        return Err(InternalErr::DataError);
                    }

                    self.literal_length_tree.new_in_place(&literal_lengths)?;
                    self.distance_tree.new_in_place(&distance_lengths)?;
                    self.state = InflaterState::DecodeTop;
                    return Ok(());
                }
                _ => unreachable!("unknown state in block header: {:?}", self.state),
            }
        }
    }
}

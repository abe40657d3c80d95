// Container framing around the raw inflater.
//
// The decoder pulls compressed bytes from a source, strips gzip or zlib
// headers and trailers, walks from one member of a concatenated stream into
// the next, and keeps track of both the compressed and the uncompressed
// position so block boundaries can be captured as checkpoints.

use crate::error::{Error, Result};
use crate::index::Checkpoint;
use crate::inflater::Inflater;
use std::cmp::min;
use std::io::{self, Read, Seek, SeekFrom};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const CM_DEFLATE: u8 = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xE0;

const ZLIB_FDICT: u8 = 0x20;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Container {
    Gzip,
    Zlib,
}

impl Container {
    fn detect(first: u8, second: u8) -> Option<Self> {
        if [first, second] == GZIP_MAGIC {
            Some(Container::Gzip)
        } else if first & 0x0F == CM_DEFLATE
            && first >> 4 <= 7
            && (u16::from(first) << 8 | u16::from(second)) % 31 == 0
        {
            Some(Container::Zlib)
        } else {
            None
        }
    }

    /// CRC32 + ISIZE for gzip, Adler-32 for zlib.
    fn trailer_len(self) -> usize {
        match self {
            Container::Gzip => 8,
            Container::Zlib => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Member {
    Header,
    Body,
    Trailer,
    End,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub(crate) struct DecodeStep {
    pub written: usize,
    /// Stopped on a deflate block boundary; `capture()` is valid.
    pub boundary: bool,
}

#[derive(Debug)]
pub(crate) struct Decoder {
    inflater: Box<Inflater>,

    // compressed bytes read from the source, valid in input[input_start..input_end]
    input: Vec<u8>,
    input_start: usize,
    input_end: usize,
    buffer_size: usize,

    /// Offset in the source of `input[input_start]`.
    compressed_position: u64,
    /// Offset in the logical output of the next byte produced.
    uncompressed_position: u64,

    member: Member,
    member_index: u32,
    container: Option<Container>,
    concatenated: bool,
    positioned: bool,
}

impl Decoder {
    pub fn new(concatenated: bool, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            inflater: Box::new(Inflater::new()),
            input: vec![0; buffer_size],
            input_start: 0,
            input_end: 0,
            buffer_size,
            compressed_position: 0,
            uncompressed_position: 0,
            member: Member::Header,
            member_index: 0,
            container: None,
            concatenated,
            positioned: false,
        }
    }

    /// Whether the decoder was restored from a checkpoint and has not been
    /// invalidated since.
    pub fn is_positioned(&self) -> bool {
        self.positioned
    }

    pub fn invalidate(&mut self) {
        self.positioned = false;
    }

    pub fn is_finished(&self) -> bool {
        self.member == Member::End
    }

    pub fn compressed_position(&self) -> u64 {
        self.compressed_position
    }

    pub fn uncompressed_position(&self) -> u64 {
        self.uncompressed_position
    }

    /// Reposition the source and the inflater at `checkpoint`.
    pub fn restore<R: Read + Seek>(
        &mut self,
        source: &mut R,
        checkpoint: &Checkpoint,
    ) -> Result<()> {
        self.positioned = false;
        self.input_start = 0;
        self.input_end = 0;

        if checkpoint.is_origin() {
            source.seek(SeekFrom::Start(0))?;
            self.inflater.clear();
            self.compressed_position = 0;
            self.uncompressed_position = 0;
            self.member = Member::Header;
            self.member_index = 0;
            self.container = None;
            self.positioned = true;
            log::trace!("decoder restored at stream origin");
            return Ok(());
        }

        if self.container.is_none() {
            self.container = Some(Self::detect_container(source)?);
        }

        source.seek(SeekFrom::Start(checkpoint.compressed_offset))?;
        self.compressed_position = checkpoint.compressed_offset;
        let (bits, bit_count) = if checkpoint.bit_offset > 0 {
            let mut byte = [0u8];
            source.read_exact(&mut byte).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    let offset = checkpoint.compressed_offset;
                    Error::corrupt(offset, "checkpoint is past the end of the stream")
                }
                _ => Error::Io(e),
            })?;
            self.compressed_position += 1;
            (byte[0] >> checkpoint.bit_offset, 8 - checkpoint.bit_offset)
        } else {
            (0, 0)
        };

        self.inflater.restore(bits, bit_count, &checkpoint.window);
        self.uncompressed_position = checkpoint.uncompressed_offset;
        self.member = Member::Body;
        self.member_index = checkpoint.member_index;
        self.positioned = true;
        log::trace!(
            "decoder restored at {}:{} (uncompressed {})",
            checkpoint.compressed_offset,
            checkpoint.bit_offset,
            checkpoint.uncompressed_offset
        );
        Ok(())
    }

    fn detect_container<R: Read + Seek>(source: &mut R) -> Result<Container> {
        let mut magic = [0u8; 2];
        source.seek(SeekFrom::Start(0))?;
        source
            .read_exact(&mut magic)
            .map_err(|_| Error::corrupt(0, "stream is too short for a header"))?;
        Container::detect(magic[0], magic[1]).ok_or(Error::corrupt(0, "not a gzip or zlib stream"))
    }

    /// Snapshot the decoder at the block boundary it just stopped on.
    pub fn capture(&self) -> Checkpoint {
        debug_assert_eq!(self.member, Member::Body);
        let bit_position = self.compressed_position * 8 - self.inflater.buffered_bits() as u64;
        let window_len = min(crate::WINDOW_SIZE as u64, self.uncompressed_position) as usize;
        debug_assert!(window_len <= self.inflater.history_len());

        let (head, tail) = self.inflater.history(window_len);
        let mut window = Vec::with_capacity(window_len);
        window.extend_from_slice(head);
        window.extend_from_slice(tail);

        Checkpoint {
            compressed_offset: bit_position / 8,
            bit_offset: (bit_position % 8) as u8,
            uncompressed_offset: self.uncompressed_position,
            window,
            member_index: self.member_index,
        }
    }

    /// Decode into `out`. Returns when `out` is full, at the end of the
    /// stream, or (with `stop_at_boundary`) on the next deflate block
    /// boundary.
    pub fn decode<R: Read>(
        &mut self,
        source: &mut R,
        out: &mut [u8],
        stop_at_boundary: bool,
    ) -> Result<DecodeStep> {
        debug_assert!(self.positioned, "decode on an unpositioned decoder");
        let mut step = DecodeStep::default();

        while step.written < out.len() {
            match self.member {
                Member::End => break,
                Member::Header => {
                    if self.read_header(source)? {
                        self.inflater.reset();
                        self.member = Member::Body;
                    } else {
                        self.member = Member::End;
                    }
                }
                Member::Body => {
                    if self.input_start == self.input_end {
                        self.fill(source)?;
                    }
                    let exhausted = self.input_start == self.input_end;

                    let position = self.compressed_position;
                    let result = self
                        .inflater
                        .inflate(
                            &self.input[self.input_start..self.input_end],
                            &mut out[step.written..],
                            stop_at_boundary,
                        )
                        .map_err(|_| Error::corrupt(position, "invalid deflate data"))?;

                    self.input_start += result.bytes_consumed;
                    self.compressed_position += result.bytes_consumed as u64;
                    self.uncompressed_position += result.bytes_written as u64;
                    step.written += result.bytes_written;

                    if result.block_boundary {
                        step.boundary = true;
                        return Ok(step);
                    }
                    if self.inflater.finished() {
                        let unused = self.inflater.take_unused_bytes();
                        self.unread(&unused);
                        self.member = Member::Trailer;
                    } else if exhausted && result.bytes_consumed == 0 && result.bytes_written == 0 {
                        return Err(Error::corrupt(
                            self.compressed_position,
                            "unexpected end of stream inside a member",
                        ));
                    }
                }
                Member::Trailer => {
                    let trailer = self.container.map_or(0, Container::trailer_len);
                    for _ in 0..trailer {
                        if self.next_byte(source)?.is_none() {
                            let offset = self.compressed_position;
                            return Err(Error::corrupt(offset, "truncated member trailer"));
                        }
                    }
                    self.member = if self.concatenated {
                        Member::Header
                    } else {
                        Member::End
                    };
                }
            }
        }
        Ok(step)
    }

    /// Parse a member header. Returns `false` on a clean end of stream
    /// between members; zero padding after the last member is skipped.
    fn read_header<R: Read>(&mut self, source: &mut R) -> Result<bool> {
        let first_member = self.container.is_none();
        let start = self.compressed_position;

        let first = loop {
            match self.next_byte(source)? {
                None if first_member => return Err(Error::corrupt(start, "empty stream")),
                None => return Ok(false),
                Some(0) if !first_member => continue,
                Some(byte) => break byte,
            }
        };
        let second = self.expect_byte(source)?;

        let container = Container::detect(first, second)
            .ok_or(Error::corrupt(start, "not a gzip or zlib member header"))?;
        if self.container.is_some_and(|c| c != container) {
            return Err(Error::corrupt(start, "members mix gzip and zlib framing"));
        }

        match container {
            Container::Gzip => self.skip_gzip_header(source, start)?,
            Container::Zlib => {
                if second & ZLIB_FDICT != 0 {
                    let reason = "zlib preset dictionaries are not supported";
                    return Err(Error::corrupt(start, reason));
                }
            }
        }

        if !first_member {
            self.member_index += 1;
            log::trace!("member {} starts at {start}", self.member_index);
        }
        self.container = Some(container);
        Ok(true)
    }

    fn skip_gzip_header<R: Read>(&mut self, source: &mut R, start: u64) -> Result<()> {
        if self.expect_byte(source)? != CM_DEFLATE {
            return Err(Error::corrupt(start, "unknown gzip compression method"));
        }
        let flags = self.expect_byte(source)?;
        if flags & FRESERVED != 0 {
            return Err(Error::corrupt(start, "reserved gzip header flags set"));
        }
        // MTIME, XFL, OS
        self.skip_bytes(source, 6)?;

        if flags & FEXTRA != 0 {
            let len = u16::from_le_bytes([self.expect_byte(source)?, self.expect_byte(source)?]);
            self.skip_bytes(source, len as usize)?;
        }
        if flags & FNAME != 0 {
            while self.expect_byte(source)? != 0 {}
        }
        if flags & FCOMMENT != 0 {
            while self.expect_byte(source)? != 0 {}
        }
        if flags & FHCRC != 0 {
            self.skip_bytes(source, 2)?;
        }
        Ok(())
    }

    fn skip_bytes<R: Read>(&mut self, source: &mut R, count: usize) -> Result<()> {
        for _ in 0..count {
            self.expect_byte(source)?;
        }
        Ok(())
    }

    fn expect_byte<R: Read>(&mut self, source: &mut R) -> Result<u8> {
        let offset = self.compressed_position;
        match self.next_byte(source)? {
            Some(byte) => Ok(byte),
            None => Err(Error::corrupt(offset, "truncated member header")),
        }
    }

    fn next_byte<R: Read>(&mut self, source: &mut R) -> Result<Option<u8>> {
        if self.input_start == self.input_end {
            self.fill(source)?;
            if self.input_start == self.input_end {
                return Ok(None);
            }
        }
        let byte = self.input[self.input_start];
        self.input_start += 1;
        self.compressed_position += 1;
        Ok(Some(byte))
    }

    fn fill<R: Read>(&mut self, source: &mut R) -> Result<()> {
        debug_assert_eq!(self.input_start, self.input_end);
        loop {
            match source.read(&mut self.input) {
                Ok(n) => {
                    self.input_start = 0;
                    self.input_end = n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Put bytes the inflater read past the end of the deflate data back in
    /// front of the input.
    fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let n = bytes.len();
        if self.input_start >= n {
            self.input_start -= n;
            self.input[self.input_start..][..n].copy_from_slice(bytes);
        } else {
            let mut input = Vec::with_capacity(self.buffer_size.max(n + self.input_end));
            input.extend_from_slice(bytes);
            input.extend_from_slice(&self.input[self.input_start..self.input_end]);
            self.input_end = input.len();
            input.resize(self.buffer_size.max(self.input_end), 0);
            self.input = input;
            self.input_start = 0;
        }
        self.compressed_position -= n as u64;
    }
}

//! Bitstream reader and writer for variable-width serial fields.
//!
//! Serial payloads are laid out back to front: rendering the byte buffer in
//! reverse order, MSB first, gives the logical bitstring, and fields are
//! taken off the *tail* of that string. In terms of the buffer itself, bits
//! are consumed least-significant first starting at byte 0, and each field
//! value is assembled with its first bit as the LSB.
//!
//! `eat` consumes from the front of the stream and `append` adds to the far
//! end, so a stream written field by field reads back in the same order.

/// Errors raised by bitstream operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitstreamError {
    #[error("Attempted to read {requested} bits, but only {remaining} remain")]
    Exhausted { requested: usize, remaining: usize },

    #[error("Field width of {0} bits exceeds the 64-bit maximum")]
    TooWide(usize),

    #[error("Value {value} does not fit in {bits} bits")]
    Overflow { value: u64, bits: usize },
}

/// Variable-width bit queue over a byte buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitStream {
    bytes: Vec<u8>,
    /// Position of the next bit `eat` returns
    head: usize,
    /// One past the last valid bit
    tail: usize,
}

impl BitStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing payload; every bit of `bytes` is readable
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            head: 0,
            tail: bytes.len() * 8,
        }
    }

    /// Number of unread bits
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn bit(&self, pos: usize) -> bool {
        (self.bytes[pos / 8] >> (pos % 8)) & 1 == 1
    }

    fn push_bit(&mut self, bit: bool) {
        let byte_idx = self.tail / 8;
        if byte_idx >= self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte_idx] |= 1 << (self.tail % 8);
        }
        self.tail += 1;
    }

    /// Consume `count` bits off the front of the stream
    pub fn eat(&mut self, count: usize) -> Result<u64, BitstreamError> {
        if count > 64 {
            return Err(BitstreamError::TooWide(count));
        }
        if count > self.len() {
            return Err(BitstreamError::Exhausted {
                requested: count,
                remaining: self.len(),
            });
        }

        let mut value = 0u64;
        for i in 0..count {
            if self.bit(self.head + i) {
                value |= 1 << i;
            }
        }
        self.head += count;
        Ok(value)
    }

    /// Add a `count`-bit encoding of `value` at the far end of the stream
    pub fn append(&mut self, value: u64, count: usize) -> Result<(), BitstreamError> {
        if count > 64 {
            return Err(BitstreamError::TooWide(count));
        }
        if count < 64 && value >> count != 0 {
            return Err(BitstreamError::Overflow { value, bits: count });
        }

        for i in 0..count {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Add every unread bit of `other` at the far end of this stream
    pub fn append_stream(&mut self, other: &BitStream) {
        for pos in other.head..other.tail {
            self.push_bit(other.bit(pos));
        }
    }

    /// True when every unread bit is zero (or nothing is left)
    pub fn is_zero(&self) -> bool {
        (self.head..self.tail).all(|pos| !self.bit(pos))
    }

    /// Serialize the unread bits, zero-padding up to a byte boundary
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len().div_ceil(8)];
        for (i, pos) in (self.head..self.tail).enumerate() {
            if self.bit(pos) {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }
}

//! Field primitives shared by every message schema.
//!
//! All integers are big-endian. A *short* field is a 2-byte count followed by
//! that many bytes; a *long* field uses a 3-byte count. Readers never scan for
//! delimiters: they stop exactly at each declared length.

use bytes::{BufMut, Bytes};

use crate::error::{constants, ProtocolError, Result};

/// Width of a short length prefix
pub const SHORT: usize = 2;
/// Width of a long length prefix
pub const LONG: usize = 3;
/// Largest value a long prefix can declare
pub const LONG_MAX: usize = (1 << 24) - 1;

/// Largest value representable in `width` bytes.
pub fn max_for_width(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

/// Append `value` as a `width`-byte big-endian unsigned integer.
///
/// Caller guarantees `value <= max_for_width(width)`.
pub fn put_uint<B: BufMut>(buf: &mut B, value: u64, width: usize) {
    buf.put_uint(value, width);
}

/// Append a length prefix of `width` bytes followed by `data`.
pub fn put_prefixed<B: BufMut>(buf: &mut B, data: &[u8], width: usize) -> Result<()> {
    if data.len() as u64 > max_for_width(width) {
        return Err(ProtocolError::OversizedPacket(data.len()));
    }
    put_uint(buf, data.len() as u64, width);
    buf.put_slice(data);
    Ok(())
}

/// Decode a big-endian unsigned integer from up to 8 bytes.
pub fn read_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Bounded cursor over a received buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::malformed(format!(
                "{}: need {len} bytes, have {}",
                constants::ERR_TRUNCATED_FIELD,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn uint(&mut self, width: usize) -> Result<u64> {
        Ok(read_uint(self.take(width)?))
    }

    /// Read a `width`-byte length followed by that many bytes.
    pub fn prefixed(&mut self, width: usize) -> Result<&'a [u8]> {
        let len = usize::try_from(self.uint(width)?)
            .map_err(|_| ProtocolError::malformed("length does not fit in memory"))?;
        self.take(len)
    }

    pub fn prefixed_string(&mut self, width: usize) -> Result<String> {
        let raw = self.prefixed(width)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| ProtocolError::malformed(constants::ERR_INVALID_UTF8))
    }

    pub fn prefixed_bytes(&mut self, width: usize) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.prefixed(width)?))
    }

    pub fn short_string(&mut self) -> Result<String> {
        self.prefixed_string(SHORT)
    }

    pub fn long_string(&mut self) -> Result<String> {
        self.prefixed_string(LONG)
    }
}

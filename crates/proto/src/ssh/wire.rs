//! Wire buffer with cursor-based big-endian primitives (RFC 4251 Section 5).
//!
//! Every multi-byte field in the protocol is big-endian. Length-prefixed
//! fields carry a 4-byte unsigned length immediately before their content.
//! `mpint` values are arbitrary-precision integers: stripped of leading
//! zeros, with a single `0x00` pad byte prepended when the high bit of the
//! first byte is set, so the value is always read back as non-negative.
//!
//! # Invariants
//!
//! - Reads never pass the write position; a declared length that exceeds
//!   the remaining bytes is a corrupt-data fault, never a silent truncation.
//! - Writers grow the backing storage with amortized doubling and never
//!   shrink it.
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::ssh::wire::WireBuffer;
//!
//! let mut buf = WireBuffer::new();
//! buf.write_u32(42);
//! buf.write_string("ssh-userauth");
//!
//! assert_eq!(buf.read_u32().unwrap(), 42);
//! assert_eq!(buf.read_string().unwrap(), "ssh-userauth");
//! ```

use bytes::{BufMut, BytesMut};
use num_bigint::BigUint;
use skiff_platform::{SkiffError, SkiffResult};

/// Growable byte buffer with independent read and write cursors.
///
/// The write cursor is the end of the backing storage; the read cursor
/// trails it. `0 <= rpos <= len` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBuffer {
    data: BytesMut,
    rpos: usize,
}

impl WireBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            rpos: 0,
        }
    }

    /// Creates an empty buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            rpos: 0,
        }
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.rpos
    }

    /// Returns the full written contents, including already-read bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns the unread portion of the buffer.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.rpos..]
    }

    /// Resets the read cursor to the start of the buffer.
    pub fn rewind(&mut self) {
        self.rpos = 0;
    }

    /// Consumes the buffer, returning the written bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data.to_vec()
    }

    fn corrupt(what: &str, needed: usize, remaining: usize) -> SkiffError {
        SkiffError::Protocol(format!(
            "corrupt data: {} needs {} bytes, {} remaining",
            what, needed, remaining
        ))
    }

    fn take(&mut self, what: &str, n: usize) -> SkiffResult<&[u8]> {
        if self.remaining() < n {
            return Err(Self::corrupt(what, n, self.remaining()));
        }
        let start = self.rpos;
        self.rpos += n;
        Ok(&self.data[start..start + n])
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Writes a boolean as a single byte (0 or 1).
    pub fn write_bool(&mut self, value: bool) {
        self.data.put_u8(u8::from(value));
    }

    /// Writes a big-endian u32.
    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32(value);
    }

    /// Writes a big-endian u64.
    pub fn write_u64(&mut self, value: u64) {
        self.data.put_u64(value);
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Writes a length-prefixed byte string.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.put_u32(bytes.len() as u32);
        self.data.put_slice(bytes);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Writes a comma-separated name-list (RFC 4251 Section 5).
    pub fn write_name_list(&mut self, names: &[String]) {
        self.write_string(&names.join(","));
    }

    /// Writes an arbitrary-precision integer as an mpint.
    ///
    /// Zero is written as an empty field. A `0x00` pad byte is prepended
    /// when the most significant bit of the leading byte is set.
    pub fn write_mpint(&mut self, value: &BigUint) {
        let bytes = value.to_bytes_be();
        if bytes == [0] {
            self.data.put_u32(0);
            return;
        }
        let pad = bytes[0] & 0x80 != 0;
        self.data.put_u32((bytes.len() + usize::from(pad)) as u32);
        if pad {
            self.data.put_u8(0);
        }
        self.data.put_slice(&bytes);
    }

    /// Writes raw big-endian magnitude bytes as an mpint.
    pub fn write_mpint_bytes(&mut self, magnitude: &[u8]) {
        self.write_mpint(&BigUint::from_bytes_be(magnitude));
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> SkiffResult<u8> {
        Ok(self.take("byte", 1)?[0])
    }

    /// Reads a boolean (any non-zero byte is true).
    pub fn read_bool(&mut self) -> SkiffResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a big-endian u32.
    pub fn read_u32(&mut self) -> SkiffResult<u32> {
        let b = self.take("uint32", 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian u64.
    pub fn read_u64(&mut self) -> SkiffResult<u64> {
        let b = self.take("uint64", 8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads `n` raw bytes.
    pub fn read_raw(&mut self, n: usize) -> SkiffResult<Vec<u8>> {
        Ok(self.take("raw bytes", n)?.to_vec())
    }

    /// Reads a length-prefixed byte string.
    ///
    /// Faults with a corrupt-data error if the declared length exceeds the
    /// remaining bytes.
    pub fn read_bytes(&mut self) -> SkiffResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if self.remaining() < len {
            return Err(Self::corrupt("string body", len, self.remaining()));
        }
        self.read_raw(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> SkiffResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|_| SkiffError::Protocol("corrupt data: string is not valid UTF-8".to_string()))
    }

    /// Reads a comma-separated name-list.
    pub fn read_name_list(&mut self) -> SkiffResult<Vec<String>> {
        let s = self.read_string()?;
        if s.is_empty() {
            Ok(vec![])
        } else {
            Ok(s.split(',').map(String::from).collect())
        }
    }

    /// Reads an mpint. An empty field decodes to zero.
    pub fn read_mpint(&mut self) -> SkiffResult<BigUint> {
        let bytes = self.read_bytes()?;
        Ok(BigUint::from_bytes_be(&bytes))
    }
}

impl From<Vec<u8>> for WireBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: BytesMut::from(&data[..]),
            rpos: 0,
        }
    }
}

impl From<&[u8]> for WireBuffer {
    fn from(data: &[u8]) -> Self {
        Self {
            data: BytesMut::from(data),
            rpos: 0,
        }
    }
}

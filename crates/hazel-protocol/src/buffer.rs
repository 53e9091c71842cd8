//! Binary reader and writer for the Hazel wire format.
//!
//! Hazel mixes byte orders: nonces are big-endian, everything else is
//! little-endian. Every fixed-width accessor comes in both orders. On top of the fixed-width integers there are three
//! composite encodings used everywhere:
//!
//! - **Packed integers**: 7 data bits per byte, least-significant group
//!   first, high bit set on every byte except the last. A `u32` takes
//!   1 to 5 bytes. Negative `i32` values are written as their two's
//!   complement `u32`, so `-2` always costs five bytes.
//! - **Strings**: packed byte length followed by UTF-8 bytes.
//! - **Messages**: `[u16 LE length][u8 tag][body]`, where `length` counts
//!   the body only. Payloads, game-data messages and component state
//!   blocks are all framed this way and can nest.
//!
//! [`BufferReader`] borrows the input and hands out sub-readers for
//! nested messages without copying. [`BufferWriter`] builds into a
//! `BytesMut` and back-patches message lengths once the body is known.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;

/// Longest body a single message frame can describe.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

// ---------------------------------------------------------------------------
// BufferReader
// ---------------------------------------------------------------------------

/// Cursor over a borrowed byte slice.
///
/// Every read checks the remaining length first and fails with
/// [`ProtocolError::UnexpectedEof`] instead of panicking; the `bytes`
/// `Buf` getters it delegates to would panic on short input.
#[derive(Debug, Clone)]
pub struct BufferReader<'a> {
    buf: &'a [u8],
    start_len: usize,
}

impl<'a> BufferReader<'a> {
    /// Starts reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            start_len: buf.len(),
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// `true` once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Offset of the cursor from the start of the buffer.
    pub fn position(&self) -> usize {
        self.start_len - self.buf.len()
    }

    fn need(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::UnexpectedEof {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    /// Any non-zero byte reads as `true`.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u16_be(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16_le(&mut self) -> Result<i16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_i16_be(&mut self) -> Result<i16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u32_le(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u32_be(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i32_le(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_i32_be(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_f32_le(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_f32_be(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32())
    }

    /// Reads a packed (7-bit groups) unsigned integer.
    pub fn read_packed_u32(&mut self) -> Result<u32, ProtocolError> {
        let mut value: u64 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return u32::try_from(value)
                    .map_err(|_| ProtocolError::VarIntOverflow);
            }
        }
        Err(ProtocolError::VarIntOverflow)
    }

    /// Reads a packed integer and reinterprets it as two's complement.
    pub fn read_packed_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.read_packed_u32()? as i32)
    }

    /// Borrows the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Borrows everything that is left and leaves the reader empty.
    pub fn read_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    /// Reads a packed-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_packed_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidString)
    }

    /// Reads one `[u16 length][u8 tag][body]` frame and returns its tag
    /// with a reader positioned at the start of the body.
    pub fn read_message(&mut self) -> Result<(u8, BufferReader<'a>), ProtocolError> {
        let len = self.read_u16_le()? as usize;
        let tag = self.read_u8()?;
        let body = self.read_bytes(len)?;
        Ok((tag, BufferReader::new(body)))
    }

    pub fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.read_bytes(len).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// BufferWriter
// ---------------------------------------------------------------------------

/// Growable output buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferWriter {
    buf: BytesMut,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freezes the written bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_u16_be(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_i16_le(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    pub fn write_i16_be(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_u32_be(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn write_i32_le(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_i32_be(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_f32_le(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn write_f32_be(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn write_packed_u32(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.put_u8(byte);
                return;
            }
            self.buf.put_u8(byte | 0x80);
        }
    }

    pub fn write_packed_i32(&mut self, value: i32) {
        self.write_packed_u32(value as u32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_packed_u32(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Writes a `[u16 length][u8 tag][body]` frame whose body is produced
    /// by `body`. The length is patched in afterwards.
    ///
    /// # Errors
    /// Fails if `body` fails or writes more than [`MAX_MESSAGE_LEN`] bytes.
    pub fn write_message<F>(&mut self, tag: u8, body: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(&mut Self) -> Result<(), ProtocolError>,
    {
        let len_at = self.buf.len();
        self.buf.put_u16_le(0);
        self.buf.put_u8(tag);
        let body_start = self.buf.len();

        body(self)?;

        let body_len = self.buf.len() - body_start;
        let body_len = u16::try_from(body_len).map_err(|_| {
            ProtocolError::InvalidMessage(format!(
                "message tag {tag} body is {body_len} bytes, limit is {MAX_MESSAGE_LEN}"
            ))
        })?;
        self.buf[len_at..len_at + 2].copy_from_slice(&body_len.to_le_bytes());
        Ok(())
    }
}

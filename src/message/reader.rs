//! Pooled payload cursor for received messages.

use crate::pool::Reusable;

use super::message::{Body, Message, MessageError};

/// A reusable cursor over a message payload.
///
/// The reader holds its own reference to the message body, so it stays valid
/// after the message itself is dropped. All multi-byte values are read
/// big-endian. Acquire one with
/// [`CachePools::reader`](crate::client::CachePools::reader).
#[derive(Debug, Default)]
pub struct MessageReader {
    body: Option<Body>,
    pos: usize,
}

impl MessageReader {
    /// Create a standalone reader (pooled acquisition is the normal path).
    pub fn new() -> Self {
        Self::default()
    }

    /// Point this reader at the start of `message`'s payload.
    pub fn bind(&mut self, message: &Message) {
        self.body = Some(message.body());
        self.pos = 0;
    }

    fn payload(&self) -> &[u8] {
        self.body.as_ref().map_or(&[], Body::as_slice)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.payload().len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&[u8], MessageError> {
        if self.remaining() < len {
            return Err(MessageError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.payload()[start..start + len])
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, MessageError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, MessageError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, MessageError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, MessageError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("slice length checked");
        Ok(u64::from_be_bytes(bytes))
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, MessageError> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a big-endian IEEE-754 `f32`.
    pub fn read_f32(&mut self) -> Result<f32, MessageError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], MessageError> {
        self.take(len)
    }

    /// Read a string written by
    /// [`MessageWriter::write_str`](super::MessageWriter::write_str).
    pub fn read_str(&mut self) -> Result<&str, MessageError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)?)
    }
}

impl Reusable for MessageReader {
    fn reset(&mut self) {
        self.body = None;
        self.pos = 0;
    }
}

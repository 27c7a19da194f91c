//! Pooled serialization cursor for building message payloads.

use bytes::{BufMut, BytesMut};

use crate::pool::Reusable;

use super::Message;

/// A reusable cursor that accumulates a message payload.
///
/// All multi-byte values are written big-endian, matching the wire format.
/// Writers are recycled through the client's object cache; acquire one with
/// [`CachePools::writer`](crate::client::CachePools::writer), fill it, then
/// turn it into a message with [`MessageWriter::to_message`].
#[derive(Debug, Default)]
pub struct MessageWriter {
    scratch: BytesMut,
}

impl MessageWriter {
    /// Create a standalone writer (pooled acquisition is the normal path).
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.scratch.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.scratch.is_empty()
    }

    /// Discard everything written so far.
    pub fn clear(&mut self) {
        self.scratch.clear();
    }

    /// The accumulated payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.scratch
    }

    /// Append a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.scratch.put_u8(value);
    }

    /// Append a big-endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.scratch.put_u16(value);
    }

    /// Append a big-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.scratch.put_u32(value);
    }

    /// Append a big-endian `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.scratch.put_u64(value);
    }

    /// Append a big-endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.scratch.put_i32(value);
    }

    /// Append a big-endian IEEE-754 `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.scratch.put_f32(value);
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.scratch.put_slice(bytes);
    }

    /// Append a string as a big-endian `u16` length followed by UTF-8 bytes.
    ///
    /// # Panics
    ///
    /// Panics if the string is longer than `u16::MAX` bytes.
    pub fn write_str(&mut self, value: &str) {
        let len = u16::try_from(value.len()).expect("string exceeds u16 length prefix");
        self.scratch.put_u16(len);
        self.scratch.put_slice(value.as_bytes());
    }

    /// Build a user message carrying the accumulated payload.
    ///
    /// # Panics
    ///
    /// Panics if `tag` exceeds [`MAX_TAG`](crate::core::constants::MAX_TAG).
    pub fn to_message(&self, tag: u16) -> Message {
        Message::new(tag, &self.scratch)
    }

    /// Build a ping message (fresh random code) carrying the payload.
    ///
    /// # Panics
    ///
    /// Panics if `tag` exceeds [`MAX_TAG`](crate::core::constants::MAX_TAG).
    pub fn to_ping(&self, tag: u16) -> Message {
        Message::ping(tag, &self.scratch)
    }
}

impl Reusable for MessageWriter {
    fn reset(&mut self) {
        self.scratch.clear();
    }
}

//! Tagged messages and their wire encoding.
//!
//! A serialized message is laid out as:
//!
//! ```text
//! +----------------+----------------+---------------------+
//! | header         | ping code      | payload             |
//! | u16 big-endian | u16 big-endian | remaining bytes     |
//! |                | (ping/ack only)|                     |
//! +----------------+----------------+---------------------+
//! ```
//!
//! The header packs the command flag (bit 15), the ping flag (bit 14), the
//! ack flag (bit 13) and the application tag (bits 0-12). On the reliable
//! channel each serialized message is additionally prefixed with its length
//! as a big-endian `u32`; on the unreliable channel one message occupies one
//! datagram.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

use crate::core::constants::{
    ACK_FLAG, COMMAND_FLAG, HEADER_SIZE, MAX_TAG, PING_CODE_SIZE, PING_FLAG,
};
use crate::pool::{MemoryPool, MessageBuffer, Reusable};

/// Errors raised when decoding a message or reading its payload.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The data ended before the expected field.
    #[error("message truncated: needed {needed} more bytes, {available} available")]
    Truncated {
        /// Bytes the field requires.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A string payload was not valid UTF-8.
    #[error("string payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Payload storage: either caller-supplied bytes (outbound) or a shared view
/// into a pooled receive buffer (inbound).
#[derive(Debug, Clone)]
pub(crate) enum Body {
    Inline(Bytes),
    Pooled(MessageBuffer),
}

impl Body {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Body::Inline(bytes) => bytes,
            Body::Pooled(buffer) => buffer.bytes(),
        }
    }
}

/// A logical unit of payload exchanged with the server.
///
/// Messages carry a 13-bit application tag, optional ping/ack framing with a
/// 16-bit correlation code, and a body. Inbound messages share ownership of
/// the pooled buffer they were framed from; dropping the message releases
/// that reference.
#[derive(Debug, Clone)]
pub struct Message {
    header: u16,
    ping_code: Option<u16>,
    body: Body,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            header: 0,
            ping_code: None,
            body: Body::Inline(Bytes::new()),
        }
    }
}

impl Message {
    /// Create a plain user message.
    ///
    /// # Panics
    ///
    /// Panics if `tag` exceeds [`MAX_TAG`].
    pub fn new(tag: u16, payload: &[u8]) -> Self {
        assert!(tag <= MAX_TAG, "tag {tag:#x} exceeds MAX_TAG");
        Self {
            header: tag,
            ping_code: None,
            body: Body::Inline(Bytes::copy_from_slice(payload)),
        }
    }

    /// Create a ping message with a fresh random ping code.
    ///
    /// # Panics
    ///
    /// Panics if `tag` exceeds [`MAX_TAG`].
    pub fn ping(tag: u16, payload: &[u8]) -> Self {
        Self::ping_with_code(tag, rand::random(), payload)
    }

    /// Create a ping message with an explicit ping code.
    ///
    /// # Panics
    ///
    /// Panics if `tag` exceeds [`MAX_TAG`].
    pub fn ping_with_code(tag: u16, code: u16, payload: &[u8]) -> Self {
        assert!(tag <= MAX_TAG, "tag {tag:#x} exceeds MAX_TAG");
        Self {
            header: tag | PING_FLAG,
            ping_code: Some(code),
            body: Body::Inline(Bytes::copy_from_slice(payload)),
        }
    }

    /// Create a ping acknowledgement echoing `code`.
    ///
    /// Sent by the peer in response to a ping; exposed so peer
    /// implementations and harnesses can produce bit-exact acks.
    ///
    /// # Panics
    ///
    /// Panics if `tag` exceeds [`MAX_TAG`].
    pub fn ping_ack(tag: u16, code: u16, payload: &[u8]) -> Self {
        assert!(tag <= MAX_TAG, "tag {tag:#x} exceeds MAX_TAG");
        Self {
            header: tag | ACK_FLAG,
            ping_code: Some(code),
            body: Body::Inline(Bytes::copy_from_slice(payload)),
        }
    }

    /// Frame a message from a received buffer, taking shared ownership of it.
    pub fn from_buffer(buffer: MessageBuffer) -> Result<Self, MessageError> {
        let mut message = Self::default();
        message.load_from(buffer)?;
        Ok(message)
    }

    /// Re-initialize this message from a received buffer.
    ///
    /// Used by the receive path to reuse pooled message shells. On error the
    /// buffer reference taken here is released before returning.
    pub(crate) fn load_from(&mut self, buffer: MessageBuffer) -> Result<(), MessageError> {
        let mut bytes = buffer.bytes();
        let total = bytes.len();
        if bytes.len() < HEADER_SIZE {
            return Err(MessageError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let header = bytes.get_u16();
        let ping_code = if header & (PING_FLAG | ACK_FLAG) != 0 {
            if bytes.len() < PING_CODE_SIZE {
                return Err(MessageError::Truncated {
                    needed: PING_CODE_SIZE,
                    available: bytes.len(),
                });
            }
            Some(bytes.get_u16())
        } else {
            None
        };
        let consumed = total - bytes.len();
        self.header = header;
        self.ping_code = ping_code;
        self.body = Body::Pooled(buffer.slice(consumed, total - consumed));
        Ok(())
    }

    /// The application tag.
    pub fn tag(&self) -> u16 {
        self.header & MAX_TAG
    }

    /// Whether this is a transport-internal command message.
    pub fn is_command(&self) -> bool {
        self.header & COMMAND_FLAG != 0
    }

    /// Whether this is a ping message.
    pub fn is_ping(&self) -> bool {
        self.header & PING_FLAG != 0
    }

    /// Whether this is a ping acknowledgement.
    pub fn is_ack(&self) -> bool {
        self.header & ACK_FLAG != 0
    }

    /// The ping code, present on ping and ack messages.
    pub fn ping_code(&self) -> Option<u16> {
        self.ping_code
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        self.body.as_slice()
    }

    pub(crate) fn body(&self) -> Body {
        self.body.clone()
    }

    /// Serialized size: header, optional ping code, payload.
    pub fn serialized_len(&self) -> usize {
        let ping = if self.ping_code.is_some() {
            PING_CODE_SIZE
        } else {
            0
        };
        HEADER_SIZE + ping + self.payload().len()
    }

    /// Materialize the message into a pooled buffer ready for the transport.
    pub fn to_buffer(&self, pool: &MemoryPool) -> MessageBuffer {
        let len = self.serialized_len();
        let mut block = pool.acquire(len);
        let mut out = &mut block.as_mut_slice()[..len];
        out.put_u16(self.header);
        if let Some(code) = self.ping_code {
            out.put_u16(code);
        }
        out.put_slice(self.payload());
        block.freeze(len)
    }
}

impl Reusable for Message {
    fn reset(&mut self) {
        self.header = 0;
        self.ping_code = None;
        self.body = Body::Inline(Bytes::new());
    }
}

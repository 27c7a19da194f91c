//! Reference-counted windows over pooled memory blocks.

use std::sync::{Arc, Weak};

use crate::pool::memory::{self, Block, MemoryPoolInner};

/// Shared backing storage of a [`MessageBuffer`].
///
/// Holds the block's parts directly so the storage can be handed back to the
/// origin class when the last reference drops.
struct Backing {
    storage: Vec<u8>,
    class: Option<usize>,
    pool: Weak<MemoryPoolInner>,
}

impl Drop for Backing {
    fn drop(&mut self) {
        let storage = std::mem::take(&mut self.storage);
        memory::release_storage(&self.pool, self.class, storage);
    }
}

/// A reference-counted `(block, offset, length)` window over pooled storage.
///
/// Cloning takes another strong reference to the same backing block; the
/// window itself is per-handle, so clones can be narrowed independently (see
/// [`MessageBuffer::slice`]). When the last handle drops, the block returns
/// to the size class it was drawn from. Release happens exactly once and is
/// driven by ownership, so double release cannot be expressed.
pub struct MessageBuffer {
    backing: Arc<Backing>,
    offset: usize,
    len: usize,
}

impl MessageBuffer {
    pub(crate) fn from_block(block: Block, len: usize) -> Self {
        let (storage, class, pool) = block.take_parts();
        Self {
            backing: Arc::new(Backing {
                storage,
                class,
                pool,
            }),
            offset: 0,
            len,
        }
    }

    /// The bytes inside the window.
    pub fn bytes(&self) -> &[u8] {
        &self.backing.storage[self.offset..self.offset + self.len]
    }

    /// Window length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A new handle over the same block whose window is the given sub-range
    /// of this handle's window.
    ///
    /// # Panics
    ///
    /// Panics if `start + len` exceeds the current window.
    pub fn slice(&self, start: usize, len: usize) -> MessageBuffer {
        assert!(
            start + len <= self.len,
            "slice range exceeds the buffer window"
        );
        MessageBuffer {
            backing: Arc::clone(&self.backing),
            offset: self.offset + start,
            len,
        }
    }

    /// Number of strong references to the backing block.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.backing)
    }
}

impl Clone for MessageBuffer {
    fn clone(&self) -> Self {
        Self {
            backing: Arc::clone(&self.backing),
            offset: self.offset,
            len: self.len,
        }
    }
}

impl std::fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("refs", &self.reference_count())
            .finish()
    }
}

impl AsRef<[u8]> for MessageBuffer {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

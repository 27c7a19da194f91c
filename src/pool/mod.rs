//! Object and buffer recycling.
//!
//! Three layers cooperate here:
//!
//! - [`MemoryPool`]: raw byte blocks in five fixed size classes
//! - [`MessageBuffer`]: reference-counted windows over those blocks
//! - [`ObjectPool`]: a generic capped recycler for cursor and event objects
//!
//! Every hot-path allocation in the transport goes through one of these.

pub mod buffer;
pub mod memory;
pub mod object;

pub use buffer::MessageBuffer;
pub use memory::{Block, BlockClass, MemoryPool};
pub use object::{ObjectPool, Pooled, Reusable};

//! Message framing: tagged messages plus their payload cursors.

mod message;
mod reader;
mod writer;

pub use message::{Message, MessageError};
pub use reader::MessageReader;
pub use writer::MessageWriter;

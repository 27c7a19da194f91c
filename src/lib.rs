//! # Tether
//!
//! Client-side networking core for realtime game servers: a bi-channel
//! transport that exchanges tagged binary messages with a remote server over
//! one reliable (TCP) and one unreliable (UDP) channel, built to stay
//! allocation-light on the hot path.
//!
//! The crate has three tightly coupled parts:
//!
//! - **Transport**: a [`BichannelConnection`](transport::BichannelConnection)
//!   multiplexing both channels to the same logical peer behind one state
//!   machine, plus round-trip-time measurement over ping/ack correlation
//! - **Pools**: a size-classed memory pool, a generic object recycler and
//!   reference-counted message buffers that recycle on last release
//! - **Facade**: a [`TetherClient`](client::TetherClient) that performs the
//!   startup handshake (yielding the server-assigned client id), routes
//!   internal commands and ping traffic, and raises the *message-received*
//!   and *disconnected* events
//!
//! ## Modules
//!
//! - [`core`]: configuration, wire constants and error types
//! - [`pool`]: memory blocks, object recycling, shared buffers
//! - [`message`]: tagged messages and payload cursors
//! - [`transport`]: the bi-channel connection and RTT measurement
//! - [`client`]: the client facade and its events
//!
//! ## Example
//!
//! ```ignore
//! use tether::prelude::*;
//!
//! let client = TetherClient::default();
//! client.on_message_received(|event| {
//!     println!("received tag {}", event.message().tag());
//! });
//!
//! let config = ConnectionConfig::builder("203.0.113.9:4296".parse()?)
//!     .no_delay(true)
//!     .build();
//! client.connect(BichannelConnection::new(config)).await?;
//!
//! let mut writer = client.cache().writer();
//! writer.write_str("ready");
//! client.send(writer.to_message(1), SendMode::Reliable).await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod core;
pub mod message;
pub mod pool;
pub mod transport;

/// Commonly used types, re-exported.
pub mod prelude {
    pub use crate::client::{DisconnectedEvent, MessageReceivedEvent, TetherClient};
    pub use crate::core::config::{ObjectCacheConfig, SendMode};
    pub use crate::core::error::ConnectError;
    pub use crate::message::{Message, MessageReader, MessageWriter};
    pub use crate::transport::{BichannelConnection, ConnectionConfig, ConnectionState};
}

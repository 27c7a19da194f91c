//! Core configuration, constants and error types.

pub mod config;
pub mod constants;
pub mod error;

pub use config::{ObjectCacheConfig, SendMode};
pub use error::ConnectError;

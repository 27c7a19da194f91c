//! Transport layer: the bi-channel connection, its channel wrappers and
//! round-trip-time measurement.
//!
//! ```text
//! +-----------------------------------------+
//! |            Client facade                |
//! +-----------------------------------------+
//! |          Transport layer                |  <- this module
//! |  bi-channel connection, framing, RTT    |
//! +---------------------+-------------------+
//! |  TCP (reliable)     |  UDP (unreliable) |
//! +---------------------+-------------------+
//! ```

pub mod connection;
pub mod rtt;
pub mod socket;

pub use connection::{
    BichannelConnection, ConnectionConfig, ConnectionConfigBuilder, ConnectionState, HelloProducer,
};
pub use rtt::{RoundTripTimer, RttSnapshot};
pub use socket::{ChannelStats, ChannelStatsSnapshot, FrameError};

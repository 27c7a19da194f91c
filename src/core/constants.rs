//! Protocol constants for the tether wire format.
//!
//! These values define the on-wire message layout and MUST NOT be changed;
//! both peers have to agree on them bit for bit.

use std::time::Duration;

// =============================================================================
// MESSAGE HEADER
// =============================================================================

/// Header bit marking a transport-internal command message.
pub const COMMAND_FLAG: u16 = 0x8000;

/// Header bit marking a ping message (carries a ping code).
pub const PING_FLAG: u16 = 0x4000;

/// Header bit marking a ping acknowledgement (carries the echoed ping code).
pub const ACK_FLAG: u16 = 0x2000;

/// Largest application tag. Tags above this collide with the flag bits.
pub const MAX_TAG: u16 = 0x1FFF;

/// Message header size in bytes (flags + tag, big-endian `u16`).
pub const HEADER_SIZE: usize = 2;

/// Ping code size in bytes, present when [`PING_FLAG`] or [`ACK_FLAG`] is set.
pub const PING_CODE_SIZE: usize = 2;

// =============================================================================
// COMMANDS
// =============================================================================

/// Tag of the *Configure* command: the server's handshake reply carrying the
/// assigned 16-bit client id as its payload.
pub const CONFIGURE_TAG: u16 = 0;

/// Configure payload size: one big-endian `u16` client id.
pub const CONFIGURE_PAYLOAD_SIZE: usize = 2;

// =============================================================================
// FRAMING
// =============================================================================

/// Size of the big-endian `u32` length prefix on the reliable channel.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest serialized message accepted on either channel.
///
/// Reliable frames announcing a bigger payload are treated as a protocol
/// violation. The unreliable channel never reaches this; datagrams are
/// MTU-bound by the sender.
pub const MAX_FRAME_SIZE: u32 = 1 << 20;

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Payload of the hello message sent on connect when the caller does not
/// install a custom hello producer. The default hello carries tag 0.
pub const DEFAULT_HELLO_PAYLOAD: &[u8] = b"HI!!";

/// How long a connect waits for the server's *Configure* command before the
/// connection is forcibly torn down.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// ROUND-TRIP TIMING
// =============================================================================

/// Default capacity of the in-flight outbound-ping map.
pub const DEFAULT_PING_CAPACITY: usize = 32;

/// Default rolling-average window for round-trip samples.
pub const DEFAULT_RTT_WINDOW: usize = 8;

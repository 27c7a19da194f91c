//! Error types surfaced by the connection and client facade.

use thiserror::Error;

/// Errors that can fail a connect attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The underlying socket failed to connect or died during the handshake.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The server never sent its *Configure* command within the handshake
    /// timeout. The connection has been forcibly disconnected.
    #[error("handshake timed out waiting for the configure command")]
    HandshakeTimeout,

    /// The connection was torn down before the handshake completed, either by
    /// the peer or by a concurrent `disconnect` call.
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,

    /// `connect` was called on a connection that is not in the disconnected
    /// state.
    #[error("connection is already in use")]
    AlreadyConnected,
}

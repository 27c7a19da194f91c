//! High-level client facade.
//!
//! `TetherClient` owns the object caches, at most one connection at a time,
//! and the round-trip timer. It drives a connection through
//! connect -> handshake -> steady state -> disconnect, routes received
//! messages (ping acks, commands, user messages) and fans user events out to
//! subscribers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

use crate::core::config::{ObjectCacheConfig, SendMode};
use crate::core::constants::{CONFIGURE_TAG, DEFAULT_PING_CAPACITY, DEFAULT_RTT_WINDOW};
use crate::core::error::ConnectError;
use crate::message::Message;
use crate::pool::MessageBuffer;
use crate::transport::connection::{BichannelConnection, ConnectionHandlers, ConnectionState};
use crate::transport::rtt::{RoundTripTimer, RttSnapshot};
use crate::transport::socket::ChannelStatsSnapshot;

use super::cache::CachePools;
use super::events::{DisconnectedEvent, HandlerId, Handlers, MessageReceivedEvent};

struct ClientShared {
    pools: Arc<CachePools>,
    connection: Mutex<Option<BichannelConnection>>,
    client_id: Mutex<Option<u16>>,
    handshake_complete: AtomicBool,
    /// One-shot setup signal, re-armed per session and fired by receipt of
    /// the *Configure* command.
    setup: Mutex<Option<oneshot::Sender<u16>>>,
    rtt: RoundTripTimer,
    message_received: Handlers<MessageReceivedEvent>,
    disconnected: Handlers<DisconnectedEvent>,
}

impl ClientShared {
    /// Route one framed message from either channel.
    ///
    /// Runs on the connection's receive loop, so reliable-channel calls are
    /// sequential and ordered. Whatever path the message takes, the pooled
    /// buffer reference taken here is released when this returns, unless a
    /// user handler cloned the message.
    fn handle_received(&self, buffer: MessageBuffer, send_mode: SendMode) {
        let mut message = self.pools.message();
        if let Err(error) = message.load_from(buffer) {
            tracing::warn!(%error, "malformed message discarded");
            return;
        }
        if message.is_ack() {
            if let Some(code) = message.ping_code() {
                if self.rtt.record_inbound(code).is_none() {
                    tracing::trace!(code, "stale ping acknowledgement ignored");
                }
            }
            return;
        }
        if message.is_command() {
            self.handle_command(&message);
            return;
        }
        if !self.handshake_complete.load(Ordering::Acquire) {
            tracing::warn!(
                tag = message.tag(),
                "user message before handshake discarded"
            );
            return;
        }
        let mut event = self.pools.message_event();
        event.fill(message, send_mode);
        self.message_received.emit(&event);
    }

    fn handle_command(&self, message: &Message) {
        if message.tag() != CONFIGURE_TAG {
            tracing::debug!(tag = message.tag(), "unknown command ignored");
            return;
        }
        let mut reader = self.pools.reader(message);
        let id = match reader.read_u16() {
            Ok(id) => id,
            Err(error) => {
                tracing::warn!(%error, "malformed configure command discarded");
                return;
            }
        };
        *self.client_id.lock().unwrap() = Some(id);
        self.handshake_complete.store(true, Ordering::Release);
        let connection = self.connection.lock().unwrap().clone();
        if let Some(connection) = connection {
            connection.mark_session_established();
        }
        // Raise the setup signal; at most once per session by construction.
        if let Some(setup) = self.setup.lock().unwrap().take() {
            let _ = setup.send(id);
        }
        tracing::debug!(id, "handshake complete");
    }

    fn handle_disconnected(&self, locally_initiated: bool, error: Option<std::io::Error>) {
        self.handshake_complete.store(false, Ordering::Release);
        *self.client_id.lock().unwrap() = None;
        // A connect still parked on the setup signal learns the session died.
        drop(self.setup.lock().unwrap().take());
        let event = DisconnectedEvent {
            locally_initiated,
            error,
        };
        self.disconnected.emit(&event);
    }
}

/// A game client's connection to one server.
///
/// Cloning shares the client. Pools are created at construction and live for
/// the client's lifetime; connections come and go.
///
/// # Example
///
/// ```ignore
/// use tether::prelude::*;
///
/// let client = TetherClient::default();
/// client.on_message_received(|event| {
///     println!("tag {} on {:?}", event.message().tag(), event.send_mode());
/// });
///
/// let connection = BichannelConnection::new(ConnectionConfig::new(server_addr));
/// client.connect(connection).await?;
/// assert_eq!(client.connection_state(), ConnectionState::Connected);
///
/// client.send(Message::new(1, b"hello"), SendMode::Reliable).await;
/// client.disconnect().await;
/// ```
#[derive(Clone)]
pub struct TetherClient {
    shared: Arc<ClientShared>,
}

impl Default for TetherClient {
    fn default() -> Self {
        Self::new(ObjectCacheConfig::default())
    }
}

impl TetherClient {
    /// Create a client, building its pools from `config`.
    ///
    /// # Panics
    ///
    /// Panics if the cache configuration is invalid.
    pub fn new(config: ObjectCacheConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                pools: Arc::new(CachePools::new(&config)),
                connection: Mutex::new(None),
                client_id: Mutex::new(None),
                handshake_complete: AtomicBool::new(false),
                setup: Mutex::new(None),
                rtt: RoundTripTimer::new(DEFAULT_PING_CAPACITY, DEFAULT_RTT_WINDOW),
                message_received: Handlers::new(),
                disconnected: Handlers::new(),
            }),
        }
    }

    /// Connect through `connection` and wait for the handshake.
    ///
    /// Any existing connection is disposed first. The call resolves once the
    /// server's *Configure* command has delivered this client's id, or fails
    /// after the connection's handshake timeout, in which case the connection
    /// has been forcibly disconnected.
    pub async fn connect(&self, connection: BichannelConnection) -> Result<(), ConnectError> {
        let previous = self
            .shared
            .connection
            .lock()
            .unwrap()
            .replace(connection.clone());
        if let Some(previous) = previous {
            previous.disconnect().await;
        }

        self.shared.handshake_complete.store(false, Ordering::Release);
        *self.shared.client_id.lock().unwrap() = None;
        let (setup_tx, setup_rx) = oneshot::channel();
        *self.shared.setup.lock().unwrap() = Some(setup_tx);

        let weak: Weak<ClientShared> = Arc::downgrade(&self.shared);
        let on_message = {
            let weak = weak.clone();
            Arc::new(move |buffer: MessageBuffer, mode: SendMode| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_received(buffer, mode);
                }
                // Client gone: the buffer drops here and recycles.
            })
        };
        let on_disconnect = Arc::new(move |locally_initiated: bool, error: Option<std::io::Error>| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_disconnected(locally_initiated, error);
            }
        });
        connection.install(
            ConnectionHandlers {
                on_message,
                on_disconnect,
            },
            self.shared.pools.memory().clone(),
        );

        connection.connect().await?;

        match tokio::time::timeout(connection.handshake_timeout(), setup_rx).await {
            Ok(Ok(id)) => {
                tracing::debug!(id, "connected");
                Ok(())
            }
            Ok(Err(_)) => {
                connection.disconnect().await;
                Err(ConnectError::ClosedDuringHandshake)
            }
            Err(_) => {
                tracing::warn!("handshake timed out, forcing disconnect");
                connection.disconnect().await;
                Err(ConnectError::HandshakeTimeout)
            }
        }
    }

    /// Run [`TetherClient::connect`] on a one-shot background task and hand
    /// the outcome to `callback`.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect_in_background(
        &self,
        connection: BichannelConnection,
        callback: impl FnOnce(Result<(), ConnectError>) + Send + 'static,
    ) {
        let client = self.clone();
        tokio::spawn(async move {
            let result = client.connect(connection).await;
            callback(result);
        });
    }

    /// Serialize `message` into a pooled buffer and hand it to the chosen
    /// channel. Returns `false` when there is no live connection or the
    /// transport reports failure.
    ///
    /// Pings are registered with the round-trip timer before transmission so
    /// the echoed acknowledgement completes a sample.
    pub async fn send(&self, message: Message, send_mode: SendMode) -> bool {
        if message.is_ping() {
            if let Some(code) = message.ping_code() {
                self.shared.rtt.record_outbound(code);
            }
        }
        let connection = self.shared.connection.lock().unwrap().clone();
        let Some(connection) = connection else {
            return false;
        };
        let buffer = message.to_buffer(self.shared.pools.memory());
        connection.send(buffer, send_mode).await
    }

    /// Disconnect the current connection.
    ///
    /// Returns `true` for the call that tears the session down; later calls
    /// return `false`.
    pub async fn disconnect(&self) -> bool {
        let connection = self.shared.connection.lock().unwrap().clone();
        let Some(connection) = connection else {
            return false;
        };
        connection.disconnect().await
    }

    /// The server-assigned client id, valid after the handshake and until
    /// disconnect.
    pub fn id(&self) -> Option<u16> {
        *self.shared.client_id.lock().unwrap()
    }

    /// State of the current connection, or `Disconnected` when none exists.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared
            .connection
            .lock()
            .unwrap()
            .as_ref()
            .map_or(ConnectionState::Disconnected, BichannelConnection::state)
    }

    /// Remote address of the named channel (`"tcp"` or `"udp"`).
    pub fn remote_endpoint(&self, name: &str) -> Option<SocketAddr> {
        self.shared
            .connection
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|connection| connection.remote_endpoint(name))
    }

    /// Traffic counters of the named channel (`"tcp"` or `"udp"`).
    pub fn channel_stats(&self, name: &str) -> Option<ChannelStatsSnapshot> {
        self.shared
            .connection
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|connection| connection.channel_stats(name))
    }

    /// Current round-trip statistics.
    pub fn rtt(&self) -> RttSnapshot {
        self.shared.rtt.snapshot()
    }

    /// The client's object caches; use for pooled reader/writer cursors.
    pub fn cache(&self) -> &CachePools {
        &self.shared.pools
    }

    /// Subscribe to the *message-received* event.
    ///
    /// The event record and its message are valid for the duration of the
    /// call; clone the message to keep it.
    pub fn on_message_received(
        &self,
        handler: impl Fn(&MessageReceivedEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.message_received.subscribe(handler)
    }

    /// Remove a *message-received* subscription.
    pub fn remove_message_received(&self, id: HandlerId) -> bool {
        self.shared.message_received.unsubscribe(id)
    }

    /// Subscribe to the *disconnected* event.
    pub fn on_disconnected(
        &self,
        handler: impl Fn(&DisconnectedEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.disconnected.subscribe(handler)
    }

    /// Remove a *disconnected* subscription.
    pub fn remove_disconnected(&self, id: HandlerId) -> bool {
        self.shared.disconnected.unsubscribe(id)
    }
}

impl std::fmt::Debug for TetherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherClient")
            .field("state", &self.connection_state())
            .field("id", &self.id())
            .finish()
    }
}

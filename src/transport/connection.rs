//! Bi-channel client connection: one reliable stream plus one unreliable
//! datagram socket to the same logical peer, behind a shared state machine.
//!
//! The lifecycle is monotone per session:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! [`ConnectionState::Interrupted`] is a momentary detour taken while a
//! transient reliable-channel error is retried; it is invisible to the owner
//! except through the [`BichannelConnection::interruptions`] counter. Loss of
//! the reliable channel tears the connection down; an unreliable-channel
//! error alone never does.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::SendMode;
use crate::core::constants::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HELLO_PAYLOAD};
use crate::core::error::ConnectError;
use crate::message::Message;
use crate::pool::{MemoryPool, MessageBuffer};

use super::socket::{
    ChannelStats, ChannelStatsSnapshot, FrameError, ReliableReader, ReliableWriter,
    UnreliableChannel,
};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; the initial and final state.
    Disconnected,
    /// Sockets are being established and the handshake is in flight.
    Connecting,
    /// Handshake complete, data transfer active.
    Connected,
    /// Teardown started; in-flight reads are draining.
    Disconnecting,
    /// A transient reliable-channel error is being retried.
    Interrupted,
}

/// Produces the first message sent on the reliable channel after connect.
pub type HelloProducer = Arc<dyn Fn() -> Message + Send + Sync>;

/// Settings for one connection attempt.
///
/// Built via [`ConnectionConfig::builder`]; [`ConnectionConfig::new`] uses a
/// single port for both channels, the default hello (tag 0, payload `HI!!`)
/// and the 10-second handshake timeout.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Remote endpoint of the reliable (stream) channel.
    pub reliable_addr: SocketAddr,
    /// Remote endpoint of the unreliable (datagram) channel.
    pub unreliable_addr: SocketAddr,
    /// Disable write coalescing (`TCP_NODELAY`) on the reliable channel.
    pub no_delay: bool,
    /// How long to wait for the server's *Configure* command.
    pub handshake_timeout: Duration,
    /// Producer of the hello message.
    pub hello: HelloProducer,
}

impl ConnectionConfig {
    /// Configuration using `server_addr` for both channels and defaults for
    /// everything else.
    pub fn new(server_addr: SocketAddr) -> Self {
        Self::builder(server_addr).build()
    }

    /// Start building a configuration for `server_addr`.
    pub fn builder(server_addr: SocketAddr) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: Self {
                reliable_addr: server_addr,
                unreliable_addr: server_addr,
                no_delay: false,
                handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
                hello: Arc::new(|| Message::new(0, DEFAULT_HELLO_PAYLOAD)),
            },
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("reliable_addr", &self.reliable_addr)
            .field("unreliable_addr", &self.unreliable_addr)
            .field("no_delay", &self.no_delay)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Use a separate port for the unreliable channel.
    pub fn unreliable_port(mut self, port: u16) -> Self {
        self.config.unreliable_addr.set_port(port);
        self
    }

    /// Use a fully separate endpoint for the unreliable channel.
    pub fn unreliable_addr(mut self, addr: SocketAddr) -> Self {
        self.config.unreliable_addr = addr;
        self
    }

    /// Enable or disable `TCP_NODELAY` on the reliable channel.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.config.no_delay = enabled;
        self
    }

    /// Override the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Install a custom hello producer.
    pub fn hello(mut self, producer: impl Fn() -> Message + Send + Sync + 'static) -> Self {
        self.config.hello = Arc::new(producer);
        self
    }

    /// Finish building.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Callbacks the owning client installs before connecting.
pub(crate) struct ConnectionHandlers {
    /// Invoked with each framed message and its originating channel. The
    /// buffer reference passed here is the receive loop's; it is released
    /// when the callback returns unless the callback keeps a clone.
    pub(crate) on_message: Arc<dyn Fn(MessageBuffer, SendMode) + Send + Sync>,
    /// Invoked exactly once per session when the connection leaves service,
    /// with `(locally_initiated, socket_error)`.
    pub(crate) on_disconnect: Arc<dyn Fn(bool, Option<io::Error>) + Send + Sync>,
}

struct StateCell {
    current: ConnectionState,
    /// State to restore when an interruption resolves.
    resume: ConnectionState,
}

struct Shared {
    config: ConnectionConfig,
    state: Mutex<StateCell>,
    handlers: Mutex<Option<ConnectionHandlers>>,
    memory: Mutex<Option<MemoryPool>>,
    writer: tokio::sync::Mutex<Option<ReliableWriter>>,
    unreliable: Mutex<Option<UnreliableChannel>>,
    endpoints: Mutex<HashMap<&'static str, SocketAddr>>,
    shutdown: Mutex<watch::Sender<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    live_loops: AtomicUsize,
    interruptions: AtomicU64,
    unreliable_errors: AtomicU64,
    reliable_stats: Arc<ChannelStats>,
    unreliable_stats: Arc<ChannelStats>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.state.lock().unwrap().current
    }

    fn deliver(&self, buffer: MessageBuffer, mode: SendMode) {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| Arc::clone(&h.on_message));
        if let Some(handler) = handler {
            handler(buffer, mode);
        }
        // No handler installed: the buffer drops here and returns to its pool.
    }

    fn note_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
        let mut cell = self.state.lock().unwrap();
        if matches!(
            cell.current,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            cell.resume = cell.current;
            cell.current = ConnectionState::Interrupted;
        }
    }

    fn recover_interruption(&self) {
        let mut cell = self.state.lock().unwrap();
        if cell.current == ConnectionState::Interrupted {
            cell.current = cell.resume;
        }
    }

    /// Begin teardown. Returns `false` when teardown already happened, which
    /// makes disconnect idempotent and the disconnect callback single-shot.
    fn initiate_disconnect(&self, locally_initiated: bool, error: Option<io::Error>) -> bool {
        {
            let mut cell = self.state.lock().unwrap();
            match cell.current {
                ConnectionState::Disconnected | ConnectionState::Disconnecting => return false,
                _ => cell.current = ConnectionState::Disconnecting,
            }
        }
        let _ = self.shutdown.lock().unwrap().send(true);
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| Arc::clone(&h.on_disconnect));
        if let Some(handler) = handler {
            handler(locally_initiated, error);
        }
        true
    }

    fn loop_finished(&self) {
        if self.live_loops.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut cell = self.state.lock().unwrap();
            cell.current = ConnectionState::Disconnected;
            cell.resume = ConnectionState::Disconnected;
        }
    }
}

/// A two-socket transport to one logical peer.
///
/// Cloning shares the connection. A connection is wired to its owning client
/// before use; the client installs the receive/disconnect callbacks and the
/// memory pool the receive loops draw from, then drives `connect`.
#[derive(Clone)]
pub struct BichannelConnection {
    shared: Arc<Shared>,
}

impl BichannelConnection {
    /// Create a connection for the given configuration. No sockets are opened
    /// until the owning client connects.
    pub fn new(config: ConnectionConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(StateCell {
                    current: ConnectionState::Disconnected,
                    resume: ConnectionState::Disconnected,
                }),
                handlers: Mutex::new(None),
                memory: Mutex::new(None),
                writer: tokio::sync::Mutex::new(None),
                unreliable: Mutex::new(None),
                endpoints: Mutex::new(HashMap::new()),
                shutdown: Mutex::new(shutdown_tx),
                tasks: Mutex::new(Vec::new()),
                live_loops: AtomicUsize::new(0),
                interruptions: AtomicU64::new(0),
                unreliable_errors: AtomicU64::new(0),
                reliable_stats: Arc::new(ChannelStats::default()),
                unreliable_stats: Arc::new(ChannelStats::default()),
            }),
        }
    }

    pub(crate) fn install(&self, handlers: ConnectionHandlers, memory: MemoryPool) {
        *self.shared.handlers.lock().unwrap() = Some(handlers);
        *self.shared.memory.lock().unwrap() = Some(memory);
    }

    pub(crate) fn handshake_timeout(&self) -> Duration {
        self.shared.config.handshake_timeout
    }

    /// Dial both sockets, send the hello and start the receive loops.
    ///
    /// On success the connection is left in [`ConnectionState::Connecting`];
    /// the owning client promotes it once the handshake completes.
    pub(crate) async fn connect(&self) -> Result<(), ConnectError> {
        {
            let mut cell = self.shared.state.lock().unwrap();
            if cell.current != ConnectionState::Disconnected {
                return Err(ConnectError::AlreadyConnected);
            }
            cell.current = ConnectionState::Connecting;
            cell.resume = ConnectionState::Connecting;
        }
        match self.connect_channels().await {
            Ok(()) => Ok(()),
            Err(error) => {
                {
                    let mut cell = self.shared.state.lock().unwrap();
                    cell.current = ConnectionState::Disconnected;
                    cell.resume = ConnectionState::Disconnected;
                }
                *self.shared.writer.lock().await = None;
                *self.shared.unreliable.lock().unwrap() = None;
                Err(error)
            }
        }
    }

    async fn connect_channels(&self) -> Result<(), ConnectError> {
        let shared = &self.shared;
        let config = &shared.config;
        let memory = shared
            .memory
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ConnectError::Io(io::Error::other("connection is not installed")))?;

        tracing::debug!(
            reliable = %config.reliable_addr,
            unreliable = %config.unreliable_addr,
            "connecting"
        );
        let stream = TcpStream::connect(config.reliable_addr).await?;
        stream.set_nodelay(config.no_delay)?;

        let bind_addr: SocketAddr = if config.unreliable_addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let udp = UdpSocket::bind(bind_addr).await?;
        udp.connect(config.unreliable_addr).await?;

        {
            let mut endpoints = shared.endpoints.lock().unwrap();
            endpoints.insert("tcp", config.reliable_addr);
            endpoints.insert("udp", config.unreliable_addr);
        }

        let (read_half, write_half) = stream.into_split();
        let reader = ReliableReader::new(read_half, Arc::clone(&shared.reliable_stats));
        let mut writer = ReliableWriter::new(write_half, Arc::clone(&shared.reliable_stats));
        let unreliable = UnreliableChannel::new(Arc::new(udp), Arc::clone(&shared.unreliable_stats));

        // The hello is the first traffic of the session.
        let hello = (config.hello)();
        let buffer = hello.to_buffer(&memory);
        writer
            .write_frame(buffer.bytes())
            .await
            .map_err(frame_error_to_connect)?;
        drop(buffer);

        *shared.writer.lock().await = Some(writer);
        *shared.unreliable.lock().unwrap() = Some(unreliable.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *shared.shutdown.lock().unwrap() = shutdown_tx;
        shared.live_loops.store(2, Ordering::Release);

        let mut tasks = shared.tasks.lock().unwrap();
        tasks.push(tokio::spawn(reliable_loop(
            Arc::clone(shared),
            reader,
            memory.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(unreliable_loop(
            Arc::clone(shared),
            unreliable,
            memory,
            shutdown_rx,
        )));
        Ok(())
    }

    /// Promote the session from `Connecting` to `Connected` once the owning
    /// client has processed the handshake reply.
    pub(crate) fn mark_session_established(&self) {
        let mut cell = self.shared.state.lock().unwrap();
        match cell.current {
            ConnectionState::Connecting => {
                cell.current = ConnectionState::Connected;
                cell.resume = ConnectionState::Connected;
            }
            ConnectionState::Interrupted => cell.resume = ConnectionState::Connected,
            _ => {}
        }
    }

    /// Hand a serialized message to the chosen channel.
    ///
    /// Returns `false` when the connection is out of service or the transport
    /// reports a failure. No reference to the buffer is retained once the
    /// write has been handed to the OS.
    pub async fn send(&self, buffer: MessageBuffer, mode: SendMode) -> bool {
        match self.state() {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Interrupted => {}
            _ => return false,
        }
        match mode {
            SendMode::Reliable => {
                let mut guard = self.shared.writer.lock().await;
                let Some(writer) = guard.as_mut() else {
                    return false;
                };
                match writer.write_frame(buffer.bytes()).await {
                    Ok(()) => true,
                    Err(error) => {
                        tracing::debug!(%error, "reliable send failed");
                        false
                    }
                }
            }
            SendMode::Unreliable => {
                let channel = self.shared.unreliable.lock().unwrap().clone();
                let Some(channel) = channel else {
                    return false;
                };
                match channel.send(buffer.bytes()).await {
                    Ok(()) => true,
                    Err(error) => {
                        self.shared.unreliable_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(%error, "unreliable send failed");
                        false
                    }
                }
            }
        }
    }

    /// Tear down both channels and wait for the receive loops to drain.
    ///
    /// The first call on a live session returns `true`; repeated calls and
    /// calls on an idle connection return `false`.
    pub async fn disconnect(&self) -> bool {
        if !self.shared.initiate_disconnect(true, None) {
            return false;
        }
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        *self.shared.unreliable.lock().unwrap() = None;
        let handles: Vec<JoinHandle<()>> = self.shared.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        let mut cell = self.shared.state.lock().unwrap();
        if cell.current == ConnectionState::Disconnecting
            && self.shared.live_loops.load(Ordering::Acquire) == 0
        {
            cell.current = ConnectionState::Disconnected;
            cell.resume = ConnectionState::Disconnected;
        }
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// How many transient reliable-channel errors have been retried.
    pub fn interruptions(&self) -> u64 {
        self.shared.interruptions.load(Ordering::Relaxed)
    }

    /// How many unreliable-channel errors have been recorded (and survived).
    pub fn unreliable_errors(&self) -> u64 {
        self.shared.unreliable_errors.load(Ordering::Relaxed)
    }

    /// Remote address of the named channel (`"tcp"` or `"udp"`), available
    /// once a connect attempt has resolved them.
    pub fn remote_endpoint(&self, name: &str) -> Option<SocketAddr> {
        self.shared.endpoints.lock().unwrap().get(name).copied()
    }

    /// Traffic counters of the named channel (`"tcp"` or `"udp"`).
    pub fn channel_stats(&self, name: &str) -> Option<ChannelStatsSnapshot> {
        match name {
            "tcp" => Some(self.shared.reliable_stats.snapshot()),
            "udp" => Some(self.shared.unreliable_stats.snapshot()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for BichannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BichannelConnection")
            .field("state", &self.state())
            .field("reliable_addr", &self.shared.config.reliable_addr)
            .field("unreliable_addr", &self.shared.config.unreliable_addr)
            .finish()
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn frame_error_to_connect(error: FrameError) -> ConnectError {
    match error {
        FrameError::Io(e) => ConnectError::Io(e),
        FrameError::Closed => ConnectError::Io(io::ErrorKind::ConnectionReset.into()),
        other => ConnectError::Io(io::Error::new(io::ErrorKind::InvalidData, other.to_string())),
    }
}

/// Receive loop of the reliable channel.
///
/// A transient read error is retried once per incident; anything else ends
/// the session with the platform error attached.
async fn reliable_loop(
    shared: Arc<Shared>,
    mut reader: ReliableReader,
    memory: MemoryPool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut retried = false;
    loop {
        tokio::select! {
            result = reader.read_frame(&memory) => match result {
                Ok(buffer) => {
                    if retried {
                        shared.recover_interruption();
                        retried = false;
                    }
                    shared.deliver(buffer, SendMode::Reliable);
                }
                Err(FrameError::Io(error)) if is_transient(&error) && !retried => {
                    retried = true;
                    shared.note_interruption();
                    tracing::debug!(%error, "transient reliable-channel error, retrying once");
                }
                Err(error) => {
                    tracing::debug!(%error, "reliable channel lost");
                    let socket_error = match error {
                        FrameError::Io(e) => Some(e),
                        FrameError::Closed => None,
                        other => {
                            Some(io::Error::new(io::ErrorKind::InvalidData, other.to_string()))
                        }
                    };
                    shared.initiate_disconnect(false, socket_error);
                    break;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    shared.loop_finished();
}

/// Receive loop of the unreliable channel. Errors here are recorded and the
/// loop keeps going; only shutdown ends it.
async fn unreliable_loop(
    shared: Arc<Shared>,
    channel: UnreliableChannel,
    memory: MemoryPool,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = channel.recv_message(&memory) => match result {
                Ok(buffer) => shared.deliver(buffer, SendMode::Unreliable),
                Err(error) => {
                    shared.unreliable_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%error, "unreliable channel receive error");
                    // Back off briefly so a persistent error cannot spin.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    shared.loop_finished();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ObjectCacheConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn memory() -> MemoryPool {
        MemoryPool::new(&ObjectCacheConfig::default())
    }

    struct Harness {
        connection: BichannelConnection,
        messages: mpsc::UnboundedReceiver<(Vec<u8>, SendMode)>,
        disconnects: mpsc::UnboundedReceiver<(bool, Option<io::Error>)>,
    }

    /// Wire a connection the way the client facade does, with channels in
    /// place of the facade's routing.
    fn wired(config: ConnectionConfig) -> Harness {
        let connection = BichannelConnection::new(config);
        let (msg_tx, messages) = mpsc::unbounded_channel();
        let (disc_tx, disconnects) = mpsc::unbounded_channel();
        connection.install(
            ConnectionHandlers {
                on_message: Arc::new(move |buffer: MessageBuffer, mode: SendMode| {
                    let _ = msg_tx.send((buffer.bytes().to_vec(), mode));
                }),
                on_disconnect: Arc::new(move |local: bool, error: Option<io::Error>| {
                    let _ = disc_tx.send((local, error));
                }),
            },
            memory(),
        );
        Harness {
            connection,
            messages,
            disconnects,
        }
    }

    /// Accept one reliable-channel connection and hand back the stream after
    /// consuming the hello frame.
    async fn accept_and_read_hello(listener: &TcpListener) -> (TcpStream, Vec<u8>) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        let len = u32::from_be_bytes(prefix) as usize;
        let mut hello = vec![0u8; len];
        stream.read_exact(&mut hello).await.unwrap();
        (stream, hello)
    }

    async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_sends_hello_and_stays_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let harness = wired(ConnectionConfig::new(addr));

        harness.connection.connect().await.unwrap();
        let (_stream, hello) = accept_and_read_hello(&listener).await;
        // Default hello: tag 0, payload HI!!.
        assert_eq!(hello, [0x00, 0x00, b'H', b'I', b'!', b'!']);
        assert_eq!(harness.connection.state(), ConnectionState::Connecting);

        harness.connection.mark_session_established();
        assert_eq!(harness.connection.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_received_frames_reach_the_callback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut harness = wired(ConnectionConfig::new(addr));

        harness.connection.connect().await.unwrap();
        let (mut stream, _) = accept_and_read_hello(&listener).await;
        write_frame(&mut stream, &[0x00, 0x05, 0xAA]).await;

        let (bytes, mode) = harness.messages.recv().await.unwrap();
        assert_eq!(bytes, [0x00, 0x05, 0xAA]);
        assert_eq!(mode, SendMode::Reliable);
    }

    #[tokio::test]
    async fn test_send_reliable_frames_the_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let harness = wired(ConnectionConfig::new(addr));
        let pool = memory();

        harness.connection.connect().await.unwrap();
        let (mut stream, _) = accept_and_read_hello(&listener).await;

        let buffer = Message::new(3, b"abc").to_buffer(&pool);
        assert!(harness.connection.send(buffer, SendMode::Reliable).await);

        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        assert_eq!(u32::from_be_bytes(prefix), 5);
        let mut payload = [0u8; 5];
        stream.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, [0x00, 0x03, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_peer_close_disconnects_remotely() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut harness = wired(ConnectionConfig::new(addr));

        harness.connection.connect().await.unwrap();
        let (stream, _) = accept_and_read_hello(&listener).await;
        harness.connection.mark_session_established();
        drop(stream);

        let (local, _error) = harness.disconnects.recv().await.unwrap();
        assert!(!local);
        // Both loops drain and the state settles.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.connection.state(), ConnectionState::Disconnected);
        // A later local disconnect finds nothing to do.
        assert!(!harness.connection.disconnect().await);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut harness = wired(ConnectionConfig::new(addr));

        harness.connection.connect().await.unwrap();
        let (_stream, _) = accept_and_read_hello(&listener).await;
        harness.connection.mark_session_established();

        assert!(harness.connection.disconnect().await);
        assert_eq!(harness.connection.state(), ConnectionState::Disconnected);
        assert!(!harness.connection.disconnect().await);

        let (local, error) = harness.disconnects.recv().await.unwrap();
        assert!(local);
        assert!(error.is_none());
        // The disconnect callback fired exactly once.
        assert!(harness.disconnects.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let harness = wired(ConnectionConfig::new(addr));

        harness.connection.connect().await.unwrap();
        let (_stream, _) = accept_and_read_hello(&listener).await;
        assert!(matches!(
            harness.connection.connect().await,
            Err(ConnectError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn test_refused_connect_fails_cleanly() {
        // Bind and drop a listener to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let harness = wired(ConnectionConfig::new(addr));
        assert!(matches!(
            harness.connection.connect().await,
            Err(ConnectError::Io(_))
        ));
        assert_eq!(harness.connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_endpoints_are_enumerable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ConnectionConfig::builder(addr)
            .unreliable_port(addr.port().wrapping_add(1))
            .build();
        let harness = wired(config);

        assert_eq!(harness.connection.remote_endpoint("tcp"), None);
        harness.connection.connect().await.unwrap();
        let (_stream, _) = accept_and_read_hello(&listener).await;

        assert_eq!(harness.connection.remote_endpoint("tcp"), Some(addr));
        let udp = harness.connection.remote_endpoint("udp").unwrap();
        assert_eq!(udp.port(), addr.port().wrapping_add(1));
        assert_eq!(harness.connection.remote_endpoint("ipx"), None);
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let addr: SocketAddr = "127.0.0.1:4296".parse().unwrap();
        let config = ConnectionConfig::new(addr);
        assert_eq!(config.reliable_addr, addr);
        assert_eq!(config.unreliable_addr, addr);
        assert!(!config.no_delay);
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
        let hello = (config.hello)();
        assert_eq!(hello.tag(), 0);
        assert_eq!(hello.payload(), DEFAULT_HELLO_PAYLOAD);
    }
}

//! Channel wrappers over the two sockets of a connection.
//!
//! The reliable channel is a TCP stream carrying length-prefixed frames:
//!
//! ```text
//! +-------------------+----------------------+
//! | length (4 bytes)  | serialized message   |
//! | u32 big-endian    | (length bytes)       |
//! +-------------------+----------------------+
//! ```
//!
//! The unreliable channel is a connected UDP socket carrying one serialized
//! message per datagram. Both wrappers read into pooled blocks and hand the
//! result out as a [`MessageBuffer`], so the receive path never allocates
//! while the pool can serve it.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UdpSocket;

use crate::core::constants::{LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use crate::pool::{BlockClass, MemoryPool, MessageBuffer};

/// Errors raised by frame I/O on the reliable channel.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the connection, possibly mid-frame.
    #[error("connection closed by peer")]
    Closed,

    /// The length prefix announced a frame beyond the accepted maximum.
    #[error("frame length {size} exceeds maximum {max}")]
    TooLarge {
        /// Announced payload length.
        size: u32,
        /// Configured maximum.
        max: u32,
    },

    /// The length prefix announced an empty frame, which the protocol never
    /// produces.
    #[error("zero-length frame")]
    Empty,

    /// An I/O error occurred.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Live traffic counters for one channel.
///
/// Incremented from the I/O paths without locking; read via
/// [`ChannelStats::snapshot`].
#[derive(Debug, Default)]
pub struct ChannelStats {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of a channel's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStatsSnapshot {
    /// Messages handed to the OS on this channel.
    pub messages_sent: u64,
    /// Wire bytes sent, framing included.
    pub bytes_sent: u64,
    /// Messages framed from this channel.
    pub messages_received: u64,
    /// Wire bytes received, framing included.
    pub bytes_received: u64,
}

impl ChannelStats {
    pub(crate) fn record_send(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_receive(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Read side of the reliable channel.
pub(crate) struct ReliableReader {
    half: OwnedReadHalf,
    stats: Arc<ChannelStats>,
}

impl ReliableReader {
    pub(crate) fn new(half: OwnedReadHalf, stats: Arc<ChannelStats>) -> Self {
        Self { half, stats }
    }

    /// Read one length-prefixed frame into a pooled buffer.
    pub(crate) async fn read_frame(&mut self, pool: &MemoryPool) -> Result<MessageBuffer, FrameError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        match self.half.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
            Err(e) => return Err(FrameError::Io(e)),
        }
        let announced = u32::from_be_bytes(prefix);
        if announced == 0 {
            return Err(FrameError::Empty);
        }
        if announced > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: announced,
                max: MAX_FRAME_SIZE,
            });
        }
        let len = announced as usize;
        let mut block = pool.acquire(len);
        match self.half.read_exact(&mut block.as_mut_slice()[..len]).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
            Err(e) => return Err(FrameError::Io(e)),
        }
        self.stats.record_receive(LENGTH_PREFIX_SIZE + len);
        Ok(block.freeze(len))
    }
}

/// Write side of the reliable channel.
pub(crate) struct ReliableWriter {
    half: OwnedWriteHalf,
    stats: Arc<ChannelStats>,
}

impl ReliableWriter {
    pub(crate) fn new(half: OwnedWriteHalf, stats: Arc<ChannelStats>) -> Self {
        Self { half, stats }
    }

    /// Write one length-prefixed frame.
    pub(crate) async fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        if payload.is_empty() {
            return Err(FrameError::Empty);
        }
        if payload.len() > MAX_FRAME_SIZE as usize {
            return Err(FrameError::TooLarge {
                size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                max: MAX_FRAME_SIZE,
            });
        }
        let len = payload.len() as u32;
        self.half.write_all(&len.to_be_bytes()).await?;
        self.half.write_all(payload).await?;
        self.half.flush().await?;
        self.stats.record_send(LENGTH_PREFIX_SIZE + payload.len());
        Ok(())
    }

    /// Half-close the stream, flushing anything buffered.
    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}

/// The unreliable channel: a UDP socket connected to the peer.
#[derive(Clone)]
pub(crate) struct UnreliableChannel {
    socket: Arc<UdpSocket>,
    stats: Arc<ChannelStats>,
}

impl UnreliableChannel {
    pub(crate) fn new(socket: Arc<UdpSocket>, stats: Arc<ChannelStats>) -> Self {
        Self { socket, stats }
    }

    /// Receive one datagram into a pooled buffer.
    ///
    /// Reads into an extra-large-class block; datagrams beyond that size are
    /// truncated by the OS and rejected downstream as malformed.
    pub(crate) async fn recv_message(&self, pool: &MemoryPool) -> io::Result<MessageBuffer> {
        let mut block = pool.acquire(pool.block_size(BlockClass::ExtraLarge));
        let len = self.socket.recv(block.as_mut_slice()).await?;
        self.stats.record_receive(len);
        Ok(block.freeze(len))
    }

    /// Send one serialized message as a single datagram.
    pub(crate) async fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.socket.send(payload).await?;
        self.stats.record_send(payload.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ObjectCacheConfig;
    use tokio::net::{TcpListener, TcpStream};

    fn pool() -> MemoryPool {
        MemoryPool::new(&ObjectCacheConfig::default())
    }

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn split(
        stream: TcpStream,
    ) -> (ReliableReader, ReliableWriter, Arc<ChannelStats>) {
        let stats = Arc::new(ChannelStats::default());
        let (read, write) = stream.into_split();
        (
            ReliableReader::new(read, Arc::clone(&stats)),
            ReliableWriter::new(write, Arc::clone(&stats)),
            stats,
        )
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let pool = pool();
        let (client, server) = tcp_pair().await;
        let (_, mut writer, _) = split(client);
        let (mut reader, _, _) = split(server);

        writer.write_frame(b"hello frame").await.unwrap();
        let received = reader.read_frame(&pool).await.unwrap();
        assert_eq!(received.bytes(), b"hello frame");
    }

    #[tokio::test]
    async fn test_frames_do_not_merge() {
        let pool = pool();
        let (client, server) = tcp_pair().await;
        let (_, mut writer, _) = split(client);
        let (mut reader, _, _) = split(server);

        writer.write_frame(b"aaa").await.unwrap();
        writer.write_frame(b"bbbb").await.unwrap();
        assert_eq!(reader.read_frame(&pool).await.unwrap().bytes(), b"aaa");
        assert_eq!(reader.read_frame(&pool).await.unwrap().bytes(), b"bbbb");
    }

    #[tokio::test]
    async fn test_peer_close_is_detected() {
        let pool = pool();
        let (client, server) = tcp_pair().await;
        drop(client);
        let (mut reader, _, _) = split(server);
        assert!(matches!(
            reader.read_frame(&pool).await,
            Err(FrameError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected() {
        let pool = pool();
        let (mut client, server) = tcp_pair().await;
        let (mut reader, _, _) = split(server);

        let huge = (MAX_FRAME_SIZE + 1).to_be_bytes();
        client.write_all(&huge).await.unwrap();
        assert!(matches!(
            reader.read_frame(&pool).await,
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_prefix_rejected() {
        let pool = pool();
        let (mut client, server) = tcp_pair().await;
        let (mut reader, _, _) = split(server);

        client.write_all(&0u32.to_be_bytes()).await.unwrap();
        assert!(matches!(
            reader.read_frame(&pool).await,
            Err(FrameError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_stats_count_framing_bytes() {
        let pool = pool();
        let (client, server) = tcp_pair().await;
        let (_, mut writer, send_stats) = split(client);
        let (mut reader, _, recv_stats) = split(server);

        writer.write_frame(b"12345").await.unwrap();
        reader.read_frame(&pool).await.unwrap();

        let sent = send_stats.snapshot();
        assert_eq!(sent.messages_sent, 1);
        assert_eq!(sent.bytes_sent, 9);
        let received = recv_stats.snapshot();
        assert_eq!(received.messages_received, 1);
        assert_eq!(received.bytes_received, 9);
    }

    #[tokio::test]
    async fn test_datagram_roundtrip() {
        let pool = pool();
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = server.local_addr().unwrap();
        let client = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        client.connect(server_addr).await.unwrap();
        server.connect(client.local_addr().unwrap()).await.unwrap();

        let sender = UnreliableChannel::new(client, Arc::new(ChannelStats::default()));
        let receiver = UnreliableChannel::new(server, Arc::new(ChannelStats::default()));

        sender.send(b"datagram").await.unwrap();
        let received = receiver.recv_message(&pool).await.unwrap();
        assert_eq!(received.bytes(), b"datagram");
    }
}

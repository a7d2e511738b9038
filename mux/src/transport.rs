use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// One direction of a network path a handler may answer on.
///
/// A transport is handed to every handler in the chain so that protocol
/// code can reply without knowing whether it is speaking over a datagram
/// socket or a byte stream. `reliable` distinguishes the two: stream
/// transports preserve bytes but not frames, packet transports preserve
/// frames but may drop or reorder them, which is what decides whether a
/// transaction retransmits.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> io::Result<()>;

    fn local_addr(&self) -> SocketAddr;

    fn remote_addr(&self) -> SocketAddr;

    /// Whether the underlying transport is an ordered, reliable byte
    /// stream. Packet transports return `false`.
    fn reliable(&self) -> bool;

    /// Release the underlying connection. Serve loops observe this as
    /// EOF. Closing a shared UDP socket's virtual transport is a no-op.
    async fn close(&self);
}

/// A datagram transport bound to one remote peer.
///
/// The socket may be shared by many peers (a listening server) or
/// connected to a single one (a dialing client); the pair of socket and
/// peer address is what makes it a transport.
pub struct PacketTransport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl PacketTransport {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }
}

#[async_trait]
impl Transport for PacketTransport {
    async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send_to(bytes, self.peer).await?;
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.socket
            .local_addr()
            .expect("udp socket has a local addr")
    }

    fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    fn reliable(&self) -> bool {
        false
    }

    async fn close(&self) {}
}

/// The write half of a TCP connection.
///
/// Writes are serialized through a mutex so that concurrent tasks cannot
/// interleave partial messages on the stream.
pub struct StreamTransport {
    writer: Mutex<OwnedWriteHalf>,
    local: SocketAddr,
    peer: SocketAddr,
}

impl StreamTransport {
    pub fn new(writer: OwnedWriteHalf, local: SocketAddr, peer: SocketAddr) -> Self {
        Self {
            writer: Mutex::new(writer),
            local,
            peer,
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.writer.lock().await.write_all(bytes).await
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    fn reliable(&self) -> bool {
        true
    }

    async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

//! ## Connection multiplexer
//!
//! Carries several wire protocols over one transport. Incoming bytes are
//! offered to an ordered chain of handlers; each handler either consumes
//! a complete message, asks for more bytes (stream transports only),
//! or passes. The same chain serves packet-oriented transports (one
//! datagram per dispatch, residue discarded) and stream-oriented
//! transports (length re-framing across partial reads, with compaction).
//!
//! ```text
//! bytes ──▶ serve loop ──▶ [ handler 1 │ handler 2 │ ... ] ──▶ protocol
//!              ▲                     │
//!              └──── need more ◀─────┘
//! ```
//!
//! A server listening on one UDP socket presents every distinct remote
//! peer as an independent virtual transport through [`SessionMap`], so
//! per-connection state such as transaction tables never collides
//! across peers.

mod pool;
mod reader;
mod session;
mod transport;

pub use pool::{BufferPool, BUFFER_SIZE};
pub use reader::Reader;
pub use session::{SessionFactory, SessionMap};
pub use transport::{PacketTransport, StreamTransport, Transport};

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum Error {
    /// No handler recognized the bytes, or a handler found the framing
    /// of its own protocol violated. Fatal for a stream connection;
    /// a packet loop drops the datagram and keeps serving.
    #[error("format error")]
    Format,
    /// The stream serve loop stalled with a full buffer: whatever the
    /// peer is sending is bigger than the re-framing window. Fatal.
    #[error("buffer overflow")]
    BufferOverflow,
    /// The optional per-connection idle deadline expired.
    #[error("idle timeout")]
    IdleTimeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What a handler did with the buffered bytes.
pub enum Verdict {
    /// The handler consumed a message by advancing the reader.
    Handled,
    /// Not enough bytes buffered to decide; refill and re-enter.
    /// Meaningless on packet transports, where a datagram is all there
    /// ever is.
    NeedMoreData,
    /// Not this handler's format; the chain moves on.
    Unmatched,
}

/// Outcome of one pass over the handler chain.
pub enum Dispatch {
    /// At least one message was consumed.
    Progress,
    /// A handler is waiting for more bytes.
    NeedMore,
    /// Nobody claimed the bytes.
    Unmatched,
}

/// A protocol registered on a [`Mux`].
///
/// Handlers receive the transport so they can answer, and the reader
/// positioned at the first unconsumed byte. A handler that recognizes
/// its format must advance the reader past exactly one message and
/// return [`Verdict::Handled`]. Handlers may suspend on network I/O but
/// must not re-enter the multiplexer they were dispatched from; the
/// chain's reader lock is held for the duration of the call.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, transport: &dyn Transport, reader: &mut Reader<'_>)
        -> Result<Verdict, Error>;
}

/// A multiprotocol connection multiplexer.
///
/// Registration and removal take the chain's writer lock; serving takes
/// the reader, so handlers registered later are consulted after earlier
/// ones within a single dispatch.
#[derive(Default)]
pub struct Mux {
    chain: RwLock<Vec<Arc<dyn Handler>>>,
}

impl Mux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Builds a multiplexer with its chain already populated; useful
    /// where a chain must come up without awaiting, such as the session
    /// factory of a [`SessionMap`].
    pub fn with_handlers(handlers: Vec<Arc<dyn Handler>>) -> Arc<Self> {
        Arc::new(Self {
            chain: RwLock::new(handlers),
        })
    }

    /// Appends a handler to the decoder chain.
    pub async fn register(&self, handler: Arc<dyn Handler>) {
        self.chain.write().await.push(handler);
    }

    /// Drops every registered handler.
    pub async fn clear(&self) {
        self.chain.write().await.clear();
    }

    /// Runs one pass over the handler chain.
    pub async fn dispatch(
        &self,
        transport: &dyn Transport,
        reader: &mut Reader<'_>,
    ) -> Result<Dispatch, Error> {
        let start = reader.counter();
        let mut need_more = false;

        let chain = self.chain.read().await;
        for handler in chain.iter() {
            if reader.buffered() == 0 {
                break;
            }

            match handler.handle(transport, reader).await? {
                Verdict::Handled => continue,
                Verdict::Unmatched => continue,
                Verdict::NeedMoreData => {
                    need_more = true;
                    break;
                }
            }
        }

        Ok(if reader.counter() > start {
            Dispatch::Progress
        } else if need_more {
            Dispatch::NeedMore
        } else {
            Dispatch::Unmatched
        })
    }

    /// Serves a datagram socket with a single peer on the other end
    /// (a dialed client connection).
    ///
    /// One datagram is read per iteration, the chain runs once over it,
    /// and anything the chain leaves unconsumed is discarded; datagram
    /// boundaries are never re-framed across.
    pub async fn serve_packet(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        idle_timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let mut buf = vec![0u8; BUFFER_SIZE];

        loop {
            let (size, addr) = match read_from(&socket, &mut buf, idle_timeout).await {
                Ok(x) => x,
                // the remote end going away between datagrams surfaces
                // as a reset on some platforms; the socket is still fine.
                Err(Error::Io(e)) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            };

            if size == 0 {
                continue;
            }

            log::trace!("packet received: size={}, addr={}", size, addr);

            let transport = PacketTransport::new(socket.clone(), addr);
            let mut reader = Reader::new(&buf[..size]);
            match self.dispatch(&transport, &mut reader).await {
                Ok(Dispatch::Progress) => {}
                Ok(_) => log::trace!("datagram unmatched: size={}, addr={}", size, addr),
                Err(e) => log::debug!("datagram dropped: addr={}, err={}", addr, e),
            }
        }
    }

    /// Serves a reliable byte stream.
    ///
    /// The loop refills the buffer from the connection, then re-invokes
    /// the chain while progress is made; unconsumed bytes are compacted
    /// to the front before the next refill. A stall with a full buffer
    /// is a buffer overflow and closes the connection, as does any byte
    /// sequence no handler recognizes.
    pub async fn serve_stream<R>(
        self: Arc<Self>,
        mut stream: R,
        transport: Arc<dyn Transport>,
        idle_timeout: Option<Duration>,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut filled = 0;

        loop {
            if filled == buf.len() {
                return Err(Error::BufferOverflow);
            }

            let size = read_stream(&mut stream, &mut buf[filled..], idle_timeout).await?;
            if size == 0 {
                return Ok(());
            }

            filled += size;
            let mut pos = 0;

            loop {
                let mut reader = Reader::new(&buf[pos..filled]);
                match self.dispatch(transport.as_ref(), &mut reader).await? {
                    Dispatch::Progress => {
                        pos += reader.counter();
                        if pos == filled {
                            break;
                        }
                    }
                    Dispatch::NeedMore => break,
                    Dispatch::Unmatched => return Err(Error::Format),
                }
            }

            if pos > 0 {
                buf.copy_within(pos..filled, 0);
                filled -= pos;
            }
        }
    }
}

async fn read_from(
    socket: &UdpSocket,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<(usize, std::net::SocketAddr), Error> {
    match idle_timeout {
        None => Ok(socket.recv_from(buf).await?),
        Some(idle) => match tokio::time::timeout(idle, socket.recv_from(buf)).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(Error::IdleTimeout),
        },
    }
}

async fn read_stream<R>(
    stream: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<usize, Error>
where
    R: AsyncRead + Unpin + Send,
{
    match idle_timeout {
        None => Ok(stream.read(buf).await?),
        Some(idle) => match tokio::time::timeout(idle, stream.read(buf)).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(Error::IdleTimeout),
        },
    }
}

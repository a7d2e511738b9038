use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;

use crate::{Dispatch, Error, Mux, PacketTransport, Reader, BUFFER_SIZE};

/// How a [`SessionMap`] builds the handler chain for a newly seen peer.
pub type SessionFactory = Box<dyn Fn(SocketAddr) -> Arc<Mux> + Send + Sync>;

struct Session {
    mux: Arc<Mux>,
    last_seen: Mutex<Instant>,
}

/// Per-peer dispatch for a shared datagram socket.
///
/// A server listening on a single UDP socket sees datagrams from many
/// remote peers. Each distinct {remote IP, remote port} pair gets its
/// own handler chain and, through it, its own transaction table, so
/// concurrent transactions with different peers cannot collide on a
/// transaction identifier. Entries are created lazily on the first
/// datagram from a peer and evicted after `ttl` of inactivity.
pub struct SessionMap {
    sessions: RwLock<AHashMap<SocketAddr, Arc<Session>>>,
    factory: SessionFactory,
    ttl: Duration,
}

impl SessionMap {
    pub fn new(ttl: Duration, factory: SessionFactory) -> Self {
        Self {
            sessions: RwLock::new(AHashMap::new()),
            factory,
            ttl,
        }
    }

    /// Number of live peer sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn get(&self, addr: SocketAddr) -> Arc<Session> {
        if let Some(session) = self.sessions.read().get(&addr) {
            *session.last_seen.lock() = Instant::now();
            return session.clone();
        }

        let mut sessions = self.sessions.write();

        // dropping an evicted session cancels whatever transactions its
        // chain still had outstanding.
        let ttl = self.ttl;
        sessions.retain(|_, s| s.last_seen.lock().elapsed() < ttl);

        sessions
            .entry(addr)
            .or_insert_with(|| {
                log::debug!("new peer session: addr={}", addr);
                Arc::new(Session {
                    mux: (self.factory)(addr),
                    last_seen: Mutex::new(Instant::now()),
                })
            })
            .clone()
    }

    /// Reads datagrams from the shared socket and dispatches each one
    /// on its source peer's own chain.
    pub async fn serve(&self, socket: Arc<UdpSocket>) -> Result<(), Error> {
        let mut buf = vec![0u8; BUFFER_SIZE];

        loop {
            let (size, addr) = match socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };

            if size == 0 {
                continue;
            }

            let session = self.get(addr);
            let transport = PacketTransport::new(socket.clone(), addr);
            let mut reader = Reader::new(&buf[..size]);

            match session.mux.dispatch(&transport, &mut reader).await {
                Ok(Dispatch::Progress) => {}
                Ok(_) => log::trace!("datagram unmatched: size={}, addr={}", size, addr),
                Err(e) => log::debug!("datagram dropped: addr={}, err={}", addr, e),
            }
        }
    }
}

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::BytesMut;
use mux::{BufferPool, Transport};
use parking_lot::Mutex;
use stun::attribute::{
    ChannelNumber, Data, DontFragment, ErrorCode, EvenPort, Lifetime, Nonce, Protocol, Realm,
    RequestedTransport, ReservationToken, UserName, XorMappedAddress, XorPeerAddress,
    XorRelayedAddress,
};
use stun::{
    util, ChannelData, Config, Conn, Kind, MessageHandler, MessageReader, MessageWriter, Method,
    Scheme, StunError, Uri,
};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::allocation::Allocation;
use crate::channel::{Channel, ChannelDataHandler, ChannelRouter};
use crate::TurnError;

/// refresh runs this far ahead of the allocation expiry.
const REFRESH_SLACK: Duration = Duration::from_secs(60);

/// permissions expire after 5 minutes on the server; they are
/// re-installed on this faster cadence.
const PERMISSION_REFRESH: Duration = Duration::from_secs(240);

const DEFAULT_LIFETIME: u32 = 600;

/// Options for the Allocate request.
pub struct AllocateOptions {
    /// protocol between the server and the peers (REQUESTED-TRANSPORT).
    pub transport: Protocol,
    /// requested allocation lifetime; the server may grant less.
    pub lifetime: Option<Duration>,
    /// ask the server to set DF on relayed datagrams.
    pub dont_fragment: bool,
    /// ask for an even relay port with the next one reserved.
    pub even_port: bool,
    /// redeem a reservation made by an earlier EVEN-PORT allocation.
    pub reservation_token: Option<[u8; 8]>,
}

impl Default for AllocateOptions {
    fn default() -> Self {
        Self {
            transport: Protocol::Udp,
            lifetime: None,
            dont_fragment: false,
            even_port: false,
            reservation_token: None,
        }
    }
}

#[derive(Default)]
struct Auth {
    realm: Option<String>,
    nonce: Option<String>,
    key: Option<Vec<u8>>,
}

struct Inner {
    conn: Conn,
    username: String,
    password: String,
    auth: Mutex<Auth>,
    allocation: Mutex<Option<Allocation>>,
    permissions_at: Mutex<Instant>,
    channels: Arc<ChannelRouter>,
    seq: AtomicU16,
}

/// A TURN client: one allocation on one server.
///
/// The first authenticated request follows the long-term credential
/// dance: the opening Allocate goes out bare, the server answers 401
/// with REALM and NONCE, and the retry carries USERNAME/REALM/NONCE
/// plus MESSAGE-INTEGRITY under MD5(username:realm:password). A
/// background task refreshes the allocation 60 seconds ahead of expiry
/// and re-installs permissions before the server's 5-minute timer
/// drops them.
pub struct Client {
    inner: Arc<Inner>,
    indications: mpsc::Receiver<(SocketAddr, Vec<u8>)>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connects to a `turn:`/`turns:` URI with long-term credentials.
    pub async fn dial(uri: &str, username: &str, password: &str) -> Result<Self, TurnError> {
        Self::dial_with(uri, username, password, Config::default()).await
    }

    pub async fn dial_with(
        uri: &str,
        username: &str,
        password: &str,
        config: Config,
    ) -> Result<Self, TurnError> {
        let uri: Uri = uri.parse().map_err(TurnError::Stun)?;
        if !matches!(uri.scheme, Scheme::Turn | Scheme::Turns) {
            return Err(TurnError::Stun(StunError::UnsupportedUri(uri.to_string())));
        }

        let addr = lookup_host((uri.host.as_str(), uri.port))
            .await
            .map_err(StunError::Io)
            .map_err(TurnError::Stun)?
            .next()
            .ok_or_else(|| TurnError::Stun(StunError::UnsupportedUri(uri.to_string())))?;

        let (sender, indications) = mpsc::channel(32);
        let handler: Arc<dyn MessageHandler> = Arc::new(IndicationHandler { sender });

        let stream = uri.scheme.is_secure() || uri.transport == Some(Protocol::Tcp);
        let conn = if stream {
            Conn::dial_tcp_with(addr, config, Some(handler)).await?
        } else {
            let bind: SocketAddr = if addr.is_ipv4() {
                "0.0.0.0:0".parse().expect("literal addr")
            } else {
                "[::]:0".parse().expect("literal addr")
            };

            let socket = Arc::new(UdpSocket::bind(bind).await.map_err(StunError::Io)?);
            socket.connect(addr).await.map_err(StunError::Io)?;
            Conn::from_udp(socket, addr, config, Some(handler)).await?
        };

        let channels = Arc::new(ChannelRouter::default());
        conn.mux()
            .register(Arc::new(ChannelDataHandler::new(channels.clone())))
            .await;

        Ok(Self {
            inner: Arc::new(Inner {
                conn,
                username: username.to_owned(),
                password: password.to_owned(),
                auth: Mutex::new(Auth::default()),
                allocation: Mutex::new(None),
                permissions_at: Mutex::new(Instant::now()),
                channels,
                seq: AtomicU16::new(0),
            }),
            indications,
            maintenance: Mutex::new(None),
        })
    }

    /// Creates the relay allocation and returns the relayed transport
    /// address. Starts the refresh task.
    pub async fn allocate(&self, options: AllocateOptions) -> Result<SocketAddr, TurnError> {
        let relayed = self.inner.allocate(options).await?;

        let mut maintenance = self.maintenance.lock();
        if maintenance.is_none() {
            *maintenance = Some(spawn_maintenance(Arc::downgrade(&self.inner)));
        }

        Ok(relayed)
    }

    /// Extends (or with [`Duration::ZERO`], destroys) the allocation.
    pub async fn refresh(&self, lifetime: Duration) -> Result<(), TurnError> {
        self.inner.refresh(lifetime).await
    }

    /// Installs permissions for the given peer addresses. The
    /// maintenance task keeps them installed from then on.
    pub async fn create_permission(&self, peers: &[SocketAddr]) -> Result<(), TurnError> {
        self.inner.create_permission(peers).await
    }

    /// Binds a channel number to a peer, installing its permission
    /// along the way, and returns the framed pipe.
    ///
    /// A peer that is already bound keeps its number: the ChannelBind
    /// refreshes the server-side binding (the same transport address
    /// must not be bound to two different channels) and the returned
    /// handle supersedes the old one.
    pub async fn channel_bind(&self, peer: SocketAddr) -> Result<Channel, TurnError> {
        // the allocation mirrors the server's bindings, which outlive a
        // locally closed handle; it decides before a new number is cut.
        let number = {
            let allocation = self.inner.allocation.lock();
            allocation.as_ref().and_then(|a| a.channel_of(&peer))
        }
        .or_else(|| self.inner.channels.number_of(&peer))
        .unwrap_or_else(|| self.inner.next_channel());

        self.inner
            .request(Method::ChannelBind(Kind::Request), |writer| {
                writer.append::<ChannelNumber>(number);
                writer.append::<XorPeerAddress>(peer);
            })
            .await?;

        // a channel bind installs the peer's permission too.
        if let Some(allocation) = self.inner.allocation.lock().as_mut() {
            allocation.permit(&[peer]);
            allocation.bind(number, peer);
        }

        log::info!("channel bound: number={:#06x}, peer={}", number, peer);

        let (incoming, epoch) = self.inner.channels.bind(number, peer);
        Ok(Channel::new(
            number,
            peer,
            self.inner.conn.transport().clone(),
            incoming,
            self.inner.channels.clone(),
            epoch,
        ))
    }

    /// Relays application data to a peer in a Send indication; the
    /// un-channeled counterpart of [`Channel::send`].
    pub async fn send_to(&self, peer: SocketAddr, bytes: &[u8]) -> Result<(), TurnError> {
        let token: [u8; 12] = rand::random();
        let pool = BufferPool::global();
        let mut buf = pool.get();

        let flushed = {
            let mut writer = MessageWriter::new(Method::SendIndication, &token, &mut buf);
            writer.append::<XorPeerAddress>(peer);
            writer.append::<Data>(bytes);
            writer.flush(None, false)
        };

        let result = match flushed {
            Ok(()) => self
                .inner
                .conn
                .transport()
                .send(&buf)
                .await
                .map_err(|e| TurnError::Stun(e.into())),
            Err(e) => Err(TurnError::Stun(e)),
        };

        pool.put(buf);
        result
    }

    /// Receives the next Data indication: the peer it came from and the
    /// relayed bytes.
    pub async fn recv_from(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.indications.recv().await
    }

    pub fn relayed_addr(&self) -> Option<SocketAddr> {
        self.inner.allocation.lock().as_ref().map(|a| a.relayed)
    }

    pub fn allocation(&self) -> Option<Allocation> {
        self.inner.allocation.lock().clone()
    }

    pub fn conn(&self) -> &Conn {
        &self.inner.conn
    }

    /// Destroys the allocation (an explicit Refresh with zero
    /// lifetime) and closes the connection.
    pub async fn close(self) -> Result<(), TurnError> {
        let live = self.inner.allocation.lock().is_some();
        let result = if live {
            self.inner.refresh(Duration::ZERO).await
        } else {
            Ok(())
        };

        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }

        self.inner.channels.clear();
        self.inner.conn.close().await;
        result
    }
}

impl Inner {
    /// Executes one authenticated TURN transaction, transparently
    /// answering a single 401/438 challenge by deriving the long-term
    /// key from the returned REALM and retrying with credentials.
    async fn request<F>(&self, method: Method, write: F) -> Result<BytesMut, TurnError>
    where
        F: Fn(&mut MessageWriter),
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (key, realm, nonce) = {
                let auth = self.auth.lock();
                (auth.key.clone(), auth.realm.clone(), auth.nonce.clone())
            };

            let response = self
                .conn
                .round_trip(method, key.as_deref(), |writer| {
                    if let (Some(realm), Some(nonce)) = (realm.as_deref(), nonce.as_deref()) {
                        writer.append::<UserName>(self.username.as_str());
                        writer.append::<Realm>(realm);
                        writer.append::<Nonce>(nonce);
                    }

                    write(writer);
                })
                .await
                .map_err(TurnError::Stun)?;

            let retry = {
                let mut attributes = Vec::with_capacity(10);
                let message =
                    MessageReader::decode(&response, &mut attributes).map_err(TurnError::Stun)?;

                // signed responses must verify; challenges are unsigned.
                if let Some(key) = &key {
                    if message.has_integrity() {
                        message.integrity(key).map_err(TurnError::Stun)?;
                    }
                }

                if !message.method.is_error() {
                    false
                } else {
                    let error = message.get::<ErrorCode>().ok_or(TurnError::BadResponse)?;
                    match error.code {
                        401 | 438 if attempts < 2 => {
                            let realm = message.get::<Realm>().ok_or(TurnError::BadResponse)?;
                            let nonce = message.get::<Nonce>().ok_or(TurnError::BadResponse)?;
                            self.update_auth(realm, nonce);
                            true
                        }
                        437 => return Err(TurnError::AllocationMismatch),
                        403 => return Err(TurnError::Forbidden),
                        code => {
                            return Err(TurnError::ErrorResponse {
                                code,
                                reason: error.reason.to_owned(),
                            })
                        }
                    }
                }
            };

            if !retry {
                return Ok(response);
            }
        }
    }

    fn update_auth(&self, realm: &str, nonce: &str) {
        log::debug!("auth challenge: realm={}", realm);

        let key = util::long_term_credential_digest(&self.username, realm, &self.password);
        let mut auth = self.auth.lock();
        auth.realm = Some(realm.to_owned());
        auth.nonce = Some(nonce.to_owned());
        auth.key = Some(key.to_vec());
    }

    async fn allocate(&self, options: AllocateOptions) -> Result<SocketAddr, TurnError> {
        let response = self
            .request(Method::Allocate(Kind::Request), |writer| {
                writer.append::<RequestedTransport>(options.transport);
                if let Some(lifetime) = options.lifetime {
                    writer.append::<Lifetime>(lifetime.as_secs() as u32);
                }

                if options.dont_fragment {
                    writer.append::<DontFragment>(());
                }

                if options.even_port {
                    writer.append::<EvenPort>(true);
                }

                if let Some(token) = options.reservation_token.as_ref() {
                    writer.append::<ReservationToken>(&token[..]);
                }
            })
            .await?;

        let mut attributes = Vec::with_capacity(10);
        let message = MessageReader::decode(&response, &mut attributes).map_err(TurnError::Stun)?;
        let relayed = message
            .get::<XorRelayedAddress>()
            .ok_or(TurnError::BadResponse)?;
        let mapped = message.get::<XorMappedAddress>();
        let lifetime =
            Duration::from_secs(message.get::<Lifetime>().unwrap_or(DEFAULT_LIFETIME) as u64);

        log::info!(
            "allocation created: relayed={}, lifetime={:?}",
            relayed,
            lifetime
        );

        *self.allocation.lock() = Some(Allocation::new(relayed, mapped, lifetime));
        Ok(relayed)
    }

    async fn refresh(&self, lifetime: Duration) -> Result<(), TurnError> {
        let seconds = lifetime.as_secs() as u32;
        let result = self
            .request(Method::Refresh(Kind::Request), |writer| {
                writer.append::<Lifetime>(seconds);
            })
            .await;

        match result {
            Ok(response) => {
                if seconds == 0 {
                    log::info!("allocation destroyed");
                    *self.allocation.lock() = None;
                    self.channels.clear();
                } else {
                    let mut attributes = Vec::with_capacity(10);
                    let message = MessageReader::decode(&response, &mut attributes)
                        .map_err(TurnError::Stun)?;
                    let granted =
                        Duration::from_secs(message.get::<Lifetime>().unwrap_or(seconds) as u64);

                    if let Some(allocation) = self.allocation.lock().as_mut() {
                        allocation.renew(granted);
                    }

                    log::debug!("allocation refreshed: lifetime={:?}", granted);
                }

                Ok(())
            }
            // the allocation is already gone on the server; destroying
            // it again counts as done.
            Err(TurnError::AllocationMismatch) if seconds == 0 => {
                *self.allocation.lock() = None;
                self.channels.clear();
                Ok(())
            }
            Err(e) => {
                if matches!(e, TurnError::AllocationMismatch) {
                    *self.allocation.lock() = None;
                    self.channels.clear();
                }

                Err(e)
            }
        }
    }

    async fn create_permission(&self, peers: &[SocketAddr]) -> Result<(), TurnError> {
        if peers.is_empty() {
            return Ok(());
        }

        self.request(Method::CreatePermission(Kind::Request), |writer| {
            for peer in peers {
                writer.append::<XorPeerAddress>(*peer);
            }
        })
        .await?;

        if let Some(allocation) = self.allocation.lock().as_mut() {
            allocation.permit(peers);
        }

        *self.permissions_at.lock() = Instant::now();
        log::debug!("permissions installed: peers={:?}", peers);
        Ok(())
    }

    /// the next unused channel number, wrapping within the valid
    /// range and skipping numbers a live binding still holds.
    fn next_channel(&self) -> u16 {
        let range = ChannelData::MAX - ChannelData::MIN + 1;
        let allocation = self.allocation.lock();

        let mut number = ChannelData::MIN;
        for _ in 0..range {
            let n = self.seq.fetch_add(1, Ordering::Relaxed);
            number = ChannelData::MIN + n % range;

            let taken = self.channels.bound(number)
                || allocation
                    .as_ref()
                    .map_or(false, |a| a.channels.contains_key(&number));

            if !taken {
                break;
            }
        }

        number
    }

    fn next_deadline(&self) -> Option<Instant> {
        let allocation = self.allocation.lock();
        let allocation = allocation.as_ref()?;

        let mut next = allocation
            .expiry
            .checked_sub(REFRESH_SLACK)
            .unwrap_or_else(Instant::now);

        if !allocation.permissions.is_empty() {
            next = next.min(*self.permissions_at.lock() + PERMISSION_REFRESH);
        }

        Some(next)
    }

    async fn maintain(&self) {
        let now = Instant::now();
        let (refresh_due, lifetime, peers, permissions_due) = {
            let allocation = self.allocation.lock();
            let Some(allocation) = allocation.as_ref() else {
                return;
            };

            (
                now + REFRESH_SLACK >= allocation.expiry,
                allocation.lifetime,
                allocation.permissions.clone(),
                !allocation.permissions.is_empty()
                    && now >= *self.permissions_at.lock() + PERMISSION_REFRESH,
            )
        };

        if refresh_due {
            if let Err(e) = self.refresh(lifetime).await {
                log::warn!("allocation refresh failed: {}", e);
            }
        }

        if permissions_due {
            if let Err(e) = self.create_permission(&peers).await {
                log::warn!("permission refresh failed: {}", e);
            }
        }
    }
}

fn spawn_maintenance(weak: Weak<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = match weak.upgrade() {
                Some(inner) => inner.next_deadline(),
                None => break,
            };

            let Some(next) = next else {
                break;
            };

            // a floor keeps a failing refresh from spinning the loop.
            let next = next.max(Instant::now() + Duration::from_secs(1));
            tokio::time::sleep_until(next.into()).await;

            let Some(inner) = weak.upgrade() else {
                break;
            };

            inner.maintain().await;
        }
    })
}

struct IndicationHandler {
    sender: mpsc::Sender<(SocketAddr, Vec<u8>)>,
}

#[async_trait]
impl MessageHandler for IndicationHandler {
    async fn serve(&self, message: &MessageReader<'_, '_>, transport: &dyn Transport) {
        if message.method != Method::DataIndication {
            log::trace!(
                "unexpected message dropped: method={:?}, addr={}",
                message.method,
                transport.remote_addr()
            );
            return;
        }

        let (Some(peer), Some(bytes)) = (
            message.get::<XorPeerAddress>(),
            message.get::<Data>(),
        ) else {
            return;
        };

        let _ = self.sender.send((peer, bytes.to_vec())).await;
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use mux::{Mux, PacketTransport, StreamTransport, Transport};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

use crate::attribute::{ErrorCode, MappedAddress, Protocol, XorMappedAddress};
use crate::handler::{MessageHandler, StunHandler};
use crate::{Agent, Config, Kind, MessageReader, MessageWriter, Method, StunError, Uri};

/// A dialed STUN connection: one transport, its serve task, and the
/// transaction engine riding on it.
///
/// Multiple round trips may be in flight concurrently; they complete
/// in whatever order the responses arrive. Closing the connection
/// cancels everything outstanding.
pub struct Conn {
    mux: Arc<Mux>,
    agent: Arc<Agent>,
    transport: Arc<dyn Transport>,
    serve: JoinHandle<()>,
}

impl Conn {
    /// Connects to a `stun:`/`stuns:`/`turn:`/`turns:` URI.
    ///
    /// Cleartext schemes default to UDP; `?transport=tcp` and the TLS
    /// schemes select a stream. TLS itself is an external concern: the
    /// secure schemes dial plain TCP here and expect a TLS transport to
    /// be layered by the caller when the deployment needs it.
    pub async fn dial(uri: &str, config: Config) -> Result<Self, StunError> {
        let uri: Uri = uri.parse()?;
        let addr = resolve(&uri).await?;

        let stream = uri.scheme.is_secure() || uri.transport == Some(Protocol::Tcp);
        if stream {
            Self::dial_tcp(addr, config).await
        } else {
            Self::dial_udp(addr, config).await
        }
    }

    /// Connects over UDP and spawns the packet serve loop.
    pub async fn dial_udp(server: SocketAddr, config: Config) -> Result<Self, StunError> {
        let bind: SocketAddr = if server.is_ipv4() {
            "0.0.0.0:0".parse().expect("literal addr")
        } else {
            "[::]:0".parse().expect("literal addr")
        };

        let socket = Arc::new(UdpSocket::bind(bind).await?);
        socket.connect(server).await?;
        Self::from_udp(socket, server, config, None).await
    }

    /// Builds a connection over an already-bound socket, optionally
    /// with a handler for unsolicited messages (data indications, ICE
    /// checks).
    pub async fn from_udp(
        socket: Arc<UdpSocket>,
        server: SocketAddr,
        config: Config,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<Self, StunError> {
        let agent = Agent::new(Arc::new(config));
        let transport: Arc<dyn Transport> = Arc::new(PacketTransport::new(socket.clone(), server));

        let mux = Mux::new();
        mux.register(Arc::new(StunHandler::new(agent.clone(), handler)))
            .await;

        let serve = tokio::spawn({
            let mux = mux.clone();
            let agent = agent.clone();
            async move {
                if let Err(e) = mux.serve_packet(socket, None).await {
                    log::debug!("client serve loop ended: {}", e);
                }

                agent.close();
            }
        });

        Ok(Self {
            mux,
            agent,
            transport,
            serve,
        })
    }

    /// Connects over TCP and spawns the stream serve loop.
    pub async fn dial_tcp(server: SocketAddr, config: Config) -> Result<Self, StunError> {
        Self::dial_tcp_with(server, config, None).await
    }

    pub async fn dial_tcp_with(
        server: SocketAddr,
        config: Config,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<Self, StunError> {
        let stream = TcpStream::connect(server).await?;
        let local = stream.local_addr()?;
        let (read, write) = stream.into_split();

        let agent = Agent::new(Arc::new(config));
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new(write, local, server));

        let mux = Mux::new();
        mux.register(Arc::new(StunHandler::new(agent.clone(), handler)))
            .await;

        let serve = tokio::spawn({
            let mux = mux.clone();
            let agent = agent.clone();
            let transport = transport.clone();
            async move {
                if let Err(e) = mux.serve_stream(read, transport, None).await {
                    log::debug!("client serve loop ended: {}", e);
                }

                agent.close();
            }
        });

        Ok(Self {
            mux,
            agent,
            transport,
            serve,
        })
    }

    pub fn mux(&self) -> &Arc<Mux> {
        &self.mux
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.transport.remote_addr()
    }

    /// Executes one transaction on this connection and returns the raw
    /// response message bytes, already verified against the configured
    /// key provider.
    pub async fn round_trip<F>(
        &self,
        method: Method,
        auth: Option<&[u8]>,
        write: F,
    ) -> Result<BytesMut, StunError>
    where
        F: FnOnce(&mut MessageWriter),
    {
        self.agent
            .round_trip(self.transport.as_ref(), method, auth, write)
            .await
    }

    /// Runs a Binding transaction and returns the server-reflexive
    /// transport address, preferring the XOR form over the plain one.
    pub async fn discover(&self) -> Result<SocketAddr, StunError> {
        let bytes = self
            .round_trip(Method::Binding(Kind::Request), None, |_| {})
            .await?;

        let mut attributes = Vec::with_capacity(10);
        let message = MessageReader::decode(&bytes, &mut attributes)?;
        if message.method.is_error() {
            return Err(error_response(&message));
        }

        message
            .get::<XorMappedAddress>()
            .or_else(|| message.get::<MappedAddress>())
            .ok_or(StunError::Format)
    }

    /// Closes the connection; outstanding transactions observe
    /// cancellation.
    pub async fn close(&self) {
        self.agent.close();
        self.transport.close().await;
        self.serve.abort();
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.serve.abort();
    }
}

/// Connects to the URI, runs a Binding transaction and returns the
/// discovered reflexive address.
pub async fn discover(uri: &str) -> Result<SocketAddr, StunError> {
    let conn = Conn::dial(uri, Config::default()).await?;
    let addr = conn.discover().await;
    conn.close().await;
    addr
}

pub(crate) fn error_response(message: &MessageReader<'_, '_>) -> StunError {
    match message.get::<ErrorCode>() {
        Some(err) => StunError::ErrorResponse {
            code: err.code,
            reason: err.reason.to_owned(),
        },
        None => StunError::Format,
    }
}

async fn resolve(uri: &Uri) -> Result<SocketAddr, StunError> {
    lookup_host((uri.host.as_str(), uri.port))
        .await?
        .next()
        .ok_or_else(|| StunError::UnsupportedUri(uri.to_string()))
}

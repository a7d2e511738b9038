use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mux::{Mux, SessionMap, StreamTransport, Transport};
use tokio::net::{TcpListener, UdpSocket};

use crate::handler::{MessageHandler, ServerContext, StunHandler};
use crate::{Agent, Config, StunError};

/// A STUN server.
///
/// Answers Binding requests with the reflexive transport address by
/// default; a user handler takes over all request/indication traffic
/// when installed. With a key provider in the config, requests are
/// authenticated and failures are answered with a 401 challenge
/// carrying this server's realm.
pub struct Server {
    pub realm: String,
    pub software: Option<String>,
    pub config: Arc<Config>,
    /// inactivity window after which a UDP peer session (and its
    /// transaction table) is evicted.
    pub session_ttl: Duration,
    /// per-connection idle deadline on stream transports.
    pub idle_timeout: Option<Duration>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl Server {
    pub fn new(realm: &str) -> Self {
        Self {
            realm: realm.to_owned(),
            software: None,
            config: Arc::new(Config::default()),
            session_ttl: Duration::from_secs(300),
            idle_timeout: None,
            handler: None,
        }
    }

    /// install the user handler serving requests and indications.
    pub fn handle(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Arc::new(config);
        self
    }

    fn context(&self) -> ServerContext {
        ServerContext {
            realm: self.realm.clone(),
            software: self.software.clone(),
        }
    }

    fn build_mux(&self) -> Arc<Mux> {
        let agent = Agent::new(self.config.clone());
        Mux::with_handlers(vec![Arc::new(StunHandler::server(
            agent,
            self.context(),
            self.handler.clone(),
        ))])
    }

    /// Listens on the network address and serves requests until the
    /// socket fails.
    pub async fn listen_and_serve(&self, network: &str, addr: SocketAddr) -> Result<(), StunError> {
        match network {
            "udp" | "udp4" | "udp6" => {
                let socket = Arc::new(UdpSocket::bind(addr).await?);
                self.serve_udp(socket).await
            }
            "tcp" | "tcp4" | "tcp6" => {
                let listener = TcpListener::bind(addr).await?;
                self.serve_tcp(listener).await
            }
            network => Err(StunError::UnsupportedNetwork(network.to_owned())),
        }
    }

    /// Serves a shared UDP socket. Every distinct remote peer gets a
    /// lazily created virtual transport with its own handler chain and
    /// transaction table.
    pub async fn serve_udp(&self, socket: Arc<UdpSocket>) -> Result<(), StunError> {
        log::info!("stun server listening: addr={}", socket.local_addr()?);

        let config = self.config.clone();
        let context = self.context();
        let handler = self.handler.clone();

        let sessions = SessionMap::new(
            self.session_ttl,
            Box::new(move |_| {
                let agent = Agent::new(config.clone());
                Mux::with_handlers(vec![Arc::new(StunHandler::server(
                    agent,
                    context.clone(),
                    handler.clone(),
                ))])
            }),
        );

        sessions.serve(socket).await.map_err(Into::into)
    }

    /// Accepts stream connections and serves each on its own task.
    pub async fn serve_tcp(&self, listener: TcpListener) -> Result<(), StunError> {
        let local = listener.local_addr()?;
        log::info!("stun server listening: addr={}", local);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::info!("tcp connection accepted: addr={}", addr);

            let mux = self.build_mux();
            let (read, write) = stream.into_split();
            let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new(write, local, addr));
            let idle_timeout = self.idle_timeout;

            tokio::spawn(async move {
                if let Err(e) = mux.serve_stream(read, transport, idle_timeout).await {
                    log::debug!("tcp connection closed: addr={}, err={}", addr, e);
                } else {
                    log::info!("tcp connection closed: addr={}", addr);
                }
            });
        }
    }
}

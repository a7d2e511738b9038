use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use mux::{Mux, StreamTransport, Transport as MuxTransport};
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

use crate::candidate::{same_foundation, Candidate, CandidateKind, Transport};
use crate::IceError;

/// Computes a candidate's priority; installed to override the default
/// formula of RFC5245 Section 4.1.2.1.
pub type PriorityFn = Box<dyn Fn(&Candidate) -> u32 + Send + Sync>;

/// Agent policy.
#[derive(Default)]
pub struct AgentConfig {
    /// priority override; the default formula applies when absent.
    pub get_priority: Option<PriorityFn>,
    /// whether this agent takes the controlling role.
    pub controlling: bool,
}

/// Gathers and owns the local candidate list.
///
/// The full connectivity-check state machine lives above this layer;
/// the agent provides what it needs: sockets bound per interface
/// address with serve loops attached, foundations assigned, priorities
/// computed, and the SDP attribute forms of everything gathered.
pub struct Agent {
    mux: Arc<Mux>,
    config: AgentConfig,
    component: u16,
    local: RwLock<Vec<Candidate>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            mux: Mux::new(),
            config,
            component: 1,
            local: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// the multiplexer every gathered socket serves; register STUN or
    /// other handlers here before gathering.
    pub fn mux(&self) -> &Arc<Mux> {
        &self.mux
    }

    /// Adds a candidate to the local list, assigning foundation, index
    /// and priority.
    ///
    /// The foundation is inherited from any prior candidate with the
    /// same {type, transport, base IP}; otherwise the list length is
    /// assigned, formatted decimally. Candidates that agree on those
    /// three take the same network path, which is exactly what a
    /// foundation asserts.
    pub fn add_local(&self, mut candidate: Candidate) -> Candidate {
        let mut local = self.local.write();

        if candidate.foundation.is_empty() {
            candidate.foundation = match local.iter().find(|c| same_foundation(c, &candidate)) {
                Some(prior) => prior.foundation.clone(),
                None => local.len().to_string(),
            };
        }

        candidate.index = local.len();
        if candidate.component == 0 {
            candidate.component = self.component;
        }

        candidate.priority = match &self.config.get_priority {
            Some(get_priority) => get_priority(&candidate),
            None => default_priority(&candidate),
        };

        local.push(candidate.clone());
        candidate
    }

    /// snapshot of the local candidate list.
    pub fn local_candidates(&self) -> Vec<Candidate> {
        self.local.read().clone()
    }

    /// Binds a UDP socket on the address, records the host candidate
    /// and attaches the serve loop.
    pub async fn gather_udp(&self, ip: IpAddr) -> Result<Candidate, IceError> {
        let socket = Arc::new(UdpSocket::bind(SocketAddr::new(ip, 0)).await?);
        let addr = socket.local_addr()?;
        let candidate = self.add_local(Candidate::host(addr, Transport::Udp));

        log::debug!("host candidate gathered: addr={}, transport=UDP", addr);

        let mux = self.mux.clone();
        self.tasks.lock().push(tokio::spawn(async move {
            if let Err(e) = mux.serve_packet(socket, None).await {
                log::debug!("candidate serve loop ended: addr={}, err={}", addr, e);
            }
        }));

        Ok(candidate)
    }

    /// Binds a TCP listener on the address, records the host candidate
    /// and serves accepted connections on the shared chain.
    pub async fn gather_tcp(&self, ip: IpAddr) -> Result<Candidate, IceError> {
        let listener = TcpListener::bind(SocketAddr::new(ip, 0)).await?;
        let addr = listener.local_addr()?;
        let candidate = self.add_local(Candidate::host(addr, Transport::Tcp));

        log::debug!("host candidate gathered: addr={}, transport=TCP", addr);

        let mux = self.mux.clone();
        self.tasks.lock().push(tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let mux = mux.clone();
                tokio::spawn(async move {
                    let Ok(local) = stream.local_addr() else {
                        return;
                    };

                    let (read, write) = stream.into_split();
                    let transport: Arc<dyn MuxTransport> =
                        Arc::new(StreamTransport::new(write, local, peer));

                    if let Err(e) = mux.serve_stream(read, transport, None).await {
                        log::debug!("candidate stream closed: addr={}, err={}", peer, e);
                    }
                });
            }
        }));

        Ok(candidate)
    }

    /// Gathers host candidates for every usable address × transport
    /// combination. Loopback and unspecified addresses are skipped.
    pub async fn gather(
        &self,
        ips: &[IpAddr],
        transports: &[Transport],
    ) -> Result<Vec<Candidate>, IceError> {
        let mut result = Vec::new();

        for ip in ips {
            if ip.is_loopback() || ip.is_unspecified() {
                continue;
            }

            for transport in transports {
                let gathered = match transport {
                    Transport::Udp => self.gather_udp(*ip).await,
                    Transport::Tcp => self.gather_tcp(*ip).await,
                };

                match gathered {
                    Ok(candidate) => result.push(candidate),
                    Err(e) => log::debug!("gather failed: ip={}, err={}", ip, e),
                }
            }
        }

        if result.is_empty() {
            return Err(IceError::NoAddress);
        }

        Ok(result)
    }

    /// records a server-reflexive candidate discovered through a STUN
    /// Binding on `base`.
    pub fn add_server_reflexive(&self, addr: SocketAddr, base: SocketAddr) -> Candidate {
        self.add_local(Candidate {
            kind: CandidateKind::ServerReflexive,
            base: Some(base),
            ..Candidate::host(addr, Transport::Udp)
        })
    }

    /// records a relayed candidate obtained from a TURN allocation.
    pub fn add_relayed(&self, addr: SocketAddr, base: SocketAddr) -> Candidate {
        self.add_local(Candidate {
            kind: CandidateKind::Relay,
            base: Some(base),
            ..Candidate::host(addr, Transport::Udp)
        })
    }

    /// stops every serve loop the agent attached.
    pub fn close(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.close();
    }
}

/// The recommended candidate priority formula.
///
/// `(type preference << 24) | (local preference << 8) | (256 − component)`,
/// with the local preference composed of a direction preference and the
/// candidate's index so that no two candidates of one agent tie.
pub fn default_priority(candidate: &Candidate) -> u32 {
    let direction = match candidate.transport {
        Transport::Udp => 7,
        Transport::Tcp => 5,
    };

    (candidate.kind.preference() << 24)
        | (((direction << 13) | candidate.index as u32) << 8)
        | (256 - candidate.component as u32)
}

/// Candidate-pair priority from the controlling (`g`) and controlled
/// (`d`) candidate priorities, RFC5245 Section 5.7.2.
pub fn pair_priority(g: u32, d: u32) -> u64 {
    let (min, max) = if g < d { (g, d) } else { (d, g) };
    (1u64 << 32) * min as u64 + 2 * max as u64 + u64::from(g > d)
}

/// Best-effort local address discovery for single-homed hosts: a UDP
/// socket "connected" to a public address picks up the IP of the
/// default route without sending a packet. Multi-homed callers should
/// enumerate their interfaces themselves and hand the addresses to
/// [`Agent::gather`].
pub async fn default_local_ip() -> Result<IpAddr, IceError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect("8.8.8.8:80").await?;
    Ok(socket.local_addr()?.ip())
}

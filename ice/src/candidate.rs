use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::IceError;

/// Candidate type, in decreasing order of directness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

impl CandidateKind {
    /// the `typ` token of the SDP attribute.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::PeerReflexive => "prflx",
            Self::Relay => "relay",
        }
    }

    /// recommended type preference of RFC5245 Section 4.1.2.2.
    pub fn preference(&self) -> u32 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay => 0,
        }
    }
}

impl FromStr for CandidateKind {
    type Err = IceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "host" => Self::Host,
            "srflx" => Self::ServerReflexive,
            "prflx" => Self::PeerReflexive,
            "relay" => Self::Relay,
            _ => {
                return Err(IceError::Parse {
                    field: "typ",
                    value: s.to_owned(),
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
        }
    }
}

impl FromStr for Transport {
    type Err = IceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Ok(Self::Udp),
            "TCP" => Ok(Self::Tcp),
            _ => Err(IceError::Parse {
                field: "transport",
                value: s.to_owned(),
            }),
        }
    }
}

/// An ICE candidate: one transport address an agent can be reached at,
/// plus the metadata connectivity checks sort by.
///
/// `params` preserves SDP key/value extensions this implementation does
/// not interpret, in their original order, so a parsed candidate
/// serializes back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// opaque identifier shared by candidates believed to take the
    /// same network path.
    pub foundation: String,
    /// component identifier, 1-based (RTP=1, RTCP=2).
    pub component: u16,
    pub transport: Transport,
    pub priority: u32,
    pub addr: SocketAddr,
    pub kind: CandidateKind,
    /// the address this candidate derives from (reflexive and relayed
    /// candidates only).
    pub base: Option<SocketAddr>,
    /// position within the local candidate list.
    pub index: usize,
    /// unrecognized `<key> <value>` extension pairs, order preserved.
    pub params: Vec<(String, String)>,
}

impl Candidate {
    /// a host candidate for a locally bound socket, ready to hand to
    /// [`Agent::add_local`](crate::Agent::add_local).
    pub fn host(addr: SocketAddr, transport: Transport) -> Self {
        Self {
            foundation: String::new(),
            component: 0,
            transport,
            priority: 0,
            addr,
            kind: CandidateKind::Host,
            base: None,
            index: 0,
            params: Vec::new(),
        }
    }

    /// the IP that decides foundation sharing: the base address where
    /// one exists, the candidate address itself otherwise.
    pub fn base_ip(&self) -> IpAddr {
        self.base.unwrap_or(self.addr).ip()
    }
}

/// Two candidates share a foundation when type, transport and base IP
/// all agree.
pub(crate) fn same_foundation(a: &Candidate, b: &Candidate) -> bool {
    a.kind == b.kind && a.transport == b.transport && a.base_ip() == b.base_ip()
}

impl fmt::Display for Candidate {
    /// serialize as the SDP `candidate` attribute value of RFC5245
    /// Section 15.1.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use ice::Candidate;
    ///
    /// let value = "candidate:0 1 UDP 2130706432 192.0.2.1 54400 typ host";
    /// let candidate: Candidate = value.parse().unwrap();
    /// assert_eq!(candidate.to_string(), value);
    /// ```
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport.label(),
            self.priority,
            self.addr.ip(),
            self.addr.port(),
            self.kind.label(),
        )?;

        if let Some(base) = self.base {
            write!(f, " raddr {} rport {}", base.ip(), base.port())?;
        }

        for (key, value) in &self.params {
            write!(f, " {} {}", key, value)?;
        }

        Ok(())
    }
}

impl FromStr for Candidate {
    type Err = IceError;

    /// parse an SDP `candidate` attribute value, with or without the
    /// `candidate:` prefix.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use ice::{Candidate, CandidateKind};
    ///
    /// let candidate: Candidate =
    ///     "candidate:1 1 UDP 1694498815 192.0.2.3 45664 typ srflx raddr 10.0.1.1 rport 8998 generation 0"
    ///         .parse()
    ///         .unwrap();
    ///
    /// assert_eq!(candidate.foundation, "1");
    /// assert_eq!(candidate.kind, CandidateKind::ServerReflexive);
    /// assert_eq!(candidate.addr, "192.0.2.3:45664".parse().unwrap());
    /// assert_eq!(candidate.base, Some("10.0.1.1:8998".parse().unwrap()));
    /// assert_eq!(candidate.params, vec![("generation".into(), "0".into())]);
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("candidate:").unwrap_or(s);
        let fields: Vec<&str> = s.split_ascii_whitespace().collect();
        if fields.len() < 8 {
            return Err(IceError::Parse {
                field: "candidate",
                value: s.to_owned(),
            });
        }

        let parse_ip = |v: &str, field: &'static str| -> Result<IpAddr, IceError> {
            v.parse().map_err(|_| IceError::Parse {
                field,
                value: v.to_owned(),
            })
        };

        let parse_port = |v: &str, field: &'static str| -> Result<u16, IceError> {
            v.parse().map_err(|_| IceError::Parse {
                field,
                value: v.to_owned(),
            })
        };

        let component = fields[1].parse().map_err(|_| IceError::Parse {
            field: "component",
            value: fields[1].to_owned(),
        })?;

        let priority = fields[3].parse().map_err(|_| IceError::Parse {
            field: "priority",
            value: fields[3].to_owned(),
        })?;

        let ip = parse_ip(fields[4], "ip")?;
        let port = parse_port(fields[5], "port")?;

        let mut kind = None;
        let mut raddr = None;
        let mut rport = None;
        let mut params = Vec::new();

        let mut rest = &fields[6..];
        while rest.len() >= 2 {
            match rest[0] {
                "typ" => kind = Some(rest[1].parse()?),
                "raddr" => raddr = Some(parse_ip(rest[1], "raddr")?),
                "rport" => rport = Some(parse_port(rest[1], "rport")?),
                key => params.push((key.to_owned(), rest[1].to_owned())),
            }

            rest = &rest[2..];
        }

        let kind = kind.ok_or(IceError::Parse {
            field: "typ",
            value: s.to_owned(),
        })?;

        let base = match (raddr, rport) {
            (Some(ip), Some(port)) => Some(SocketAddr::new(ip, port)),
            _ => None,
        };

        Ok(Self {
            foundation: fields[0].to_owned(),
            component,
            transport: fields[2].parse()?,
            priority,
            addr: SocketAddr::new(ip, port),
            kind,
            base,
            index: 0,
            params,
        })
    }
}

use std::fmt;
use std::str::FromStr;

use crate::attribute::Protocol;
use crate::StunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Stun,
    Stuns,
    Turn,
    Turns,
}

impl Scheme {
    /// 3478 for the cleartext schemes, 5478 for the TLS ones.
    pub fn default_port(&self) -> u16 {
        if self.is_secure() {
            5478
        } else {
            3478
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Stuns | Self::Turns)
    }
}

/// A `stun:`/`stuns:`/`turn:`/`turns:` URI.
///
/// The authority is `host[:port]` with IPv6 literals in brackets; the
/// `turn:` schemes accept a `?transport=udp|tcp` parameter. DNS
/// resolution is the caller's concern.
///
/// # Unit Test
///
/// ```
/// use stun::attribute::Protocol;
/// use stun::{Scheme, Uri};
///
/// let uri: Uri = "stun:example.org".parse().unwrap();
/// assert_eq!(uri.scheme, Scheme::Stun);
/// assert_eq!(uri.host, "example.org");
/// assert_eq!(uri.port, 3478);
/// assert_eq!(uri.transport, None);
///
/// let uri: Uri = "turns:[2001:db8::1]:887?transport=tcp".parse().unwrap();
/// assert_eq!(uri.scheme, Scheme::Turns);
/// assert_eq!(uri.host, "2001:db8::1");
/// assert_eq!(uri.port, 887);
/// assert_eq!(uri.transport, Some(Protocol::Tcp));
///
/// assert!("http://example.org".parse::<Uri>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub transport: Option<Protocol>,
}

impl FromStr for Uri {
    type Err = StunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || StunError::UnsupportedUri(s.to_owned());

        let (scheme, rest) = s.split_once(':').ok_or_else(unsupported)?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "stun" => Scheme::Stun,
            "stuns" => Scheme::Stuns,
            "turn" => Scheme::Turn,
            "turns" => Scheme::Turns,
            _ => return Err(unsupported()),
        };

        // the schemes are opaque ("stun:host"), but the authority form
        // shows up in the wild often enough to tolerate.
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };

        let mut transport = None;
        if let Some(query) = query {
            for param in query.split('&') {
                if let Some(value) = param.strip_prefix("transport=") {
                    transport = Some(match value {
                        "udp" => Protocol::Udp,
                        "tcp" => Protocol::Tcp,
                        _ => return Err(unsupported()),
                    });
                }
            }
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(unsupported)?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port.parse().map_err(|_| unsupported())?),
                None => None,
            };

            (host.to_owned(), port)
        } else if let Some((host, port)) = authority.rsplit_once(':') {
            (
                host.to_owned(),
                Some(port.parse().map_err(|_| unsupported())?),
            )
        } else {
            (authority.to_owned(), None)
        };

        if host.is_empty() {
            return Err(unsupported());
        }

        Ok(Self {
            port: port.unwrap_or_else(|| scheme.default_port()),
            scheme,
            host,
            transport,
        })
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Stun => "stun",
            Scheme::Stuns => "stuns",
            Scheme::Turn => "turn",
            Scheme::Turns => "turns",
        };

        if self.host.contains(':') {
            write!(f, "{}:[{}]:{}", scheme, self.host, self.port)?;
        } else {
            write!(f, "{}:{}:{}", scheme, self.host, self.port)?;
        }

        if let Some(transport) = self.transport {
            let transport = if transport == Protocol::Tcp { "tcp" } else { "udp" };
            write!(f, "?transport={}", transport)?;
        }

        Ok(())
    }
}

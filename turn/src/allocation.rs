use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ahash::AHashMap;

/// A live relay allocation.
///
/// The server owns the authoritative state; this is the client's
/// mirror of it, advanced by Allocate, Refresh and ChannelBind
/// responses. `expiry` is when the server will tear the allocation
/// down absent a refresh; the maintenance task refreshes ahead of it.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// the relayed transport address peers send to.
    pub relayed: SocketAddr,
    /// our server-reflexive address as seen by the TURN server.
    pub mapped: Option<SocketAddr>,
    /// lifetime granted by the last Allocate/Refresh response.
    pub lifetime: Duration,
    /// wall-clock expiry of the allocation.
    pub expiry: Instant,
    /// peers with installed permissions, re-installed on a cadence
    /// faster than the server's 5-minute permission expiry.
    pub permissions: Vec<SocketAddr>,
    /// channel number to peer bindings; they expire with the
    /// allocation.
    pub channels: AHashMap<u16, SocketAddr>,
}

impl Allocation {
    pub fn new(relayed: SocketAddr, mapped: Option<SocketAddr>, lifetime: Duration) -> Self {
        Self {
            relayed,
            mapped,
            lifetime,
            expiry: Instant::now() + lifetime,
            permissions: Vec::new(),
            channels: AHashMap::new(),
        }
    }

    /// extend the allocation after a Refresh response.
    pub fn renew(&mut self, lifetime: Duration) {
        self.lifetime = lifetime;
        self.expiry = Instant::now() + lifetime;
    }

    /// record peers whose permissions were installed, without
    /// duplicates.
    pub fn permit(&mut self, peers: &[SocketAddr]) {
        for peer in peers {
            if !self.permissions.contains(peer) {
                self.permissions.push(*peer);
            }
        }
    }

    /// record a channel binding after a ChannelBind response.
    pub fn bind(&mut self, number: u16, peer: SocketAddr) {
        self.channels.insert(number, peer);
    }

    /// the channel number bound to a peer, if any.
    pub fn channel_of(&self, peer: &SocketAddr) -> Option<u16> {
        self.channels
            .iter()
            .find(|(_, bound)| *bound == peer)
            .map(|(number, _)| *number)
    }
}

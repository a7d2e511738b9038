//! ## Traversal Using Relays around NAT (TURN)
//!
//! [RFC5766]: https://tools.ietf.org/html/rfc5766
//!
//! TURN ([RFC5766]) extends STUN with server-side relaying: a client
//! behind a hostile NAT allocates a public relayed transport address
//! on the server and exchanges packets with peers through it. This
//! crate is the client side of that protocol: the allocation lifecycle
//! (Allocate, Refresh, and their long-term-credential challenge
//! dance), permission installation, and the 4-byte channel-data
//! framing that replaces the per-message STUN overhead once a channel
//! is bound:
//!
//! ```text
//!  client ── Allocate ──▶ server          peer
//!    │◀─ 401 realm/nonce ──│                │
//!    │── Allocate + auth ─▶│                │
//!    │◀─ relayed address ──│                │
//!    │── ChannelBind ─────▶│                │
//!    │══ channel data ════▶│── datagram ──▶ │
//! ```

mod allocation;
mod channel;
mod client;

pub use allocation::Allocation;
pub use channel::Channel;
pub use client::{AllocateOptions, Client};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurnError {
    /// 437: the server lost (or never had) the allocation. Fatal for
    /// the connection; the local allocation state is discarded.
    #[error("allocation mismatch")]
    AllocationMismatch,
    /// 403: the permission or channel cannot be installed for that
    /// peer. The affected channel closes; the allocation continues.
    #[error("forbidden")]
    Forbidden,
    /// a success response was missing a required attribute.
    #[error("bad response")]
    BadResponse,
    /// any other TURN error response, code and reason verbatim.
    #[error("error response {code}: {reason}")]
    ErrorResponse { code: u16, reason: String },
    #[error(transparent)]
    Stun(#[from] stun::StunError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

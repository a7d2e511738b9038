//! ## Interactive Connectivity Establishment (ICE)
//!
//! [RFC5245]: https://tools.ietf.org/html/rfc5245
//!
//! ICE ([RFC5245]) uses STUN and TURN to find the best pair of
//! transport addresses between two NAT'd agents. This crate carries
//! the candidate side of the framework: gathering host candidates over
//! the local interfaces, assigning foundations and priorities, and the
//! SDP `candidate` attribute grammar. The connectivity-check state
//! machine that consumes these candidates is built on top of it.

mod agent;
mod candidate;

pub use agent::{
    default_local_ip, default_priority, pair_priority, Agent, AgentConfig, PriorityFn,
};
pub use candidate::{Candidate, CandidateKind, Transport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IceError {
    #[error("invalid {field}: {value}")]
    Parse { field: &'static str, value: String },
    #[error("no network address is available")]
    NoAddress,
    #[error(transparent)]
    Stun(#[from] stun::StunError),
    #[error(transparent)]
    Turn(#[from] turn::TurnError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! ## Session Traversal Utilities for NAT (STUN)
//!
//! [RFC5389]: https://tools.ietf.org/html/rfc5389
//! [RFC5766]: https://tools.ietf.org/html/rfc5766
//!
//! STUN ([RFC5389]) is a request/response protocol for learning the
//! outside view of a NAT'd socket; TURN ([RFC5766]) extends it with
//! server-side relaying. This crate carries the wire codec, the
//! transaction engine that correlates responses to requests by their
//! 96-bit identifiers, and the client/server scaffolding that ties the
//! two to a connection multiplexer.
//!
//! ### STUN Message Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0 0|     STUN Message Type     |         Message Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Magic Cookie                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! |                     Transaction ID (96 bits)                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ### STUN Attributes
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Type                  |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Value (variable)                ....
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

pub mod attribute;
pub mod util;

mod agent;
mod channel;
mod client;
mod error;
mod handler;
mod message;
mod method;
mod server;
mod uri;

pub use agent::{long_term_auth_key, short_term_auth_key, Agent, AuthKeyFn, Config};
pub use channel::ChannelData;
pub use client::{discover, Conn};
pub use error::StunError;
pub use handler::{MessageHandler, ServerContext, StunHandler};
pub use message::{MessageReader, MessageWriter};
pub use method::{Kind, Method};
pub use server::Server;
pub use uri::{Scheme, Uri};

/// the fixed magic cookie at bytes 4..8 of every STUN message.
pub const COOKIE: [u8; 4] = 0x2112A442u32.to_be_bytes();

/// A payload framed off a transport: either a STUN message or a TURN
/// ChannelData frame. The top two bits of the first byte tell them
/// apart (`00` versus `01`).
pub enum Payload<'a, 'b> {
    Message(MessageReader<'a, 'b>),
    ChannelData(ChannelData<'a>),
}

/// Reusable decoder: owns the attribute list so the allocation
/// amortizes across messages.
pub struct Decoder<'a> {
    attributes: Vec<(u16, &'a [u8])>,
}

impl<'a> Decoder<'a> {
    pub fn new() -> Self {
        Self {
            attributes: Vec::with_capacity(10),
        }
    }

    /// # Unit Test
    ///
    /// ```
    /// use stun::attribute::UserName;
    /// use stun::{Decoder, Payload};
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x0c, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b, 0x00, 0x06,
    ///     0x00, 0x05, 0x70, 0x61, 0x6e, 0x64, 0x61, 0x00, 0x00, 0x00,
    /// ];
    ///
    /// let mut decoder = Decoder::new();
    /// let payload = decoder.decode(&buffer).unwrap();
    /// if let Payload::Message(message) = payload {
    ///     assert_eq!(message.get::<UserName>(), Some("panda"));
    /// } else {
    ///     panic!("expected a message");
    /// }
    /// ```
    pub fn decode(&mut self, buf: &'a [u8]) -> Result<Payload<'a, '_>, StunError> {
        if buf.len() < 4 {
            return Err(StunError::Format);
        }

        Ok(if buf[0] >> 6 == 1 {
            Payload::ChannelData(ChannelData::try_from(buf)?)
        } else {
            Payload::Message(MessageReader::decode(buf, &mut self.attributes)?)
        })
    }
}

impl Default for Decoder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

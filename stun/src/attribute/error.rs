use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;

use crate::{util, StunError};

/// STUN and TURN error response codes with their recommended reason
/// phrases:
///
/// * 300 Try Alternate: the client should contact an alternate server.
/// * 400 Bad Request: the request was malformed.
/// * 401 Unauthorized: the request did not contain the correct
///   credentials; retry with proper credentials.
/// * 403 Forbidden (TURN): the request was valid but cannot be
///   performed due to administrative or similar restrictions.
/// * 420 Unknown Attribute: the server did not understand a
///   comprehension-required attribute in the request.
/// * 437 Allocation Mismatch (TURN): the request requires an
///   allocation to be in place and there is none, or vice versa.
/// * 438 Stale Nonce: retry with the NONCE provided in this response.
/// * 441 Wrong Credentials (TURN): a valid credential that does not
///   match the one used to create the allocation.
/// * 442 Unsupported Transport Protocol (TURN).
/// * 446 Connection Already Exists (RFC6062).
/// * 447 Connection Timeout or Failure (RFC6062).
/// * 486 Allocation Quota Reached (TURN).
/// * 487 Role Conflict (ICE): the ICE roles must swap.
/// * 500 Server Error: temporary; try again.
/// * 508 Insufficient Capacity (TURN).
#[repr(u16)]
#[derive(TryFromPrimitive, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Kind {
    TryAlternate = 300,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    UnknownAttribute = 420,
    AllocationMismatch = 437,
    StaleNonce = 438,
    WrongCredentials = 441,
    UnsupportedTransportAddress = 442,
    ConnectionAlreadyExists = 446,
    ConnectionTimeoutOrFailure = 447,
    AllocationQuotaReached = 486,
    RoleConflict = 487,
    ServerError = 500,
    InsufficientCapacity = 508,
}

/// The ERROR-CODE attribute: a numeric code in the range 300..=699 plus
/// a UTF-8 reason phrase.
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Reserved, should be 0         |Class|     Number    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Reason Phrase (variable)                                ..
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The hundreds digit travels in the Class octet and the code modulo
/// 100 in the Number octet; `code` here is the assembled numeric value.
#[derive(Clone, Debug)]
pub struct Error<'a> {
    pub code: u16,
    pub reason: &'a str,
}

impl Error<'_> {
    /// create an error from a known error kind.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use stun::attribute::{ErrKind, Error};
    ///
    /// let error = Error::from(ErrKind::TryAlternate);
    /// assert_eq!(error.code, 300);
    /// assert_eq!(error.reason, "Try Alternate");
    /// ```
    pub fn from(kind: Kind) -> Self {
        Self {
            code: kind as u16,
            reason: kind.into(),
        }
    }

    /// encode the error code as an attribute payload.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use stun::attribute::{ErrKind, Error};
    ///
    /// let buffer = [
    ///     0x00u8, 0x00, 0x03, 0x00, 0x54, 0x72, 0x79, 0x20, 0x41, 0x6c, 0x74,
    ///     0x65, 0x72, 0x6e, 0x61, 0x74, 0x65,
    /// ];
    ///
    /// let mut buf = BytesMut::with_capacity(32);
    /// Error::from(ErrKind::TryAlternate).encode(&mut buf);
    /// assert_eq!(&buf[..], &buffer);
    /// ```
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(0x0000);
        buf.put_u8((self.code / 100) as u8);
        buf.put_u8((self.code % 100) as u8);
        buf.put(self.reason.as_bytes());
    }
}

impl<'a> TryFrom<&'a [u8]> for Error<'a> {
    type Error = StunError;

    /// # Unit Test
    ///
    /// ```
    /// use stun::attribute::Error;
    ///
    /// let buffer = [
    ///     0x00u8, 0x00, 0x03, 0x00, 0x54, 0x72, 0x79, 0x20, 0x41, 0x6c, 0x74,
    ///     0x65, 0x72, 0x6e, 0x61, 0x74, 0x65,
    /// ];
    ///
    /// let error = Error::try_from(&buffer[..]).unwrap();
    /// assert_eq!(error.code, 300);
    /// assert_eq!(error.reason, "Try Alternate");
    /// ```
    fn try_from(packet: &'a [u8]) -> Result<Self, StunError> {
        if packet.len() < 4 || util::as_u16(&packet[..2]) != 0x0000 {
            return Err(StunError::Format);
        }

        Ok(Self {
            code: packet[2] as u16 * 100 + packet[3] as u16,
            reason: std::str::from_utf8(&packet[4..])?,
        })
    }
}

impl From<Kind> for &'static str {
    #[rustfmt::skip]
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::TryAlternate => "Try Alternate",
            Kind::BadRequest => "Bad Request",
            Kind::Unauthorized => "Unauthorized",
            Kind::Forbidden => "Forbidden",
            Kind::UnknownAttribute => "Unknown Attribute",
            Kind::AllocationMismatch => "Allocation Mismatch",
            Kind::StaleNonce => "Stale Nonce",
            Kind::WrongCredentials => "Wrong Credentials",
            Kind::UnsupportedTransportAddress => "Unsupported Transport Address",
            Kind::ConnectionAlreadyExists => "Connection Already Exists",
            Kind::ConnectionTimeoutOrFailure => "Connection Timeout or Failure",
            Kind::AllocationQuotaReached => "Allocation Quota Reached",
            Kind::RoleConflict => "Role Conflict",
            Kind::ServerError => "Server Error",
            Kind::InsufficientCapacity => "Insufficient Capacity",
        }
    }
}

impl Eq for Error<'_> {}
impl PartialEq for Error<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

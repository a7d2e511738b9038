pub mod address;
mod error;

use std::net::SocketAddr;

use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;

pub use address::Addr;
pub use error::{Error, Kind as ErrKind};

use crate::StunError;

/// attribute type registry.
///
/// Types below 0x8000 are comprehension-required: a decoder that does
/// not understand one must reject the message with a 420 carrying the
/// unknown types. Types at or above 0x8000 are comprehension-optional
/// and are skipped when unknown.
#[repr(u16)]
#[derive(TryFromPrimitive, PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum AttrKind {
    MappedAddress = 0x0001,
    ChangeRequest = 0x0003,
    UserName = 0x0006,
    Password = 0x0007,
    MessageIntegrity = 0x0008,
    ErrorCode = 0x0009,
    UnknownAttributes = 0x000A,
    ChannelNumber = 0x000C,
    Lifetime = 0x000D,
    XorPeerAddress = 0x0012,
    Data = 0x0013,
    Realm = 0x0014,
    Nonce = 0x0015,
    XorRelayedAddress = 0x0016,
    EvenPort = 0x0018,
    RequestedTransport = 0x0019,
    DontFragment = 0x001A,
    XorMappedAddress = 0x0020,
    ReservationToken = 0x0022,
    Priority = 0x0024,
    UseCandidate = 0x0025,
    Padding = 0x0026,
    ResponsePort = 0x0027,
    Software = 0x8022,
    AlternateServer = 0x8023,
    Fingerprint = 0x8028,
    IceControlled = 0x8029,
    IceControlling = 0x802A,
    ResponseOrigin = 0x802B,
    OtherAddress = 0x802C,
}

/// Transport protocol codepoints for REQUESTED-TRANSPORT, matching the
/// IPv4 protocol numbers.
#[repr(u8)]
#[derive(TryFromPrimitive, PartialEq, Eq, Debug, Clone, Copy)]
pub enum Protocol {
    Tcp = 6,
    Udp = 17,
}

/// A typed attribute codec.
///
/// Each attribute type implements its own payload encoding; the message
/// writer and reader handle the TLV framing and padding around it. The
/// transaction token is threaded through for the XOR-obfuscated address
/// attributes, which fold it into their payload.
pub trait Property<'a> {
    type Inner;

    /// the attribute type this codec serves.
    fn kind() -> AttrKind;

    /// write the attribute payload into the buffer.
    fn into(value: Self::Inner, buf: &mut BytesMut, token: &[u8]);

    /// read the attribute payload.
    fn try_from(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Inner, StunError>;
}

/// The USERNAME attribute identifies the username and password
/// combination used in the message-integrity check. Its value is a
/// UTF-8-encoded sequence of fewer than 509 bytes which MUST have been
/// processed using the OpaqueString profile.
pub struct UserName;
impl<'a> Property<'a> for UserName {
    type Inner = &'a str;

    fn kind() -> AttrKind {
        AttrKind::UserName
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The REALM attribute. Its presence in a request indicates that
/// long-term credentials are being used for authentication; presence in
/// certain error responses indicates the server wishes the client to
/// use a long-term credential in that realm.
pub struct Realm;
impl<'a> Property<'a> for Realm {
    type Inner = &'a str;

    fn kind() -> AttrKind {
        AttrKind::Realm
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The NONCE attribute, as issued by servers in 401 and 438 responses
/// and echoed by clients on the authenticated retry.
pub struct Nonce;
impl<'a> Property<'a> for Nonce {
    type Inner = &'a str;

    fn kind() -> AttrKind {
        AttrKind::Nonce
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The SOFTWARE attribute: a textual description of the sending agent,
/// for diagnostics only.
pub struct Software;
impl<'a> Property<'a> for Software {
    type Inner = &'a str;

    fn kind() -> AttrKind {
        AttrKind::Software
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The PASSWORD attribute of classic STUN (RFC3489); kept for
/// interoperability with shared-secret responses.
pub struct Password;
impl<'a> Property<'a> for Password {
    type Inner = &'a str;

    fn kind() -> AttrKind {
        AttrKind::Password
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The DATA attribute carries the application payload of Send and Data
/// indications.
pub struct Data;
impl<'a> Property<'a> for Data {
    type Inner = &'a [u8];

    fn kind() -> AttrKind {
        AttrKind::Data
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(buf)
    }
}

/// The PADDING attribute of RFC5780; opaque filler used by NAT
/// behavior discovery probes.
pub struct Padding;
impl<'a> Property<'a> for Padding {
    type Inner = &'a [u8];

    fn kind() -> AttrKind {
        AttrKind::Padding
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(buf)
    }
}

/// The RESERVATION-TOKEN attribute: an 8-byte token identifying a
/// relayed transport address the server is holding for the client.
pub struct ReservationToken;
impl<'a> Property<'a> for ReservationToken {
    type Inner = &'a [u8];

    fn kind() -> AttrKind {
        AttrKind::ReservationToken
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        if buf.len() != 8 {
            return Err(StunError::Format);
        }

        Ok(buf)
    }
}

/// The MAPPED-ADDRESS attribute: the reflexive transport address in
/// plain binary form, emitted by servers only for backwards
/// compatibility with RFC3489 clients.
pub struct MappedAddress;
impl<'a> Property<'a> for MappedAddress {
    type Inner = SocketAddr;

    fn kind() -> AttrKind {
        AttrKind::MappedAddress
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, buf, false);
    }

    fn try_from(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Inner, StunError> {
        Addr::decode(buf, token, false)
    }
}

/// The XOR-MAPPED-ADDRESS attribute: identical to MAPPED-ADDRESS
/// except that the address is obfuscated through the XOR function, so
/// address-rewriting NATs cannot find and mangle it.
pub struct XorMappedAddress;
impl<'a> Property<'a> for XorMappedAddress {
    type Inner = SocketAddr;

    fn kind() -> AttrKind {
        AttrKind::XorMappedAddress
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, buf, true);
    }

    fn try_from(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Inner, StunError> {
        Addr::decode(buf, token, true)
    }
}

/// The XOR-PEER-ADDRESS attribute: the peer a TURN permission or
/// channel concerns, XOR-obfuscated like XOR-MAPPED-ADDRESS.
pub struct XorPeerAddress;
impl<'a> Property<'a> for XorPeerAddress {
    type Inner = SocketAddr;

    fn kind() -> AttrKind {
        AttrKind::XorPeerAddress
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, buf, true);
    }

    fn try_from(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Inner, StunError> {
        Addr::decode(buf, token, true)
    }
}

/// The XOR-RELAYED-ADDRESS attribute: the relayed transport address a
/// TURN server allocated on the client's behalf.
pub struct XorRelayedAddress;
impl<'a> Property<'a> for XorRelayedAddress {
    type Inner = SocketAddr;

    fn kind() -> AttrKind {
        AttrKind::XorRelayedAddress
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, buf, true);
    }

    fn try_from(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Inner, StunError> {
        Addr::decode(buf, token, true)
    }
}

/// The ALTERNATE-SERVER attribute accompanying a 300 Try Alternate.
pub struct AlternateServer;
impl<'a> Property<'a> for AlternateServer {
    type Inner = SocketAddr;

    fn kind() -> AttrKind {
        AttrKind::AlternateServer
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, buf, false);
    }

    fn try_from(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Inner, StunError> {
        Addr::decode(buf, token, false)
    }
}

/// The RESPONSE-ORIGIN attribute of RFC5780: the transport address the
/// response was sent from.
pub struct ResponseOrigin;
impl<'a> Property<'a> for ResponseOrigin {
    type Inner = SocketAddr;

    fn kind() -> AttrKind {
        AttrKind::ResponseOrigin
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, buf, false);
    }

    fn try_from(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Inner, StunError> {
        Addr::decode(buf, token, false)
    }
}

/// The OTHER-ADDRESS attribute of RFC5780: the alternate address and
/// port a NAT-behavior-discovery server can answer from.
pub struct OtherAddress;
impl<'a> Property<'a> for OtherAddress {
    type Inner = SocketAddr;

    fn kind() -> AttrKind {
        AttrKind::OtherAddress
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, buf, false);
    }

    fn try_from(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Inner, StunError> {
        Addr::decode(buf, token, false)
    }
}

/// The PRIORITY attribute of ICE connectivity checks.
pub struct Priority;
impl<'a> Property<'a> for Priority {
    type Inner = u32;

    fn kind() -> AttrKind {
        AttrKind::Priority
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u32(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        decode_u32(buf)
    }
}

/// The CHANGE-REQUEST attribute of RFC5780 NAT behavior discovery.
pub struct ChangeRequest;
impl<'a> Property<'a> for ChangeRequest {
    type Inner = u32;

    fn kind() -> AttrKind {
        AttrKind::ChangeRequest
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u32(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        decode_u32(buf)
    }
}

/// The LIFETIME attribute: seconds an allocation will stay alive
/// without a refresh. Zero in a Refresh request destroys the
/// allocation.
pub struct Lifetime;
impl<'a> Property<'a> for Lifetime {
    type Inner = u32;

    fn kind() -> AttrKind {
        AttrKind::Lifetime
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u32(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        decode_u32(buf)
    }
}

/// The CHANNEL-NUMBER attribute. The number occupies the first 16 bits
/// of the payload; the remaining 16 are reserved and zero on the wire.
pub struct ChannelNumber;
impl<'a> Property<'a> for ChannelNumber {
    type Inner = u16;

    fn kind() -> AttrKind {
        AttrKind::ChannelNumber
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u16(value);
        buf.put_u16(0);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        if buf.len() < 2 {
            return Err(StunError::Format);
        }

        Ok(crate::util::as_u16(buf))
    }
}

/// The USE-CANDIDATE flag of ICE nomination; zero-length.
pub struct UseCandidate;
impl<'a> Property<'a> for UseCandidate {
    type Inner = ();

    fn kind() -> AttrKind {
        AttrKind::UseCandidate
    }

    fn into(_: Self::Inner, _: &mut BytesMut, _: &[u8]) {}

    fn try_from(_: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(())
    }
}

/// The DONT-FRAGMENT flag: asks the TURN server to set DF on relayed
/// datagrams; zero-length.
pub struct DontFragment;
impl<'a> Property<'a> for DontFragment {
    type Inner = ();

    fn kind() -> AttrKind {
        AttrKind::DontFragment
    }

    fn into(_: Self::Inner, _: &mut BytesMut, _: &[u8]) {}

    fn try_from(_: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(())
    }
}

/// The ICE-CONTROLLED attribute: the agent believes it holds the
/// controlled role; the value is the 64-bit role-conflict tie-breaker.
pub struct IceControlled;
impl<'a> Property<'a> for IceControlled {
    type Inner = u64;

    fn kind() -> AttrKind {
        AttrKind::IceControlled
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u64(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        decode_u64(buf)
    }
}

/// The ICE-CONTROLLING attribute; tie-breaker as in ICE-CONTROLLED.
pub struct IceControlling;
impl<'a> Property<'a> for IceControlling {
    type Inner = u64;

    fn kind() -> AttrKind {
        AttrKind::IceControlling
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u64(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        decode_u64(buf)
    }
}

/// The EVEN-PORT attribute: the high bit of its single octet asks the
/// server to reserve the next higher port too.
pub struct EvenPort;
impl<'a> Property<'a> for EvenPort {
    type Inner = bool;

    fn kind() -> AttrKind {
        AttrKind::EvenPort
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u8(if value { 0x80 } else { 0x00 });
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        match buf.first() {
            Some(bits) => Ok(bits & 0x80 != 0),
            None => Err(StunError::Format),
        }
    }
}

/// The REQUESTED-TRANSPORT attribute: the protocol between the TURN
/// server and the peer. The protocol number occupies the first octet;
/// the other three are reserved.
pub struct RequestedTransport;
impl<'a> Property<'a> for RequestedTransport {
    type Inner = Protocol;

    fn kind() -> AttrKind {
        AttrKind::RequestedTransport
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u8(value as u8);
        buf.put(&[0u8; 3][..]);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        match buf.first() {
            Some(proto) => Protocol::try_from(*proto).map_err(|_| StunError::Format),
            None => Err(StunError::Format),
        }
    }
}

/// The ERROR-CODE attribute; see [`Error`].
pub struct ErrorCode;
impl<'a> Property<'a> for ErrorCode {
    type Inner = Error<'a>;

    fn kind() -> AttrKind {
        AttrKind::ErrorCode
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        value.encode(buf);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Error::try_from(buf)
    }
}

/// The UNKNOWN-ATTRIBUTES attribute of a 420 response: the list of
/// comprehension-required types the server did not understand.
pub struct UnknownAttributes;
impl<'a> Property<'a> for UnknownAttributes {
    type Inner = Vec<u16>;

    fn kind() -> AttrKind {
        AttrKind::UnknownAttributes
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        for kind in value {
            buf.put_u16(kind);
        }
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        Ok(buf.chunks_exact(2).map(crate::util::as_u16).collect())
    }
}

/// The raw 20-byte HMAC-SHA1 digest of MESSAGE-INTEGRITY. Emitted by
/// the message writer as a trailer, never appended directly; reading it
/// through `get` is for inspection, verification goes through
/// [`MessageReader::integrity`](crate::MessageReader::integrity).
pub struct MessageIntegrity;
impl<'a> Property<'a> for MessageIntegrity {
    type Inner = &'a [u8];

    fn kind() -> AttrKind {
        AttrKind::MessageIntegrity
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        if buf.len() != 20 {
            return Err(StunError::Format);
        }

        Ok(buf)
    }
}

/// The FINGERPRINT CRC-32 value. Emitted by the message writer as the
/// final trailer; verified during decode.
pub struct Fingerprint;
impl<'a> Property<'a> for Fingerprint {
    type Inner = u32;

    fn kind() -> AttrKind {
        AttrKind::Fingerprint
    }

    fn into(value: Self::Inner, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u32(value);
    }

    fn try_from(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Inner, StunError> {
        decode_u32(buf)
    }
}

fn decode_u32(buf: &[u8]) -> Result<u32, StunError> {
    if buf.len() < 4 {
        return Err(StunError::Format);
    }

    Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

fn decode_u64(buf: &[u8]) -> Result<u64, StunError> {
    if buf.len() < 8 {
        return Err(StunError::Format);
    }

    let bytes: [u8; 8] = buf[..8].try_into().expect("length checked");
    Ok(u64::from_be_bytes(bytes))
}

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, BytesMut};

use crate::{StunError, COOKIE};

pub const FAMILY_IPV4: u8 = 0x01;
pub const FAMILY_IPV6: u8 = 0x02;

/// Transport address payload codec, shared by every address-valued
/// attribute.
///
/// The plain form is an 8-bit family and a 16-bit port followed by the
/// raw 32- or 128-bit address, all in network byte order:
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |0 0 0 0 0 0 0 0|    Family     |           Port                |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// |                 Address (32 bits or 128 bits)                 |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The XOR form obfuscates the port against the most significant 16
/// bits of the magic cookie and each address byte against the
/// corresponding byte of the 128-bit transaction field, which is the
/// magic cookie followed by the 96-bit transaction identifier. NATs
/// that rewrite binary payloads containing their own public address
/// cannot find it in the XOR form, which is why XOR-MAPPED-ADDRESS
/// exists at all.
pub struct Addr;

impl Addr {
    /// encode a SocketAddr into an attribute payload.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use stun::attribute::Addr;
    ///
    /// // XOR-MAPPED-ADDRESS from the RFC5769 IPv4 sample response.
    /// let token: [u8; 12] = [
    ///     0xb7, 0xe7, 0xa7, 0x01, 0xbc, 0x34, 0xd6, 0x86, 0xfa, 0x87, 0xdf, 0xae,
    /// ];
    ///
    /// let source = "192.0.2.1:32853".parse().unwrap();
    ///
    /// let mut buffer = BytesMut::with_capacity(32);
    /// Addr::encode(&source, &token, &mut buffer, true);
    /// assert_eq!(
    ///     &buffer[..],
    ///     &[0x00, 0x01, 0xa1, 0x47, 0xe1, 0x12, 0xa6, 0x43]
    /// );
    ///
    /// let mut buffer = BytesMut::with_capacity(32);
    /// Addr::encode(&source, &token, &mut buffer, false);
    /// assert_eq!(
    ///     &buffer[..],
    ///     &[0x00, 0x01, 0x80, 0x55, 0xc0, 0x00, 0x02, 0x01]
    /// );
    /// ```
    pub fn encode(addr: &SocketAddr, token: &[u8], buf: &mut BytesMut, is_xor: bool) {
        let addr = if is_xor { xor(addr, token) } else { *addr };

        buf.put_u8(0);
        match addr.ip() {
            IpAddr::V4(ip) => {
                buf.put_u8(FAMILY_IPV4);
                buf.put_u16(addr.port());
                buf.put(&ip.octets()[..]);
            }
            IpAddr::V6(ip) => {
                buf.put_u8(FAMILY_IPV6);
                buf.put_u16(addr.port());
                buf.put(&ip.octets()[..]);
            }
        }
    }

    /// decode an attribute payload into a SocketAddr.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use stun::attribute::Addr;
    ///
    /// let token: [u8; 12] = [
    ///     0xb7, 0xe7, 0xa7, 0x01, 0xbc, 0x34, 0xd6, 0x86, 0xfa, 0x87, 0xdf, 0xae,
    /// ];
    ///
    /// let source: std::net::SocketAddr = "192.0.2.1:32853".parse().unwrap();
    ///
    /// let xored = [0x00, 0x01, 0xa1, 0x47, 0xe1, 0x12, 0xa6, 0x43];
    /// assert_eq!(Addr::decode(&xored, &token, true).unwrap(), source);
    ///
    /// let plain = [0x00, 0x01, 0x80, 0x55, 0xc0, 0x00, 0x02, 0x01];
    /// assert_eq!(Addr::decode(&plain, &token, false).unwrap(), source);
    /// ```
    pub fn decode(packet: &[u8], token: &[u8], is_xor: bool) -> Result<SocketAddr, StunError> {
        if packet.len() < 4 {
            return Err(StunError::Format);
        }

        let port = u16::from_be_bytes([packet[2], packet[3]]);
        let ip = match packet[1] {
            FAMILY_IPV4 if packet.len() >= 8 => {
                let octets: [u8; 4] = packet[4..8].try_into().expect("length checked");
                IpAddr::V4(octets.into())
            }
            FAMILY_IPV6 if packet.len() >= 20 => {
                let octets: [u8; 16] = packet[4..20].try_into().expect("length checked");
                IpAddr::V6(octets.into())
            }
            _ => return Err(StunError::Format),
        };

        let addr = SocketAddr::new(ip, port);
        Ok(if is_xor { xor(&addr, token) } else { addr })
    }
}

/// The XOR transform is an involution, so the same function obfuscates
/// and restores.
///
/// # Unit Test
///
/// ```
/// use stun::attribute::address::xor;
/// use std::net::SocketAddr;
///
/// let token: [u8; 12] = [
///     0xb7, 0xe7, 0xa7, 0x01, 0xbc, 0x34, 0xd6, 0x86, 0xfa, 0x87, 0xdf, 0xae,
/// ];
///
/// let source: SocketAddr = "192.0.2.1:32853".parse().unwrap();
/// assert_eq!(xor(&xor(&source, &token), &token), source);
/// ```
pub fn xor(addr: &SocketAddr, token: &[u8]) -> SocketAddr {
    let port = addr.port() ^ (0x2112A442u32 >> 16) as u16;
    let ip = match addr.ip() {
        IpAddr::V4(ip) => xor_v4(ip),
        IpAddr::V6(ip) => xor_v6(ip, token),
    };

    SocketAddr::new(ip, port)
}

fn xor_v4(addr: Ipv4Addr) -> IpAddr {
    let mut octets = addr.octets();
    for (octet, cookie) in octets.iter_mut().zip(COOKIE) {
        *octet ^= cookie;
    }

    IpAddr::V4(octets.into())
}

fn xor_v6(addr: Ipv6Addr, token: &[u8]) -> IpAddr {
    let mut octets = addr.octets();
    for (octet, cookie) in octets.iter_mut().zip(COOKIE) {
        *octet ^= cookie;
    }

    for (octet, tok) in octets.iter_mut().skip(4).zip(token) {
        *octet ^= tok;
    }

    IpAddr::V6(octets.into())
}

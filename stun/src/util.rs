use crc::{Crc, CRC_32_ISO_HDLC};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::Rng;

use crate::StunError;

/// compute padding size.
///
/// RFC5389 stipulates that attribute content on the wire is padded to a
/// multiple of 4; the padding is not part of the TLV length.
///
/// # Test
///
/// ```
/// assert_eq!(stun::util::pad_size(0), 0);
/// assert_eq!(stun::util::pad_size(4), 0);
/// assert_eq!(stun::util::pad_size(5), 3);
/// assert_eq!(stun::util::pad_size(6), 2);
/// ```
#[inline(always)]
pub fn pad_size(size: usize) -> usize {
    let range = size % 4;
    if range == 0 {
        return 0;
    }

    4 - range
}

#[inline(always)]
pub fn as_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// create long term credential.
///
/// > key = MD5(username ":" OpaqueString(realm) ":" OpaqueString(password))
///
/// SASLprep/OpaqueString normalization is the caller's concern; the
/// inputs are digested as given.
///
/// # Test
///
/// ```
/// let key = [
///     0x3eu8, 0x2f, 0x79, 0x1e, 0x1f, 0x14, 0xd1, 0x73, 0xfc, 0x91, 0xff,
///     0x2f, 0x59, 0xb5, 0x0f, 0xd1,
/// ];
///
/// assert_eq!(
///     stun::util::long_term_credential_digest("panda", "raspberry", "panda"),
///     key
/// );
/// ```
pub fn long_term_credential_digest(username: &str, realm: &str, password: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update([username, realm, password].join(":"));
    hasher.finalize().into()
}

/// HMAC SHA1 digest over a list of discontiguous message parts.
///
/// MESSAGE-INTEGRITY is computed against a message whose header length
/// field is rescoped, so callers splice the patched length in as its
/// own part rather than copying the message.
///
/// # Test
///
/// ```
/// let buffer = [
///     0x00u8, 0x03, 0x00, 0x50, 0x21, 0x12, 0xa4, 0x42, 0x64, 0x4f, 0x5a,
///     0x78, 0x6a, 0x56, 0x33, 0x62, 0x4b, 0x52, 0x33, 0x31, 0x00, 0x19, 0x00,
///     0x04, 0x11, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x05, 0x70, 0x61, 0x6e,
///     0x64, 0x61, 0x00, 0x00, 0x00, 0x00, 0x14, 0x00, 0x09, 0x72, 0x61, 0x73,
///     0x70, 0x62, 0x65, 0x72, 0x72, 0x79, 0x00, 0x00, 0x00, 0x00, 0x15, 0x00,
///     0x10, 0x31, 0x63, 0x31, 0x33, 0x64, 0x32, 0x62, 0x32, 0x34, 0x35, 0x62,
///     0x33, 0x61, 0x37, 0x33, 0x34,
/// ];
///
/// let key = [
///     0x3eu8, 0x2f, 0x79, 0x1e, 0x1f, 0x14, 0xd1, 0x73, 0xfc, 0x91, 0xff,
///     0x2f, 0x59, 0xb5, 0x0f, 0xd1,
/// ];
///
/// let sign = [
///     0xd6u8, 0x78, 0x26, 0x99, 0x0e, 0x15, 0x56, 0x15, 0xe5, 0xf4, 0x24,
///     0x74, 0xe2, 0x3c, 0x26, 0xc5, 0xb1, 0x03, 0xb2, 0x6d,
/// ];
///
/// assert_eq!(stun::util::hmac_sha1(&key, &[&buffer]).unwrap(), sign);
/// ```
pub fn hmac_sha1(key: &[u8], source: &[&[u8]]) -> Result<[u8; 20], StunError> {
    let mut mac = Hmac::<sha1::Sha1>::new_from_slice(key).map_err(|_| StunError::DigestFailed)?;
    for buf in source {
        mac.update(buf);
    }

    Ok(mac.finalize().into_bytes().into())
}

/// CRC32 fingerprint over a list of discontiguous message parts, XORed
/// with the fixed value 0x5354554E ("STUN").
///
/// # Test
///
/// ```
/// assert_eq!(stun::util::fingerprint(&[b"1"]), 3498621689);
/// ```
pub fn fingerprint(source: &[&[u8]]) -> u32 {
    let crc = Crc::<u32>::new(&CRC_32_ISO_HDLC);
    let mut digest = crc.digest();
    for buf in source {
        digest.update(buf);
    }

    digest.finalize() ^ 0x5354_554e
}

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// random alphanumeric NONCE value for 401 challenges.
pub fn nonce(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char)
        .collect()
}

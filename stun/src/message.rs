use bytes::{BufMut, BytesMut};

use crate::attribute::{AttrKind, Property};
use crate::method::Method;
use crate::{util, StunError, COOKIE};

const ZERO_PAD: [u8; 4] = [0u8; 4];

/// STUN message encoder.
///
/// Writes the 20-byte header up front with a zero length, appends
/// attributes as TLVs, and back-patches the length on `flush`. The two
/// cryptographic trailers are emitted only by `flush`, which keeps the
/// invariant that MESSAGE-INTEGRITY and FINGERPRINT are the last two
/// attributes, in that order.
pub struct MessageWriter<'a> {
    token: [u8; 12],
    raw: &'a mut BytesMut,
}

impl<'a> MessageWriter<'a> {
    /// # Unit Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use stun::*;
    ///
    /// let token: [u8; 12] = [
    ///     0x72, 0x6d, 0x49, 0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let result = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut buf = BytesMut::with_capacity(1280);
    /// let mut message = MessageWriter::new(Method::Binding(Kind::Request), &token, &mut buf);
    /// message.flush(None, false).unwrap();
    /// assert_eq!(&buf[..], &result);
    /// ```
    pub fn new(method: Method, token: &[u8; 12], buf: &'a mut BytesMut) -> Self {
        buf.clear();
        buf.put_u16(method.into());
        buf.put_u16(0);
        buf.put(&COOKIE[..]);
        buf.put(&token[..]);

        Self {
            token: *token,
            raw: buf,
        }
    }

    /// create a reply reusing the transaction identifier of a received
    /// message.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use stun::*;
    ///
    /// let request = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut attributes = Vec::new();
    /// let old = MessageReader::decode(&request, &mut attributes).unwrap();
    ///
    /// let mut buf = BytesMut::with_capacity(1280);
    /// let mut message = MessageWriter::extend(Method::Binding(Kind::Response), &old, &mut buf);
    /// message.flush(None, false).unwrap();
    /// assert_eq!(&buf[..8], &[0x01, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42]);
    /// assert_eq!(&buf[8..], &request[8..]);
    /// ```
    pub fn extend(method: Method, reader: &MessageReader, buf: &'a mut BytesMut) -> Self {
        let mut token = [0u8; 12];
        token.copy_from_slice(reader.token);
        Self::new(method, &token, buf)
    }

    /// append an attribute to the message.
    ///
    /// The TLV length is back-patched after the attribute codec has
    /// written its payload, then the payload is zero-padded to the next
    /// 4-byte boundary; the padding is not part of the length.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use stun::attribute::UserName;
    /// use stun::*;
    ///
    /// let token: [u8; 12] = [
    ///     0x72, 0x6d, 0x49, 0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let result = [
    ///     0x00u8, 0x01, 0x00, 0x0c, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b, 0x00, 0x06,
    ///     0x00, 0x05, 0x70, 0x61, 0x6e, 0x64, 0x61, 0x00, 0x00, 0x00,
    /// ];
    ///
    /// let mut buf = BytesMut::with_capacity(1280);
    /// let mut message = MessageWriter::new(Method::Binding(Kind::Request), &token, &mut buf);
    /// message.append::<UserName>("panda");
    /// message.flush(None, false).unwrap();
    /// assert_eq!(&buf[..], &result);
    /// ```
    pub fn append<'v, T: Property<'v>>(&mut self, value: T::Inner) {
        debug_assert!(!matches!(
            T::kind(),
            AttrKind::MessageIntegrity | AttrKind::Fingerprint
        ));

        self.push(T::kind() as u16, |raw, token| {
            T::into(value, raw, token);
        });
    }

    /// append an attribute type the registry does not know; the payload
    /// is written verbatim.
    pub fn append_raw(&mut self, kind: u16, value: &[u8]) {
        self.push(kind, |raw, _| raw.put(value));
    }

    fn push<F>(&mut self, kind: u16, write: F)
    where
        F: FnOnce(&mut BytesMut, &[u8]),
    {
        self.raw.put_u16(kind);

        // reserve the length slot, then write the payload and come back
        // to fill the slot in.
        let offset = self.raw.len();
        self.raw.put_u16(0);
        write(self.raw, &self.token);

        let size = self.raw.len() - offset - 2;
        self.raw[offset..offset + 2].copy_from_slice(&(size as u16).to_be_bytes());

        let pad = util::pad_size(size);
        if pad > 0 {
            self.raw.put(&ZERO_PAD[..pad]);
        }
    }

    /// finish the message: back-patch the header length and emit the
    /// optional trailers.
    ///
    /// With an `auth` key the header length is first set to cover the
    /// upcoming MESSAGE-INTEGRITY TLV, the HMAC-SHA1 runs over
    /// everything already written, and the 24-byte TLV lands at the
    /// end. A requested fingerprint then repeats the dance with the
    /// 8-byte FINGERPRINT TLV and the CRC.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use stun::*;
    ///
    /// let token: [u8; 12] = [
    ///     0x72, 0x6d, 0x49, 0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let result = [
    ///     0x00u8, 0x01, 0x00, 0x20, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b, 0x00, 0x08,
    ///     0x00, 0x14, 0x45, 0x0e, 0x6e, 0x44, 0x52, 0x1e, 0xe8, 0xde, 0x2c,
    ///     0xf0, 0xfa, 0xb6, 0x9c, 0x5c, 0x19, 0x17, 0x98, 0xc6, 0xd9, 0xde,
    ///     0x80, 0x28, 0x00, 0x04, 0xed, 0x41, 0xb6, 0xbe,
    /// ];
    ///
    /// let key = util::long_term_credential_digest("panda", "raspberry", "panda");
    ///
    /// let mut buf = BytesMut::with_capacity(1280);
    /// let mut message = MessageWriter::new(Method::Binding(Kind::Request), &token, &mut buf);
    /// message.flush(Some(&key), true).unwrap();
    /// assert_eq!(&buf[..], &result);
    /// ```
    pub fn flush(&mut self, auth: Option<&[u8]>, fingerprint: bool) -> Result<(), StunError> {
        let size = (self.raw.len() - 20) as u16;
        self.set_len(size);

        if let Some(key) = auth {
            self.integrity(key)?;
        }

        if fingerprint {
            self.fingerprint();
        }

        Ok(())
    }

    fn integrity(&mut self, key: &[u8]) -> Result<(), StunError> {
        let size = (self.raw.len() - 20 + 24) as u16;
        self.set_len(size);

        let digest = util::hmac_sha1(key, &[&self.raw[..]])?;
        self.raw.put_u16(AttrKind::MessageIntegrity as u16);
        self.raw.put_u16(20);
        self.raw.put(&digest[..]);
        Ok(())
    }

    fn fingerprint(&mut self) {
        let size = (self.raw.len() - 20 + 8) as u16;
        self.set_len(size);

        let sum = util::fingerprint(&[&self.raw[..]]);
        self.raw.put_u16(AttrKind::Fingerprint as u16);
        self.raw.put_u16(4);
        self.raw.put_u32(sum);
    }

    fn set_len(&mut self, size: u16) {
        self.raw[2..4].copy_from_slice(&size.to_be_bytes());
    }

    pub fn token(&self) -> &[u8; 12] {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Zero-copy view over a decoded STUN message.
///
/// Attribute payloads stay in the receive buffer; `get` runs the typed
/// codec on demand. The reader keeps the offsets of the two trailers so
/// verification can rescope the header length the way the trailers were
/// computed by the sender.
#[derive(Debug)]
pub struct MessageReader<'a, 'b> {
    /// message method and class.
    pub method: Method,
    /// the 96-bit transaction identifier.
    pub token: &'a [u8],
    buf: &'a [u8],
    attributes: &'b Vec<(u16, &'a [u8])>,
    unknown: Vec<u16>,
    integrity_offset: Option<usize>,
    fingerprint_offset: Option<usize>,
}

impl<'a, 'b> MessageReader<'a, 'b> {
    /// decode a message from the buffer.
    ///
    /// The attribute list is caller-owned so hot paths can reuse one
    /// allocation across messages. A FINGERPRINT attribute, when
    /// present, is verified here and terminates the attribute walk;
    /// MESSAGE-INTEGRITY verification needs a key and happens in
    /// [`integrity`](Self::integrity).
    ///
    /// # Unit Test
    ///
    /// ```
    /// use stun::attribute::UserName;
    /// use stun::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut attributes = Vec::new();
    /// let message = MessageReader::decode(&buffer, &mut attributes).unwrap();
    /// assert_eq!(message.method, Method::Binding(Kind::Request));
    /// assert!(message.get::<UserName>().is_none());
    /// ```
    pub fn decode(
        buf: &'a [u8],
        attributes: &'b mut Vec<(u16, &'a [u8])>,
    ) -> Result<MessageReader<'a, 'b>, StunError> {
        attributes.clear();
        if buf.len() < 20 || buf[0] >> 6 != 0 {
            return Err(StunError::Format);
        }

        let method = Method::try_from(util::as_u16(&buf[..2]))?;
        let size = util::as_u16(&buf[2..4]) as usize;
        if size % 4 != 0 || buf[4..8] != COOKIE || buf.len() < size + 20 {
            return Err(StunError::Format);
        }

        // ignore anything a stream reader may have buffered past the
        // declared message size.
        let buf = &buf[..size + 20];
        let token = &buf[8..20];

        let mut unknown = Vec::new();
        let mut integrity_offset = None;
        let mut fingerprint_offset = None;
        let mut offset = 20;

        while buf.len() - offset >= 4 {
            // FINGERPRINT terminates the message; nothing is allowed
            // after it.
            if fingerprint_offset.is_some() {
                return Err(StunError::Format);
            }

            let key = util::as_u16(&buf[offset..]);
            let size = util::as_u16(&buf[offset + 2..]) as usize;
            let padded = size + util::pad_size(size);
            if buf.len() - offset - 4 < padded {
                return Err(StunError::Format);
            }

            let value = &buf[offset + 4..offset + 4 + size];
            match AttrKind::try_from(key) {
                Ok(AttrKind::MessageIntegrity) => {
                    if size != 20 {
                        return Err(StunError::Format);
                    }

                    if integrity_offset.is_none() {
                        integrity_offset = Some(offset);
                    }

                    attributes.push((key, value));
                }
                Ok(AttrKind::Fingerprint) => {
                    if size != 4 {
                        return Err(StunError::Format);
                    }

                    fingerprint_offset = Some(offset);
                    attributes.push((key, value));
                }
                Ok(_) => attributes.push((key, value)),
                Err(_) => {
                    // comprehension-required attributes the registry
                    // does not know are reported; optional ones are
                    // retained as opaque bytes.
                    if key < 0x8000 {
                        unknown.push(key);
                    } else {
                        attributes.push((key, value));
                    }
                }
            }

            offset += 4 + padded;
        }

        if let Some(offset) = fingerprint_offset {
            let expected = u32::from_be_bytes([
                buf[offset + 4],
                buf[offset + 5],
                buf[offset + 6],
                buf[offset + 7],
            ]);

            let size = ((offset - 20 + 8) as u16).to_be_bytes();
            if util::fingerprint(&[&buf[..2], &size, &buf[4..offset]]) != expected {
                return Err(StunError::IncorrectFingerprint);
            }
        }

        Ok(Self {
            buf,
            token,
            method,
            attributes,
            unknown,
            integrity_offset,
            fingerprint_offset,
        })
    }

    /// get a typed attribute from the message.
    pub fn get<T: Property<'a>>(&self) -> Option<T::Inner> {
        let kind = T::kind() as u16;
        self.attributes
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, v)| T::try_from(v, self.token).ok())
    }

    /// raw payload of an attribute, known to the registry or not.
    pub fn get_raw(&self, kind: u16) -> Option<&'a [u8]> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| *v)
    }

    /// comprehension-required attribute types the decoder did not
    /// understand; non-empty means a 420 is in order.
    pub fn unknown_attributes(&self) -> &[u16] {
        &self.unknown
    }

    pub fn has_integrity(&self) -> bool {
        self.integrity_offset.is_some()
    }

    pub fn has_fingerprint(&self) -> bool {
        self.fingerprint_offset.is_some()
    }

    /// check the MESSAGE-INTEGRITY attribute against a key.
    ///
    /// The HMAC-SHA1 runs over the message as if its length field
    /// terminated immediately after the MESSAGE-INTEGRITY TLV, which is
    /// how the sender computed it even when a FINGERPRINT follows.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use stun::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x03, 0x00, 0x50, 0x21, 0x12, 0xa4, 0x42, 0x64, 0x4f, 0x5a,
    ///     0x78, 0x6a, 0x56, 0x33, 0x62, 0x4b, 0x52, 0x33, 0x31, 0x00, 0x19,
    ///     0x00, 0x04, 0x11, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x05, 0x70,
    ///     0x61, 0x6e, 0x64, 0x61, 0x00, 0x00, 0x00, 0x00, 0x14, 0x00, 0x09,
    ///     0x72, 0x61, 0x73, 0x70, 0x62, 0x65, 0x72, 0x72, 0x79, 0x00, 0x00,
    ///     0x00, 0x00, 0x15, 0x00, 0x10, 0x31, 0x63, 0x31, 0x33, 0x64, 0x32,
    ///     0x62, 0x32, 0x34, 0x35, 0x62, 0x33, 0x61, 0x37, 0x33, 0x34, 0x00,
    ///     0x08, 0x00, 0x14, 0xd6, 0x78, 0x26, 0x99, 0x0e, 0x15, 0x56, 0x15,
    ///     0xe5, 0xf4, 0x24, 0x74, 0xe2, 0x3c, 0x26, 0xc5, 0xb1, 0x03, 0xb2,
    ///     0x6d,
    /// ];
    ///
    /// let key = util::long_term_credential_digest("panda", "raspberry", "panda");
    ///
    /// let mut attributes = Vec::new();
    /// let message = MessageReader::decode(&buffer, &mut attributes).unwrap();
    /// assert!(message.integrity(&key).is_ok());
    /// ```
    pub fn integrity(&self, key: &[u8]) -> Result<(), StunError> {
        let offset = self.integrity_offset.ok_or(StunError::NotFoundIntegrity)?;
        let expected = &self.buf[offset + 4..offset + 24];

        let size = ((offset - 20 + 24) as u16).to_be_bytes();
        let digest = util::hmac_sha1(key, &[&self.buf[..2], &size, &self.buf[4..offset]])?;
        if digest[..] != *expected {
            return Err(StunError::IntegrityCheckFailure);
        }

        Ok(())
    }

    /// total wire size of the message starting at `buf`, for stream
    /// re-framing. Fails unless the buffer starts with a plausible STUN
    /// header.
    ///
    /// # Unit Test
    ///
    /// ```
    /// use stun::MessageReader;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// assert_eq!(MessageReader::message_size(&buffer).unwrap(), 20);
    /// ```
    pub fn message_size(buf: &[u8]) -> Result<usize, StunError> {
        if buf.len() < 20 || buf[0] >> 6 != 0 {
            return Err(StunError::Format);
        }

        Ok(util::as_u16(&buf[2..4]) as usize + 20)
    }
}

impl<'a> AsRef<[u8]> for MessageReader<'a, '_> {
    fn as_ref(&self) -> &'a [u8] {
        self.buf
    }
}

impl<'a> std::ops::Deref for MessageReader<'a, '_> {
    type Target = [u8];

    fn deref(&self) -> &'a Self::Target {
        self.buf
    }
}

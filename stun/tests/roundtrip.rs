//! Writer/reader round-trip properties on representative messages.

use anyhow::Result;
use bytes::BytesMut;
use stun::attribute::{
    ChannelNumber, DontFragment, ErrKind, Error, ErrorCode, Lifetime, Priority, Protocol, Realm,
    RequestedTransport, Software, UserName, XorMappedAddress, XorPeerAddress,
};
use stun::{util, Kind, MessageReader, MessageWriter, Method, StunError};

const TOKEN: [u8; 12] = [
    0x64, 0x4f, 0x5a, 0x78, 0x6a, 0x56, 0x33, 0x62, 0x4b, 0x52, 0x33, 0x31,
];

#[test]
fn encode_decode_identity() -> Result<()> {
    let mut buf = BytesMut::with_capacity(1280);
    let mut writer = MessageWriter::new(Method::Allocate(Kind::Request), &TOKEN, &mut buf);
    writer.append::<RequestedTransport>(Protocol::Udp);
    writer.append::<Lifetime>(600);
    writer.append::<DontFragment>(());
    writer.append::<UserName>("panda");
    writer.append::<Realm>("raspberry");
    writer.append::<XorPeerAddress>("192.0.2.7:49152".parse()?);
    writer.flush(None, false)?;

    let mut attributes = Vec::new();
    let message = MessageReader::decode(&buf, &mut attributes)?;

    assert_eq!(message.method, Method::Allocate(Kind::Request));
    assert_eq!(message.token, &TOKEN);
    assert_eq!(message.get::<RequestedTransport>(), Some(Protocol::Udp));
    assert_eq!(message.get::<Lifetime>(), Some(600));
    assert_eq!(message.get::<DontFragment>(), Some(()));
    assert_eq!(message.get::<UserName>(), Some("panda"));
    assert_eq!(message.get::<Realm>(), Some("raspberry"));
    assert_eq!(
        message.get::<XorPeerAddress>(),
        Some("192.0.2.7:49152".parse()?)
    );

    // declared length matches the wire and stays 4-aligned.
    assert_eq!(util::as_u16(&buf[2..4]) as usize + 20, buf.len());
    assert_eq!(buf.len() % 4, 0);
    Ok(())
}

#[test]
fn reencode_byte_equivalence() -> Result<()> {
    let mut first = BytesMut::with_capacity(1280);
    let mut writer = MessageWriter::new(Method::Binding(Kind::Request), &TOKEN, &mut first);
    writer.append::<Software>("codec test");
    writer.append::<Priority>(0x6e0001ff);
    writer.flush(None, true)?;

    // decode, then rebuild the same message in attribute order.
    let mut attributes = Vec::new();
    let message = MessageReader::decode(&first, &mut attributes)?;
    let software = message.get::<Software>().expect("software present");
    let priority = message.get::<Priority>().expect("priority present");

    let mut second = BytesMut::with_capacity(1280);
    let mut writer = MessageWriter::new(message.method, &TOKEN, &mut second);
    writer.append::<Software>(software);
    writer.append::<Priority>(priority);
    writer.flush(None, true)?;

    assert_eq!(&first[..], &second[..]);
    Ok(())
}

#[test]
fn integrity_protects_the_message() -> Result<()> {
    let key = util::long_term_credential_digest("panda", "raspberry", "panda");

    let mut buf = BytesMut::with_capacity(1280);
    let mut writer = MessageWriter::new(Method::Refresh(Kind::Request), &TOKEN, &mut buf);
    writer.append::<Lifetime>(0);
    writer.flush(Some(&key), false)?;

    let mut attributes = Vec::new();
    let message = MessageReader::decode(&buf, &mut attributes)?;
    message.integrity(&key)?;

    // flip one payload byte; the digest no longer matches.
    let mut tampered = buf.clone();
    tampered[24] ^= 0x01;
    let message = MessageReader::decode(&tampered, &mut attributes)?;
    assert!(matches!(
        message.integrity(&key),
        Err(StunError::IntegrityCheckFailure)
    ));

    Ok(())
}

#[test]
fn fingerprint_trailer_layout() -> Result<()> {
    let mut buf = BytesMut::with_capacity(1280);
    let mut writer = MessageWriter::new(Method::Binding(Kind::Request), &TOKEN, &mut buf);
    writer.append::<Software>("codec test");
    writer.flush(None, true)?;

    // the last 8 bytes are TLV 0x8028 length 4, and the CRC covers
    // everything before them.
    let tail = &buf[buf.len() - 8..];
    assert_eq!(util::as_u16(&tail[..2]), 0x8028);
    assert_eq!(util::as_u16(&tail[2..4]), 4);

    let expected = util::fingerprint(&[&buf[..buf.len() - 8]]);
    assert_eq!(
        u32::from_be_bytes([tail[4], tail[5], tail[6], tail[7]]),
        expected
    );

    Ok(())
}

#[test]
fn error_code_and_unknown_attributes() -> Result<()> {
    let mut buf = BytesMut::with_capacity(1280);
    let mut writer = MessageWriter::new(Method::Binding(Kind::Error), &TOKEN, &mut buf);
    writer.append::<ErrorCode>(Error::from(ErrKind::AllocationMismatch));
    writer.flush(None, false)?;

    let mut attributes = Vec::new();
    let message = MessageReader::decode(&buf, &mut attributes)?;
    let error = message.get::<ErrorCode>().expect("error code present");
    assert_eq!(error.code, 437);
    assert_eq!(error.reason, "Allocation Mismatch");

    // an unknown comprehension-required attribute is reported, an
    // unknown comprehension-optional one is retained opaquely.
    let mut buf = BytesMut::with_capacity(1280);
    let mut writer = MessageWriter::new(Method::Binding(Kind::Request), &TOKEN, &mut buf);
    writer.append_raw(0x7ff1, b"who?");
    writer.append_raw(0xbff2, b"meh.");
    writer.append::<ChannelNumber>(0x4000);
    writer.flush(None, false)?;

    let message = MessageReader::decode(&buf, &mut attributes)?;
    assert_eq!(message.unknown_attributes(), &[0x7ff1]);
    assert_eq!(message.get_raw(0xbff2), Some(&b"meh."[..]));
    assert_eq!(message.get::<ChannelNumber>(), Some(0x4000));

    Ok(())
}

#[test]
fn format_errors() {
    let mut attributes = Vec::new();

    // truncated header.
    assert!(matches!(
        MessageReader::decode(&[0x00, 0x01, 0x00], &mut attributes),
        Err(StunError::Format)
    ));

    // length not a multiple of four.
    let mut bad = [0u8; 24];
    bad[..2].copy_from_slice(&[0x00, 0x01]);
    bad[2..4].copy_from_slice(&3u16.to_be_bytes());
    bad[4..8].copy_from_slice(&stun::COOKIE);
    assert!(matches!(
        MessageReader::decode(&bad, &mut attributes),
        Err(StunError::Format)
    ));

    // a TLV reaching past the payload.
    let mut bad = [0u8; 28];
    bad[..2].copy_from_slice(&[0x00, 0x01]);
    bad[2..4].copy_from_slice(&8u16.to_be_bytes());
    bad[4..8].copy_from_slice(&stun::COOKIE);
    bad[20..22].copy_from_slice(&0x0006u16.to_be_bytes());
    bad[22..24].copy_from_slice(&32u16.to_be_bytes());
    assert!(matches!(
        MessageReader::decode(&bad, &mut attributes),
        Err(StunError::Format)
    ));
}

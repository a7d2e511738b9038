use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::BytesMut;
use mux::Transport;
use stun::attribute::{
    ChannelNumber, Data, ErrKind, Error, ErrorCode, Lifetime, Nonce, Realm, XorMappedAddress,
    XorPeerAddress, XorRelayedAddress,
};
use stun::{
    util, ChannelData, Kind, MessageHandler, MessageReader, MessageWriter, Method, Server,
};
use tokio::net::UdpSocket;
use turn::{AllocateOptions, Client};

/// In-process TURN server: long-term auth with a fixed nonce, one
/// imaginary relay address, channel binds answered with a greeting
/// frame, Send indications echoed back as Data indications.
struct MockTurn {
    realm: String,
    nonce: String,
    key: Vec<u8>,
    relay: SocketAddr,
}

#[async_trait]
impl MessageHandler for MockTurn {
    async fn serve(&self, message: &MessageReader<'_, '_>, transport: &dyn Transport) {
        let mut buf = BytesMut::with_capacity(512);

        match message.method {
            Method::Allocate(Kind::Request) => {
                if message.integrity(&self.key).is_err() {
                    let mut writer =
                        MessageWriter::extend(Method::Allocate(Kind::Error), message, &mut buf);
                    writer.append::<ErrorCode>(Error::from(ErrKind::Unauthorized));
                    writer.append::<Realm>(&self.realm);
                    writer.append::<Nonce>(&self.nonce);
                    writer.flush(None, false).unwrap();
                } else {
                    let mut writer =
                        MessageWriter::extend(Method::Allocate(Kind::Response), message, &mut buf);
                    writer.append::<XorRelayedAddress>(self.relay);
                    writer.append::<XorMappedAddress>(transport.remote_addr());
                    writer.append::<Lifetime>(600);
                    writer.flush(Some(&self.key), false).unwrap();
                }
            }
            Method::Refresh(Kind::Request) => {
                let lifetime = message.get::<Lifetime>().unwrap_or(600);
                let mut writer =
                    MessageWriter::extend(Method::Refresh(Kind::Response), message, &mut buf);
                writer.append::<Lifetime>(lifetime);
                writer.flush(Some(&self.key), false).unwrap();
            }
            Method::CreatePermission(Kind::Request) => {
                let mut writer = MessageWriter::extend(
                    Method::CreatePermission(Kind::Response),
                    message,
                    &mut buf,
                );
                writer.flush(Some(&self.key), false).unwrap();
            }
            Method::ChannelBind(Kind::Request) => {
                let number = message.get::<ChannelNumber>().unwrap();
                let mut writer =
                    MessageWriter::extend(Method::ChannelBind(Kind::Response), message, &mut buf);
                writer.flush(Some(&self.key), false).unwrap();
                let _ = transport.send(&buf).await;

                // pretend the peer spoke first: push a frame down the
                // fresh channel after the client had time to bind it.
                tokio::time::sleep(Duration::from_millis(100)).await;
                let mut frame = BytesMut::with_capacity(64);
                ChannelData::encode(number, b"panda", &mut frame, false);
                let _ = transport.send(&frame).await;
                return;
            }
            Method::SendIndication => {
                let (Some(peer), Some(data)) = (
                    message.get::<XorPeerAddress>(),
                    message.get::<Data>(),
                ) else {
                    return;
                };

                let token: [u8; 12] = rand::random();
                let mut writer = MessageWriter::new(Method::DataIndication, &token, &mut buf);
                writer.append::<XorPeerAddress>(peer);
                writer.append::<Data>(data);
                writer.flush(None, false).unwrap();
            }
            _ => return,
        }

        let _ = transport.send(&buf).await;
    }
}

async fn spawn_mock(relay: SocketAddr) -> Result<SocketAddr> {
    let key = util::long_term_credential_digest("panda", "localhost", "raspberry").to_vec();
    let server = Server::new("localhost").handle(Arc::new(MockTurn {
        realm: "localhost".to_owned(),
        nonce: "UHm1hiE0jm9r9rGS".to_owned(),
        key,
        relay,
    }));

    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    let addr = socket.local_addr()?;
    tokio::spawn(async move {
        let _ = server.serve_udp(socket).await;
    });

    Ok(addr)
}

#[tokio::test]
async fn allocate_with_challenge_then_channel_and_indications() -> Result<()> {
    let relay: SocketAddr = "198.51.100.9:40000".parse()?;
    let peer: SocketAddr = "203.0.113.2:49582".parse()?;
    let server = spawn_mock(relay).await?;

    let mut client = Client::dial(
        &format!("turn:127.0.0.1:{}", server.port()),
        "panda",
        "raspberry",
    )
    .await?;

    // the first Allocate gets the 401 challenge, the retry carries
    // credentials; the caller sees only the result.
    let relayed = tokio::time::timeout(
        Duration::from_secs(5),
        client.allocate(AllocateOptions::default()),
    )
    .await??;
    assert_eq!(relayed, relay);
    assert_eq!(client.relayed_addr(), Some(relay));

    client.create_permission(&[peer]).await?;
    assert_eq!(
        client.allocation().expect("allocation live").permissions,
        vec![peer]
    );

    let mut channel = client.channel_bind(peer).await?;
    assert!(ChannelData::valid_number(channel.number()));
    assert_eq!(channel.peer(), peer);

    let frame = tokio::time::timeout(Duration::from_secs(5), channel.recv())
        .await?
        .expect("greeting frame");
    assert_eq!(frame, b"panda");

    channel.send(b"hello there").await?;

    client.send_to(peer, b"indirect").await?;
    let (from, data) = tokio::time::timeout(Duration::from_secs(5), client.recv_from())
        .await?
        .expect("data indication");
    assert_eq!(from, peer);
    assert_eq!(data, b"indirect");

    // close destroys the allocation with a zero-lifetime refresh.
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn rebinding_a_peer_keeps_its_channel_number() -> Result<()> {
    let relay: SocketAddr = "198.51.100.9:40002".parse()?;
    let peer: SocketAddr = "203.0.113.2:49582".parse()?;
    let other: SocketAddr = "203.0.113.3:49583".parse()?;
    let server = spawn_mock(relay).await?;

    let client = Client::dial(
        &format!("turn:127.0.0.1:{}", server.port()),
        "panda",
        "raspberry",
    )
    .await?;
    client.allocate(AllocateOptions::default()).await?;

    let mut first = client.channel_bind(peer).await?;
    let number = first.number();

    // the same peer keeps its number; the new handle supersedes the
    // old one, whose queue drains and ends.
    let mut second = client.channel_bind(peer).await?;
    assert_eq!(second.number(), number);

    tokio::time::timeout(Duration::from_secs(5), async {
        while first.recv().await.is_some() {}
    })
    .await?;

    let frame = tokio::time::timeout(Duration::from_secs(5), second.recv())
        .await?
        .expect("greeting frame");
    assert_eq!(frame, b"panda");

    // the binding is mirrored on the allocation, and a different peer
    // gets a different number.
    assert_eq!(
        client
            .allocation()
            .expect("allocation live")
            .channels
            .get(&number),
        Some(&peer)
    );

    let third = client.channel_bind(other).await?;
    assert_ne!(third.number(), number);

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn refresh_extends_the_allocation() -> Result<()> {
    let relay: SocketAddr = "198.51.100.9:40001".parse()?;
    let server = spawn_mock(relay).await?;

    let client = Client::dial(
        &format!("turn:127.0.0.1:{}", server.port()),
        "panda",
        "raspberry",
    )
    .await?;

    client.allocate(AllocateOptions::default()).await?;
    let first_expiry = client.allocation().expect("allocation live").expiry;

    client.refresh(Duration::from_secs(600)).await?;
    let renewed = client.allocation().expect("allocation live").expiry;
    assert!(renewed >= first_expiry);

    client.close().await?;
    Ok(())
}

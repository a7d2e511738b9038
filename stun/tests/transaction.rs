use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::BytesMut;
use stun::attribute::XorMappedAddress;
use stun::{Config, Conn, Kind, MessageReader, MessageWriter, Method, StunError};
use tokio::net::UdpSocket;

/// Binding server that records every request and drops the first
/// `drop_count` of them.
async fn mock_binding_server(
    drop_count: usize,
) -> Result<(std::net::SocketAddr, Arc<Mutex<Vec<Vec<u8>>>>)> {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    let addr = socket.local_addr()?;
    let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));

    tokio::spawn({
        let socket = socket.clone();
        let seen = seen.clone();
        async move {
            let mut buf = vec![0u8; 2048];
            loop {
                let Ok((size, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };

                let request = buf[..size].to_vec();
                let dropped = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(request.clone());
                    seen.len() <= drop_count
                };

                if dropped {
                    continue;
                }

                let mut attributes = Vec::new();
                let Ok(message) = MessageReader::decode(&request, &mut attributes) else {
                    continue;
                };

                let mut out = BytesMut::with_capacity(128);
                let mut writer =
                    MessageWriter::extend(Method::Binding(Kind::Response), &message, &mut out);
                writer.append::<XorMappedAddress>(from);
                writer.flush(None, false).unwrap();
                let _ = socket.send_to(&out, from).await;
            }
        }
    });

    Ok((addr, seen))
}

#[tokio::test]
async fn retransmit_after_first_datagram_lost() -> Result<()> {
    let (server, seen) = mock_binding_server(1).await?;

    let config = Config {
        retransmission_timeout: Duration::from_millis(100),
        transaction_timeout: Duration::from_secs(2),
        ..Config::default()
    };

    let conn = Conn::dial_udp(server, config).await?;
    let start = Instant::now();
    let reflexive = conn.discover().await?;
    let elapsed = start.elapsed();

    assert_eq!(reflexive.port(), conn.local_addr().port());

    // the answer arrives after one retransmission: roughly rto plus a
    // loopback round trip.
    assert!(elapsed >= Duration::from_millis(80), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);

    // identical bytes on the wire, same transaction identifier.
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);

    conn.close().await;
    Ok(())
}

#[tokio::test]
async fn transaction_deadline() -> Result<()> {
    // a socket nobody answers on.
    let blackhole = UdpSocket::bind("127.0.0.1:0").await?;

    let config = Config {
        retransmission_timeout: Duration::from_millis(50),
        transaction_timeout: Duration::from_millis(300),
        ..Config::default()
    };

    let conn = Conn::dial_udp(blackhole.local_addr()?, config).await?;
    let start = Instant::now();
    let result = conn.discover().await;

    assert!(matches!(result, Err(StunError::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(300));

    conn.close().await;
    Ok(())
}

#[tokio::test]
async fn close_cancels_outstanding_transactions() -> Result<()> {
    let blackhole = UdpSocket::bind("127.0.0.1:0").await?;
    let conn = Arc::new(Conn::dial_udp(blackhole.local_addr()?, Config::default()).await?);

    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.discover().await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    conn.close().await;

    let result = tokio::time::timeout(Duration::from_secs(5), pending).await??;
    assert!(matches!(result, Err(StunError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn concurrent_round_trips_complete_independently() -> Result<()> {
    let (server, seen) = mock_binding_server(0).await?;
    let conn = Arc::new(Conn::dial_udp(server, Config::default()).await?);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        tasks.push(tokio::spawn({
            let conn = conn.clone();
            async move { conn.discover().await }
        }));
    }

    for task in tasks {
        let reflexive = tokio::time::timeout(Duration::from_secs(5), task).await???;
        assert_eq!(reflexive.port(), conn.local_addr().port());
    }

    // eight distinct transaction identifiers went out.
    let seen = seen.lock().unwrap();
    let mut tokens: Vec<_> = seen.iter().map(|m| m[8..20].to_vec()).collect();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), 8);

    conn.close().await;
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mux::{Handler, Mux, Reader, StreamTransport, Transport, Verdict};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// answers every "ping" with a "pong".
struct Ping;

#[async_trait]
impl Handler for Ping {
    async fn handle(
        &self,
        transport: &dyn Transport,
        reader: &mut Reader<'_>,
    ) -> Result<Verdict, mux::Error> {
        let head = match reader.peek(4) {
            Some(head) => head,
            None if transport.reliable() => return Ok(Verdict::NeedMoreData),
            None => return Ok(Verdict::Unmatched),
        };

        if head != b"ping" {
            return Ok(Verdict::Unmatched);
        }

        reader.next(4);
        transport.send(b"pong").await?;
        Ok(Verdict::Handled)
    }
}

/// counts received "pong"s.
struct Pong {
    counted: mpsc::Sender<()>,
}

#[async_trait]
impl Handler for Pong {
    async fn handle(
        &self,
        transport: &dyn Transport,
        reader: &mut Reader<'_>,
    ) -> Result<Verdict, mux::Error> {
        let head = match reader.peek(4) {
            Some(head) => head,
            None if transport.reliable() => return Ok(Verdict::NeedMoreData),
            None => return Ok(Verdict::Unmatched),
        };

        if head != b"pong" {
            return Ok(Verdict::Unmatched);
        }

        reader.next(4);
        let _ = self.counted.send(()).await;
        Ok(Verdict::Handled)
    }
}

#[tokio::test]
async fn udp_ping_pong_thousandfold() -> Result<()> {
    let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    let server_addr = server.local_addr()?;
    let server_mux = Mux::with_handlers(vec![Arc::new(Ping)]);
    tokio::spawn(server_mux.serve_packet(server, None));

    let client = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    client.connect(server_addr).await?;

    let (counted, mut pongs) = mpsc::channel(1024);
    let client_mux = Mux::with_handlers(vec![Arc::new(Pong { counted })]);
    tokio::spawn(client_mux.serve_packet(client.clone(), None));

    tokio::time::timeout(Duration::from_secs(5), async {
        for _ in 0..1000 {
            client.send(b"ping").await?;
            pongs.recv().await;
        }

        Ok::<_, anyhow::Error>(())
    })
    .await??;

    Ok(())
}

#[tokio::test]
async fn stream_reframing_across_partial_reads() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server_mux = Mux::with_handlers(vec![Arc::new(Ping)]);
    tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        let local = stream.local_addr().unwrap();
        let (read, write) = stream.into_split();
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new(write, local, peer));
        let _ = server_mux.serve_stream(read, transport, None).await;
    });

    let mut client = TcpStream::connect(addr).await?;

    // two messages, split badly across three writes.
    client.write_all(b"pi").await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(b"ngpi").await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(b"ng").await?;

    let mut buf = [0u8; 8];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf)).await??;
    assert_eq!(&buf, b"pongpong");
    Ok(())
}

#[tokio::test]
async fn unmatched_stream_bytes_close_the_connection() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server_mux = Mux::with_handlers(vec![Arc::new(Ping)]);
    let serve = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        let local = stream.local_addr().unwrap();
        let (read, write) = stream.into_split();
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new(write, local, peer));
        server_mux.serve_stream(read, transport, None).await
    });

    let mut client = TcpStream::connect(addr).await?;
    client.write_all(b"garbage!").await?;

    let result = tokio::time::timeout(Duration::from_secs(5), serve).await??;
    assert!(matches!(result, Err(mux::Error::Format)));
    Ok(())
}

#[tokio::test]
async fn idle_timeout_terminates_the_serve_loop() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server_mux = Mux::with_handlers(vec![Arc::new(Ping)]);
    let serve = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        let local = stream.local_addr().unwrap();
        let (read, write) = stream.into_split();
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new(write, local, peer));
        server_mux
            .serve_stream(read, transport, Some(Duration::from_millis(100)))
            .await
    });

    let _client = TcpStream::connect(addr).await?;
    let result = tokio::time::timeout(Duration::from_secs(5), serve).await??;
    assert!(matches!(result, Err(mux::Error::IdleTimeout)));
    Ok(())
}

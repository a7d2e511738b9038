use std::net::SocketAddr;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use mux::{BufferPool, Handler, Reader, Transport, Verdict};
use parking_lot::RwLock;
use stun::ChannelData;
use tokio::sync::mpsc;

use crate::TurnError;

/// Bound for a channel's incoming queue; frames beyond it are shed
/// rather than ballooning memory when the consumer stalls.
const QUEUE_DEPTH: usize = 32;

struct Binding {
    peer: SocketAddr,
    sender: mpsc::Sender<Vec<u8>>,
    epoch: u64,
}

#[derive(Default)]
struct Table {
    bindings: AHashMap<u16, Binding>,
    peers: AHashMap<SocketAddr, u16>,
    epoch: u64,
}

/// The allocation's channel table: number to binding for incoming
/// frames, plus the peer to number index.
///
/// Within one allocation the same channel cannot be bound to two
/// different transport addresses, nor the same transport address to
/// two different channels; the two maps enforce that locally, and
/// rebinding a peer supersedes (and closes) the previous handle on
/// its channel. Shared between the client, which binds channels, and
/// the multiplexer handler, which feeds them.
#[derive(Default)]
pub(crate) struct ChannelRouter {
    table: RwLock<Table>,
}

impl ChannelRouter {
    /// the channel number a peer is already bound to, if any.
    pub fn number_of(&self, peer: &SocketAddr) -> Option<u16> {
        self.table.read().peers.get(peer).copied()
    }

    /// whether a number currently has a live binding.
    pub fn bound(&self, number: u16) -> bool {
        self.table.read().bindings.contains_key(&number)
    }

    /// install (or supersede) the binding of a number to a peer and
    /// open its incoming queue. Returns the queue and the binding
    /// epoch, which [`unbind`](Self::unbind) requires back.
    pub fn bind(&self, number: u16, peer: SocketAddr) -> (mpsc::Receiver<Vec<u8>>, u64) {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);

        let mut table = self.table.write();
        table.epoch += 1;
        let epoch = table.epoch;

        // superseding drops the previous sender, which ends the old
        // handle's queue.
        if let Some(old) = table.bindings.insert(
            number,
            Binding {
                peer,
                sender,
                epoch,
            },
        ) {
            table.peers.remove(&old.peer);
        }

        table.peers.insert(peer, number);
        (receiver, epoch)
    }

    /// drop a binding, but only the one that was handed out with this
    /// epoch; a stale handle of a superseded binding is a no-op here.
    pub fn unbind(&self, number: u16, epoch: u64) {
        let mut table = self.table.write();
        let Some(binding) = table.bindings.get(&number) else {
            return;
        };

        if binding.epoch != epoch {
            return;
        }

        let peer = binding.peer;
        table.bindings.remove(&number);
        table.peers.remove(&peer);
    }

    /// drop every binding; used when the allocation dies.
    pub fn clear(&self) {
        let mut table = self.table.write();
        table.bindings.clear();
        table.peers.clear();
    }

    fn route(&self, number: u16, bytes: &[u8]) -> bool {
        let sender = match self.table.read().bindings.get(&number) {
            Some(binding) => binding.sender.clone(),
            None => return false,
        };

        // queue full or receiver gone both mean the frame is shed.
        sender.try_send(bytes.to_vec()).is_ok()
    }
}

/// The ChannelData protocol handler for a multiplexer chain.
///
/// Channel numbers start at 0x4000, so the first byte of a frame has
/// its top bits set to `01` and can never be mistaken for STUN (`00`).
/// Frames for unbound channel numbers are dropped.
pub(crate) struct ChannelDataHandler {
    channels: Arc<ChannelRouter>,
}

impl ChannelDataHandler {
    pub fn new(channels: Arc<ChannelRouter>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl Handler for ChannelDataHandler {
    async fn handle(
        &self,
        transport: &dyn Transport,
        reader: &mut Reader<'_>,
    ) -> Result<Verdict, mux::Error> {
        match reader.peek(1) {
            Some(first) if first[0] >> 6 == 1 => {}
            Some(_) => return Ok(Verdict::Unmatched),
            None if transport.reliable() => return Ok(Verdict::NeedMoreData),
            None => return Ok(Verdict::Unmatched),
        }

        let head = match reader.peek(4) {
            Some(head) => head,
            None if transport.reliable() => return Ok(Verdict::NeedMoreData),
            None => return Ok(Verdict::Unmatched),
        };

        // stream frames are padded to 4 bytes, datagram frames never.
        let size = match ChannelData::message_size(head, transport.reliable()) {
            Ok(size) => size,
            Err(_) => return Ok(Verdict::Unmatched),
        };

        if reader.peek(size).is_none() {
            if transport.reliable() {
                return Ok(Verdict::NeedMoreData);
            }

            return Err(mux::Error::Format);
        }

        let Some(bytes) = reader.next(size) else {
            return Err(mux::Error::Format);
        };

        match ChannelData::try_from(bytes) {
            Ok(data) => {
                if !self.channels.route(data.number, data.bytes) {
                    log::trace!(
                        "channel data dropped: number={:#06x}, addr={}",
                        data.number,
                        transport.remote_addr()
                    );
                }
            }
            Err(_) => return Err(mux::Error::Format),
        }

        Ok(Verdict::Handled)
    }
}

/// A bound TURN channel: a framed bidirectional byte pipe to one peer
/// over the allocation, avoiding the per-message STUN overhead.
///
/// The binding lives on the server for 10 minutes and implicitly
/// expires with the allocation; dropping or closing the channel only
/// unbinds it locally. Binding the same peer again refreshes the
/// server-side binding under the same number and supersedes the old
/// handle, whose `recv` then drains and ends.
pub struct Channel {
    number: u16,
    peer: SocketAddr,
    transport: Arc<dyn Transport>,
    incoming: mpsc::Receiver<Vec<u8>>,
    router: Arc<ChannelRouter>,
    epoch: u64,
}

impl Channel {
    pub(crate) fn new(
        number: u16,
        peer: SocketAddr,
        transport: Arc<dyn Transport>,
        incoming: mpsc::Receiver<Vec<u8>>,
        router: Arc<ChannelRouter>,
        epoch: u64,
    ) -> Self {
        Self {
            number,
            peer,
            transport,
            incoming,
            router,
            epoch,
        }
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// send application data to the bound peer in a channel-data
    /// frame.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TurnError> {
        let pool = BufferPool::global();
        let mut buf = pool.get();
        ChannelData::encode(self.number, bytes, &mut buf, self.transport.reliable());

        let result = self.transport.send(&buf).await;
        pool.put(buf);
        Ok(result?)
    }

    /// receive the next frame relayed from the peer; `None` after the
    /// channel is unbound or superseded.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.incoming.recv().await
    }

    /// unbind locally; the server-side binding ages out on its own.
    pub fn close(self) {
        self.router.unbind(self.number, self.epoch);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.router.unbind(self.number, self.epoch);
    }
}

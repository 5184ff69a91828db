//! The ordered, message-based data channel between two negotiated peers.
//!
//! A [`DataChannel`] queues encoded frames toward the wire and tracks the
//! outstanding unsent byte count; a transport drains the matching
//! [`ChannelWire`] half and marks bytes flushed once they hit the real
//! wire. That counter is the single source of truth for the sender's
//! high-water-mark backpressure.

use anyhow::{Result, anyhow};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use crate::transfer::protocol::Frame;

/// Inbound frames queue at most this deep before the wire pump blocks
const INBOUND_DEPTH: usize = 64;

/// Sending half handed to the session once negotiation completes
#[derive(Debug, Clone)]
pub struct DataChannel {
    outbound: mpsc::UnboundedSender<Bytes>,
    buffered: Arc<AtomicUsize>,
}

impl DataChannel {
    /// Encode and queue one frame. Bytes count as outstanding until the
    /// transport marks them flushed.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        let encoded = frame.encode()?;
        self.buffered.fetch_add(encoded.len(), Ordering::SeqCst);
        self.outbound
            .send(encoded)
            .map_err(|_| anyhow!("data channel closed"))
    }

    /// Bytes queued but not yet written to the wire
    pub fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }
}

/// Clonable handle for crediting bytes back once written to the wire
#[derive(Debug, Clone)]
pub struct FlushCounter(Arc<AtomicUsize>);

impl FlushCounter {
    pub fn mark_flushed(&self, len: usize) {
        self.0.fetch_sub(len, Ordering::SeqCst);
    }
}

/// Transport-side half of a channel: encoded frames out, raw messages in
#[derive(Debug)]
pub struct ChannelWire {
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
    pub inbound: mpsc::Sender<Bytes>,
    pub flushed: FlushCounter,
}

/// An open channel as delivered to the session: the sending handle plus
/// the stream of inbound messages
#[derive(Debug)]
pub struct OpenChannel {
    pub channel: DataChannel,
    pub inbound: mpsc::Receiver<Bytes>,
}

/// Create a channel backed by a wire a transport still has to pump
pub fn wired() -> (OpenChannel, ChannelWire) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::channel(INBOUND_DEPTH);
    let buffered = Arc::new(AtomicUsize::new(0));

    let open = OpenChannel {
        channel: DataChannel {
            outbound: out_tx,
            buffered: buffered.clone(),
        },
        inbound: in_rx,
    };
    let wire = ChannelWire {
        outbound: out_rx,
        inbound: in_tx,
        flushed: FlushCounter(buffered),
    };
    (open, wire)
}

/// Two channels joined back to back in-process, with pump tasks standing in
/// for the wire. Message boundaries and ordering match a real transport.
pub fn loopback_pair() -> (OpenChannel, OpenChannel) {
    let (a, a_wire) = wired();
    let (b, b_wire) = wired();
    tokio::spawn(pump(a_wire.outbound, b_wire.inbound, a_wire.flushed));
    tokio::spawn(pump(b_wire.outbound, a_wire.inbound, b_wire.flushed));
    (a, b)
}

async fn pump(
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    peer_inbound: mpsc::Sender<Bytes>,
    flushed: FlushCounter,
) {
    while let Some(message) = outbound.recv().await {
        let len = message.len();
        if peer_inbound.send(message).await.is_err() {
            break;
        }
        flushed.mark_flushed(len);
    }
}

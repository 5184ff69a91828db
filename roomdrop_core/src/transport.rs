//! The peer-transport seam.
//!
//! A transport owns the actual peer link (hole punching, relays, streams)
//! and speaks to the negotiator in opaque offer/answer/candidate payloads;
//! the session never inspects them, it only ferries them through the
//! signaling envelope. Once a link is up the transport hands the session
//! an open [`OpenChannel`].

use std::future::Future;
use tokio::sync::mpsc;

use crate::channel::OpenChannel;

/// Events a transport reports while negotiating and afterwards
#[derive(Debug)]
pub enum TransportEvent {
    /// A locally discovered candidate to publish through the relay
    Candidate(serde_json::Value),
    /// The data channel is up; fires exactly once per session
    ChannelOpen(OpenChannel),
    /// The peer link failed or closed underneath us
    Closed { reason: String },
}

/// Connection negotiation seam between the session and the peer link.
///
/// The initiator calls `create_offer`; the responder answers via
/// `handle_offer`; candidates may arrive at any time and failures applying
/// them are non-fatal (the link can still come up through other paths).
pub trait PeerTransport: Send + 'static {
    /// Start opening the channel locally and produce the offer payload
    fn create_offer(&mut self) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;

    /// Apply a remote offer and produce the answer payload
    fn handle_offer(
        &mut self,
        offer: serde_json::Value,
    ) -> impl Future<Output = anyhow::Result<serde_json::Value>> + Send;

    /// Apply the remote answer on the offering side
    fn handle_answer(
        &mut self,
        answer: serde_json::Value,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Apply a remote candidate; errors are logged by the caller, not fatal
    fn add_candidate(
        &mut self,
        candidate: serde_json::Value,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Take the transport's event stream; called once by the session
    fn take_events(&mut self) -> mpsc::Receiver<TransportEvent>;

    /// Tear the peer link down and release everything derived from it
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

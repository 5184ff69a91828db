//! The iroh-backed [`PeerTransport`] implementation.

use anyhow::{Context, Result};
use iroh::endpoint::Connection;
use iroh::{Endpoint, EndpointAddr, SecretKey};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use roomdrop_core::channel::{ChannelWire, wired};
use roomdrop_core::transport::{PeerTransport, TransportEvent};

use crate::protocol::{self, ALPN};

/// Direct-address discovery usually settles within this window after bind;
/// one refreshed candidate is published once it has.
const CANDIDATE_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// One iroh endpoint per session. The initiator accepts the incoming
/// connection and opens the stream; the responder dials the offer's
/// address and accepts the stream.
pub struct IrohTransport {
    endpoint: Endpoint,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
    setup: Option<JoinHandle<()>>,
}

impl IrohTransport {
    /// Bind a fresh endpoint with a throwaway identity; roles are per
    /// session, so nothing about the key needs to persist
    pub async fn bind() -> Result<Self> {
        let secret_key = SecretKey::generate(&mut rand::rng());
        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![ALPN.to_vec()])
            .bind()
            .await
            .context("failed to bind iroh endpoint")?;
        info!("iroh endpoint ready with id {}", endpoint.id());

        let (events_tx, events_rx) = mpsc::channel(8);
        Ok(Self {
            endpoint,
            events_tx,
            events_rx: Some(events_rx),
            setup: None,
        })
    }

    fn local_addr_payload(&self) -> Result<Value> {
        serde_json::to_value(self.endpoint.addr()).context("failed to encode endpoint address")
    }

    /// Re-publish our address once hole-punching candidates have settled
    fn spawn_candidate_refresh(&self) {
        let endpoint = self.endpoint.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CANDIDATE_REFRESH_DELAY).await;
            match serde_json::to_value(endpoint.addr()) {
                Ok(addr) => {
                    let _ = events.send(TransportEvent::Candidate(addr)).await;
                }
                Err(e) => debug!("skipping candidate refresh: {}", e),
            }
        });
    }
}

impl PeerTransport for IrohTransport {
    async fn create_offer(&mut self) -> Result<Value> {
        let endpoint = self.endpoint.clone();
        let events = self.events_tx.clone();
        self.setup = Some(tokio::spawn(async move {
            match endpoint.accept().await {
                Some(incoming) => match incoming.await {
                    Ok(connection) => {
                        info!("peer connected from {}", connection.remote_id());
                        open_channel(connection, events, true).await;
                    }
                    Err(e) => {
                        error!("failed to accept peer connection: {:#}", e);
                        let _ = events
                            .send(TransportEvent::Closed {
                                reason: e.to_string(),
                            })
                            .await;
                    }
                },
                None => {
                    let _ = events
                        .send(TransportEvent::Closed {
                            reason: "endpoint closed".to_string(),
                        })
                        .await;
                }
            }
        }));
        self.spawn_candidate_refresh();
        self.local_addr_payload()
    }

    async fn handle_offer(&mut self, offer: Value) -> Result<Value> {
        let remote: EndpointAddr =
            serde_json::from_value(offer).context("malformed offer payload")?;
        let endpoint = self.endpoint.clone();
        let events = self.events_tx.clone();
        self.setup = Some(tokio::spawn(async move {
            match endpoint.connect(remote, ALPN).await {
                Ok(connection) => {
                    info!("connected to offering peer {}", connection.remote_id());
                    open_channel(connection, events, false).await;
                }
                Err(e) => {
                    error!("failed to reach offering peer: {:#}", e);
                    let _ = events
                        .send(TransportEvent::Closed {
                            reason: e.to_string(),
                        })
                        .await;
                }
            }
        }));
        self.spawn_candidate_refresh();
        self.local_addr_payload()
    }

    async fn handle_answer(&mut self, answer: Value) -> Result<()> {
        // the responder dials us; its address only seeds the address book
        let remote: EndpointAddr =
            serde_json::from_value(answer).context("malformed answer payload")?;
        if let Err(e) = self.endpoint.add_endpoint_addr(remote) {
            debug!("could not record answer address: {}", e);
        }
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: Value) -> Result<()> {
        let remote: EndpointAddr =
            serde_json::from_value(candidate).context("malformed candidate payload")?;
        self.endpoint
            .add_endpoint_addr(remote)
            .context("failed to apply remote candidate")?;
        Ok(())
    }

    fn take_events(&mut self) -> mpsc::Receiver<TransportEvent> {
        self.events_rx
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1)
    }

    async fn close(&mut self) {
        if let Some(setup) = self.setup.take() {
            setup.abort();
        }
        self.endpoint.close().await;
        info!("iroh endpoint closed");
    }
}

/// Open the single data-channel stream and bridge it to a channel wire
async fn open_channel(connection: Connection, events: mpsc::Sender<TransportEvent>, initiator: bool) {
    let streams = if initiator {
        connection.open_bi().await
    } else {
        connection.accept_bi().await
    };
    let (send, recv) = match streams {
        Ok(streams) => streams,
        Err(e) => {
            error!("failed to open data channel stream: {:#}", e);
            let _ = events
                .send(TransportEvent::Closed {
                    reason: e.to_string(),
                })
                .await;
            return;
        }
    };

    let (open, wire) = wired();
    let ChannelWire {
        mut outbound,
        inbound,
        flushed,
    } = wire;

    // writer: drain queued frames onto the stream, crediting the channel's
    // unsent-byte counter only once each message is on the wire
    tokio::spawn(async move {
        // the connection must outlive the stream tasks
        let _connection = connection;
        let mut send = send;
        while let Some(message) = outbound.recv().await {
            if let Err(e) = protocol::write_message(&mut send, &message).await {
                warn!("data channel write failed: {:#}", e);
                break;
            }
            flushed.mark_flushed(message.len());
        }
        let _ = send.finish();
    });

    // reader: restore message boundaries and feed the session; dropping
    // the inbound sender is how the session learns the channel died
    tokio::spawn(async move {
        let mut recv = recv;
        loop {
            match protocol::read_message(&mut recv).await {
                Ok(message) => {
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("data channel stream ended: {:#}", e);
                    break;
                }
            }
        }
    });

    let _ = events.send(TransportEvent::ChannelOpen(open)).await;
}

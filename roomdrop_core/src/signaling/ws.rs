//! WebSocket relay client.
//!
//! Bridges a relay URL into a [`RelayLink`]: one task writes outgoing
//! requests as JSON text frames, one task parses incoming text frames into
//! notices. When the socket dies both tasks end and the link's notice
//! stream closes, which the session treats as a lost connection.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{ClientRequest, RelayLink, RelayNotice};

const REQUEST_DEPTH: usize = 32;
const NOTICE_DEPTH: usize = 64;

pub struct RelayClient;

impl RelayClient {
    /// Connect to a relay and return the link a session takes ownership of
    pub async fn connect(url: &str) -> Result<RelayLink> {
        let (socket, _) = connect_async(url)
            .await
            .with_context(|| format!("failed to reach signaling relay at {url}"))?;
        tracing::info!("connected to signaling relay at {}", url);

        let (mut sink, mut stream) = socket.split();
        let (request_tx, mut request_rx) = mpsc::channel::<ClientRequest>(REQUEST_DEPTH);
        let (notice_tx, notice_rx) = mpsc::channel::<RelayNotice>(NOTICE_DEPTH);

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("failed to encode relay request: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!("relay write failed: {}", e);
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<RelayNotice>(text.as_str()) {
                            Ok(notice) => {
                                if notice_tx.send(notice).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!("undecodable relay notice: {}", e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("relay closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("relay read failed: {}", e);
                        break;
                    }
                }
            }
            // dropping notice_tx closes the link on the session side
        });

        Ok(RelayLink {
            requests: request_tx,
            notices: notice_rx,
        })
    }
}

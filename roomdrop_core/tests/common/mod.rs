//! In-process stand-ins for the external pieces: a memory relay with the
//! same room/notice semantics as the real signaling service, and a
//! loopback peer transport that completes negotiation without a network.
#![allow(dead_code)]

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;

use roomdrop_core::channel::{OpenChannel, loopback_pair};
use roomdrop_core::signaling::{ClientRequest, RelayLink, RelayNotice};
use roomdrop_core::transport::{PeerTransport, TransportEvent};
use roomdrop_core::{RoomCode, SessionEvent};

const LINK_DEPTH: usize = 64;

struct Room {
    host: String,
    members: Vec<String>,
}

#[derive(Default)]
struct RelayState {
    rooms: HashMap<RoomCode, Room>,
    clients: HashMap<String, mpsc::Sender<RelayNotice>>,
}

/// Room-scoped pub/sub hub with the contract of the external relay
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect one client; the returned link behaves like a live socket,
    /// including peer-disconnected fan-out when it is dropped.
    pub async fn connect(&self) -> RelayLink {
        let client_id = uuid::Uuid::new_v4().to_string();
        let (request_tx, mut request_rx) = mpsc::channel(LINK_DEPTH);
        let (notice_tx, notice_rx) = mpsc::channel(LINK_DEPTH);

        self.state
            .lock()
            .await
            .clients
            .insert(client_id.clone(), notice_tx);

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                dispatch(&state, &client_id, request).await;
            }
            hangup(&state, &client_id).await;
        });

        RelayLink {
            requests: request_tx,
            notices: notice_rx,
        }
    }
}

async fn dispatch(state: &Mutex<RelayState>, from: &str, request: ClientRequest) {
    let mut deliveries: Vec<(mpsc::Sender<RelayNotice>, RelayNotice)> = Vec::new();
    {
        let mut state = state.lock().await;
        match request {
            ClientRequest::CreateRoom { room_code } => {
                state.rooms.insert(
                    room_code.clone(),
                    Room {
                        host: from.to_string(),
                        members: vec![from.to_string()],
                    },
                );
                push_to(&state, &mut deliveries, from, RelayNotice::RoomCreated { room_code });
            }
            ClientRequest::JoinRoom { room_code } => match state.rooms.get(&room_code) {
                Some(room) => {
                    let host = room.host.clone();
                    push_to(
                        &state,
                        &mut deliveries,
                        &host,
                        RelayNotice::ConnectionRequest {
                            room_code,
                            from_id: from.to_string(),
                        },
                    );
                }
                None => {
                    push_to(&state, &mut deliveries, from, RelayNotice::RoomInvalid { room_code });
                }
            },
            ClientRequest::ListRooms => {
                let rooms = state.rooms.keys().cloned().collect();
                push_to(&state, &mut deliveries, from, RelayNotice::RoomList { rooms });
            }
            ClientRequest::AnswerConnection {
                room_code,
                target_id,
                accepted,
            } => {
                if accepted {
                    if let Some(room) = state.rooms.get_mut(&room_code) {
                        room.members.push(target_id.clone());
                    }
                    push_to(
                        &state,
                        &mut deliveries,
                        &target_id,
                        RelayNotice::ConnectionAccepted { room_code },
                    );
                    push_to(
                        &state,
                        &mut deliveries,
                        from,
                        RelayNotice::PeerJoined { peer_id: target_id },
                    );
                } else {
                    push_to(
                        &state,
                        &mut deliveries,
                        &target_id,
                        RelayNotice::ConnectionRejected { room_code },
                    );
                }
            }
            ClientRequest::LeaveRoom { room_code } => {
                leave(&mut state, &mut deliveries, from, &room_code);
            }
            ClientRequest::Signal { room, data } => {
                if let Some(members) = state.rooms.get(&room).map(|r| r.members.clone()) {
                    for member in members.iter().filter(|m| m.as_str() != from) {
                        push_to(
                            &state,
                            &mut deliveries,
                            member,
                            RelayNotice::Signal { data: data.clone() },
                        );
                    }
                }
            }
        }
    }
    for (tx, notice) in deliveries {
        let _ = tx.send(notice).await;
    }
}

fn push_to(
    state: &RelayState,
    deliveries: &mut Vec<(mpsc::Sender<RelayNotice>, RelayNotice)>,
    client: &str,
    notice: RelayNotice,
) {
    if let Some(tx) = state.clients.get(client) {
        deliveries.push((tx.clone(), notice));
    }
}

fn leave(
    state: &mut RelayState,
    deliveries: &mut Vec<(mpsc::Sender<RelayNotice>, RelayNotice)>,
    who: &str,
    room_code: &RoomCode,
) {
    let Some(room) = state.rooms.get_mut(room_code) else {
        return;
    };
    if room.host == who {
        let others: Vec<String> = room
            .members
            .iter()
            .filter(|m| m.as_str() != who)
            .cloned()
            .collect();
        state.rooms.remove(room_code);
        for member in others {
            push_to(
                state,
                deliveries,
                &member,
                RelayNotice::RoomClosed {
                    room_code: room_code.clone(),
                },
            );
        }
    } else {
        room.members.retain(|m| m != who);
        let remaining = room.members.clone();
        for member in remaining {
            push_to(state, deliveries, &member, RelayNotice::PeerDisconnected);
        }
    }
}

async fn hangup(state: &Mutex<RelayState>, client_id: &str) {
    let mut deliveries = Vec::new();
    {
        let mut state = state.lock().await;
        let rooms: Vec<RoomCode> = state
            .rooms
            .iter()
            .filter(|(_, room)| room.members.iter().any(|m| m == client_id))
            .map(|(code, _)| code.clone())
            .collect();
        for code in rooms {
            leave(&mut state, &mut deliveries, client_id, &code);
        }
        state.clients.remove(client_id);
    }
    for (tx, notice) in deliveries {
        let _ = tx.send(notice).await;
    }
}

/// Pre-paired transports that run the offer/answer/candidate dance and then
/// hand each session one half of a loopback channel
pub struct LoopbackTransport {
    shared: Arc<StdMutex<[Option<OpenChannel>; 2]>>,
    side: usize,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
}

impl LoopbackTransport {
    /// Must run inside a tokio runtime (the loopback pumps are tasks)
    pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
        let (a, b) = loopback_pair();
        let shared = Arc::new(StdMutex::new([Some(a), Some(b)]));
        (Self::side(shared.clone(), 0), Self::side(shared, 1))
    }

    fn side(shared: Arc<StdMutex<[Option<OpenChannel>; 2]>>, side: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(8);
        Self {
            shared,
            side,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    async fn open_local_half(&mut self) -> Result<()> {
        let half = self.shared.lock().unwrap()[self.side]
            .take()
            .context("loopback channel half already taken")?;
        self.events_tx
            .send(TransportEvent::Candidate(json!({
                "loopback": self.side,
            })))
            .await
            .ok();
        self.events_tx
            .send(TransportEvent::ChannelOpen(half))
            .await
            .ok();
        Ok(())
    }
}

impl PeerTransport for LoopbackTransport {
    async fn create_offer(&mut self) -> Result<Value> {
        Ok(json!({ "loopback": self.side }))
    }

    async fn handle_offer(&mut self, _offer: Value) -> Result<Value> {
        let answer = json!({ "loopback": self.side });
        self.open_local_half().await?;
        Ok(answer)
    }

    async fn handle_answer(&mut self, _answer: Value) -> Result<()> {
        self.open_local_half().await
    }

    async fn add_candidate(&mut self, _candidate: Value) -> Result<()> {
        Ok(())
    }

    fn take_events(&mut self) -> mpsc::Receiver<TransportEvent> {
        self.events_rx.take().expect("transport events already taken")
    }

    async fn close(&mut self) {}
}

/// Next event or panic; ten seconds is forever for an in-process test
pub async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("session event stream ended")
}

/// Skip events until one matches, returning it
pub async fn wait_until(
    events: &mut mpsc::Receiver<SessionEvent>,
    mut matches: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

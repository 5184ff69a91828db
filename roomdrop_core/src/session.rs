//! The per-session state machine tying relay signaling, the peer
//! transport and the transfer engine together.
//!
//! Each session is an actor task owning every piece of mutable state: the
//! negotiation state, the role, the send queue, the receive assembler and
//! the channel handles. The host application drives it through a
//! [`Session`] handle and observes it through a stream of
//! [`SessionEvent`]s; both are cut off together at teardown.

use bytes::Bytes;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::channel::DataChannel;
use crate::crypto::{self, TransferKey};
use crate::signaling::{ClientRequest, RelayLink, RelayNotice, SignalData};
use crate::transfer::protocol::Frame;
use crate::transfer::receiver::{Completion, ReceiveAssembler};
use crate::transfer::sender::{FramerOutcome, QueueEntry, SendQueue};
use crate::transport::{PeerTransport, TransportEvent};
use crate::{CloseReason, RoomCode, SessionEvent, SessionRole};

const COMMAND_DEPTH: usize = 16;
const EVENT_DEPTH: usize = 128;

/// `Idle → Initialized → Negotiating → Connected → Closed`; `Idle` is the
/// time before [`Session::initialize`] constructs the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationState {
    Initialized,
    Negotiating,
    Connected,
    Closed,
}

#[derive(Debug)]
enum Command {
    CreateRoom,
    JoinRoom,
    ListRooms,
    AnswerConnection { target_id: String, accepted: bool },
    BeginAsInitiator,
    EnqueueFile { path: PathBuf },
    Close,
}

/// Handle to a live session. Dropping it closes the session the same way
/// [`Session::close`] does.
#[derive(Debug, Clone)]
pub struct Session {
    commands: mpsc::Sender<Command>,
}

impl Session {
    /// Spin up a fresh session for `room_code`.
    ///
    /// The actor takes exclusive ownership of the relay link, so starting a
    /// replacement session (after a teardown) never leaves a stale handler
    /// behind — the old actor is gone along with its subscription. Returns
    /// the handle and the event stream that replaces per-call callbacks.
    pub fn initialize<T: PeerTransport>(
        room_code: RoomCode,
        link: RelayLink,
        transport: T,
    ) -> (Session, mpsc::Receiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_DEPTH);
        tokio::spawn(run_session(room_code, link, transport, command_rx, event_tx));
        (
            Session {
                commands: command_tx,
            },
            event_rx,
        )
    }

    /// Register our room code with the relay and start hosting
    pub async fn create_room(&self) -> anyhow::Result<()> {
        self.send(Command::CreateRoom).await
    }

    /// Ask to join the room another device is hosting under this code
    pub async fn join_room(&self) -> anyhow::Result<()> {
        self.send(Command::JoinRoom).await
    }

    /// Ask the relay for the rooms currently visible on it
    pub async fn list_rooms(&self) -> anyhow::Result<()> {
        self.send(Command::ListRooms).await
    }

    /// Answer a pending [`SessionEvent::ConnectionRequest`]
    pub async fn answer_connection(&self, target_id: String, accepted: bool) -> anyhow::Result<()> {
        self.send(Command::AnswerConnection {
            target_id,
            accepted,
        })
        .await
    }

    /// Take the initiator role for this attempt: open the channel locally
    /// and publish the offer. Call when a peer joins the room.
    pub async fn begin_as_initiator(&self) -> anyhow::Result<()> {
        self.send(Command::BeginAsInitiator).await
    }

    /// Queue a file for transfer; it goes out once the channel is open and
    /// every earlier file has been acknowledged
    pub async fn enqueue_file(&self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        self.send(Command::EnqueueFile { path: path.into() }).await
    }

    /// Tear the session down: channel, transport and queue included
    pub async fn close(&self) -> anyhow::Result<()> {
        self.send(Command::Close).await
    }

    async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("session is closed"))
    }
}

async fn run_session<T: PeerTransport>(
    room_code: RoomCode,
    link: RelayLink,
    mut transport: T,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
) {
    // the KDF is deliberately slow; keep it off the scheduler threads
    let key = {
        let code = room_code.clone();
        match tokio::task::spawn_blocking(move || crypto::derive_key(&code)).await {
            Ok(key) => key,
            Err(e) => {
                tracing::error!("key derivation task failed: {}", e);
                let _ = events
                    .send(SessionEvent::Closed {
                        reason: CloseReason::LocalClose,
                    })
                    .await;
                return;
            }
        }
    };

    let transport_events = transport.take_events();
    let (outcome_tx, outcomes) = mpsc::channel(8);
    let queue = SendQueue::new(key.clone(), events.clone(), outcome_tx);

    let actor = SessionActor {
        room_code,
        key,
        state: NegotiationState::Initialized,
        role: None,
        transport,
        transport_events,
        requests: link.requests,
        notices: link.notices,
        commands,
        events,
        channel: None,
        inbound: None,
        queue,
        outcomes,
        assembler: ReceiveAssembler::default(),
    };
    actor.run().await;
}

struct SessionActor<T: PeerTransport> {
    room_code: RoomCode,
    key: TransferKey,
    state: NegotiationState,
    role: Option<SessionRole>,
    transport: T,
    transport_events: mpsc::Receiver<TransportEvent>,
    requests: mpsc::Sender<ClientRequest>,
    notices: mpsc::Receiver<RelayNotice>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
    channel: Option<DataChannel>,
    inbound: Option<mpsc::Receiver<Bytes>>,
    queue: SendQueue,
    outcomes: mpsc::Receiver<FramerOutcome>,
    assembler: ReceiveAssembler,
}

impl<T: PeerTransport> SessionActor<T> {
    async fn run(mut self) {
        tracing::info!("session started for room {}", self.room_code);
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => {
                        self.teardown(CloseReason::LocalClose).await;
                        return;
                    }
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            tracing::warn!("command failed: {:#}", e);
                            let _ = self.events.send(SessionEvent::Error(format!("{e:#}"))).await;
                        }
                    }
                },
                notice = self.notices.recv() => match notice {
                    Some(notice) => {
                        if self.handle_notice(notice).await {
                            return;
                        }
                    }
                    None => {
                        tracing::warn!("signaling relay link dropped");
                        self.teardown(CloseReason::ConnectionLost).await;
                        return;
                    }
                },
                event = self.transport_events.recv() => match event {
                    Some(TransportEvent::Candidate(candidate)) => {
                        self.publish(SignalData::Candidate(candidate)).await;
                    }
                    Some(TransportEvent::ChannelOpen(open)) => {
                        self.on_channel_open(open).await;
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        tracing::warn!("peer transport closed: {}", reason);
                        self.teardown(CloseReason::ConnectionLost).await;
                        return;
                    }
                    None => {
                        self.teardown(CloseReason::ConnectionLost).await;
                        return;
                    }
                },
                raw = recv_inbound(&mut self.inbound) => match raw {
                    Some(raw) => self.handle_frame(raw).await,
                    None => {
                        tracing::info!("data channel closed by peer");
                        self.teardown(CloseReason::ConnectionLost).await;
                        return;
                    }
                },
                outcome = self.outcomes.recv() => {
                    if let Some(outcome) = outcome {
                        self.handle_outcome(outcome).await;
                    }
                },
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> anyhow::Result<()> {
        use anyhow::Context;

        match command {
            Command::CreateRoom => {
                self.requests
                    .send(ClientRequest::CreateRoom {
                        room_code: self.room_code.clone(),
                    })
                    .await
                    .context("signaling relay unavailable")?;
            }
            Command::JoinRoom => {
                // actively asking to join makes us the responder
                self.role.get_or_insert(SessionRole::Responder);
                self.requests
                    .send(ClientRequest::JoinRoom {
                        room_code: self.room_code.clone(),
                    })
                    .await
                    .context("signaling relay unavailable")?;
            }
            Command::ListRooms => {
                self.requests
                    .send(ClientRequest::ListRooms)
                    .await
                    .context("signaling relay unavailable")?;
            }
            Command::AnswerConnection {
                target_id,
                accepted,
            } => {
                self.requests
                    .send(ClientRequest::AnswerConnection {
                        room_code: self.room_code.clone(),
                        target_id,
                        accepted,
                    })
                    .await
                    .context("signaling relay unavailable")?;
            }
            Command::BeginAsInitiator => {
                if self.state == NegotiationState::Closed {
                    return Ok(());
                }
                self.role = Some(SessionRole::Initiator);
                self.state = NegotiationState::Negotiating;
                let offer = self
                    .transport
                    .create_offer()
                    .await
                    .context("failed to create offer")?;
                self.publish(SignalData::Offer(offer)).await;
                tracing::info!("published offer for room {}", self.room_code);
                let _ = self
                    .events
                    .send(SessionEvent::Status("negotiating as initiator".to_string()))
                    .await;
            }
            Command::EnqueueFile { path } => {
                let entry = QueueEntry::from_path(path);
                tracing::debug!("queued {} for transfer", entry.file_name);
                self.queue.enqueue(entry, self.channel.as_ref());
            }
            // Close never reaches here, the event loop intercepts it
            Command::Close => {}
        }
        Ok(())
    }

    /// Returns true when the session reached its terminal state
    async fn handle_notice(&mut self, notice: RelayNotice) -> bool {
        match notice {
            RelayNotice::RoomCreated { room_code } => {
                let _ = self
                    .events
                    .send(SessionEvent::RoomCreated { room_code })
                    .await;
            }
            RelayNotice::RoomList { rooms } => {
                let _ = self.events.send(SessionEvent::RoomList { rooms }).await;
            }
            RelayNotice::ConnectionRequest { room_code, from_id } => {
                let _ = self
                    .events
                    .send(SessionEvent::ConnectionRequest { room_code, from_id })
                    .await;
            }
            RelayNotice::PeerJoined { peer_id } => {
                tracing::info!("peer {} joined room {}", peer_id, self.room_code);
                let _ = self.events.send(SessionEvent::PeerJoined { peer_id }).await;
            }
            RelayNotice::ConnectionAccepted { room_code } => {
                let _ = self
                    .events
                    .send(SessionEvent::ConnectionAccepted { room_code })
                    .await;
            }
            RelayNotice::ConnectionRejected { room_code } => {
                let _ = self
                    .events
                    .send(SessionEvent::ConnectionRejected { room_code })
                    .await;
            }
            RelayNotice::Signal { data } => self.handle_signal(data).await,
            RelayNotice::PeerDisconnected => {
                self.teardown(CloseReason::PeerDisconnected).await;
                return true;
            }
            RelayNotice::RoomClosed { .. } => {
                self.teardown(CloseReason::RoomClosed).await;
                return true;
            }
            RelayNotice::RoomInvalid { .. } => {
                self.teardown(CloseReason::RoomInvalid).await;
                return true;
            }
        }
        false
    }

    /// Single dispatcher for the negotiation envelope. Faults here are
    /// logged and non-fatal; the surrounding application owns any
    /// timeout/retry policy.
    async fn handle_signal(&mut self, data: SignalData) {
        match data {
            SignalData::Offer(offer) if self.role != Some(SessionRole::Initiator) => {
                self.role.get_or_insert(SessionRole::Responder);
                self.state = NegotiationState::Negotiating;
                match self.transport.handle_offer(offer).await {
                    Ok(answer) => {
                        self.publish(SignalData::Answer(answer)).await;
                        tracing::info!("answered offer for room {}", self.room_code);
                        let _ = self
                            .events
                            .send(SessionEvent::Status("negotiating as responder".to_string()))
                            .await;
                    }
                    Err(e) => tracing::warn!("failed to process offer: {:#}", e),
                }
            }
            SignalData::Answer(answer) if self.role == Some(SessionRole::Initiator) => {
                if let Err(e) = self.transport.handle_answer(answer).await {
                    tracing::warn!("failed to apply answer: {:#}", e);
                }
            }
            SignalData::Candidate(candidate) => {
                // a bad candidate is survivable, the link can come up
                // through the remaining ones
                if let Err(e) = self.transport.add_candidate(candidate).await {
                    tracing::warn!("failed to apply remote candidate: {:#}", e);
                }
            }
            other => {
                tracing::debug!("ignoring signal not addressed to our role: {:?}", other);
            }
        }
    }

    async fn on_channel_open(&mut self, open: crate::channel::OpenChannel) {
        tracing::info!("data channel open for room {}", self.room_code);
        self.state = NegotiationState::Connected;
        self.channel = Some(open.channel);
        self.inbound = Some(open.inbound);
        let _ = self.events.send(SessionEvent::ChannelOpen).await;
        // files queued before the channel came up can go out now
        self.queue.drain(self.channel.as_ref());
    }

    async fn handle_frame(&mut self, raw: Bytes) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("undecodable channel message: {}", e);
                return;
            }
        };
        match frame {
            Frame::Ack { file_name } => {
                // meaningful only while we are the sender of that file
                if !self.queue.acknowledge(&file_name, self.channel.as_ref()).await {
                    tracing::debug!("ignoring acknowledgment for inactive file {}", file_name);
                }
            }
            Frame::Metadata(metadata) => {
                self.assembler.begin(metadata);
                let _ = self
                    .events
                    .send(SessionEvent::ReceiveProgress { percent: 0.0 })
                    .await;
            }
            Frame::Chunk(chunk) => {
                if let Some(percent) = self.assembler.push(chunk) {
                    let _ = self
                        .events
                        .send(SessionEvent::ReceiveProgress { percent })
                        .await;
                }
            }
            Frame::Eof => match self.assembler.complete(&self.key).await {
                Completion::Delivered(file) => {
                    let ack = Frame::Ack {
                        file_name: file.file_name.clone(),
                    };
                    let _ = self.events.send(SessionEvent::FileReceived(file)).await;
                    if let Some(channel) = &self.channel {
                        if let Err(e) = channel.send(&ack) {
                            tracing::warn!("failed to acknowledge file: {:#}", e);
                        }
                    }
                    let _ = self
                        .events
                        .send(SessionEvent::ReceiveProgress { percent: 0.0 })
                        .await;
                }
                Completion::Rejected { file_name } => {
                    // no acknowledgment: the sender's queue stays parked on
                    // this file, recovery is a fresh session
                    tracing::warn!("not acknowledging {}", file_name);
                    let _ = self
                        .events
                        .send(SessionEvent::ReceiveProgress { percent: 0.0 })
                        .await;
                }
                Completion::Ignored => {}
            },
        }
    }

    async fn handle_outcome(&mut self, outcome: FramerOutcome) {
        match outcome {
            FramerOutcome::EofSent { file_name } => {
                tracing::debug!("finished streaming {}, awaiting acknowledgment", file_name);
            }
            FramerOutcome::Failed { file_name, reason } => {
                self.queue
                    .fail_active(&file_name, reason, self.channel.as_ref())
                    .await;
            }
        }
    }

    async fn publish(&mut self, data: SignalData) {
        let request = ClientRequest::Signal {
            room: self.room_code.clone(),
            data,
        };
        if self.requests.send(request).await.is_err() {
            tracing::warn!("signaling relay unavailable, dropped outgoing signal");
        }
    }

    async fn teardown(&mut self, reason: CloseReason) {
        if self.state == NegotiationState::Closed {
            return;
        }
        tracing::info!("session for room {} closing: {}", self.room_code, reason);
        self.state = NegotiationState::Closed;

        if reason == CloseReason::LocalClose {
            let _ = self
                .requests
                .send(ClientRequest::LeaveRoom {
                    room_code: self.room_code.clone(),
                })
                .await;
        }

        self.queue.clear();
        self.assembler.reset();
        self.channel = None;
        self.inbound = None;
        self.transport.close().await;

        let _ = self.events.send(SessionEvent::Closed { reason }).await;
    }
}

async fn recv_inbound(inbound: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match inbound {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

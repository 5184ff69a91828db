//! Relay signaling protocol: room-scoped pub/sub carrying JSON control
//! events and the opaque offer/answer/candidate envelope.
//!
//! The relay itself is an external service. A session talks to it through
//! a [`RelayLink`], produced by [`ws::RelayClient`] in production or by an
//! in-process stand-in under test.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::RoomCode;

pub mod ws;

/// Requests a client publishes to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientRequest {
    CreateRoom {
        room_code: RoomCode,
    },
    JoinRoom {
        room_code: RoomCode,
    },
    ListRooms,
    /// Accept or decline a pending join request
    AnswerConnection {
        room_code: RoomCode,
        target_id: String,
        accepted: bool,
    },
    LeaveRoom {
        room_code: RoomCode,
    },
    /// Opaque negotiation envelope forwarded to the room's other members
    Signal {
        room: RoomCode,
        data: SignalData,
    },
}

/// Events the relay pushes to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayNotice {
    RoomCreated { room_code: RoomCode },
    RoomList { rooms: Vec<RoomCode> },
    ConnectionRequest { room_code: RoomCode, from_id: String },
    PeerJoined { peer_id: String },
    RoomInvalid { room_code: RoomCode },
    ConnectionAccepted { room_code: RoomCode },
    ConnectionRejected { room_code: RoomCode },
    PeerDisconnected,
    RoomClosed { room_code: RoomCode },
    Signal { data: SignalData },
}

/// The signal envelope's payload: exactly one of offer, answer or
/// candidate, each an opaque blob owned by the peer transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalData {
    Offer(serde_json::Value),
    Answer(serde_json::Value),
    Candidate(serde_json::Value),
}

/// One client's live connection to a relay. The session actor takes
/// exclusive ownership of the notice receiver, so exactly one handler
/// processes relay events per session.
#[derive(Debug)]
pub struct RelayLink {
    pub requests: mpsc::Sender<ClientRequest>,
    pub notices: mpsc::Receiver<RelayNotice>,
}

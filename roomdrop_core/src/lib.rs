//! Peer-to-peer file transfer keyed by a shared room code.
//!
//! Two devices that agree on a 6-digit code out-of-band negotiate a direct
//! data channel through a signaling relay, derive the same AES-256-GCM key
//! from the code, and stream files as encrypted 64 KiB chunks. File bytes
//! never touch a server; the relay only carries connection-setup traffic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod channel;
pub mod crypto;
pub mod session;
pub mod signaling;
pub mod transfer;
pub mod transport;

pub use session::Session;
pub use transfer::protocol::{Frame, TransferMetadata};

/// Room codes are exactly this many ASCII digits
pub const ROOM_CODE_LEN: usize = 6;

/// Shared secret and relay room identifier in one: the 6-digit code both
/// peers hold. It is also the sole key-derivation input, so a mismatch
/// surfaces only as decrypt failures on the far side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("room codes are exactly {ROOM_CODE_LEN} ASCII digits")]
pub struct InvalidRoomCode;

impl RoomCode {
    pub fn parse(code: &str) -> Result<Self, InvalidRoomCode> {
        let code = code.trim();
        if code.len() == ROOM_CODE_LEN && code.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(code.to_string()))
        } else {
            Err(InvalidRoomCode)
        }
    }

    /// Generate a fresh random code for a hosting device
    pub fn generate() -> Self {
        use rand::Rng;
        Self(format!("{:06}", rand::rng().random_range(0..1_000_000u32)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = InvalidRoomCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Role assigned per connection attempt, not per user identity: whichever
/// side sees a peer join its room initiates the offer for that session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Responder,
}

/// A fully reassembled and decrypted file delivered to the host application
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub file_name: String,
    pub mime_type: String,
    /// Decrypted payload length in bytes
    pub size: u64,
    pub payload: Vec<u8>,
}

/// Why a session reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The host application closed the session
    LocalClose,
    /// The relay reported the remote peer gone
    PeerDisconnected,
    /// The relay closed the room
    RoomClosed,
    /// The relay did not recognise the room code
    RoomInvalid,
    /// The relay link or the data channel dropped out from under us
    ConnectionLost,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::LocalClose => "closed locally",
            CloseReason::PeerDisconnected => "peer disconnected",
            CloseReason::RoomClosed => "room closed",
            CloseReason::RoomInvalid => "room code invalid",
            CloseReason::ConnectionLost => "connection lost",
        };
        f.write_str(text)
    }
}

/// Report from a session to the host application
#[derive(Debug)]
pub enum SessionEvent {
    Status(String),

    /// The relay registered our room
    RoomCreated { room_code: RoomCode },
    /// Open rooms visible on the relay
    RoomList { rooms: Vec<RoomCode> },
    /// A device asked to join our room; answer with
    /// [`Session::answer_connection`]
    ConnectionRequest { room_code: RoomCode, from_id: String },
    /// The host accepted our join request
    ConnectionAccepted { room_code: RoomCode },
    /// The host declined our join request
    ConnectionRejected { room_code: RoomCode },
    /// A peer entered our room; the host should now call
    /// [`Session::begin_as_initiator`]
    PeerJoined { peer_id: String },

    /// The data channel is open; files can flow in both directions
    ChannelOpen,

    /// Outbound progress for the active file. Reaches 100 only once the
    /// far side has acknowledged the file.
    SendProgress { file_name: String, percent: f32 },
    /// Inbound progress for the file currently being reassembled
    ReceiveProgress { percent: f32 },
    /// A file arrived, decrypted and authenticated
    FileReceived(ReceivedFile),
    /// The active outbound file failed and was skipped
    TransferFailed { file_name: String, reason: String },

    Error(String),

    /// Terminal: the session tore down and will emit nothing further
    Closed { reason: CloseReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_accepts_six_digits() {
        let code = RoomCode::parse("482913").unwrap();
        assert_eq!(code.as_str(), "482913");
        assert_eq!(code.to_string(), "482913");
    }

    #[test]
    fn room_code_trims_whitespace() {
        assert_eq!(RoomCode::parse(" 000042 ").unwrap().as_str(), "000042");
    }

    #[test]
    fn room_code_rejects_bad_input() {
        assert_eq!(RoomCode::parse("12345"), Err(InvalidRoomCode));
        assert_eq!(RoomCode::parse("1234567"), Err(InvalidRoomCode));
        assert_eq!(RoomCode::parse("12a456"), Err(InvalidRoomCode));
        assert_eq!(RoomCode::parse(""), Err(InvalidRoomCode));
    }

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..32 {
            let code = RoomCode::generate();
            assert!(RoomCode::parse(code.as_str()).is_ok());
        }
    }
}

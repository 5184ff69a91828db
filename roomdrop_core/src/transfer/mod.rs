//! The chunked, encrypted, flow-controlled file transfer scheme.
//!
//! One file at a time per direction: a metadata frame, its ciphertext in
//! 64 KiB chunks, a terminator, then an acknowledgment flowing back. The
//! send queue only advances on that acknowledgment.

pub mod constants;
pub mod protocol;
pub(crate) mod receiver;
pub(crate) mod sender;

pub use constants::{CHUNK_SIZE, HIGH_WATER_MARK};

//! Production peer transport over iroh.
//!
//! Negotiation payloads carry serialized endpoint addresses: the offer is
//! the initiator's address, the answer the responder's, and candidates are
//! refreshed addresses published once discovery settles. The data channel
//! rides a single bidirectional QUIC stream with length-prefixed messages,
//! reaching the peer by UDP hole punch or relay fallback.

pub mod protocol;
pub mod transport;

pub use protocol::ALPN;
pub use transport::IrohTransport;

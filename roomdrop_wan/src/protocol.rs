//! Stream codec for data-channel messages riding an iroh stream.
//!
//! QUIC streams are byte streams, so message boundaries are restored with
//! a u32 length prefix. The payload is an already-encoded channel frame.

use anyhow::{Result, bail};
use bytes::Bytes;

/// ALPN protocol identifier for roomdrop data channels
pub const ALPN: &[u8] = b"roomdrop/0";

/// A frame is at most one tag byte plus a 64 KiB chunk; anything bigger on
/// the wire is a peer speaking a different protocol
pub const MAX_MESSAGE_LEN: usize = 128 * 1024;

/// Write one length-prefixed message to the stream
pub async fn write_message(send: &mut iroh::endpoint::SendStream, message: &[u8]) -> Result<()> {
    let len = (message.len() as u32).to_be_bytes();
    send.write_all(&len).await?;
    send.write_all(message).await?;
    Ok(())
}

/// Read one length-prefixed message from the stream
pub async fn read_message(recv: &mut iroh::endpoint::RecvStream) -> Result<Bytes> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        bail!("oversized channel message ({len} bytes)");
    }

    let mut buf = vec![0u8; len];
    recv.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

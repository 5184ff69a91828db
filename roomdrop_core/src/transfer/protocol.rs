//! Data-channel frame codec.
//!
//! Every channel message is one frame: a single tag byte followed by the
//! payload. Control frames carry JSON, chunks carry raw ciphertext. The
//! explicit tag removes any ambiguity between metadata, terminator and
//! acknowledgment messages sharing one handler.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const TAG_CHUNK: u8 = 0x00;
const TAG_METADATA: u8 = 0x01;
const TAG_EOF: u8 = 0x02;
const TAG_ACK: u8 = 0x03;

/// Announcement preceding a file's chunk stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub file_name: String,
    /// Ciphertext length including the auth tag, for receive-side progress
    pub cipher_byte_length: u64,
    pub mime_type: String,
    /// The file's AEAD nonce, base64
    pub iv_base64: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// New current file on the receive side; resets the receive buffer
    Metadata(TransferMetadata),
    /// One ciphertext slice, at most [`super::CHUNK_SIZE`] bytes
    Chunk(Bytes),
    /// End of the current file's chunks
    Eof,
    /// Delivery confirmed for the named file; releases the sender's queue
    Ack { file_name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty channel message")]
    Empty,
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    #[error("malformed metadata frame: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("acknowledgment frame is not valid UTF-8")]
    AckEncoding,
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let buf = match self {
            Frame::Metadata(metadata) => {
                let body = serde_json::to_vec(metadata)?;
                let mut buf = BytesMut::with_capacity(1 + body.len());
                buf.put_u8(TAG_METADATA);
                buf.put_slice(&body);
                buf
            }
            Frame::Chunk(chunk) => {
                let mut buf = BytesMut::with_capacity(1 + chunk.len());
                buf.put_u8(TAG_CHUNK);
                buf.put_slice(chunk);
                buf
            }
            Frame::Eof => {
                let mut buf = BytesMut::with_capacity(1);
                buf.put_u8(TAG_EOF);
                buf
            }
            Frame::Ack { file_name } => {
                let mut buf = BytesMut::with_capacity(1 + file_name.len());
                buf.put_u8(TAG_ACK);
                buf.put_slice(file_name.as_bytes());
                buf
            }
        };
        Ok(buf.freeze())
    }

    pub fn decode(raw: Bytes) -> Result<Frame, ProtocolError> {
        let Some(&tag) = raw.first() else {
            return Err(ProtocolError::Empty);
        };
        let body = raw.slice(1..);
        match tag {
            TAG_CHUNK => Ok(Frame::Chunk(body)),
            TAG_METADATA => Ok(Frame::Metadata(serde_json::from_slice(&body)?)),
            TAG_EOF => Ok(Frame::Eof),
            TAG_ACK => {
                let file_name = std::str::from_utf8(&body)
                    .map_err(|_| ProtocolError::AckEncoding)?
                    .to_string();
                Ok(Frame::Ack { file_name })
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) {
        let encoded = frame.encode().unwrap();
        assert_eq!(Frame::decode(encoded).unwrap(), frame);
    }

    #[test]
    fn frames_round_trip() {
        round_trip(Frame::Metadata(TransferMetadata {
            file_name: "notes.txt".into(),
            cipher_byte_length: 27,
            mime_type: "text/plain".into(),
            iv_base64: "AAAAAAAAAAAAAAAA".into(),
        }));
        round_trip(Frame::Chunk(Bytes::from_static(b"\x00\x01\x02raw bytes")));
        round_trip(Frame::Eof);
        round_trip(Frame::Ack {
            file_name: "notes.txt".into(),
        });
    }

    #[test]
    fn metadata_uses_camel_case_wire_names() {
        let frame = Frame::Metadata(TransferMetadata {
            file_name: "a".into(),
            cipher_byte_length: 1,
            mime_type: "application/octet-stream".into(),
            iv_base64: "xx".into(),
        });
        let encoded = frame.encode().unwrap();
        let json = std::str::from_utf8(&encoded[1..]).unwrap();
        assert!(json.contains("\"fileName\""));
        assert!(json.contains("\"cipherByteLength\""));
        assert!(json.contains("\"mimeType\""));
        assert!(json.contains("\"ivBase64\""));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Frame::decode(Bytes::new()),
            Err(ProtocolError::Empty)
        ));
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[0x7f, 1, 2])),
            Err(ProtocolError::UnknownTag(0x7f))
        ));
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[TAG_METADATA, b'{'])),
            Err(ProtocolError::Metadata(_))
        ));
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[TAG_ACK, 0xff, 0xfe])),
            Err(ProtocolError::AckEncoding)
        ));
    }

    #[test]
    fn empty_chunk_is_representable() {
        round_trip(Frame::Chunk(Bytes::new()));
    }
}

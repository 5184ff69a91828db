//! Receive-side reassembly: metadata, chunk buffer, terminator handling.

use bytes::Bytes;

use super::protocol::TransferMetadata;
use crate::ReceivedFile;
use crate::crypto::{self, TransferKey};

/// Outcome of the completion routine run on the terminator frame
#[derive(Debug)]
pub(crate) enum Completion {
    /// Decrypted and authenticated; deliver the file and acknowledge it
    Delivered(ReceivedFile),
    /// Auth-tag mismatch or malformed ciphertext; no acknowledgment goes out
    Rejected { file_name: String },
    /// Terminator without metadata or without any buffered chunks
    Ignored,
}

/// Reconstructs one file at a time from the inbound frame sequence.
///
/// Exactly one metadata record is current at any moment; chunks belong to
/// it, and the buffer is cleared whenever a file completes either way.
#[derive(Default)]
pub(crate) struct ReceiveAssembler {
    metadata: Option<TransferMetadata>,
    buffer: Vec<Bytes>,
    received_bytes: u64,
}

impl ReceiveAssembler {
    /// A new metadata record starts a fresh file and drops any stale chunks
    pub fn begin(&mut self, metadata: TransferMetadata) {
        tracing::debug!(
            "incoming file {} ({} cipher bytes)",
            metadata.file_name,
            metadata.cipher_byte_length
        );
        self.metadata = Some(metadata);
        self.buffer.clear();
        self.received_bytes = 0;
    }

    /// Append a ciphertext chunk; returns the progress percentage when a
    /// metadata record is current, clamped to 100.
    pub fn push(&mut self, chunk: Bytes) -> Option<f32> {
        self.received_bytes += chunk.len() as u64;
        self.buffer.push(chunk);
        self.metadata.as_ref().map(|m| {
            if m.cipher_byte_length == 0 {
                100.0
            } else {
                ((self.received_bytes as f32 / m.cipher_byte_length as f32) * 100.0).min(100.0)
            }
        })
    }

    /// Run on the terminator frame. Requires a current metadata record and
    /// a non-empty buffer; with either missing this logs and changes
    /// nothing. Both real outcomes reset metadata, buffer and byte counter.
    pub async fn complete(&mut self, key: &TransferKey) -> Completion {
        let metadata = match self.metadata.take() {
            Some(m) if !self.buffer.is_empty() => m,
            restore => {
                self.metadata = restore;
                tracing::warn!("terminator arrived without metadata or buffered chunks, ignoring");
                return Completion::Ignored;
            }
        };

        let cipher_len: usize = self.buffer.iter().map(|c| c.len()).sum();
        if cipher_len as u64 != metadata.cipher_byte_length {
            tracing::warn!(
                "reassembled {} bytes for {} but metadata declared {}",
                cipher_len,
                metadata.file_name,
                metadata.cipher_byte_length
            );
        }
        let mut cipher = Vec::with_capacity(cipher_len);
        for chunk in self.buffer.drain(..) {
            cipher.extend_from_slice(&chunk);
        }
        self.received_bytes = 0;

        let opened = match crypto::decode_nonce(&metadata.iv_base64) {
            Ok(nonce) => {
                let key = key.clone();
                match tokio::task::spawn_blocking(move || key.open(&nonce, &cipher)).await {
                    Ok(result) => result,
                    Err(_) => Err(crypto::CryptoError::Open),
                }
            }
            Err(e) => Err(e),
        };

        match opened {
            Ok(payload) => {
                tracing::info!("received {} ({} bytes)", metadata.file_name, payload.len());
                Completion::Delivered(ReceivedFile {
                    file_name: metadata.file_name,
                    mime_type: metadata.mime_type,
                    size: payload.len() as u64,
                    payload,
                })
            }
            Err(e) => {
                tracing::warn!("failed to decrypt {}: {}", metadata.file_name, e);
                Completion::Rejected {
                    file_name: metadata.file_name,
                }
            }
        }
    }

    /// Session teardown: drop everything mid-flight
    pub fn reset(&mut self) {
        self.metadata = None;
        self.buffer.clear();
        self.received_bytes = 0;
    }
}

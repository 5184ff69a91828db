//! Send queue and framer: serializes queued files into one in-flight
//! transfer at a time, gated by the far side's acknowledgment.

use bytes::Bytes;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::constants::{BACKPRESSURE_POLL, CHUNK_SIZE, HIGH_WATER_MARK};
use super::protocol::{Frame, TransferMetadata};
use crate::SessionEvent;
use crate::channel::DataChannel;
use crate::crypto::{self, TransferKey};

/// One queued file waiting for its turn on the channel
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
}

impl QueueEntry {
    pub fn from_path(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown_file".to_string());
        let mime_type = mime_for_path(&path);
        Self {
            path,
            file_name,
            mime_type,
        }
    }
}

/// What a framer task reports back to the session
#[derive(Debug)]
pub(crate) enum FramerOutcome {
    /// Metadata, chunks and terminator are all queued; now awaiting the ack
    EofSent { file_name: String },
    /// Read/encrypt/channel failure; the file is skipped, not retried
    Failed { file_name: String, reason: String },
}

struct ActiveSend {
    file_name: String,
    task: JoinHandle<()>,
}

/// FIFO of outbound files with a single sending slot.
///
/// The slot is released only by the file's acknowledgment or by a framer
/// failure; there is no timeout-based advancement.
pub(crate) struct SendQueue {
    key: TransferKey,
    queue: VecDeque<QueueEntry>,
    active: Option<ActiveSend>,
    events: mpsc::Sender<SessionEvent>,
    outcomes: mpsc::Sender<FramerOutcome>,
}

impl SendQueue {
    pub fn new(
        key: TransferKey,
        events: mpsc::Sender<SessionEvent>,
        outcomes: mpsc::Sender<FramerOutcome>,
    ) -> Self {
        Self {
            key,
            queue: VecDeque::new(),
            active: None,
            events,
            outcomes,
        }
    }

    pub fn enqueue(&mut self, entry: QueueEntry, channel: Option<&DataChannel>) {
        self.queue.push_back(entry);
        self.drain(channel);
    }

    /// Start the next transfer unless one is running, the queue is empty,
    /// or the channel is not open yet.
    pub fn drain(&mut self, channel: Option<&DataChannel>) {
        if self.active.is_some() {
            return;
        }
        let Some(channel) = channel else { return };
        let Some(entry) = self.queue.pop_front() else {
            return;
        };

        tracing::debug!("starting transfer of {}", entry.file_name);
        let file_name = entry.file_name.clone();
        let task = tokio::spawn(run_framer(
            entry,
            self.key.clone(),
            channel.clone(),
            self.events.clone(),
            self.outcomes.clone(),
        ));
        self.active = Some(ActiveSend { file_name, task });
    }

    /// An acknowledgment naming the active file marks it fully delivered:
    /// report 100, free the slot, move on. Returns false for acks that do
    /// not match the file in flight.
    pub async fn acknowledge(&mut self, file_name: &str, channel: Option<&DataChannel>) -> bool {
        match &self.active {
            Some(active) if active.file_name == file_name => {}
            _ => return false,
        }
        let _ = self
            .events
            .send(SessionEvent::SendProgress {
                file_name: file_name.to_string(),
                percent: 100.0,
            })
            .await;
        self.active = None;
        self.drain(channel);
        true
    }

    /// The active framer died; skip the file and keep the queue moving
    pub async fn fail_active(
        &mut self,
        file_name: &str,
        reason: String,
        channel: Option<&DataChannel>,
    ) {
        match &self.active {
            Some(active) if active.file_name == file_name => {}
            _ => return,
        }
        let _ = self
            .events
            .send(SessionEvent::TransferFailed {
                file_name: file_name.to_string(),
                reason,
            })
            .await;
        self.active = None;
        self.drain(channel);
    }

    /// Session teardown: abort the in-flight transfer and drop the backlog
    pub fn clear(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
        self.queue.clear();
    }
}

async fn run_framer(
    entry: QueueEntry,
    key: TransferKey,
    channel: DataChannel,
    events: mpsc::Sender<SessionEvent>,
    outcomes: mpsc::Sender<FramerOutcome>,
) {
    let file_name = entry.file_name.clone();
    let outcome = match frame_file(entry, key, &channel, &events).await {
        Ok(()) => FramerOutcome::EofSent { file_name },
        Err(e) => {
            tracing::warn!("transfer of {} failed: {:#}", file_name, e);
            FramerOutcome::Failed {
                file_name,
                reason: format!("{e:#}"),
            }
        }
    };
    let _ = outcomes.send(outcome).await;
}

async fn frame_file(
    entry: QueueEntry,
    key: TransferKey,
    channel: &DataChannel,
    events: &mpsc::Sender<SessionEvent>,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let plain = tokio::fs::read(&entry.path)
        .await
        .with_context(|| format!("failed to read {}", entry.path.display()))?;

    let nonce = crypto::generate_nonce();
    let sealed = {
        let key = key.clone();
        tokio::task::spawn_blocking(move || key.seal(&nonce, &plain))
            .await
            .context("encryption task failed")??
    };

    let metadata = TransferMetadata {
        file_name: entry.file_name.clone(),
        cipher_byte_length: sealed.len() as u64,
        mime_type: entry.mime_type.clone(),
        iv_base64: crypto::encode_nonce(&nonce),
    };
    channel.send(&Frame::Metadata(metadata))?;

    let cipher = Bytes::from(sealed);
    let total = cipher.len();
    let mut offset = 0usize;
    while offset < total {
        let end = (offset + CHUNK_SIZE).min(total);
        wait_for_capacity(channel).await;
        channel.send(&Frame::Chunk(cipher.slice(offset..end)))?;

        // bytes delivered before this chunk, so the value stays below 100;
        // the ack is what pushes it to 100
        let percent = (offset as f32 / total as f32) * 100.0;
        let _ = events
            .send(SessionEvent::SendProgress {
                file_name: entry.file_name.clone(),
                percent,
            })
            .await;
        offset = end;
    }

    channel.send(&Frame::Eof)?;
    Ok(())
}

/// The sole backpressure mechanism: cooperative polling until the channel's
/// outstanding unsent bytes drop back under the high-water mark.
async fn wait_for_capacity(channel: &DataChannel) {
    while channel.buffered_amount() > HIGH_WATER_MARK {
        tokio::time::sleep(BACKPRESSURE_POLL).await;
    }
}

fn mime_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("log") | Some("md") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
    .to_string()
}

//! The connected client set.
//!
//! Every open channel is represented by the sending half of its outbox. The
//! set holds the only sender, so removing a channel from the set also ends
//! that channel's writer task.

use std::collections::HashMap;
use std::sync::Arc;

use linq_common::SignalMessage;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Queued frames per channel before a slow reader counts as a send failure.
pub const OUTBOX_CAPACITY: usize = 128;

pub type ChannelId = Uuid;

/// Longest payload prefix that goes into a log line.
const LOG_PREVIEW_CHARS: usize = 64;

fn preview(text: &str) -> String {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ChannelId>,
}

#[derive(Clone, Default)]
pub struct ClientSet {
    channels: Arc<Mutex<HashMap<ChannelId, mpsc::Sender<String>>>>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh bounded outbox for one channel.
    pub fn outbox() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(OUTBOX_CAPACITY)
    }

    /// Register a channel and return the id it is known by.
    pub async fn on_connect(&self, outbox: mpsc::Sender<String>) -> ChannelId {
        let id = Uuid::new_v4();
        let mut channels = self.channels.lock().await;
        channels.insert(id, outbox);
        info!("channel {} registered ({} connected)", id, channels.len());
        id
    }

    /// Handle one inbound frame from `from`.
    ///
    /// Frames that do not decode, or decode to neither a description nor a
    /// candidate, are dropped. The sender is not disconnected for it.
    pub async fn on_message(&self, from: ChannelId, text: &str) -> BroadcastReport {
        match SignalMessage::decode(text) {
            Ok(message @ SignalMessage::Unrecognized(_)) => {
                warn!(
                    "dropping {} message from {} ({} bytes): {}",
                    message.label(),
                    from,
                    text.len(),
                    preview(text)
                );
                BroadcastReport::default()
            }
            Ok(message) => {
                debug!("forwarding {} from {}", message.label(), from);
                self.broadcast(from, text).await
            }
            Err(err) => {
                warn!(
                    "dropping message from {} ({} bytes): {}: {}",
                    from,
                    text.len(),
                    err,
                    preview(text)
                );
                BroadcastReport::default()
            }
        }
    }

    /// Send `text` to every registered channel except `from`.
    ///
    /// A channel whose outbox is closed or full is removed on the spot; the
    /// remaining channels still receive the frame.
    pub async fn broadcast(&self, from: ChannelId, text: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut channels = self.channels.lock().await;
        channels.retain(|id, outbox| {
            if *id == from {
                return true;
            }
            match outbox.try_send(text.to_owned()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(err) => {
                    warn!("evicting channel {}: {}", id, err);
                    report.evicted.push(*id);
                    false
                }
            }
        });
        report
    }

    /// Remove a channel. Returns `false` when it was already gone.
    pub async fn on_disconnect(&self, id: ChannelId) -> bool {
        let mut channels = self.channels.lock().await;
        let removed = channels.remove(&id).is_some();
        if removed {
            info!("channel {} removed ({} connected)", id, channels.len());
        }
        removed
    }

    pub async fn contains(&self, id: ChannelId) -> bool {
        self.channels.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

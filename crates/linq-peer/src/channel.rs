//! Transport channel between a peer and the relay.
//!
//! A channel is a pair of bounded queues of text frames. For a WebSocket
//! connection one pump task per direction moves frames between the socket and
//! the queues, so a frame is either written whole or not at all.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use linq_common::SignalMessage;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::NegotiationError;

pub const CHANNEL_CAPACITY: usize = 64;

pub struct TransportChannel {
    sender: ChannelSender,
    receiver: ChannelReceiver,
}

/// Sending half. Cloneable; the channel closes once every clone is dropped.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<String>,
}

/// Receiving half. Yields frames in arrival order.
pub struct ChannelReceiver {
    rx: mpsc::Receiver<String>,
}

impl TransportChannel {
    pub fn from_parts(tx: mpsc::Sender<String>, rx: mpsc::Receiver<String>) -> Self {
        Self {
            sender: ChannelSender { tx },
            receiver: ChannelReceiver { rx },
        }
    }

    /// Two channels wired to each other in memory.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self::from_parts(a_tx, a_rx), Self::from_parts(b_tx, b_rx))
    }

    /// Dial the relay's WebSocket endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("connected to signaling relay {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    warn!("failed to send signaling frame: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = in_tx.closed() => break,
                    msg = read.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                if in_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                debug!("signaling read error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("signaling reader finished");
        });

        Ok(Self::from_parts(out_tx, in_rx))
    }

    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

impl ChannelSender {
    pub async fn send(&self, message: &SignalMessage) -> Result<(), NegotiationError> {
        let text = message
            .encode()
            .map_err(|e| NegotiationError::Encoding(e.to_string()))?;
        self.send_text(text).await
    }

    pub async fn send_text(&self, text: String) -> Result<(), NegotiationError> {
        self.tx
            .send(text)
            .await
            .map_err(|_| NegotiationError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ChannelReceiver {
    /// Next inbound frame, or `None` once the channel is closed.
    pub async fn receive(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

//! Negotiation session: drives one peer connection over a transport channel.
//!
//! A single driver task owns the [`PeerConnection`]. It multiplexes the stop
//! signal, connectivity events and inbound signaling frames, so state is only
//! ever mutated from one place. Observers read the published
//! [`SessionStatus`] through a watch channel.

use std::future::Future;

use linq_common::{SdpKind, SignalMessage};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelReceiver, ChannelSender, TransportChannel};
use crate::connectivity::{Connectivity, ConnectivityEvent, EventStream};
use crate::error::NegotiationError;
use crate::peer::{PeerConnection, PeerState, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: PeerState,
    /// Set once the session ends because of an error.
    pub error: Option<NegotiationError>,
}

impl SessionStatus {
    fn new() -> Self {
        Self {
            state: PeerState::New,
            error: None,
        }
    }
}

pub struct NegotiationSession {
    role: Role,
    stop_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<SessionStatus>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl NegotiationSession {
    /// Spawn the driver task. An initiator sends its offer right away; a
    /// responder waits for one.
    pub fn start<C>(
        role: Role,
        backend: C,
        events: EventStream,
        channel: TransportChannel,
    ) -> Self
    where
        C: Connectivity + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(SessionStatus::new());

        info!("starting negotiation session as {}", role);
        let pc = PeerConnection::new(role, backend);
        let driver = tokio::spawn(drive(pc, events, channel, stop_rx, status_tx));

        Self {
            role,
            stop_tx,
            status_rx,
            driver: Mutex::new(Some(driver)),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    /// A receiver that observes every published status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Resolve once the connection is `Connected`, or with the error that
    /// ended the session first.
    pub async fn wait_connected(&self) -> Result<(), NegotiationError> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|s| s.state == PeerState::Connected || s.state.is_terminal())
            .await
            .map_err(|_| NegotiationError::Stopped)?
            .clone();

        match status.state {
            PeerState::Connected => Ok(()),
            _ => Err(status.error.unwrap_or(NegotiationError::Stopped)),
        }
    }

    /// Resolve with the final status once the session has ended.
    pub async fn wait_finished(&self) -> SessionStatus {
        let mut rx = self.status_rx.clone();
        if let Ok(status) = rx.wait_for(|s| s.state.is_terminal()).await {
            return status.clone();
        }
        self.status()
    }

    /// Stop the driver and release the connection. Later calls return the
    /// same final status.
    pub async fn stop(&self) -> SessionStatus {
        self.stop_tx.send_replace(true);
        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("negotiation driver panicked: {}", e);
            }
        }
        self.status()
    }
}

impl Drop for NegotiationSession {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

async fn drive<C: Connectivity>(
    mut pc: PeerConnection<C>,
    mut events: EventStream,
    channel: TransportChannel,
    mut stop_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<SessionStatus>,
) {
    let (sender, mut receiver) = channel.split();

    let result = negotiate(
        &mut pc,
        &mut events,
        &sender,
        &mut receiver,
        &mut stop_rx,
        &status_tx,
    )
    .await;

    let error = match result {
        Ok(()) => {
            info!("negotiation session stopped");
            None
        }
        Err(NegotiationError::ChannelClosed) => {
            warn!("signaling channel closed, ending session");
            Some(NegotiationError::ChannelClosed)
        }
        Err(e) => {
            warn!("negotiation failed: {}", e);
            pc.fail();
            Some(e)
        }
    };

    pc.close().await;
    status_tx.send_replace(SessionStatus {
        state: pc.state(),
        error,
    });
}

enum Input {
    Event(ConnectivityEvent),
    Frame(String),
}

/// Resolves once stop was requested or the session handle is gone.
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

/// Run `work` unless stop wins first. Sends on a full channel and slow
/// backend calls are abandoned when it does.
async fn until_stopped<F: Future>(
    stop_rx: &mut watch::Receiver<bool>,
    work: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = stopped(stop_rx) => None,
        out = work => Some(out),
    }
}

/// Returns `Ok(())` when stopped; any error ends the session.
async fn negotiate<C: Connectivity>(
    pc: &mut PeerConnection<C>,
    events: &mut EventStream,
    sender: &ChannelSender,
    receiver: &mut ChannelReceiver,
    stop_rx: &mut watch::Receiver<bool>,
    status_tx: &watch::Sender<SessionStatus>,
) -> Result<(), NegotiationError> {
    if pc.role() == Role::Initiator {
        let offered = until_stopped(stop_rx, async {
            let offer = pc.create_offer().await?;
            sender.send(&offer.into()).await
        })
        .await;
        match offered {
            Some(result) => result?,
            None => return Ok(()),
        }
        publish(status_tx, pc);
    }

    let mut events_open = true;
    loop {
        let input = tokio::select! {
            biased;

            _ = stopped(stop_rx) => return Ok(()),

            event = events.recv(), if events_open => match event {
                Some(event) => Input::Event(event),
                None => {
                    debug!("connectivity event stream ended");
                    events_open = false;
                    continue;
                }
            },

            frame = receiver.receive() => match frame {
                Some(text) => Input::Frame(text),
                None => return Err(NegotiationError::ChannelClosed),
            },
        };

        let handled = match input {
            Input::Event(event) => {
                until_stopped(stop_rx, on_connectivity_event(pc, event, sender)).await
            }
            Input::Frame(text) => until_stopped(stop_rx, on_frame(pc, &text, sender)).await,
        };
        match handled {
            Some(result) => result?,
            None => return Ok(()),
        }

        publish(status_tx, pc);
    }
}

async fn on_connectivity_event<C: Connectivity>(
    pc: &mut PeerConnection<C>,
    event: ConnectivityEvent,
    sender: &ChannelSender,
) -> Result<(), NegotiationError> {
    match event {
        ConnectivityEvent::CandidateDiscovered(candidate) => {
            debug!("sending local candidate {}", candidate.candidate);
            sender.send(&candidate.into()).await
        }
        ConnectivityEvent::StateChanged(state) => pc.on_connectivity_state(&state),
    }
}

async fn on_frame<C: Connectivity>(
    pc: &mut PeerConnection<C>,
    text: &str,
    sender: &ChannelSender,
) -> Result<(), NegotiationError> {
    let message = SignalMessage::decode(text)
        .map_err(|e| NegotiationError::InvalidRemoteDescription(e.to_string()))?;
    debug!("received {} in state {}", message.label(), pc.state());

    match message {
        SignalMessage::Description(desc) => match desc.kind {
            SdpKind::Offer => {
                pc.receive_offer(desc).await?;
                let answer = pc.create_answer().await?;
                sender.send(&answer.into()).await
            }
            SdpKind::Answer => pc.receive_answer(desc).await,
        },
        SignalMessage::Candidate(candidate) => {
            pc.add_candidate(candidate).await?;
            Ok(())
        }
        SignalMessage::Unrecognized(_) => {
            debug!("ignoring unrecognized signaling frame");
            Ok(())
        }
    }
}

fn publish<C: Connectivity>(status_tx: &watch::Sender<SessionStatus>, pc: &PeerConnection<C>) {
    let state = pc.state();
    status_tx.send_if_modified(|status| {
        if status.state == state {
            return false;
        }
        status.state = state;
        true
    });
}

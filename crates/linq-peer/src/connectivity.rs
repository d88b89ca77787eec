//! Connectivity-establishment seam.
//!
//! A backend produces local descriptions, applies remote ones and candidates,
//! and reports what it discovers on an ordered event stream. ICE itself lives
//! behind this trait.

use std::sync::Arc;

use async_trait::async_trait;
use linq_common::{IceCandidate, SdpKind, SessionDescription};
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::ConnectivityError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
    CandidateDiscovered(IceCandidate),
    StateChanged(ConnectivityState),
}

pub type EventStream = mpsc::UnboundedReceiver<ConnectivityEvent>;

#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, ConnectivityError>;

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError>;

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), ConnectivityError>;

    async fn close(&self) -> Result<(), ConnectivityError>;
}

#[async_trait]
impl<C: Connectivity + ?Sized> Connectivity for Box<C> {
    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, ConnectivityError> {
        (**self).create_local_description(kind).await
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError> {
        (**self).set_local_description(desc).await
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError> {
        (**self).set_remote_description(desc).await
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), ConnectivityError> {
        (**self).add_ice_candidate(candidate).await
    }

    async fn close(&self) -> Result<(), ConnectivityError> {
        (**self).close().await
    }
}

#[async_trait]
impl<C: Connectivity + ?Sized> Connectivity for Arc<C> {
    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, ConnectivityError> {
        (**self).create_local_description(kind).await
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError> {
        (**self).set_local_description(desc).await
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError> {
        (**self).set_remote_description(desc).await
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), ConnectivityError> {
        (**self).add_ice_candidate(candidate).await
    }

    async fn close(&self) -> Result<(), ConnectivityError> {
        (**self).close().await
    }
}

#[derive(Default)]
struct SimState {
    local: bool,
    remote: bool,
    remote_candidates: usize,
    checking: bool,
    connected: bool,
    closed: bool,
}

/// Deterministic in-process backend.
///
/// It announces one host candidate once its local description is set, and
/// reports `Connected` as soon as both descriptions are set and at least one
/// remote candidate has been applied. Remote payloads must look like SDP
/// (a `v=0` header and at least one `m=` line).
pub struct SimulatedConnectivity {
    session_id: u64,
    candidate_port: u16,
    state: Mutex<SimState>,
    events: mpsc::UnboundedSender<ConnectivityEvent>,
}

impl SimulatedConnectivity {
    pub fn new() -> (Self, EventStream) {
        let (events, rx) = mpsc::unbounded_channel();
        let mut rng = rand::thread_rng();
        let backend = Self {
            session_id: rng.gen(),
            candidate_port: rng.gen_range(49152..=65535),
            state: Mutex::new(SimState::default()),
            events,
        };
        (backend, rx)
    }

    /// Report a connectivity failure as if ICE had given up.
    pub fn inject_failure(&self, reason: impl Into<String>) {
        self.emit(ConnectivityEvent::StateChanged(ConnectivityState::Failed(
            reason.into(),
        )));
    }

    /// Number of remote candidates applied so far.
    pub async fn applied_candidates(&self) -> usize {
        self.state.lock().await.remote_candidates
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    fn emit(&self, event: ConnectivityEvent) {
        // Receiver gone means the session is over.
        let _ = self.events.send(event);
    }

    fn local_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                self.session_id % 1_000_000,
                self.candidate_port
            ),
            sdp_mid: "0".to_string(),
            sdp_mline_index: 0,
        }
    }

    fn progress(&self, state: &mut SimState) {
        if state.local && state.remote && !state.checking {
            state.checking = true;
            self.emit(ConnectivityEvent::StateChanged(ConnectivityState::Checking));
        }
        if state.checking && state.remote_candidates > 0 && !state.connected {
            state.connected = true;
            self.emit(ConnectivityEvent::StateChanged(
                ConnectivityState::Connected,
            ));
        }
    }
}

fn validate_sdp(sdp: &str) -> Result<(), ConnectivityError> {
    if !sdp.starts_with("v=0") {
        return Err(ConnectivityError::InvalidDescription(
            "missing v=0 header".into(),
        ));
    }
    if !sdp.lines().any(|line| line.starts_with("m=")) {
        return Err(ConnectivityError::InvalidDescription(
            "no media section".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Connectivity for SimulatedConnectivity {
    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, ConnectivityError> {
        if self.state.lock().await.closed {
            return Err(ConnectivityError::Closed);
        }
        let setup = match kind {
            SdpKind::Offer => "actpass",
            SdpKind::Answer => "active",
        };
        let sdp = format!(
            "v=0\r\no=linq {id} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\na=setup:{setup}\r\n\
             m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:1\r\na=setup:{setup}\r\n",
            id = self.session_id,
        );
        Ok(SessionDescription { kind, sdp })
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError> {
        validate_sdp(&desc.sdp)?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ConnectivityError::Closed);
        }
        if !state.local {
            state.local = true;
            debug!("simulated host candidate on port {}", self.candidate_port);
            self.emit(ConnectivityEvent::CandidateDiscovered(self.local_candidate()));
        }
        self.progress(&mut state);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError> {
        validate_sdp(&desc.sdp)?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ConnectivityError::Closed);
        }
        state.remote = true;
        self.progress(&mut state);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), ConnectivityError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ConnectivityError::Closed);
        }
        if !state.remote {
            return Err(ConnectivityError::backend(
                "candidate added before the remote description",
            ));
        }
        if candidate.candidate.trim().is_empty() {
            return Err(ConnectivityError::backend("empty candidate"));
        }
        state.remote_candidates += 1;
        self.progress(&mut state);
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectivityError> {
        let mut state = self.state.lock().await;
        if !state.closed {
            state.closed = true;
            self.emit(ConnectivityEvent::StateChanged(ConnectivityState::Closed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:9 1 udp 1 127.0.0.1 9 typ host".into(),
            sdp_mid: "0".into(),
            sdp_mline_index: 0,
        }
    }

    #[tokio::test]
    async fn test_simulated_backend_reaches_connected() {
        let (backend, mut events) = SimulatedConnectivity::new();
        let offer = backend
            .create_local_description(SdpKind::Offer)
            .await
            .unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);

        backend.set_local_description(&offer).await.unwrap();
        assert!(matches!(
            events.try_recv().unwrap(),
            ConnectivityEvent::CandidateDiscovered(_)
        ));

        let (remote, _remote_events) = SimulatedConnectivity::new();
        let answer = remote
            .create_local_description(SdpKind::Answer)
            .await
            .unwrap();
        backend.set_remote_description(&answer).await.unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectivityEvent::StateChanged(ConnectivityState::Checking)
        );

        backend.add_ice_candidate(&candidate()).await.unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectivityEvent::StateChanged(ConnectivityState::Connected)
        );
        assert_eq!(backend.applied_candidates().await, 1);
    }

    #[tokio::test]
    async fn test_simulated_backend_rejects_bad_input() {
        let (backend, _events) = SimulatedConnectivity::new();
        let err = backend
            .set_remote_description(&SessionDescription::offer("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectivityError::InvalidDescription(_)));

        let err = backend.add_ice_candidate(&candidate()).await.unwrap_err();
        assert!(matches!(err, ConnectivityError::Backend(_)));
    }

    #[tokio::test]
    async fn test_simulated_backend_close_is_idempotent() {
        let (backend, mut events) = SimulatedConnectivity::new();
        backend.close().await.unwrap();
        backend.close().await.unwrap();
        assert!(backend.is_closed().await);
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectivityEvent::StateChanged(ConnectivityState::Closed)
        );
        assert!(events.try_recv().is_err());
        assert_eq!(
            backend.create_local_description(SdpKind::Offer).await,
            Err(ConnectivityError::Closed)
        );
    }
}

//! Peer connection state machine.
//!
//! ```text
//! New --create_offer--> HaveLocalOffer --receive_answer--> Connecting
//! New --receive_offer--> HaveRemoteOffer --create_answer--> Connecting
//! Connecting --connectivity established--> Connected
//! any --close--> Closed, any non-terminal --error--> Failed
//! ```
//!
//! A rejected operation leaves the state untouched; the owner decides
//! whether to fail the connection.

use std::fmt;
use std::str::FromStr;

use linq_common::{IceCandidate, SdpKind, SessionDescription};
use tracing::{debug, info, warn};

use crate::connectivity::{Connectivity, ConnectivityState};
use crate::error::NegotiationError;

/// Candidates held back while no remote description exists.
pub const MAX_PENDING_CANDIDATES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initiator" | "caller" => Ok(Role::Initiator),
            "responder" | "callee" => Ok(Role::Responder),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl PeerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Failed)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::New => "new",
            PeerState::HaveLocalOffer => "have-local-offer",
            PeerState::HaveRemoteOffer => "have-remote-offer",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
            PeerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happened to a remote candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    /// Held until a remote description is set.
    Queued,
}

pub struct PeerConnection<C> {
    role: Role,
    state: PeerState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: Vec<IceCandidate>,
    backend: C,
    released: bool,
}

fn local_failure(err: crate::error::ConnectivityError) -> NegotiationError {
    NegotiationError::ConnectivityFailure(err.to_string())
}

impl<C: Connectivity> PeerConnection<C> {
    pub fn new(role: Role, backend: C) -> Self {
        Self {
            role,
            state: PeerState::New,
            local_description: None,
            remote_description: None,
            pending_candidates: Vec::new(),
            backend,
            released: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    fn transition(&mut self, next: PeerState) {
        if self.state != next {
            info!("peer connection ({}): {} -> {}", self.role, self.state, next);
            self.state = next;
        }
    }

    fn require_open(&self, operation: &'static str) -> Result<(), NegotiationError> {
        if self.state.is_terminal() {
            return Err(NegotiationError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// `New -> HaveLocalOffer`. Initiator only.
    pub async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.require_open("create_offer")?;
        if self.local_description.is_some() {
            return Err(NegotiationError::DuplicateOffer { state: self.state });
        }
        if self.role != Role::Initiator {
            return Err(NegotiationError::RoleMismatch {
                operation: "create_offer",
                role: self.role,
            });
        }
        if self.state != PeerState::New {
            return Err(NegotiationError::InvalidState {
                operation: "create_offer",
                state: self.state,
            });
        }

        let offer = self
            .backend
            .create_local_description(SdpKind::Offer)
            .await
            .map_err(local_failure)?;
        self.backend
            .set_local_description(&offer)
            .await
            .map_err(local_failure)?;

        self.local_description = Some(offer.clone());
        self.transition(PeerState::HaveLocalOffer);
        Ok(offer)
    }

    /// `New -> HaveRemoteOffer`. Responder only.
    pub async fn receive_offer(&mut self, offer: SessionDescription) -> Result<(), NegotiationError> {
        self.require_open("receive_offer")?;
        if offer.kind != SdpKind::Offer {
            return Err(NegotiationError::InvalidRemoteDescription(format!(
                "expected an offer, got an {}",
                offer.kind
            )));
        }
        if self.role != Role::Responder {
            return Err(NegotiationError::UnexpectedOffer {
                state: self.state,
                role: self.role,
            });
        }
        if self.remote_description.is_some() {
            return Err(NegotiationError::DuplicateOffer { state: self.state });
        }
        if self.state != PeerState::New {
            return Err(NegotiationError::UnexpectedOffer {
                state: self.state,
                role: self.role,
            });
        }

        self.backend.set_remote_description(&offer).await?;
        self.remote_description = Some(offer);
        self.transition(PeerState::HaveRemoteOffer);
        self.flush_pending_candidates().await
    }

    /// `HaveRemoteOffer -> Connecting`.
    pub async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.require_open("create_answer")?;
        if self.role != Role::Responder {
            return Err(NegotiationError::RoleMismatch {
                operation: "create_answer",
                role: self.role,
            });
        }
        if self.state != PeerState::HaveRemoteOffer {
            return Err(NegotiationError::InvalidState {
                operation: "create_answer",
                state: self.state,
            });
        }

        let answer = self
            .backend
            .create_local_description(SdpKind::Answer)
            .await
            .map_err(local_failure)?;
        self.backend
            .set_local_description(&answer)
            .await
            .map_err(local_failure)?;

        self.local_description = Some(answer.clone());
        self.transition(PeerState::Connecting);
        Ok(answer)
    }

    /// `HaveLocalOffer -> Connecting`.
    pub async fn receive_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.require_open("receive_answer")?;
        if answer.kind != SdpKind::Answer {
            return Err(NegotiationError::InvalidRemoteDescription(format!(
                "expected an answer, got an {}",
                answer.kind
            )));
        }
        if self.role != Role::Initiator || self.state != PeerState::HaveLocalOffer {
            return Err(NegotiationError::UnexpectedAnswer {
                state: self.state,
                role: self.role,
            });
        }

        self.backend.set_remote_description(&answer).await?;
        self.remote_description = Some(answer);
        self.transition(PeerState::Connecting);
        self.flush_pending_candidates().await
    }

    /// Apply a remote candidate, or queue it while no remote description
    /// exists yet.
    pub async fn add_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, NegotiationError> {
        self.require_open("add_candidate")?;

        if self.remote_description.is_none() {
            if self.pending_candidates.len() >= MAX_PENDING_CANDIDATES {
                return Err(NegotiationError::PrematureCandidate {
                    pending: self.pending_candidates.len(),
                });
            }
            debug!(
                "queueing candidate in state {} ({} pending)",
                self.state,
                self.pending_candidates.len() + 1
            );
            self.pending_candidates.push(candidate);
            return Ok(CandidateDisposition::Queued);
        }

        self.backend
            .add_ice_candidate(&candidate)
            .await
            .map_err(local_failure)?;
        Ok(CandidateDisposition::Applied)
    }

    async fn flush_pending_candidates(&mut self) -> Result<(), NegotiationError> {
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!("applying {} queued candidates", pending.len());
        }
        for candidate in pending {
            self.backend
                .add_ice_candidate(&candidate)
                .await
                .map_err(local_failure)?;
        }
        Ok(())
    }

    /// Feed a state change observed by the connectivity backend.
    pub fn on_connectivity_state(
        &mut self,
        observed: &ConnectivityState,
    ) -> Result<(), NegotiationError> {
        match observed {
            ConnectivityState::Connected => match self.state {
                PeerState::Connecting => self.transition(PeerState::Connected),
                PeerState::Connected => {}
                other => debug!("ignoring connectivity established in state {}", other),
            },
            ConnectivityState::Failed(reason) => {
                if !self.state.is_terminal() {
                    self.transition(PeerState::Failed);
                    return Err(NegotiationError::ConnectivityFailure(reason.clone()));
                }
            }
            ConnectivityState::Disconnected => {
                warn!("connectivity lost in state {}", self.state);
            }
            ConnectivityState::Closed => {
                // Closed underneath us, not through close().
                if !self.state.is_terminal() {
                    self.transition(PeerState::Failed);
                    return Err(NegotiationError::ConnectivityFailure(
                        "connectivity backend closed".into(),
                    ));
                }
            }
            ConnectivityState::New | ConnectivityState::Checking => {
                debug!("connectivity {:?} in state {}", observed, self.state);
            }
        }
        Ok(())
    }

    /// Mark the connection failed. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.transition(PeerState::Failed);
        }
    }

    /// Release the backend and move to `Closed`. `Failed` stays `Failed`.
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(err) = self.backend.close().await {
                warn!("error while closing connectivity backend: {}", err);
            }
        }
        if self.state != PeerState::Failed {
            self.transition(PeerState::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{ConnectivityEvent, SimulatedConnectivity};

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 5000{n} typ host"),
            sdp_mid: "0".into(),
            sdp_mline_index: 0,
        }
    }

    fn remote_sdp(kind: SdpKind) -> SessionDescription {
        SessionDescription {
            kind,
            sdp: "v=0\r\no=remote 1 2 IN IP4 10.0.0.9\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n"
                .into(),
        }
    }

    fn initiator() -> PeerConnection<SimulatedConnectivity> {
        PeerConnection::new(Role::Initiator, SimulatedConnectivity::new().0)
    }

    fn responder() -> PeerConnection<SimulatedConnectivity> {
        PeerConnection::new(Role::Responder, SimulatedConnectivity::new().0)
    }

    #[tokio::test]
    async fn test_initiator_flow() {
        let mut pc = initiator();
        assert_eq!(pc.state(), PeerState::New);

        let offer = pc.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert_eq!(pc.state(), PeerState::HaveLocalOffer);
        assert_eq!(pc.local_description(), Some(&offer));

        pc.receive_answer(remote_sdp(SdpKind::Answer)).await.unwrap();
        assert_eq!(pc.state(), PeerState::Connecting);

        pc.on_connectivity_state(&ConnectivityState::Connected).unwrap();
        assert_eq!(pc.state(), PeerState::Connected);
    }

    #[tokio::test]
    async fn test_responder_flow() {
        let mut pc = responder();
        let offer = remote_sdp(SdpKind::Offer);
        pc.receive_offer(offer.clone()).await.unwrap();
        assert_eq!(pc.state(), PeerState::HaveRemoteOffer);
        assert_eq!(pc.remote_description(), Some(&offer));

        let answer = pc.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        assert_eq!(pc.state(), PeerState::Connecting);
    }

    #[tokio::test]
    async fn test_duplicate_offer_leaves_state_unchanged() {
        let mut pc = initiator();
        let offer = pc.create_offer().await.unwrap();

        let err = pc.create_offer().await.unwrap_err();
        assert_eq!(
            err,
            NegotiationError::DuplicateOffer {
                state: PeerState::HaveLocalOffer
            }
        );
        assert_eq!(pc.state(), PeerState::HaveLocalOffer);
        assert_eq!(pc.local_description(), Some(&offer));
    }

    #[tokio::test]
    async fn test_responder_rejects_second_offer() {
        let mut pc = responder();
        pc.receive_offer(remote_sdp(SdpKind::Offer)).await.unwrap();
        let err = pc.receive_offer(remote_sdp(SdpKind::Offer)).await.unwrap_err();
        assert!(matches!(err, NegotiationError::DuplicateOffer { .. }));
        assert_eq!(pc.state(), PeerState::HaveRemoteOffer);
    }

    #[tokio::test]
    async fn test_role_and_state_mismatches() {
        let mut pc = responder();
        assert!(matches!(
            pc.create_offer().await,
            Err(NegotiationError::RoleMismatch { .. })
        ));
        assert!(matches!(
            pc.receive_answer(remote_sdp(SdpKind::Answer)).await,
            Err(NegotiationError::UnexpectedAnswer {
                state: PeerState::New,
                role: Role::Responder
            })
        ));
        assert!(matches!(
            pc.create_answer().await,
            Err(NegotiationError::InvalidState { .. })
        ));
        assert_eq!(pc.state(), PeerState::New);

        let mut pc = initiator();
        assert!(matches!(
            pc.receive_answer(remote_sdp(SdpKind::Answer)).await,
            Err(NegotiationError::UnexpectedAnswer { .. })
        ));
        assert!(matches!(
            pc.receive_offer(remote_sdp(SdpKind::Offer)).await,
            Err(NegotiationError::UnexpectedOffer { .. })
        ));
        assert_eq!(pc.state(), PeerState::New);
    }

    #[tokio::test]
    async fn test_invalid_remote_description() {
        let mut pc = responder();
        let err = pc
            .receive_offer(SessionDescription::offer("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidRemoteDescription(_)));
        assert_eq!(pc.state(), PeerState::New);
        assert!(pc.remote_description().is_none());
    }

    #[tokio::test]
    async fn test_candidates_queue_until_remote_description() {
        let mut pc = responder();
        assert_eq!(
            pc.add_candidate(candidate(1)).await.unwrap(),
            CandidateDisposition::Queued
        );
        assert_eq!(
            pc.add_candidate(candidate(2)).await.unwrap(),
            CandidateDisposition::Queued
        );
        assert_eq!(pc.pending_candidates(), 2);
        assert_eq!(pc.backend().applied_candidates().await, 0);

        pc.receive_offer(remote_sdp(SdpKind::Offer)).await.unwrap();
        assert_eq!(pc.pending_candidates(), 0);
        assert_eq!(pc.backend().applied_candidates().await, 2);

        assert_eq!(
            pc.add_candidate(candidate(3)).await.unwrap(),
            CandidateDisposition::Applied
        );
        // Earlier ones are not applied a second time.
        assert_eq!(pc.backend().applied_candidates().await, 3);
    }

    #[tokio::test]
    async fn test_initiator_queues_until_answer() {
        let mut pc = initiator();
        pc.create_offer().await.unwrap();
        assert_eq!(
            pc.add_candidate(candidate(1)).await.unwrap(),
            CandidateDisposition::Queued
        );
        pc.receive_answer(remote_sdp(SdpKind::Answer)).await.unwrap();
        assert_eq!(pc.backend().applied_candidates().await, 1);
    }

    #[tokio::test]
    async fn test_pending_queue_is_bounded() {
        let mut pc = responder();
        for n in 0..MAX_PENDING_CANDIDATES as u32 {
            pc.add_candidate(candidate(n)).await.unwrap();
        }
        let err = pc.add_candidate(candidate(9999)).await.unwrap_err();
        assert_eq!(
            err,
            NegotiationError::PrematureCandidate {
                pending: MAX_PENDING_CANDIDATES
            }
        );
    }

    #[tokio::test]
    async fn test_backend_closed_underneath_fails_connection() {
        let mut pc = responder();
        pc.receive_offer(remote_sdp(SdpKind::Offer)).await.unwrap();
        pc.create_answer().await.unwrap();

        let err = pc
            .on_connectivity_state(&ConnectivityState::Closed)
            .unwrap_err();
        assert_eq!(
            err,
            NegotiationError::ConnectivityFailure("connectivity backend closed".into())
        );
        assert_eq!(pc.state(), PeerState::Failed);

        // Once terminal, a late close report is ignored.
        let mut pc = initiator();
        pc.close().await;
        pc.on_connectivity_state(&ConnectivityState::Closed).unwrap();
        assert_eq!(pc.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn test_connectivity_failure_fails_connection() {
        let mut pc = initiator();
        pc.create_offer().await.unwrap();
        let err = pc
            .on_connectivity_state(&ConnectivityState::Failed("ice timeout".into()))
            .unwrap_err();
        assert_eq!(err, NegotiationError::ConnectivityFailure("ice timeout".into()));
        assert_eq!(pc.state(), PeerState::Failed);

        pc.close().await;
        assert_eq!(pc.state(), PeerState::Failed);
        assert!(matches!(
            pc.add_candidate(candidate(1)).await,
            Err(NegotiationError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (backend, mut events) = SimulatedConnectivity::new();
        let mut pc = PeerConnection::new(Role::Initiator, backend);
        pc.close().await;
        pc.close().await;
        assert_eq!(pc.state(), PeerState::Closed);
        assert!(pc.backend().is_closed().await);
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectivityEvent::StateChanged(ConnectivityState::Closed)
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Initiator".parse::<Role>().unwrap(), Role::Initiator);
        assert_eq!("responder".parse::<Role>().unwrap(), Role::Responder);
        assert!("observer".parse::<Role>().is_err());
    }
}

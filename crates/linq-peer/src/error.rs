//! Error types for the peer side.

use thiserror::Error;

use crate::peer::{PeerState, Role};

/// Terminal errors of a negotiation. None of them is retried; a retry is a
/// fresh session starting from `New`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The signaling channel ended. The peer is gone.
    #[error("signaling channel closed")]
    ChannelClosed,

    /// The session was stopped before it reached the requested state.
    #[error("session stopped")]
    Stopped,

    /// An offer was created or received while one is already in place.
    #[error("duplicate offer in state {state}")]
    DuplicateOffer { state: PeerState },

    #[error("unexpected answer in state {state} as {role}")]
    UnexpectedAnswer { state: PeerState, role: Role },

    #[error("unexpected offer in state {state} as {role}")]
    UnexpectedOffer { state: PeerState, role: Role },

    #[error("{operation} is not allowed for the {role}")]
    RoleMismatch {
        operation: &'static str,
        role: Role,
    },

    /// Too many candidates arrived before any remote description.
    #[error("premature candidate: {pending} candidates already queued without a remote description")]
    PrematureCandidate { pending: usize },

    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: PeerState,
    },

    /// The remote peer sent something that is not a usable description.
    #[error("invalid remote description: {0}")]
    InvalidRemoteDescription(String),

    /// Reported by the connectivity backend.
    #[error("connectivity failure: {0}")]
    ConnectivityFailure(String),

    #[error("failed to encode signaling message: {0}")]
    Encoding(String),
}

/// Errors raised by a connectivity backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectivityError {
    /// A description the backend refuses to apply.
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("connectivity backend closed")]
    Closed,

    #[error("connectivity backend error: {0}")]
    Backend(String),
}

impl ConnectivityError {
    pub fn backend(msg: impl std::fmt::Display) -> Self {
        Self::Backend(msg.to_string())
    }
}

impl From<ConnectivityError> for NegotiationError {
    fn from(err: ConnectivityError) -> Self {
        match err {
            ConnectivityError::InvalidDescription(msg) => {
                NegotiationError::InvalidRemoteDescription(msg)
            }
            other => NegotiationError::ConnectivityFailure(other.to_string()),
        }
    }
}

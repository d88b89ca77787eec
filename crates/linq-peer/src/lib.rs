//! linq peer side.
//!
//! A [`NegotiationSession`] owns one [`PeerConnection`] and exchanges offers,
//! answers and candidates with the remote peer over a [`TransportChannel`]
//! until connectivity is established or the session fails.

#![forbid(unsafe_code)]

pub mod channel;
pub mod connectivity;
pub mod error;
pub mod peer;
pub mod rtc;
pub mod session;

pub use channel::{ChannelReceiver, ChannelSender, TransportChannel};
pub use connectivity::{
    Connectivity, ConnectivityEvent, ConnectivityState, EventStream, SimulatedConnectivity,
};
pub use error::{ConnectivityError, NegotiationError};
pub use peer::{CandidateDisposition, PeerConnection, PeerState, Role, MAX_PENDING_CANDIDATES};
pub use rtc::WebRtcConnectivity;
pub use session::{NegotiationSession, SessionStatus};

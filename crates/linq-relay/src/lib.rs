//! linq signaling relay.
//!
//! The relay is a dumb pipe: it accepts WebSocket channels, keeps the set of
//! connected channels and forwards every structurally valid message from one
//! channel to all the others. It never inspects SDP, keeps no per-pair
//! topology and stores nothing.

#![forbid(unsafe_code)]

pub mod clients;
pub mod server;

pub use clients::{BroadcastReport, ChannelId, ClientSet};
pub use server::{router, shutdown_signal, Relay, RelayHealth};

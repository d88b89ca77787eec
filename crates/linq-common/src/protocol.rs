//! Signaling wire protocol.
//!
//! A message on the wire is a bare JSON object with no envelope tag:
//!
//! ```text
//! { "sdp": "...", "type": "offer" | "answer" }
//! { "candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0 }
//! ```
//!
//! The presence of the `sdp` or `candidate` key decides the variant. Decoding
//! turns that duck typing into an explicit [`SignalMessage`].

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::error::{Error, Result};

/// Which side of the offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// One side's proposed media session. The payload is opaque to linq.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One discovered network path for connectivity establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
}

/// A decoded signaling message.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
    /// A well-formed JSON object carrying neither `sdp` nor `candidate`.
    Unrecognized(serde_json::Value),
}

impl SignalMessage {
    /// Decode one wire frame.
    ///
    /// Invalid JSON, non-object JSON and objects whose `sdp`/`candidate`
    /// fields do not fit their shape are [`Error::MalformedMessage`].
    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(Error::malformed)?;
        let (has_sdp, has_candidate) = match value.as_object() {
            Some(object) => (object.contains_key("sdp"), object.contains_key("candidate")),
            None => return Err(Error::malformed("expected a JSON object")),
        };

        if has_sdp {
            serde_json::from_value(value)
                .map(SignalMessage::Description)
                .map_err(|e| Error::malformed(format!("session description: {e}")))
        } else if has_candidate {
            serde_json::from_value(value)
                .map(SignalMessage::Candidate)
                .map_err(|e| Error::malformed(format!("ice candidate: {e}")))
        } else {
            Ok(SignalMessage::Unrecognized(value))
        }
    }

    /// Encode into one wire frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::serialization)
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            SignalMessage::Description(desc) => match desc.kind {
                SdpKind::Offer => "offer",
                SdpKind::Answer => "answer",
            },
            SignalMessage::Candidate(_) => "candidate",
            SignalMessage::Unrecognized(_) => "unrecognized",
        }
    }
}

impl Serialize for SignalMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SignalMessage::Description(desc) => desc.serialize(serializer),
            SignalMessage::Candidate(candidate) => candidate.serialize(serializer),
            SignalMessage::Unrecognized(value) => value.serialize(serializer),
        }
    }
}

impl From<SessionDescription> for SignalMessage {
    fn from(desc: SessionDescription) -> Self {
        SignalMessage::Description(desc)
    }
}

impl From<IceCandidate> for SignalMessage {
    fn from(candidate: IceCandidate) -> Self {
        SignalMessage::Candidate(candidate)
    }
}

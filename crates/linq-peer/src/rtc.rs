//! Connectivity backed by a real webrtc-rs peer connection.

use std::sync::Arc;

use async_trait::async_trait;
use linq_common::{IceCandidate, SdpKind, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::connectivity::{Connectivity, ConnectivityEvent, ConnectivityState, EventStream};
use crate::error::ConnectivityError;

pub struct WebRtcConnectivity {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcConnectivity {
    /// Build a peer connection with one audio and one video transceiver,
    /// gathering candidates against the given STUN servers.
    pub async fn new(stun_servers: &[String]) -> Result<(Self, EventStream), ConnectivityError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(ConnectivityError::backend)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media).map_err(ConnectivityError::backend)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(ConnectivityError::backend)?,
        );

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            pc.add_transceiver_from_kind(kind, None)
                .await
                .map_err(ConnectivityError::backend)?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else {
                    debug!("candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(ConnectivityEvent::CandidateDiscovered(
                            IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid.unwrap_or_default(),
                                sdp_mline_index: init.sdp_mline_index.unwrap_or_default(),
                            },
                        ));
                    }
                    Err(e) => warn!("failed to serialize local candidate: {}", e),
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events_tx = events_tx.clone();
            Box::pin(async move {
                info!("webrtc peer connection state: {}", state);
                let mapped = match state {
                    RTCPeerConnectionState::New => ConnectivityState::New,
                    RTCPeerConnectionState::Connecting => ConnectivityState::Checking,
                    RTCPeerConnectionState::Connected => ConnectivityState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
                    RTCPeerConnectionState::Failed => {
                        ConnectivityState::Failed("ice connectivity checks failed".into())
                    }
                    RTCPeerConnectionState::Closed => ConnectivityState::Closed,
                    _ => return,
                };
                let _ = events_tx.send(ConnectivityEvent::StateChanged(mapped));
            })
        }));

        Ok((Self { pc }, events_rx))
    }
}

fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, ConnectivityError> {
    let converted = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    converted.map_err(|e| ConnectivityError::InvalidDescription(e.to_string()))
}

#[async_trait]
impl Connectivity for WebRtcConnectivity {
    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, ConnectivityError> {
        let desc = match kind {
            SdpKind::Offer => self.pc.create_offer(None).await,
            SdpKind::Answer => self.pc.create_answer(None).await,
        }
        .map_err(ConnectivityError::backend)?;
        Ok(SessionDescription {
            kind,
            sdp: desc.sdp,
        })
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError> {
        let rtc = to_rtc(desc)?;
        self.pc
            .set_local_description(rtc)
            .await
            .map_err(ConnectivityError::backend)
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), ConnectivityError> {
        let rtc = to_rtc(desc)?;
        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(|e| ConnectivityError::InvalidDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), ConnectivityError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: Some(candidate.sdp_mid.clone()),
            sdp_mline_index: Some(candidate.sdp_mline_index),
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(ConnectivityError::backend)
    }

    async fn close(&self) -> Result<(), ConnectivityError> {
        self.pc.close().await.map_err(ConnectivityError::backend)
    }
}

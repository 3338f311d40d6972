//! webrtc-rs backed peers.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::{
    ConnectionEvent, IceConnectionState, NegotiationError, PeerConnection, PeerFactory,
    PeerHandle, TrackInfo,
};
use crate::api::{IceCandidate, IceServer, SessionDescription};

fn stack_error(err: webrtc::Error) -> NegotiationError {
    NegotiationError::Stack(err.to_string())
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

fn to_rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.to_vec(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Builds receive-only peers with the default codec set and interceptors.
pub struct RtcPeerFactory {
    api: API,
}

impl RtcPeerFactory {
    pub fn new() -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(stack_error)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(stack_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, ice_servers: &[IceServer]) -> Result<PeerHandle, NegotiationError> {
        let config = RTCConfiguration {
            ice_servers: to_rtc_ice_servers(ice_servers),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(stack_error)?,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let candidates = tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidates = candidates.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => ConnectionEvent::IceCandidate(Some(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        })),
                        Err(err) => {
                            warn!(error = %err, "Dropping unserializable ICE candidate");
                            return;
                        }
                    },
                    None => ConnectionEvent::IceCandidate(None),
                };
                let _ = candidates.send(event);
            })
        }));

        let states = tx.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            if let Some(state) = map_ice_state(state) {
                let _ = states.send(ConnectionEvent::IceStateChange(state));
            }
            Box::pin(async {})
        }));

        let tracks = tx;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let info = TrackInfo {
                    kind: track.kind().to_string(),
                    id: track.id(),
                };
                let _ = tracks.send(ConnectionEvent::Track(info));
                Box::pin(async move {
                    tokio::spawn(drain_track(track));
                })
            },
        ));

        Ok(PeerHandle {
            connection: Arc::new(RtcPeer { pc }),
            events: rx,
        })
    }
}

/// Media is not rendered; packets are read so the receive buffers never stall.
async fn drain_track(track: Arc<TrackRemote>) {
    let mut packets: u64 = 0;
    while track.read_rtp().await.is_ok() {
        packets += 1;
    }
    debug!(track = %track.id(), packets, "Remote track ended");
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn set_remote_offer(&self, offer: &SessionDescription) -> Result<(), NegotiationError> {
        let offer = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|err| NegotiationError::MalformedOffer(err.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|err| NegotiationError::MalformedOffer(err.to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(stack_error)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(stack_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(error = %err, "Peer connection close reported an error");
        }
    }
}

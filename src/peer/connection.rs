use crate::error::SessionError;
use crate::logger::dump_selected_pair;
use crate::peer::media::LocalTrack;
use crate::peer::types::{AnswerResponse, ServerConfig};
use crate::renderer::{RemoteTrack, TrackKind};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Events a live peer connection reports back to its session.
#[derive(Debug)]
pub enum PeerEvent {
    RemoteTrack(RemoteTrack),
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One negotiated (or negotiating) peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Creates an offer, installs it as the local description and returns
    /// its SDP.
    async fn create_offer(&self) -> Result<String, SessionError>;
    async fn apply_answer(&self, answer: &AnswerResponse) -> Result<(), SessionError>;
    async fn close(&self) -> Result<(), SessionError>;
}

/// Builds peer connections. With no local tracks the connection is
/// receive-only for video.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        tracks: Vec<LocalTrack>,
        events: UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>, SessionError>;
}

/// Close a link without waiting for it.
pub(crate) fn close_link_later(link: Arc<dyn PeerLink>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = link.close().await {
                    warn!(error = %e, "closing peer connection failed");
                }
            });
        }
        Err(_) => warn!("no runtime to close peer connection on, dropping it"),
    }
}

/// `webrtc`-backed connector.
pub struct WebRtcConnector {
    ice_servers: Vec<ServerConfig>,
    gather_timeout: Duration,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self {
            ice_servers,
            gather_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        tracks: Vec<LocalTrack>,
        events: UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);
        let guard = CloseOnDrop::new(pc.clone());

        if tracks.is_empty() {
            debug!("no local tracks, declaring receive-only video");
            pc.add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        } else {
            for track in tracks {
                let sender = pc.add_track(track).await?;
                // RTCP has to be read for the interceptors to run
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1500];
                    while sender.read(&mut buf).await.is_ok() {}
                });
            }
        }

        let track_events = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let remote = RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind,
                track: Some(track),
            };
            debug!(track = %remote.id, ?kind, "remote track arrived");
            let _ = track_events.send(PeerEvent::RemoteTrack(remote));
            Box::pin(async {})
        }));

        let pc_state = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!(state = ?st, "peer connection state changed");
            let event = match st {
                RTCPeerConnectionState::Connected => Some(PeerEvent::Connected),
                RTCPeerConnectionState::Disconnected => Some(PeerEvent::Disconnected),
                RTCPeerConnectionState::Failed => {
                    if let Some(pc_stats) = pc_state.upgrade() {
                        tokio::spawn(async move {
                            dump_selected_pair(&pc_stats, "BEFORE-FAIL").await;
                        });
                    }
                    Some(PeerEvent::Failed)
                }
                RTCPeerConnectionState::Closed => Some(PeerEvent::Closed),
                _ => None,
            };
            if let Some(event) = event {
                let _ = events.send(event);
            }
            Box::pin(async {})
        }));

        guard.disarm();
        Ok(Arc::new(WebRtcLink {
            pc,
            gather_timeout: self.gather_timeout,
        }))
    }
}

/// Closes a half-built connection when `connect` bails out early or is
/// cancelled.
struct CloseOnDrop {
    pc: Option<Arc<RTCPeerConnection>>,
}

impl CloseOnDrop {
    fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self { pc: Some(pc) }
    }

    fn disarm(mut self) {
        self.pc = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Some(pc) = self.pc.take() else {
            return;
        };
        debug!("closing unfinished peer connection");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = pc.close().await {
                        warn!(error = %e, "closing unfinished peer connection failed");
                    }
                });
            }
            Err(_) => warn!("no runtime to close peer connection on, dropping it"),
        }
    }
}

struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    gather_timeout: Duration,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<String, SessionError> {
        let offer = self.pc.create_offer(None).await?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;

        // The server has no trickle endpoint, so candidates must be in the offer
        if timeout(self.gather_timeout, gathered.recv()).await.is_err() {
            warn!("ICE gathering incomplete, sending the candidates found so far");
        }

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| SessionError::NegotiationError("no local description".into()))
    }

    async fn apply_answer(&self, answer: &AnswerResponse) -> Result<(), SessionError> {
        if answer.r#type != "answer" {
            return Err(SessionError::NegotiationError(format!(
                "expected an answer, got {:?}",
                answer.r#type
            )));
        }
        let desc = RTCSessionDescription::answer(answer.sdp.clone())?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Peer connection configuration for the given ICE servers
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

//! PeerLink adapter over webrtc-rs

use crate::error::PeerError;
use crate::media::{MediaStreamHandle, MediaTrack, StreamSource, TrackKind};
use crate::peer::{LinkEvent, LinkState, PeerLink, PeerLinkFactory, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// ICE server configuration for the reference link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcLinkConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
}

impl Default for WebRtcLinkConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// Opaque SDP/ICE envelope carried over the signaling relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Envelope {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: RTCIceCandidateInit },
}

/// Creates [`WebRtcLink`]s backed by `RTCPeerConnection`
pub struct WebRtcLinkFactory {
    config: WebRtcLinkConfig,
}

impl WebRtcLinkFactory {
    /// Create a factory with the given ICE configuration
    pub fn new(config: WebRtcLinkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerLinkFactory for WebRtcLinkFactory {
    async fn create_link(
        &self,
        peer_id: &str,
        role: Role,
        local_stream: Option<&MediaStreamHandle>,
    ) -> Result<Arc<dyn PeerLink>, PeerError> {
        let link = WebRtcLink::new(peer_id, role, &self.config, local_stream).await?;
        Ok(Arc::new(link) as Arc<dyn PeerLink>)
    }
}

struct WebRtcLink {
    peer_id: String,
    role: Role,
    peer_connection: Arc<RTCPeerConnection>,
    events: broadcast::Sender<LinkEvent>,
    video_sender: RwLock<Option<Arc<RTCRtpSender>>>,
    /// Remote handle grows a track per incoming `on_track`
    remote_stream: Arc<Mutex<Option<MediaStreamHandle>>>,
}

impl WebRtcLink {
    async fn new(
        peer_id: &str,
        role: Role,
        config: &WebRtcLinkConfig,
        local_stream: Option<&MediaStreamHandle>,
    ) -> Result<Self, PeerError> {
        info!(peer_id = %peer_id, ?role, "creating webrtc link");

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Negotiation(format!("failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| PeerError::Negotiation(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| PeerError::Negotiation(format!("failed to create connection: {}", e)))?,
        );

        let (events, _) = broadcast::channel(64);

        // Connection state → link state
        let state_events = events.clone();
        let state_peer = peer_id.to_string();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let state = match s {
                    RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => {
                        Some(LinkState::Connecting)
                    }
                    RTCPeerConnectionState::Connected => Some(LinkState::Connected),
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        Some(LinkState::Disconnected)
                    }
                    RTCPeerConnectionState::Failed => Some(LinkState::Failed),
                    _ => None,
                };
                if let Some(state) = state {
                    debug!(peer_id = %state_peer, ?state, "webrtc connection state");
                    let _ = state_events.send(LinkEvent::StateChanged(state));
                }
                Box::pin(async {})
            },
        ));

        // Local ICE candidates → opaque signal envelopes
        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let candidate_events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let envelope = Envelope::Candidate { candidate: init };
                        if let Ok(payload) = serde_json::to_value(&envelope) {
                            let _ = candidate_events.send(LinkEvent::Signal(payload));
                        }
                    }
                    Err(e) => warn!("failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        // Remote tracks → one growing remote stream handle
        let remote_stream = Arc::new(Mutex::new(None::<MediaStreamHandle>));
        let track_events = events.clone();
        let track_remote = Arc::clone(&remote_stream);
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let track_events = track_events.clone();
            let track_remote = Arc::clone(&track_remote);
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };

                let mut guard = track_remote.lock().await;
                match guard.as_ref() {
                    Some(stream) => {
                        stream.add_track(MediaTrack::new(kind));
                    }
                    None => {
                        let stream = MediaStreamHandle::new(
                            StreamSource::Remote,
                            vec![MediaTrack::new(kind)],
                        );
                        *guard = Some(stream.clone());
                        let _ = track_events.send(LinkEvent::RemoteStream(stream));
                    }
                }
            })
        }));

        let link = Self {
            peer_id: peer_id.to_string(),
            role,
            peer_connection,
            events,
            video_sender: RwLock::new(None),
            remote_stream,
        };

        if let Some(stream) = local_stream {
            link.attach_local_stream(stream).await?;
        }

        Ok(link)
    }

    async fn attach_local_stream(&self, stream: &MediaStreamHandle) -> Result<(), PeerError> {
        if let Some(audio) = stream.audio_track() {
            let track = Self::sample_track(&audio, &self.peer_id);
            self.peer_connection
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| PeerError::Negotiation(format!("failed to add audio track: {}", e)))?;
        }

        if let Some(video) = stream.video_track() {
            let track = Self::sample_track(&video, &self.peer_id);
            let sender = self
                .peer_connection
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| PeerError::Negotiation(format!("failed to add video track: {}", e)))?;
            *self.video_sender.write().await = Some(sender);
        }

        Ok(())
    }

    fn sample_track(track: &MediaTrack, peer_id: &str) -> Arc<TrackLocalStaticSample> {
        let (mime_type, clock_rate, channels) = match track.kind() {
            TrackKind::Audio => ("audio/opus".to_string(), 48000, 2),
            TrackKind::Video => ("video/VP8".to_string(), 90000, 0),
        };

        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type,
                clock_rate,
                channels,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            track.id().to_string(),
            format!("stream-{}", peer_id),
        ))
    }

    async fn send_local_description(&self, envelope: Envelope) -> Result<(), PeerError> {
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| PeerError::Negotiation(format!("envelope serialization: {}", e)))?;
        let _ = self.events.send(LinkEvent::Signal(payload));
        Ok(())
    }
}

#[async_trait]
impl PeerLink for WebRtcLink {
    fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    async fn begin_negotiation(&self) -> Result<(), PeerError> {
        match self.role {
            Role::Initiator => {
                let offer = self
                    .peer_connection
                    .create_offer(None)
                    .await
                    .map_err(|e| PeerError::Negotiation(format!("failed to create offer: {}", e)))?;
                self.peer_connection
                    .set_local_description(offer)
                    .await
                    .map_err(|e| {
                        PeerError::Negotiation(format!("failed to set local description: {}", e))
                    })?;

                let local = self
                    .peer_connection
                    .local_description()
                    .await
                    .ok_or_else(|| {
                        PeerError::Negotiation("no local description after offer".to_string())
                    })?;

                debug!(peer_id = %self.peer_id, "offer created");
                self.send_local_description(Envelope::Offer { sdp: local.sdp }).await
            }
            // Responders wait for the remote offer.
            Role::Responder => Ok(()),
        }
    }

    async fn ingest_signal(&self, payload: serde_json::Value) -> Result<(), PeerError> {
        let envelope: Envelope = serde_json::from_value(payload)
            .map_err(|e| PeerError::Negotiation(format!("malformed envelope: {}", e)))?;

        match envelope {
            Envelope::Offer { sdp } => {
                let offer = RTCSessionDescription::offer(sdp)
                    .map_err(|e| PeerError::Negotiation(format!("failed to parse offer: {}", e)))?;
                self.peer_connection
                    .set_remote_description(offer)
                    .await
                    .map_err(|e| {
                        PeerError::Negotiation(format!("failed to set remote description: {}", e))
                    })?;

                let answer = self
                    .peer_connection
                    .create_answer(None)
                    .await
                    .map_err(|e| PeerError::Negotiation(format!("failed to create answer: {}", e)))?;
                self.peer_connection
                    .set_local_description(answer)
                    .await
                    .map_err(|e| {
                        PeerError::Negotiation(format!("failed to set local description: {}", e))
                    })?;

                let local = self
                    .peer_connection
                    .local_description()
                    .await
                    .ok_or_else(|| {
                        PeerError::Negotiation("no local description after answer".to_string())
                    })?;

                debug!(peer_id = %self.peer_id, "answer created");
                self.send_local_description(Envelope::Answer { sdp: local.sdp }).await
            }
            Envelope::Answer { sdp } => {
                let answer = RTCSessionDescription::answer(sdp)
                    .map_err(|e| PeerError::Negotiation(format!("failed to parse answer: {}", e)))?;
                self.peer_connection
                    .set_remote_description(answer)
                    .await
                    .map_err(|e| {
                        PeerError::Negotiation(format!("failed to set remote description: {}", e))
                    })
            }
            Envelope::Candidate { candidate } => self
                .peer_connection
                .add_ice_candidate(candidate)
                .await
                .map_err(|e| {
                    PeerError::Negotiation(format!("failed to add ICE candidate: {}", e))
                }),
        }
    }

    async fn replace_video_track(&self, track: MediaTrack) -> Result<(), PeerError> {
        let sender = self.video_sender.read().await.clone();
        let Some(sender) = sender else {
            debug!(peer_id = %self.peer_id, "no video sender, replacement skipped");
            return Ok(());
        };

        let new_track = Self::sample_track(&track, &self.peer_id);
        sender
            .replace_track(Some(new_track as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| PeerError::TrackReplacement(e.to_string()))
    }

    async fn close(&self) -> Result<(), PeerError> {
        info!(peer_id = %self.peer_id, "closing webrtc link");
        if let Some(stream) = self.remote_stream.lock().await.take() {
            stream.stop();
        }
        self.peer_connection.close().await.map_err(|e| {
            warn!(peer_id = %self.peer_id, "link close error: {}", e);
            PeerError::LinkClosed
        })
    }
}

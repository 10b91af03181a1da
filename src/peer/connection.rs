use crate::config::IceServers;
use crate::error::{CallError, Result};
use crate::logger::dump_candidate;
use crate::peer::ice::{
    analyze_candidates, apply_pending_candidates, ice_servers, record_local_candidate,
    PendingCandidates,
};
use crate::peer::negotiator::{Negotiator, NegotiatorFactory};
use crate::peer::types::{
    LocalMedia, MediaKind, NegotiatorEvent, NetworkCandidate, RemoteStream, RemoteTrack,
    SessionDescription, TransportState,
};
use crate::session::CallId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::{
    configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
    RTCPeerConnection,
};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

/// Builds webrtc-rs peer connections sharing one media engine
pub struct WebRtcNegotiatorFactory {
    api: Arc<API>,
    ice_servers: IceServers,
}

impl WebRtcNegotiatorFactory {
    pub fn new(ice_servers: IceServers) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api: Arc::new(api),
            ice_servers,
        })
    }
}

/// Creates the configuration for a peer connection
fn rtc_config(servers: &IceServers) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

#[async_trait]
impl NegotiatorFactory for WebRtcNegotiatorFactory {
    async fn create(
        &self,
        call_id: CallId,
        media: LocalMedia,
        events: mpsc::UnboundedSender<NegotiatorEvent>,
    ) -> Result<Box<dyn Negotiator>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(&self.ice_servers))
                .await?,
        );
        info!(%call_id, "peer connection created");

        let negotiator = WebRtcNegotiator::attach(call_id, pc, events);
        if let Err(e) = negotiator.attach_media(&media).await {
            let _ = negotiator.close().await;
            return Err(e);
        }
        Ok(Box::new(negotiator))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    OfferSent,
    Stable,
}

/// Negotiator over a single `RTCPeerConnection`
pub struct WebRtcNegotiator {
    call_id: CallId,
    pc: Arc<RTCPeerConnection>,
    closed: Arc<AtomicBool>,
    phase: Mutex<Phase>,
    pending: PendingCandidates,
}

impl WebRtcNegotiator {
    fn attach(
        call_id: CallId,
        pc: Arc<RTCPeerConnection>,
        events: mpsc::UnboundedSender<NegotiatorEvent>,
    ) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let gathered: Arc<Mutex<Vec<NetworkCandidate>>> = Arc::new(Mutex::new(Vec::new()));

        // trickle: every local candidate goes out as soon as it is found
        {
            let tx = events.clone();
            let closed = closed.clone();
            let id = call_id.clone();
            pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                if !closed.load(Ordering::Acquire) {
                    match cand {
                        Some(c) => match c.to_json() {
                            Ok(init) => {
                                let candidate = NetworkCandidate::from(init);
                                let total = record_local_candidate(&gathered, &candidate);
                                debug!(call_id = %id, total, "local candidate gathered");
                                let _ = tx.send(NegotiatorEvent::LocalCandidate {
                                    call_id: id.clone(),
                                    candidate,
                                });
                            }
                            Err(e) => warn!("failed to serialise local candidate: {e}"),
                        },
                        None => {
                            // gathering finished
                            if let Ok(list) = gathered.lock() {
                                analyze_candidates(&list);
                            }
                        }
                    }
                }
                Box::pin(async {})
            }));
        }

        {
            let tx = events.clone();
            let closed = closed.clone();
            let id = call_id.clone();
            let announced = Arc::new(AtomicBool::new(false));
            pc.on_track(Box::new(
                move |track: Arc<TrackRemote>,
                      _receiver: Arc<RTCRtpReceiver>,
                      _transceiver: Arc<RTCRtpTransceiver>| {
                    let kind = MediaKind::from_codec_type(track.kind());
                    if let (false, Some(kind)) = (closed.load(Ordering::Acquire), kind) {
                        let remote = RemoteTrack {
                            id: track.id().to_string(),
                            kind,
                            handle: Some(track.clone()),
                        };
                        info!(call_id = %id, track = %remote.id, ?kind, "remote track arrived");

                        let event = if announced.swap(true, Ordering::AcqRel) {
                            NegotiatorEvent::RemoteTrack {
                                call_id: id.clone(),
                                track: remote,
                            }
                        } else {
                            NegotiatorEvent::RemoteStream {
                                call_id: id.clone(),
                                stream: RemoteStream {
                                    stream_id: track.stream_id().to_string(),
                                    tracks: vec![remote],
                                },
                            }
                        };
                        let _ = tx.send(event);
                    }
                    Box::pin(async {})
                },
            ));
        }

        {
            let tx = events;
            let closed = closed.clone();
            let id = call_id.clone();
            pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                debug!(call_id = %id, "peer connection state changed to: {st:?}");
                let state = match st {
                    RTCPeerConnectionState::New => Some(TransportState::New),
                    RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
                    RTCPeerConnectionState::Connected => Some(TransportState::Connected),
                    RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
                    RTCPeerConnectionState::Failed => Some(TransportState::Failed),
                    RTCPeerConnectionState::Closed => Some(TransportState::Closed),
                    _ => None,
                };
                if let (false, Some(state)) = (closed.load(Ordering::Acquire), state) {
                    let _ = tx.send(NegotiatorEvent::TransportState {
                        call_id: id.clone(),
                        state,
                    });
                }
                Box::pin(async {})
            }));
        }

        Self {
            call_id,
            pc,
            closed,
            phase: Mutex::new(Phase::New),
            pending: PendingCandidates::default(),
        }
    }

    /// Attaches the shared capture tracks, or receive-only transceivers when there are none
    async fn attach_media(&self, media: &LocalMedia) -> Result<()> {
        if media.is_empty() {
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                self.pc
                    .add_transceiver_from_kind(
                        kind,
                        Some(RTCRtpTransceiverInit {
                            direction: RTCRtpTransceiverDirection::Recvonly,
                            send_encodings: vec![],
                        }),
                    )
                    .await?;
            }
            return Ok(());
        }

        for track in media.tracks() {
            let sender = self.pc.add_track(Arc::clone(track)).await?;
            // drain RTCP so interceptors keep running
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CallError::Negotiation(format!(
                "negotiator for call {} is closed",
                self.call_id
            )))
        } else {
            Ok(())
        }
    }

    fn phase(&self) -> Phase {
        self.phase.lock().map(|p| *p).unwrap_or(Phase::New)
    }

    fn set_phase(&self, next: Phase) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = next;
        }
    }

    async fn local_description(&self, fallback: RTCSessionDescription) -> Result<SessionDescription> {
        let local = self.pc.local_description().await.unwrap_or(fallback);
        SessionDescription::try_from(&local)
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    fn call_id(&self) -> &CallId {
        &self.call_id
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        if self.phase() != Phase::New {
            warn!(call_id = %self.call_id, "offer requested twice for the same call");
        }

        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        self.set_phase(Phase::OfferSent);
        debug!(call_id = %self.call_id, "local offer set");

        self.local_description(offer).await
    }

    async fn create_answer(&self, remote_offer: &SessionDescription) -> Result<SessionDescription> {
        self.ensure_open()?;
        if !remote_offer.is_offer() {
            return Err(CallError::Negotiation(format!(
                "expected an offer, got {:?}",
                remote_offer.sdp_type
            )));
        }

        let remote = RTCSessionDescription::try_from(remote_offer)?;
        self.pc.set_remote_description(remote).await?;
        apply_pending_candidates(&self.pc, &self.pending).await;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        self.set_phase(Phase::Stable);
        debug!(call_id = %self.call_id, "local answer set");

        self.local_description(answer).await
    }

    async fn apply_remote_answer(&self, answer: &SessionDescription) -> Result<()> {
        self.ensure_open()?;
        if self.phase() != Phase::OfferSent {
            return Err(CallError::Negotiation(
                "no local offer is outstanding".into(),
            ));
        }
        if !answer.is_answer() {
            return Err(CallError::Negotiation(format!(
                "expected an answer, got {:?}",
                answer.sdp_type
            )));
        }

        let remote = RTCSessionDescription::try_from(answer)?;
        self.pc.set_remote_description(remote).await?;
        self.set_phase(Phase::Stable);
        apply_pending_candidates(&self.pc, &self.pending).await;
        debug!(call_id = %self.call_id, "remote answer applied");
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: NetworkCandidate) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::Transport(format!(
                "peer connection for call {} is closed",
                self.call_id
            )));
        }
        dump_candidate("REMOTE", &candidate);

        // webrtc rejects candidates before a remote description exists
        if self.pc.remote_description().await.is_none() {
            debug!(call_id = %self.call_id, "remote description not set yet, queuing candidate");
            self.pending.push(candidate.into());
            return Ok(());
        }

        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| CallError::Transport(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(call_id = %self.call_id, "closing peer connection");
        self.pc
            .close()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::PeerState;
use crate::media::{
    ConnectivityState, IceCandidate, LocalTrack, MediaEvent, MediaSession, MediaSessionConfig,
    MediaTransport, SessionDescription, TrackKind,
};
use crate::signaling::{SignalPayload, SignalingMessage, SignalingTransport};

/// One live link to a remote participant.
///
/// Owns the media session handle and the candidate buffer; driven
/// exclusively from the session event loop, so no internal locking. Media
/// events are forwarded into that loop tagged with the remote id.
pub struct PeerLink {
    session_id: String,
    self_id: String,
    remote_id: String,
    state: PeerState,
    media: Option<Box<dyn MediaSession>>,
    /// Remote candidates buffered until a remote description is applied,
    /// in receipt order
    pending_candidates: VecDeque<IceCandidate>,
    remote_description_set: bool,
    next_seq: u64,
    signaling: Arc<dyn SignalingTransport>,
    media_transport: Arc<dyn MediaTransport>,
    forwarder: Option<JoinHandle<()>>,
}

impl PeerLink {
    pub fn new(
        session_id: &str,
        self_id: &str,
        remote_id: &str,
        signaling: Arc<dyn SignalingTransport>,
        media_transport: Arc<dyn MediaTransport>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            self_id: self_id.to_string(),
            remote_id: remote_id.to_string(),
            state: PeerState::Idle,
            media: None,
            pending_candidates: VecDeque::new(),
            remote_description_set: false,
            next_seq: 0,
            signaling,
            media_transport,
            forwarder: None,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Deterministic tie-break: the lexicographically lower id offers, so
    /// both sides never offer simultaneously.
    pub fn is_initiator(&self) -> bool {
        self.self_id < self.remote_id
    }

    /// Initiator entry point: create the transport session, publish an offer
    /// and wait for the answer.
    pub async fn begin_offer(
        &mut self,
        peer_events: mpsc::UnboundedSender<(String, MediaEvent)>,
    ) -> Result<()> {
        debug_assert!(self.is_initiator());
        if self.state != PeerState::Idle {
            warn!(
                "peer {}: begin_offer in state {}, ignoring",
                self.remote_id, self.state
            );
            return Ok(());
        }

        self.set_state(PeerState::Offering);
        self.open_media(peer_events)
            .await
            .context("failed to open media session")?;

        let offer = {
            let media = self.media.as_mut().expect("media open");
            let offer = media.create_offer().await.context("create_offer failed")?;
            media
                .set_local_description(offer.clone())
                .await
                .context("set_local_description failed")?;
            offer
        };

        self.send_signal(SignalPayload::Offer { sdp: offer }).await?;
        self.set_state(PeerState::AwaitingAnswer);
        Ok(())
    }

    /// Remote offered to us: accept, answer, and treat the link as connected
    /// pending transport confirmation.
    pub async fn handle_offer(
        &mut self,
        sdp: SessionDescription,
        peer_events: mpsc::UnboundedSender<(String, MediaEvent)>,
    ) -> Result<()> {
        if self.state == PeerState::Closed {
            debug!("peer {}: offer after close, dropped", self.remote_id);
            return Ok(());
        }

        if self.state != PeerState::Idle {
            // The initiator restarted negotiation (e.g. after a failure).
            // Its offer is authoritative: reset and accept.
            warn!(
                "peer {}: offer received in state {}, resetting link",
                self.remote_id, self.state
            );
            self.release_media();
            self.remote_description_set = false;
            self.set_state(PeerState::Idle);
        }

        self.open_media(peer_events)
            .await
            .context("failed to open media session")?;

        let answer = {
            let media = self.media.as_mut().expect("media open");
            media
                .set_remote_description(sdp)
                .await
                .context("set_remote_description failed")?;
            let answer = media.create_answer().await.context("create_answer failed")?;
            media
                .set_local_description(answer.clone())
                .await
                .context("set_local_description failed")?;
            answer
        };
        self.remote_description_set = true;
        self.drain_candidates().await?;

        self.send_signal(SignalPayload::Answer { sdp: answer }).await?;
        self.set_state(PeerState::Connected);
        Ok(())
    }

    /// Answer to our offer arrived
    pub async fn handle_answer(&mut self, sdp: SessionDescription) -> Result<()> {
        if self.state != PeerState::AwaitingAnswer {
            warn!(
                "peer {}: answer received in state {}, ignoring",
                self.remote_id, self.state
            );
            return Ok(());
        }

        let media = self.media.as_mut().expect("media open in awaiting-answer");
        media
            .set_remote_description(sdp)
            .await
            .context("set_remote_description failed")?;
        self.remote_description_set = true;
        self.drain_candidates().await?;

        self.set_state(PeerState::Connected);
        Ok(())
    }

    /// Remote candidate: apply in order once a remote description exists,
    /// buffer until then. Never dropped unless the link is closed.
    pub async fn handle_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.state == PeerState::Closed {
            debug!("peer {}: candidate after close, dropped", self.remote_id);
            return Ok(());
        }

        if self.remote_description_set {
            if let Some(media) = self.media.as_mut() {
                media
                    .add_ice_candidate(candidate)
                    .await
                    .context("add_ice_candidate failed")?;
                return Ok(());
            }
        }

        self.pending_candidates.push_back(candidate);
        Ok(())
    }

    /// Relay a locally gathered candidate to the remote side
    pub async fn send_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.state == PeerState::Closed {
            return Ok(());
        }
        self.send_signal(SignalPayload::IceCandidate { candidate })
            .await
    }

    /// Transport-level connectivity callback
    pub fn handle_connectivity(&mut self, connectivity: ConnectivityState) -> PeerState {
        if self.state == PeerState::Closed {
            return self.state;
        }

        match connectivity {
            ConnectivityState::Connected => self.set_state(PeerState::Connected),
            ConnectivityState::Disconnected => self.set_state(PeerState::Disconnected),
            ConnectivityState::Failed => self.set_state(PeerState::Failed),
            ConnectivityState::Closed => self.set_state(PeerState::Closed),
            ConnectivityState::New | ConnectivityState::Connecting => {}
        }
        self.state
    }

    /// Release everything. Idempotent, callable from any state; the
    /// transport teardown completes in the background.
    pub fn close(&mut self) {
        if self.state == PeerState::Closed {
            return;
        }

        info!("peer {}: closing link", self.remote_id);
        self.release_media();
        self.pending_candidates.clear();
        self.remote_description_set = false;
        self.set_state(PeerState::Closed);
    }

    fn release_media(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(mut media) = self.media.take() {
            // Fire-and-forget: teardown is synchronous from the
            // orchestrator's point of view.
            tokio::spawn(async move {
                media.close().await;
            });
        }
    }

    async fn open_media(
        &mut self,
        peer_events: mpsc::UnboundedSender<(String, MediaEvent)>,
    ) -> Result<()> {
        let (mut media, mut events) = self
            .media_transport
            .create_session(&self.remote_id, MediaSessionConfig::default())
            .await?;

        media
            .attach_local_track(LocalTrack {
                kind: TrackKind::Audio,
                id: format!("{}-audio", self.self_id),
            })
            .await?;
        media
            .attach_local_track(LocalTrack {
                kind: TrackKind::Video,
                id: format!("{}-video", self.self_id),
            })
            .await?;

        let remote_id = self.remote_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if peer_events.send((remote_id.clone(), event)).is_err() {
                    break;
                }
            }
        });

        self.media = Some(media);
        self.forwarder = Some(forwarder);
        Ok(())
    }

    async fn drain_candidates(&mut self) -> Result<()> {
        let media = match self.media.as_mut() {
            Some(m) => m,
            None => return Ok(()),
        };
        while let Some(candidate) = self.pending_candidates.pop_front() {
            media
                .add_ice_candidate(candidate)
                .await
                .context("applying buffered candidate failed")?;
        }
        Ok(())
    }

    async fn send_signal(&mut self, payload: SignalPayload) -> Result<()> {
        let message = SignalingMessage {
            session_id: self.session_id.clone(),
            from: self.self_id.clone(),
            to: self.remote_id.clone(),
            seq: self.next_seq,
            sent_at: Utc::now(),
            payload,
        };
        self.next_seq += 1;
        self.signaling
            .send(message)
            .await
            .context("signaling delivery failed")
    }

    fn set_state(&mut self, state: PeerState) {
        if self.state != state {
            info!("peer {}: {} -> {}", self.remote_id, self.state, state);
            self.state = state;
        }
    }
}

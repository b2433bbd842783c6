//! In-process media transport used by the demo binary and integration tests.
//!
//! Two sessions created for the same unordered participant pair are wired
//! back to back: once both sides have applied local and remote descriptions
//! the registry reports `Connected` to each, and each side receives a
//! `RemoteAudioTrack` whose frames can be injected through
//! [`LoopbackRegistry::remote_audio_sender`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::debug;

use super::transport::{
    ConnectivityState, IceCandidate, LocalTrack, MediaEvent, MediaSession, MediaSessionConfig,
    MediaTransport, RemoteTrack, SdpKind, SessionDescription,
};
use crate::audio::AudioFrame;

const REMOTE_TRACK_BUFFER: usize = 64;

#[derive(Default)]
struct SideState {
    events: Option<mpsc::UnboundedSender<MediaEvent>>,
    local_desc: Option<SessionDescription>,
    remote_desc: Option<SessionDescription>,
    applied_candidates: Vec<IceCandidate>,
    /// Sender feeding this side's view of the other participant's audio
    remote_audio: Option<mpsc::Sender<AudioFrame>>,
    connected_notified: bool,
    closed: bool,
}

#[derive(Default)]
struct PairState {
    sides: HashMap<String, SideState>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Shared wiring table for all loopback transports in one process
#[derive(Clone, Default)]
pub struct LoopbackRegistry {
    pairs: Arc<Mutex<HashMap<(String, String), PairState>>>,
}

impl LoopbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport bound to one participant identity
    pub fn transport_for(&self, self_id: &str) -> LoopbackMediaTransport {
        LoopbackMediaTransport {
            self_id: self_id.to_string(),
            registry: self.clone(),
        }
    }

    /// True once both sides of the pair completed the description exchange
    pub fn connected(&self, a: &str, b: &str) -> bool {
        let pairs = self.pairs.lock().expect("loopback registry poisoned");
        pairs
            .get(&pair_key(a, b))
            .map(|pair| {
                pair.sides.len() == 2
                    && pair
                        .sides
                        .values()
                        .all(|side| side.connected_notified && !side.closed)
            })
            .unwrap_or(false)
    }

    /// Sender that simulates `speaker`'s audio arriving at `listener`
    pub fn remote_audio_sender(
        &self,
        speaker: &str,
        listener: &str,
    ) -> Option<mpsc::Sender<AudioFrame>> {
        let pairs = self.pairs.lock().expect("loopback registry poisoned");
        pairs
            .get(&pair_key(speaker, listener))
            .and_then(|pair| pair.sides.get(listener))
            .and_then(|side| side.remote_audio.clone())
    }

    fn register_side(&self, self_id: &str, remote_id: &str) -> mpsc::UnboundedReceiver<MediaEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pairs = self.pairs.lock().expect("loopback registry poisoned");
        let pair = pairs.entry(pair_key(self_id, remote_id)).or_default();
        let side = pair.sides.entry(self_id.to_string()).or_default();
        *side = SideState {
            events: Some(tx),
            ..SideState::default()
        };
        rx
    }

    fn with_side<R>(
        &self,
        self_id: &str,
        remote_id: &str,
        f: impl FnOnce(&mut SideState) -> R,
    ) -> Option<R> {
        let mut pairs = self.pairs.lock().expect("loopback registry poisoned");
        pairs
            .get_mut(&pair_key(self_id, remote_id))
            .and_then(|pair| pair.sides.get_mut(self_id))
            .map(f)
    }

    /// Called after either side mutates its descriptions: once both sides are
    /// complete, report connectivity and hand out remote tracks.
    fn maybe_connect(&self, a: &str, b: &str) {
        let mut pairs = self.pairs.lock().expect("loopback registry poisoned");
        let Some(pair) = pairs.get_mut(&pair_key(a, b)) else {
            return;
        };
        if pair.sides.len() != 2 {
            return;
        }
        let complete = pair.sides.values().all(|side| {
            !side.closed && side.local_desc.is_some() && side.remote_desc.is_some()
        });
        if !complete {
            return;
        }

        for side in pair.sides.values_mut() {
            if side.connected_notified {
                continue;
            }
            side.connected_notified = true;

            let (audio_tx, audio_rx) = mpsc::channel(REMOTE_TRACK_BUFFER);
            side.remote_audio = Some(audio_tx);

            if let Some(events) = &side.events {
                let _ = events.send(MediaEvent::RemoteAudioTrack(RemoteTrack { frames: audio_rx }));
                let _ = events.send(MediaEvent::Connectivity(ConnectivityState::Connected));
            }
        }
    }

    fn close_side(&self, self_id: &str, remote_id: &str) {
        let mut pairs = self.pairs.lock().expect("loopback registry poisoned");
        let Some(pair) = pairs.get_mut(&pair_key(self_id, remote_id)) else {
            return;
        };

        if let Some(side) = pair.sides.get_mut(self_id) {
            if side.closed {
                return;
            }
            side.closed = true;
            side.remote_audio = None;
            if let Some(events) = side.events.take() {
                let _ = events.send(MediaEvent::Connectivity(ConnectivityState::Closed));
            }
        }

        // The surviving side observes a disconnect, as a real transport would
        // report when its peer goes away.
        if let Some(other) = pair.sides.get_mut(remote_id) {
            if other.connected_notified && !other.closed {
                other.connected_notified = false;
                other.remote_audio = None;
                if let Some(events) = &other.events {
                    let _ = events.send(MediaEvent::Connectivity(ConnectivityState::Disconnected));
                }
            }
        }
    }
}

pub struct LoopbackMediaTransport {
    self_id: String,
    registry: LoopbackRegistry,
}

#[async_trait::async_trait]
impl MediaTransport for LoopbackMediaTransport {
    async fn create_session(
        &self,
        remote_id: &str,
        _config: MediaSessionConfig,
    ) -> Result<(Box<dyn MediaSession>, mpsc::UnboundedReceiver<MediaEvent>)> {
        let events = self.registry.register_side(&self.self_id, remote_id);
        debug!(
            "loopback media session created: {} -> {}",
            self.self_id, remote_id
        );

        let session = LoopbackSession {
            self_id: self.self_id.clone(),
            remote_id: remote_id.to_string(),
            registry: self.registry.clone(),
            closed: false,
        };
        Ok((Box::new(session), events))
    }
}

struct LoopbackSession {
    self_id: String,
    remote_id: String,
    registry: LoopbackRegistry,
    closed: bool,
}

impl LoopbackSession {
    fn sdp(&self, kind: SdpKind) -> SessionDescription {
        SessionDescription {
            kind,
            sdp: format!("loopback v=0 {} -> {}", self.self_id, self.remote_id),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            bail!("media session {} -> {} is closed", self.self_id, self.remote_id);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MediaSession for LoopbackSession {
    async fn attach_local_track(&mut self, track: LocalTrack) -> Result<()> {
        self.ensure_open()?;
        debug!("attached local {:?} track {}", track.kind, track.id);
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.ensure_open()?;
        Ok(self.sdp(SdpKind::Offer))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let has_remote = self
            .registry
            .with_side(&self.self_id, &self.remote_id, |side| {
                side.remote_desc.is_some()
            })
            .unwrap_or(false);
        if !has_remote {
            bail!("cannot answer before a remote offer is applied");
        }
        Ok(self.sdp(SdpKind::Answer))
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        self.registry
            .with_side(&self.self_id, &self.remote_id, |side| {
                side.local_desc = Some(desc);
                // Gathering is immediate in-process: emit one synthetic
                // host candidate for the peer to apply.
                if let Some(events) = &side.events {
                    let _ = events.send(MediaEvent::LocalCandidate(IceCandidate {
                        candidate: "candidate:1 1 udp 2122260223 127.0.0.1 0 typ host".to_string(),
                        sdp_mid: Some("0".to_string()),
                        sdp_mline_index: Some(0),
                    }));
                }
            });
        self.registry.maybe_connect(&self.self_id, &self.remote_id);
        Ok(())
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        self.registry
            .with_side(&self.self_id, &self.remote_id, |side| {
                side.remote_desc = Some(desc);
            });
        self.registry.maybe_connect(&self.self_id, &self.remote_id);
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        let applied = self
            .registry
            .with_side(&self.self_id, &self.remote_id, |side| {
                if side.remote_desc.is_none() {
                    false
                } else {
                    side.applied_candidates.push(candidate);
                    true
                }
            })
            .unwrap_or(false);
        if !applied {
            bail!("candidate applied before remote description");
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.registry.close_side(&self.self_id, &self.remote_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn handshake(
        registry: &LoopbackRegistry,
        a: &str,
        b: &str,
    ) -> (
        Box<dyn MediaSession>,
        Box<dyn MediaSession>,
        mpsc::UnboundedReceiver<MediaEvent>,
        mpsc::UnboundedReceiver<MediaEvent>,
    ) {
        let ta = registry.transport_for(a);
        let tb = registry.transport_for(b);
        let (mut sa, ea) = ta
            .create_session(b, MediaSessionConfig::default())
            .await
            .unwrap();
        let (mut sb, eb) = tb
            .create_session(a, MediaSessionConfig::default())
            .await
            .unwrap();

        let offer = sa.create_offer().await.unwrap();
        sa.set_local_description(offer.clone()).await.unwrap();
        sb.set_remote_description(offer).await.unwrap();
        let answer = sb.create_answer().await.unwrap();
        sb.set_local_description(answer.clone()).await.unwrap();
        sa.set_remote_description(answer).await.unwrap();

        (sa, sb, ea, eb)
    }

    #[tokio::test]
    async fn offer_answer_exchange_connects_both_sides() {
        let registry = LoopbackRegistry::new();
        let (_sa, _sb, mut ea, _eb) = handshake(&registry, "alpha", "beta").await;

        assert!(registry.connected("alpha", "beta"));

        let mut saw_connected = false;
        while let Ok(event) = ea.try_recv() {
            if matches!(
                event,
                MediaEvent::Connectivity(ConnectivityState::Connected)
            ) {
                saw_connected = true;
            }
        }
        assert!(saw_connected);
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_rejected() {
        let registry = LoopbackRegistry::new();
        let ta = registry.transport_for("alpha");
        let (mut sa, _ea) = ta
            .create_session("beta", MediaSessionConfig::default())
            .await
            .unwrap();

        let err = sa
            .add_ice_candidate(IceCandidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            })
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn closing_one_side_disconnects_the_other() {
        let registry = LoopbackRegistry::new();
        let (mut sa, _sb, _ea, mut eb) = handshake(&registry, "alpha", "beta").await;

        sa.close().await;
        sa.close().await; // idempotent

        let mut saw_disconnect = false;
        while let Ok(event) = eb.try_recv() {
            if matches!(
                event,
                MediaEvent::Connectivity(ConnectivityState::Disconnected)
            ) {
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);
        assert!(!registry.connected("alpha", "beta"));
    }
}

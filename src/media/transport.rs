use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::AudioFrame;

/// Session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A proposed network path endpoint for direct-connection negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u32>,
}

/// Transport-level connectivity, reported via [`MediaEvent::Connectivity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to a local capture track attached to a media session.
///
/// The codec/transport internals behind this handle are external; the core
/// only routes handles around.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub kind: TrackKind,
    pub id: String,
}

/// A remote participant's audio track surfaced by the transport.
///
/// Frames arrive already resampled to the session's capture format so the
/// chunking pipeline can treat local and remote sources identically.
#[derive(Debug)]
pub struct RemoteTrack {
    pub frames: mpsc::Receiver<AudioFrame>,
}

/// Events emitted by one media session, in occurrence order
#[derive(Debug)]
pub enum MediaEvent {
    /// A locally gathered ICE candidate that must be relayed to the peer
    LocalCandidate(IceCandidate),

    /// Transport connectivity changed
    Connectivity(ConnectivityState),

    /// The remote side's audio track became available
    RemoteAudioTrack(RemoteTrack),
}

#[derive(Debug, Clone)]
pub struct MediaSessionConfig {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Real-time media transport collaborator.
///
/// One implementation per deployment (WebRTC in production, loopback for
/// local testing). The orchestrator creates one session per remote peer.
#[async_trait::async_trait]
pub trait MediaTransport: Send + Sync {
    /// Create a media session toward `remote_id`.
    ///
    /// Returns the session handle plus the event stream for connectivity,
    /// local candidates and remote tracks.
    async fn create_session(
        &self,
        remote_id: &str,
        config: MediaSessionConfig,
    ) -> Result<(Box<dyn MediaSession>, mpsc::UnboundedReceiver<MediaEvent>)>;
}

/// One live transport session toward a single remote participant
#[async_trait::async_trait]
pub trait MediaSession: Send + Sync {
    async fn attach_local_track(&mut self, track: LocalTrack) -> Result<()>;

    async fn create_offer(&mut self) -> Result<SessionDescription>;

    async fn create_answer(&mut self) -> Result<SessionDescription>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()>;

    /// Release the underlying transport. Safe to call from any state.
    async fn close(&mut self);
}

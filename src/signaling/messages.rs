use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::media::{IceCandidate, SessionDescription};

/// Presence document each participant publishes about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub role: ParticipantRole,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub presence: Presence,
    /// Language this participant wants subtitles rendered in
    pub display_language: String,
    pub last_seen: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: &str, display_name: &str, role: ParticipantRole, display_language: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            role,
            audio_enabled: true,
            video_enabled: true,
            presence: Presence::Active,
            display_language: display_language.to_string(),
            last_seen: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Host,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Active,
    Left,
}

/// Session document published by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDoc {
    pub id: String,
    pub topic: String,
    pub host_id: String,
    pub status: SessionStatus,
    pub max_participants: usize,
    pub participant_count: usize,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Active,
    Ended,
}

/// Authoritative view of who is in the session right now.
///
/// Delivered at-least-once; consumers must reconcile idempotently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub session_id: String,
    pub participants: Vec<Participant>,
    pub at: DateTime<Utc>,
}

impl RosterSnapshot {
    /// Participant ids in the snapshot, normalized for set reconciliation
    pub fn ids(&self) -> BTreeSet<String> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }
}

/// Connection-setup payloads, a closed set validated at the transport
/// boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer { sdp: SessionDescription },
    Answer { sdp: SessionDescription },
    IceCandidate { candidate: IceCandidate },
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::IceCandidate { .. } => "ice_candidate",
        }
    }
}

/// Point-to-point signaling message relayed through the document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub session_id: String,
    pub from: String,
    pub to: String,
    /// Monotonic per-sender sequence number
    pub seq: u64,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

/// Inbox envelope: the message plus the token needed to acknowledge it
#[derive(Debug, Clone)]
pub struct InboxMessage {
    pub message: SignalingMessage,
    pub token: String,
}

use serde::Serialize;
use std::fmt;

/// Lifecycle of one peer connection.
///
/// `idle → offering → awaiting-answer → connected → {failed, disconnected}
/// → closed`; the answering side skips straight from `idle` to `connected`
/// once it has applied the offer and sent its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Idle,
    Offering,
    AwaitingAnswer,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::Idle => "idle",
            PeerState::Offering => "offering",
            PeerState::AwaitingAnswer => "awaiting-answer",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

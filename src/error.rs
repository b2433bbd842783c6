use std::fmt;

/// Error taxonomy for session lifecycle and per-peer failures.
///
/// Session-lifecycle variants (`SessionNotFound`, `SessionFull`,
/// `SessionEnded`, `MediaAccessDenied`) surface synchronously from
/// `create_session`/`join_session`. Everything else is recovered locally and
/// only reaches callers that explicitly ask for it: peer failures isolate a
/// single link, speech failures degrade to missing subtitles.
#[derive(Debug)]
pub enum SessionError {
    /// No session document exists for the requested id
    SessionNotFound(String),

    /// Session is at its mesh-topology participant cap
    SessionFull { session_id: String, max_participants: usize },

    /// Session exists but has already ended
    SessionEnded(String),

    /// Local capture device could not be opened
    MediaAccessDenied(String),

    /// Signaling message could not be delivered (transient)
    SignalingDeliveryFailed(String),

    /// Offer/answer/candidate exchange with one peer gave up after retries
    PeerNegotiationFailed(String),

    /// Speech service unreachable; subtitles suspended
    SpeechServiceUnavailable,

    /// Translation call failed; original text shown instead
    TranslationFailed(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::SessionNotFound(id) => {
                write!(f, "session {} not found", id)
            }
            SessionError::SessionFull {
                session_id,
                max_participants,
            } => {
                write!(
                    f,
                    "session {} is full ({} participants max)",
                    session_id, max_participants
                )
            }
            SessionError::SessionEnded(id) => {
                write!(f, "session {} has ended", id)
            }
            SessionError::MediaAccessDenied(reason) => {
                write!(f, "local media capture unavailable: {}", reason)
            }
            SessionError::SignalingDeliveryFailed(reason) => {
                write!(f, "signaling delivery failed: {}", reason)
            }
            SessionError::PeerNegotiationFailed(peer_id) => {
                write!(f, "negotiation with peer {} failed", peer_id)
            }
            SessionError::SpeechServiceUnavailable => {
                write!(f, "speech service unavailable")
            }
            SessionError::TranslationFailed(reason) => {
                write!(f, "translation failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for SessionError {}

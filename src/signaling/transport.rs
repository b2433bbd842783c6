use anyhow::Result;
use tokio::sync::mpsc;

use super::messages::{InboxMessage, Participant, RosterSnapshot, SessionDoc, SignalingMessage};

/// Document/roster store used to relay signaling and watch the shared
/// participant roster.
///
/// Delivery contract: roster snapshots and inbox messages arrive
/// at-least-once; consumers tolerate duplicates through idempotent
/// reconciliation. Consumed inbox messages are acknowledged through
/// [`SignalingTransport::ack`] so a retrying store does not redeliver them.
#[async_trait::async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Stream of roster snapshots for one session
    async fn watch_roster(&self, session_id: &str) -> Result<mpsc::Receiver<RosterSnapshot>>;

    /// Stream of signaling messages addressed to `self_id`
    async fn watch_inbox(
        &self,
        session_id: &str,
        self_id: &str,
    ) -> Result<mpsc::Receiver<InboxMessage>>;

    /// Relay a point-to-point signaling message
    async fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Mark an inbox message consumed (at-most-once processing)
    async fn ack(&self, message: &InboxMessage) -> Result<()>;

    /// Publish/refresh this participant's presence document
    async fn upsert_self_presence(&self, session_id: &str, participant: &Participant)
        -> Result<()>;

    /// Publish the session document (status, participant count)
    async fn publish_session(&self, doc: &SessionDoc) -> Result<()>;

    /// Read the current session document, if the session exists
    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionDoc>>;
}

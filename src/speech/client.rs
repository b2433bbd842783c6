use anyhow::Result;
use tokio::sync::mpsc;

use super::messages::{SpeechEvent, SpeechRequest};

/// Speech service collaborator, reached over a persistent duplex connection.
///
/// Requests are fire-and-forget; results come back on the event stream
/// asynchronously and out of order. A failing service must degrade silently:
/// callers drop failed transcriptions and fall back to original text for
/// failed translations.
#[async_trait::async_trait]
pub trait SpeechService: Send + Sync {
    /// Send one request. Errors mean the service is unreachable.
    async fn submit(&self, request: SpeechRequest) -> Result<()>;

    /// Stream of transcription/translation results
    async fn subscribe(&self) -> Result<mpsc::Receiver<SpeechEvent>>;

    /// Best-effort availability flag, maintained from delivery outcomes
    fn is_available(&self) -> bool;
}

pub mod cache;
pub mod client;
pub mod correlator;
pub mod language;
pub mod messages;
pub mod nats;

pub use cache::TranslationCache;
pub use client::SpeechService;
pub use correlator::{Correlator, CorrelatorConfig};
pub use messages::{SpeechEvent, SpeechRequest, TranscriptionResult, TranslationResult};
pub use nats::NatsSpeechClient;

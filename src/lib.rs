pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod speech;
pub mod store;

pub use audio::{AudioBackend, AudioBackendConfig, AudioChunk, AudioFrame, Chunker, ChunkerConfig};
pub use config::Config;
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use media::{LoopbackRegistry, MediaTransport};
pub use session::{Orchestrator, SessionConfig, SessionContext, SessionHandle};
pub use signaling::{NatsTransport, SignalingTransport};
pub use speech::{NatsSpeechClient, SpeechService};
pub use store::{StateStore, StoreEvent, StoreSnapshot, SubtitleEntry};

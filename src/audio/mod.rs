pub mod backend;
pub mod chunker;
pub mod vad;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioFrame, AudioSourceFactory, SyntheticAudioFactory,
    SyntheticBackend, SyntheticShape,
};
pub use chunker::{AudioChunk, Chunker, ChunkerConfig};
pub use vad::{VoiceGate, VoiceGateConfig, VoiceVerdict};

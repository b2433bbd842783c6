use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Requests sent to the speech service over the duplex connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeechRequest {
    /// Transcribe one audio chunk. The target language is the *listener's*
    /// display language; the source language is auto-detected service side.
    Transcribe {
        speaker_id: String,
        speaker_name: String,
        target_language: String,
        /// Base64-encoded 16-bit mono PCM
        audio: String,
        sample_rate: u32,
        captured_at: DateTime<Utc>,
    },

    /// Translate previously transcribed text
    Translate {
        speaker_id: String,
        text: String,
        source_language: String,
        target_language: String,
    },
}

/// Responses from the speech service. Asynchronous and unordered with
/// respect to requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeechEvent {
    Transcription(TranscriptionResult),
    Translation(TranslationResult),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub speaker_id: String,
    pub text: String,
    pub detected_language: String,
    pub confidence: f32,
    pub is_final: bool,
    /// Capture timestamp echoed back by the service; used to match the
    /// result to the chunk that produced it
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub speaker_id: String,
    pub original_text: String,
    /// Empty when the service could not translate; the correlator falls
    /// back to the original text
    pub translated_text: String,
    pub confidence: f32,
}

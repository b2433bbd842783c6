use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub signaling: SignalingConfig,
    pub audio: AudioConfig,
    pub speech: SpeechConfig,
    pub session: SessionLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalingConfig {
    /// NATS server URL used for signaling documents and presence
    pub nats_url: String,

    /// Seconds between self-presence heartbeats
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Seconds after which a silent participant is dropped from the roster
    #[serde(default = "default_presence_grace_secs")]
    pub presence_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Capture sample rate (the speech service expects 16kHz)
    pub sample_rate: u32,

    /// Gating window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Maximum buffered speech before a chunk is flushed
    #[serde(default = "default_max_buffer_ms")]
    pub max_buffer_ms: u64,

    /// Silence debounce before a partial utterance is flushed anyway
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Voice-activity confidence threshold (0.0 to 1.0)
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    /// Language subtitles are rendered in for this listener
    pub display_language: String,

    /// How far a result timestamp may drift from its chunk and still match
    #[serde(default = "default_match_window_ms")]
    pub match_window_ms: u64,

    /// Pending translations older than this fall back to the original text
    #[serde(default = "default_translation_timeout_ms")]
    pub translation_timeout_ms: u64,

    /// Bounded translation cache size (entries)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionLimits {
    /// Mesh-topology participant cap
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,

    /// Display name announced in presence documents
    pub display_name: String,
}

fn default_heartbeat_secs() -> u64 {
    2
}

fn default_presence_grace_secs() -> u64 {
    10
}

fn default_window_ms() -> u64 {
    1000
}

fn default_max_buffer_ms() -> u64 {
    2000
}

fn default_debounce_ms() -> u64 {
    800
}

fn default_vad_threshold() -> f32 {
    0.3
}

fn default_match_window_ms() -> u64 {
    3000
}

fn default_translation_timeout_ms() -> u64 {
    5000
}

fn default_max_participants() -> usize {
    6
}

fn default_cache_capacity() -> usize {
    5000
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GLOBECAST").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "globecast-mesh".to_string(),
                http: HttpConfig {
                    bind: "127.0.0.1".to_string(),
                    port: 8970,
                },
            },
            signaling: SignalingConfig {
                nats_url: "nats://localhost:4222".to_string(),
                heartbeat_secs: default_heartbeat_secs(),
                presence_grace_secs: default_presence_grace_secs(),
            },
            audio: AudioConfig {
                sample_rate: 16000,
                window_ms: default_window_ms(),
                max_buffer_ms: default_max_buffer_ms(),
                debounce_ms: default_debounce_ms(),
                vad_threshold: default_vad_threshold(),
            },
            speech: SpeechConfig {
                display_language: "en".to_string(),
                match_window_ms: default_match_window_ms(),
                translation_timeout_ms: default_translation_timeout_ms(),
                cache_capacity: default_cache_capacity(),
            },
            session: SessionLimits {
                max_participants: default_max_participants(),
                display_name: "Anonymous".to_string(),
            },
        }
    }
}

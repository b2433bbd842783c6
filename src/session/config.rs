use std::time::Duration;
use uuid::Uuid;

use crate::audio::{AudioBackendConfig, ChunkerConfig};
use crate::config::Config;
use crate::speech::CorrelatorConfig;

/// Runtime configuration for one session, resolved from the service
/// [`Config`] plus a fresh participant identity.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// This participant's id, unique per joined session
    pub self_id: String,
    pub display_name: String,
    pub display_language: String,
    pub max_participants: usize,

    /// Presence heartbeat interval
    pub heartbeat: Duration,

    /// Reconnect backoff base delay (doubles per attempt)
    pub backoff_base: Duration,
    /// Reconnect attempts per peer before the link is declared failed
    pub backoff_max_attempts: u32,

    /// Unrouteable signaling messages are stashed this long waiting for the
    /// roster to catch up
    pub orphan_signal_ttl: Duration,

    pub backend: AudioBackendConfig,
    pub chunker: ChunkerConfig,
    pub correlator: CorrelatorConfig,
}

impl SessionConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            self_id: Uuid::new_v4().to_string(),
            display_name: cfg.session.display_name.clone(),
            display_language: cfg.speech.display_language.clone(),
            max_participants: cfg.session.max_participants,
            heartbeat: Duration::from_secs(cfg.signaling.heartbeat_secs),
            backoff_base: Duration::from_millis(500),
            backoff_max_attempts: 5,
            orphan_signal_ttl: Duration::from_secs(10),
            backend: AudioBackendConfig {
                target_sample_rate: cfg.audio.sample_rate,
                ..AudioBackendConfig::default()
            },
            chunker: ChunkerConfig::from_audio(&cfg.audio),
            correlator: CorrelatorConfig::from_speech(&cfg.speech),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

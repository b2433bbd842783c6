//! Shared fixtures for integration tests: an in-process signaling hub, a
//! scriptable speech service, and session configs tuned for fast tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use globecast_mesh::audio::{AudioBackendConfig, ChunkerConfig, SyntheticAudioFactory, SyntheticShape, VoiceGateConfig};
use globecast_mesh::media::LoopbackRegistry;
use globecast_mesh::session::{Orchestrator, SessionConfig, SessionContext};
use globecast_mesh::signaling::{
    InboxMessage, Participant, RosterSnapshot, SessionDoc, SignalingMessage, SignalingTransport,
};
use globecast_mesh::speech::{CorrelatorConfig, SpeechEvent, SpeechRequest, SpeechService};

const WATCHER_CHANNEL: usize = 64;

#[derive(Default)]
struct HubInner {
    sessions: HashMap<String, SessionDoc>,
    /// session id -> participant id -> presence document
    presence: HashMap<String, HashMap<String, Participant>>,
    roster_watchers: HashMap<String, Vec<mpsc::Sender<RosterSnapshot>>>,
    inboxes: HashMap<(String, String), mpsc::Sender<InboxMessage>>,
    /// Messages sent before the recipient's inbox existed
    parked: HashMap<(String, String), Vec<SignalingMessage>>,
    acked: Vec<String>,
    next_token: u64,
}

/// In-process signaling document store shared by every participant in a test.
///
/// Delivers rosters on every presence change and parks signaling messages
/// until the recipient subscribes, which mirrors the at-least-once behavior
/// of the real store.
#[derive(Default)]
pub struct MemorySignaling {
    inner: Mutex<HubInner>,
}

impl MemorySignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acked_tokens(&self) -> Vec<String> {
        self.inner.lock().unwrap().acked.clone()
    }

    fn snapshot_locked(inner: &HubInner, session_id: &str) -> RosterSnapshot {
        let participants = inner
            .presence
            .get(session_id)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        RosterSnapshot {
            session_id: session_id.to_string(),
            participants,
            at: chrono::Utc::now(),
        }
    }

    async fn broadcast_roster(&self, session_id: &str) {
        let (snapshot, watchers) = {
            let inner = self.inner.lock().unwrap();
            let snapshot = Self::snapshot_locked(&inner, session_id);
            let watchers = inner
                .roster_watchers
                .get(session_id)
                .cloned()
                .unwrap_or_default();
            (snapshot, watchers)
        };
        for watcher in watchers {
            let _ = watcher.send(snapshot.clone()).await;
        }
    }
}

#[async_trait::async_trait]
impl SignalingTransport for MemorySignaling {
    async fn watch_roster(&self, session_id: &str) -> Result<mpsc::Receiver<RosterSnapshot>> {
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL);
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .roster_watchers
                .entry(session_id.to_string())
                .or_default()
                .push(tx.clone());
            Self::snapshot_locked(&inner, session_id)
        };
        let _ = tx.send(snapshot).await;
        Ok(rx)
    }

    async fn watch_inbox(
        &self,
        session_id: &str,
        self_id: &str,
    ) -> Result<mpsc::Receiver<InboxMessage>> {
        let key = (session_id.to_string(), self_id.to_string());
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL);
        let backlog = {
            let mut inner = self.inner.lock().unwrap();
            inner.inboxes.insert(key.clone(), tx.clone());
            let parked = inner.parked.remove(&key).unwrap_or_default();
            let tokens: Vec<(SignalingMessage, String)> = parked
                .into_iter()
                .map(|message| {
                    inner.next_token += 1;
                    let token = format!("tok-{}", inner.next_token);
                    (message, token)
                })
                .collect();
            tokens
        };
        for (message, token) in backlog {
            let _ = tx.send(InboxMessage { message, token }).await;
        }
        Ok(rx)
    }

    async fn send(&self, message: SignalingMessage) -> Result<()> {
        let key = (message.session_id.clone(), message.to.clone());
        let delivery = {
            let mut inner = self.inner.lock().unwrap();
            match inner.inboxes.get(&key).cloned() {
                Some(tx) => {
                    inner.next_token += 1;
                    let token = format!("tok-{}", inner.next_token);
                    Some((tx, token))
                }
                None => {
                    inner.parked.entry(key).or_default().push(message.clone());
                    None
                }
            }
        };
        if let Some((tx, token)) = delivery {
            if tx.send(InboxMessage { message, token }).await.is_err() {
                bail!("recipient inbox closed");
            }
        }
        Ok(())
    }

    async fn ack(&self, message: &InboxMessage) -> Result<()> {
        self.inner.lock().unwrap().acked.push(message.token.clone());
        Ok(())
    }

    async fn upsert_self_presence(
        &self,
        session_id: &str,
        participant: &Participant,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner
                .presence
                .entry(session_id.to_string())
                .or_default()
                .insert(participant.id.clone(), participant.clone());
        }
        self.broadcast_roster(session_id).await;
        Ok(())
    }

    async fn publish_session(&self, doc: &SessionDoc) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionDoc>> {
        Ok(self.inner.lock().unwrap().sessions.get(session_id).cloned())
    }
}

struct SpeechInner {
    requests: Vec<SpeechRequest>,
    subscribers: Vec<mpsc::Sender<SpeechEvent>>,
}

/// Scriptable speech service: records every submitted request and lets the
/// test emit results back to all subscribers.
pub struct MockSpeech {
    inner: Mutex<SpeechInner>,
    failing: AtomicBool,
}

impl MockSpeech {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SpeechInner {
                requests: Vec::new(),
                subscribers: Vec::new(),
            }),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Transcribe requests as (speaker_id, captured_at) pairs
    pub fn transcribe_requests(&self) -> Vec<(String, chrono::DateTime<chrono::Utc>)> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                SpeechRequest::Transcribe {
                    speaker_id,
                    captured_at,
                    ..
                } => Some((speaker_id, captured_at)),
                SpeechRequest::Translate { .. } => None,
            })
            .collect()
    }

    pub fn translate_requests(&self) -> Vec<(String, String)> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                SpeechRequest::Translate {
                    speaker_id, text, ..
                } => Some((speaker_id, text)),
                SpeechRequest::Transcribe { .. } => None,
            })
            .collect()
    }

    pub async fn emit(&self, event: SpeechEvent) {
        let subscribers = self.inner.lock().unwrap().subscribers.clone();
        for subscriber in subscribers {
            let _ = subscriber.send(event.clone()).await;
        }
    }
}

#[async_trait::async_trait]
impl SpeechService for MockSpeech {
    async fn submit(&self, request: SpeechRequest) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("speech service unreachable");
        }
        self.inner.lock().unwrap().requests.push(request);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<SpeechEvent>> {
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL);
        self.inner.lock().unwrap().subscribers.push(tx);
        Ok(rx)
    }

    fn is_available(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}

/// Session config with intervals shrunk so mesh convergence and chunk
/// flushes happen within test timeouts.
pub fn test_session_config(self_id: &str, language: &str) -> SessionConfig {
    SessionConfig {
        self_id: self_id.to_string(),
        display_name: self_id.to_string(),
        display_language: language.to_string(),
        max_participants: 6,
        heartbeat: Duration::from_millis(100),
        backoff_base: Duration::from_millis(50),
        backoff_max_attempts: 5,
        orphan_signal_ttl: Duration::from_secs(10),
        backend: AudioBackendConfig {
            target_sample_rate: 16000,
            target_channels: 1,
            buffer_duration_ms: 20,
        },
        chunker: ChunkerConfig {
            sample_rate: 16000,
            window_ms: 120,
            max_buffer_ms: 360,
            debounce_ms: 120,
            vad_threshold: 0.3,
            gate: VoiceGateConfig::default(),
        },
        correlator: CorrelatorConfig {
            target_language: language.to_string(),
            match_window: Duration::from_secs(3),
            translation_timeout: Duration::from_secs(5),
            cache_capacity: 100,
        },
    }
}

pub struct TestClient {
    pub orchestrator: Orchestrator,
    pub speech: Arc<MockSpeech>,
}

/// One mesh participant wired to the shared hub and loopback registry.
/// `speaking` controls whether the synthetic microphone produces a voiced
/// tone or silence.
pub fn client(
    hub: &Arc<MemorySignaling>,
    registry: &LoopbackRegistry,
    self_id: &str,
    language: &str,
    speaking: bool,
) -> TestClient {
    let config = test_session_config(self_id, language);
    client_with_config(hub, registry, config, speaking)
}

pub fn client_with_config(
    hub: &Arc<MemorySignaling>,
    registry: &LoopbackRegistry,
    config: SessionConfig,
    speaking: bool,
) -> TestClient {
    let speech = MockSpeech::new();
    let shape = if speaking {
        SyntheticShape::Tone {
            hz: 220.0,
            amplitude: 0.5,
        }
    } else {
        SyntheticShape::Silence
    };

    let context = SessionContext::new(
        Arc::clone(hub) as Arc<dyn SignalingTransport>,
        Arc::new(registry.transport_for(&config.self_id)),
        Arc::clone(&speech) as Arc<dyn SpeechService>,
        Arc::new(SyntheticAudioFactory { shape }),
    );

    TestClient {
        orchestrator: Orchestrator::new(config, context),
        speech,
    }
}

/// Poll `check` until it holds or the deadline passes
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

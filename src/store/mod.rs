//! Subtitle/presence state store: the single mutable snapshot the UI layer
//! observes.
//!
//! Every mutation from the orchestrator, the peer links and the correlator
//! funnels through methods on [`StateStore`]; readers only ever get a fully
//! cloned snapshot. Each mutation emits a coarse [`StoreEvent`] on a
//! broadcast channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::peer::PeerState;
use crate::signaling::{Participant, SessionDoc};

const EVENT_CHANNEL: usize = 256;

/// What kind of state just changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Session,
    Participants,
    Subtitles,
    SpeechAvailability,
}

/// One participant as the UI sees it: presence document plus link state
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    #[serde(flatten)]
    pub participant: Participant,
    /// Peer connection state, absent for self
    pub link_state: Option<PeerState>,
}

/// Subtitle for one speaker, rendered in the local listener's language.
///
/// One logical entry per speaker at a time; superseded entries are replaced,
/// not accumulated.
#[derive(Debug, Clone, Serialize)]
pub struct SubtitleEntry {
    pub speaker_id: String,
    pub speaker_name: String,
    pub original_text: String,
    pub original_language: String,
    /// Text shown to the listener (translated when needed)
    pub text: String,
    pub target_language: String,
    pub confidence: f32,
    pub is_final: bool,
    /// True while a translation request is outstanding
    pub is_translating: bool,
    /// When the underlying audio was captured; enforces update ordering
    pub spoken_at: DateTime<Utc>,
}

/// Full read-model snapshot
#[derive(Debug, Clone, Serialize, Default)]
pub struct StoreSnapshot {
    pub session: Option<SessionDoc>,
    pub participants: Vec<ParticipantView>,
    pub subtitles: Vec<SubtitleEntry>,
    pub speech_available: bool,
}

#[derive(Default)]
struct Inner {
    session: Option<SessionDoc>,
    participants: HashMap<String, ParticipantView>,
    subtitles: HashMap<String, SubtitleEntry>,
    speech_available: bool,
}

pub struct StateStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

impl StateStore {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL);
        Arc::new(Self {
            inner: RwLock::new(Inner {
                speech_available: true,
                ..Inner::default()
            }),
            events,
        })
    }

    /// Change notifications; every mutation emits exactly one event
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().await;
        let mut participants: Vec<ParticipantView> = inner.participants.values().cloned().collect();
        participants.sort_by(|a, b| a.participant.id.cmp(&b.participant.id));
        let mut subtitles: Vec<SubtitleEntry> = inner.subtitles.values().cloned().collect();
        subtitles.sort_by(|a, b| a.speaker_id.cmp(&b.speaker_id));

        StoreSnapshot {
            session: inner.session.clone(),
            participants,
            subtitles,
            speech_available: inner.speech_available,
        }
    }

    fn notify(&self, event: StoreEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    pub async fn set_session(&self, doc: SessionDoc) {
        self.inner.write().await.session = Some(doc);
        self.notify(StoreEvent::Session);
    }

    // ------------------------------------------------------------------
    // Participants / peer links
    // ------------------------------------------------------------------

    pub async fn upsert_participant(&self, participant: Participant) {
        {
            let mut inner = self.inner.write().await;
            let entry = inner
                .participants
                .entry(participant.id.clone())
                .or_insert_with(|| ParticipantView {
                    participant: participant.clone(),
                    link_state: None,
                });
            entry.participant = participant;
        }
        self.notify(StoreEvent::Participants);
    }

    pub async fn remove_participant(&self, participant_id: &str) {
        let removed = {
            let mut inner = self.inner.write().await;
            inner.subtitles.remove(participant_id);
            inner.participants.remove(participant_id).is_some()
        };
        if removed {
            self.notify(StoreEvent::Participants);
        }
    }

    pub async fn set_link_state(&self, participant_id: &str, state: PeerState) {
        let changed = {
            let mut inner = self.inner.write().await;
            match inner.participants.get_mut(participant_id) {
                Some(view) => {
                    view.link_state = Some(state);
                    true
                }
                None => false,
            }
        };
        if changed {
            debug!("link state for {}: {}", participant_id, state);
            self.notify(StoreEvent::Participants);
        }
    }

    // ------------------------------------------------------------------
    // Subtitles
    // ------------------------------------------------------------------

    /// Insert or replace the subtitle for a speaker.
    ///
    /// Updates are applied in `spoken_at` order: a stale result never
    /// overwrites a newer entry. Returns whether the entry was applied.
    pub async fn upsert_subtitle(&self, entry: SubtitleEntry) -> bool {
        let applied = {
            let mut inner = self.inner.write().await;
            let current = inner.subtitles.get(&entry.speaker_id);
            let stale = current
                .map(|existing| entry.spoken_at < existing.spoken_at)
                .unwrap_or(false);
            if stale {
                false
            } else {
                inner.subtitles.insert(entry.speaker_id.clone(), entry);
                true
            }
        };
        if applied {
            self.notify(StoreEvent::Subtitles);
        }
        applied
    }

    /// Drop a speaker's subtitle; with `only_pending`, keep a final one
    pub async fn drop_subtitle(&self, speaker_id: &str, only_pending: bool) {
        let removed = {
            let mut inner = self.inner.write().await;
            let should_remove = match inner.subtitles.get(speaker_id) {
                Some(entry) => !only_pending || !entry.is_final,
                None => false,
            };
            if should_remove {
                inner.subtitles.remove(speaker_id);
            }
            should_remove
        };
        if removed {
            self.notify(StoreEvent::Subtitles);
        }
    }

    /// Teardown: resolve the invariant that no non-final entry outlives the
    /// session by dropping every pending subtitle.
    pub async fn drop_pending_subtitles(&self) {
        let removed = {
            let mut inner = self.inner.write().await;
            let before = inner.subtitles.len();
            inner.subtitles.retain(|_, entry| entry.is_final);
            inner.subtitles.len() != before
        };
        if removed {
            self.notify(StoreEvent::Subtitles);
        }
    }

    // ------------------------------------------------------------------
    // Speech availability
    // ------------------------------------------------------------------

    pub async fn set_speech_available(&self, available: bool) {
        let changed = {
            let mut inner = self.inner.write().await;
            let changed = inner.speech_available != available;
            inner.speech_available = available;
            changed
        };
        if changed {
            self.notify(StoreEvent::SpeechAvailability);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::ParticipantRole;

    fn subtitle(speaker: &str, text: &str, spoken_at: DateTime<Utc>, is_final: bool) -> SubtitleEntry {
        SubtitleEntry {
            speaker_id: speaker.to_string(),
            speaker_name: speaker.to_string(),
            original_text: text.to_string(),
            original_language: "en".to_string(),
            text: text.to_string(),
            target_language: "en".to_string(),
            confidence: 0.9,
            is_final,
            is_translating: false,
            spoken_at,
        }
    }

    #[tokio::test]
    async fn stale_subtitle_does_not_overwrite_newer_entry() {
        let store = StateStore::new();
        let newer = Utc::now();
        let older = newer - chrono::Duration::seconds(5);

        assert!(store.upsert_subtitle(subtitle("a", "newer", newer, true)).await);
        assert!(!store.upsert_subtitle(subtitle("a", "older", older, true)).await);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.subtitles.len(), 1);
        assert_eq!(snapshot.subtitles[0].text, "newer");
    }

    #[tokio::test]
    async fn superseded_subtitles_are_replaced_not_accumulated() {
        let store = StateStore::new();
        let t0 = Utc::now();
        store.upsert_subtitle(subtitle("a", "one", t0, true)).await;
        store
            .upsert_subtitle(subtitle("a", "two", t0 + chrono::Duration::seconds(1), true))
            .await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.subtitles.len(), 1);
        assert_eq!(snapshot.subtitles[0].text, "two");
    }

    #[tokio::test]
    async fn teardown_drops_pending_but_keeps_final_subtitles() {
        let store = StateStore::new();
        let now = Utc::now();
        store.upsert_subtitle(subtitle("a", "done", now, true)).await;
        store.upsert_subtitle(subtitle("b", "pending", now, false)).await;

        store.drop_pending_subtitles().await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.subtitles.len(), 1);
        assert_eq!(snapshot.subtitles[0].speaker_id, "a");
    }

    #[tokio::test]
    async fn mutations_emit_change_events() {
        let store = StateStore::new();
        let mut events = store.subscribe();

        store
            .upsert_participant(Participant::new("a", "Alice", ParticipantRole::Host, "en"))
            .await;

        assert_eq!(events.recv().await.unwrap(), StoreEvent::Participants);
    }

    #[tokio::test]
    async fn link_state_requires_known_participant() {
        let store = StateStore::new();
        store.set_link_state("ghost", PeerState::Connected).await;
        assert!(store.snapshot().await.participants.is_empty());
    }
}

use anyhow::Result;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::cache::TranslationCache;
use super::client::SpeechService;
use super::language;
use super::messages::{SpeechEvent, SpeechRequest, TranscriptionResult, TranslationResult};
use crate::audio::AudioChunk;
use crate::config::SpeechConfig;
use crate::store::{StateStore, SubtitleEntry};

/// Per-speaker backlog cap; the service answers within a couple of chunks,
/// anything deeper is a stuck pipeline
const MAX_PENDING_PER_SPEAKER: usize = 32;

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// The local listener's display language (targets are per listener,
    /// sources are auto-detected)
    pub target_language: String,
    pub match_window: Duration,
    pub translation_timeout: Duration,
    pub cache_capacity: usize,
}

impl CorrelatorConfig {
    pub fn from_speech(cfg: &SpeechConfig) -> Self {
        Self {
            target_language: language::normalize_display_language(&cfg.display_language),
            match_window: Duration::from_millis(cfg.match_window_ms),
            translation_timeout: Duration::from_millis(cfg.translation_timeout_ms),
            cache_capacity: cfg.cache_capacity,
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            target_language: "en".to_string(),
            match_window: Duration::from_secs(3),
            translation_timeout: Duration::from_secs(5),
            cache_capacity: 5000,
        }
    }
}

struct PendingChunk {
    captured_at: DateTime<Utc>,
    submitted_at: DateTime<Utc>,
}

struct PendingTranslation {
    speaker_name: String,
    source_language: String,
    spoken_at: DateTime<Utc>,
    transcription_confidence: f32,
    requested_at: DateTime<Utc>,
}

/// Correlates asynchronous speech-service results back to the chunks and
/// speakers that produced them, and keeps the subtitle store current.
///
/// The service is stateless per request and append-only: results carry only
/// the speaker id and the echoed capture timestamp, so matching is by
/// speaker plus nearest-timestamp window.
pub struct Correlator {
    config: CorrelatorConfig,
    speech: Arc<dyn SpeechService>,
    store: Arc<StateStore>,
    cache: TranslationCache,
    pending_chunks: HashMap<String, VecDeque<PendingChunk>>,
    pending_translations: HashMap<(String, String), PendingTranslation>,
}

impl Correlator {
    pub fn new(
        config: CorrelatorConfig,
        speech: Arc<dyn SpeechService>,
        store: Arc<StateStore>,
    ) -> Self {
        let cache = TranslationCache::new(config.cache_capacity);
        Self {
            config,
            speech,
            store,
            cache,
            pending_chunks: HashMap::new(),
            pending_translations: HashMap::new(),
        }
    }

    /// Send one chunk for transcription. A delivery failure drops the chunk:
    /// missing subtitles must never disturb the call.
    pub async fn submit(&mut self, chunk: AudioChunk) -> Result<()> {
        let request = SpeechRequest::Transcribe {
            speaker_id: chunk.speaker_id.clone(),
            speaker_name: chunk.speaker_name.clone(),
            target_language: self.config.target_language.clone(),
            audio: base64::engine::general_purpose::STANDARD.encode(&chunk.pcm),
            sample_rate: 16000,
            captured_at: chunk.captured_at,
        };

        match self.speech.submit(request).await {
            Ok(()) => {
                self.store.set_speech_available(true).await;
                let queue = self.pending_chunks.entry(chunk.speaker_id).or_default();
                if queue.len() >= MAX_PENDING_PER_SPEAKER {
                    queue.pop_front();
                }
                queue.push_back(PendingChunk {
                    captured_at: chunk.captured_at,
                    submitted_at: Utc::now(),
                });
            }
            Err(e) => {
                warn!(
                    "transcription submit failed for {}, dropping chunk: {}",
                    chunk.speaker_id, e
                );
                self.store.set_speech_available(false).await;
            }
        }
        Ok(())
    }

    pub async fn handle_event(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Transcription(result) => self.handle_transcription(result).await,
            SpeechEvent::Translation(result) => self.handle_translation(result).await,
        }
    }

    async fn handle_transcription(&mut self, result: TranscriptionResult) {
        if result.text.trim().is_empty() {
            return;
        }

        let Some(spoken_at) = self.match_chunk(&result.speaker_id, result.timestamp) else {
            debug!(
                "unmatched transcription for {} at {}, discarded",
                result.speaker_id, result.timestamp
            );
            return;
        };

        // Short segments are often acoustically mislabeled; let strong text
        // evidence override the service's language guess.
        let (text_lang, text_confidence) = language::detect_from_text(&result.text);
        let detected = if text_confidence > language::TEXT_EVIDENCE_THRESHOLD {
            text_lang
        } else {
            result.detected_language.clone()
        };

        let speaker_name = self.speaker_name(&result.speaker_id).await;
        let target = self.config.target_language.clone();

        if detected == target {
            // Already in the listener's language: final immediately, no
            // translation call.
            self.store
                .upsert_subtitle(SubtitleEntry {
                    speaker_id: result.speaker_id.clone(),
                    speaker_name,
                    original_text: result.text.clone(),
                    original_language: detected,
                    text: result.text,
                    target_language: target,
                    confidence: result.confidence,
                    is_final: result.is_final,
                    is_translating: false,
                    spoken_at,
                })
                .await;
            return;
        }

        if let Some(cached) = self.cache.get(&result.text, &detected, &target) {
            let translated = cached.clone();
            self.store
                .upsert_subtitle(SubtitleEntry {
                    speaker_id: result.speaker_id.clone(),
                    speaker_name,
                    original_text: result.text.clone(),
                    original_language: detected,
                    text: translated,
                    target_language: target,
                    confidence: result.confidence,
                    is_final: true,
                    is_translating: false,
                    spoken_at,
                })
                .await;
            return;
        }

        // Placeholder while the translation is in flight. Never final: the
        // untranslated text must not be presented as the finished subtitle.
        let applied = self
            .store
            .upsert_subtitle(SubtitleEntry {
                speaker_id: result.speaker_id.clone(),
                speaker_name: speaker_name.clone(),
                original_text: result.text.clone(),
                original_language: detected.clone(),
                text: result.text.clone(),
                target_language: target.clone(),
                confidence: result.confidence,
                is_final: false,
                is_translating: true,
                spoken_at,
            })
            .await;
        if !applied {
            return; // superseded by a newer subtitle already
        }

        let request = SpeechRequest::Translate {
            speaker_id: result.speaker_id.clone(),
            text: result.text.clone(),
            source_language: detected.clone(),
            target_language: target,
        };

        match self.speech.submit(request).await {
            Ok(()) => {
                self.pending_translations.insert(
                    (result.speaker_id.clone(), result.text.clone()),
                    PendingTranslation {
                        speaker_name,
                        source_language: detected,
                        spoken_at,
                        transcription_confidence: result.confidence,
                        requested_at: Utc::now(),
                    },
                );
            }
            Err(e) => {
                // Fall back to the original text rather than blocking the UI
                warn!("translation submit failed for {}: {}", result.speaker_id, e);
                self.store.set_speech_available(false).await;
                self.finalize_with_original(
                    &result.speaker_id,
                    &speaker_name,
                    &result.text,
                    &detected,
                    result.confidence,
                    spoken_at,
                )
                .await;
            }
        }
    }

    async fn handle_translation(&mut self, result: TranslationResult) {
        let key = (result.speaker_id.clone(), result.original_text.clone());
        let Some(pending) = self.pending_translations.remove(&key) else {
            // Speaker left or text superseded; late results are not errors
            debug!(
                "unmatched translation for {}, discarded",
                result.speaker_id
            );
            return;
        };

        let target = self.config.target_language.clone();

        if result.translated_text.trim().is_empty() {
            warn!(
                "empty translation for {}, showing original text",
                result.speaker_id
            );
            self.finalize_with_original(
                &result.speaker_id,
                &pending.speaker_name,
                &result.original_text,
                &pending.source_language,
                pending.transcription_confidence,
                pending.spoken_at,
            )
            .await;
            return;
        }

        self.cache.insert(
            &result.original_text,
            &pending.source_language,
            &target,
            result.translated_text.clone(),
        );

        self.store
            .upsert_subtitle(SubtitleEntry {
                speaker_id: result.speaker_id,
                speaker_name: pending.speaker_name,
                original_text: result.original_text,
                original_language: pending.source_language,
                text: result.translated_text,
                target_language: target,
                confidence: result.confidence,
                is_final: true,
                is_translating: false,
                spoken_at: pending.spoken_at,
            })
            .await;
    }

    /// Periodic sweep: abandon transcriptions that never answered, fall back
    /// to the original text for translations that time out.
    pub async fn sweep(&mut self) {
        let now = Utc::now();
        let chunk_retention =
            to_chrono(self.config.match_window) * 3;
        for queue in self.pending_chunks.values_mut() {
            while let Some(front) = queue.front() {
                if now - front.submitted_at > chunk_retention {
                    queue.pop_front();
                } else {
                    break;
                }
            }
        }
        self.pending_chunks.retain(|_, queue| !queue.is_empty());

        let timeout = to_chrono(self.config.translation_timeout);
        let expired: Vec<(String, String)> = self
            .pending_translations
            .iter()
            .filter(|(_, pending)| now - pending.requested_at > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(pending) = self.pending_translations.remove(&key) {
                warn!("translation timed out for {}, showing original text", key.0);
                self.finalize_with_original(
                    &key.0,
                    &pending.speaker_name,
                    &key.1,
                    &pending.source_language,
                    pending.transcription_confidence,
                    pending.spoken_at,
                )
                .await;
            }
        }

        self.store
            .set_speech_available(self.speech.is_available())
            .await;
    }

    /// Speaker gone: forget in-flight work and remove any pending subtitle
    pub async fn drop_speaker(&mut self, speaker_id: &str) {
        self.pending_chunks.remove(speaker_id);
        self.pending_translations
            .retain(|(id, _), _| id != speaker_id);
        self.store.drop_subtitle(speaker_id, true).await;
    }

    /// Session teardown: in-flight results will be discarded on arrival
    pub fn clear(&mut self) {
        self.pending_chunks.clear();
        self.pending_translations.clear();
    }

    async fn finalize_with_original(
        &self,
        speaker_id: &str,
        speaker_name: &str,
        text: &str,
        source_language: &str,
        confidence: f32,
        spoken_at: DateTime<Utc>,
    ) {
        self.store
            .upsert_subtitle(SubtitleEntry {
                speaker_id: speaker_id.to_string(),
                speaker_name: speaker_name.to_string(),
                original_text: text.to_string(),
                original_language: source_language.to_string(),
                text: text.to_string(),
                target_language: self.config.target_language.clone(),
                confidence,
                is_final: true,
                is_translating: false,
                spoken_at,
            })
            .await;
    }

    /// Nearest-timestamp match within the window; consumes the matched entry
    /// and everything older.
    fn match_chunk(&mut self, speaker_id: &str, timestamp: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let queue = self.pending_chunks.get_mut(speaker_id)?;
        let window = to_chrono(self.config.match_window);

        let mut best: Option<(usize, ChronoDuration)> = None;
        for (index, pending) in queue.iter().enumerate() {
            let distance = (pending.captured_at - timestamp).abs();
            if distance > window {
                continue;
            }
            if best.map(|(_, d)| distance < d).unwrap_or(true) {
                best = Some((index, distance));
            }
        }

        let (index, _) = best?;
        let matched = queue[index].captured_at;
        queue.drain(..=index);
        Some(matched)
    }

    async fn speaker_name(&self, speaker_id: &str) -> String {
        let snapshot = self.store.snapshot().await;
        snapshot
            .participants
            .iter()
            .find(|view| view.participant.id == speaker_id)
            .map(|view| view.participant.display_name.clone())
            .unwrap_or_else(|| speaker_id.to_string())
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::seconds(3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct ScriptedSpeech {
        submitted: Mutex<Vec<SpeechRequest>>,
        fail: AtomicBool,
    }

    impl ScriptedSpeech {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                submitted: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn submitted(&self) -> Vec<SpeechRequest> {
            self.submitted.lock().unwrap().clone()
        }

        fn translate_count(&self) -> usize {
            self.submitted()
                .iter()
                .filter(|r| matches!(r, SpeechRequest::Translate { .. }))
                .count()
        }
    }

    #[async_trait::async_trait]
    impl SpeechService for ScriptedSpeech {
        async fn submit(&self, request: SpeechRequest) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("speech service unreachable");
            }
            self.submitted.lock().unwrap().push(request);
            Ok(())
        }

        async fn subscribe(&self) -> Result<mpsc::Receiver<SpeechEvent>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        fn is_available(&self) -> bool {
            !self.fail.load(Ordering::SeqCst)
        }
    }

    fn chunk(speaker: &str, captured_at: DateTime<Utc>) -> AudioChunk {
        AudioChunk {
            speaker_id: speaker.to_string(),
            speaker_name: speaker.to_string(),
            pcm: vec![0u8; 320],
            captured_at,
            duration: Duration::from_secs(1),
        }
    }

    fn transcription(
        speaker: &str,
        text: &str,
        language: &str,
        timestamp: DateTime<Utc>,
    ) -> TranscriptionResult {
        TranscriptionResult {
            speaker_id: speaker.to_string(),
            text: text.to_string(),
            detected_language: language.to_string(),
            confidence: 0.9,
            is_final: true,
            timestamp,
        }
    }

    fn correlator(speech: Arc<ScriptedSpeech>) -> (Correlator, Arc<StateStore>) {
        let store = StateStore::new();
        let correlator = Correlator::new(CorrelatorConfig::default(), speech, Arc::clone(&store));
        (correlator, store)
    }

    #[tokio::test]
    async fn same_language_result_is_final_without_translation() {
        let speech = ScriptedSpeech::new();
        let (mut correlator, store) = correlator(Arc::clone(&speech));

        let at = Utc::now();
        correlator.submit(chunk("a", at)).await.unwrap();
        correlator
            .handle_event(SpeechEvent::Transcription(transcription(
                "a", "hello there", "en", at,
            )))
            .await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.subtitles.len(), 1);
        let entry = &snapshot.subtitles[0];
        assert!(entry.is_final);
        assert!(!entry.is_translating);
        assert_eq!(entry.text, "hello there");
        assert_eq!(speech.translate_count(), 0);
    }

    #[tokio::test]
    async fn foreign_language_result_goes_through_translation() {
        let speech = ScriptedSpeech::new();
        let (mut correlator, store) = correlator(Arc::clone(&speech));

        let at = Utc::now();
        correlator.submit(chunk("a", at)).await.unwrap();
        correlator
            .handle_event(SpeechEvent::Transcription(transcription(
                "a",
                "el informe que se presenta no es de un tema nuevo",
                "es",
                at,
            )))
            .await;

        // Pending: placeholder visible, never final with the Spanish text
        let snapshot = store.snapshot().await;
        let entry = &snapshot.subtitles[0];
        assert!(entry.is_translating);
        assert!(!entry.is_final);
        assert_eq!(speech.translate_count(), 1);

        correlator
            .handle_event(SpeechEvent::Translation(TranslationResult {
                speaker_id: "a".to_string(),
                original_text: "el informe que se presenta no es de un tema nuevo".to_string(),
                translated_text: "the report presented is not on a new topic".to_string(),
                confidence: 0.8,
            }))
            .await;

        let snapshot = store.snapshot().await;
        let entry = &snapshot.subtitles[0];
        assert!(entry.is_final);
        assert!(!entry.is_translating);
        assert_eq!(entry.text, "the report presented is not on a new topic");
        assert_eq!(entry.original_language, "es");
    }

    #[tokio::test]
    async fn repeated_utterance_is_served_from_cache() {
        let speech = ScriptedSpeech::new();
        let (mut correlator, store) = correlator(Arc::clone(&speech));

        let phrase = "el informe que se presenta no es de un tema nuevo";
        let t0 = Utc::now();
        correlator.submit(chunk("a", t0)).await.unwrap();
        correlator
            .handle_event(SpeechEvent::Transcription(transcription("a", phrase, "es", t0)))
            .await;
        correlator
            .handle_event(SpeechEvent::Translation(TranslationResult {
                speaker_id: "a".to_string(),
                original_text: phrase.to_string(),
                translated_text: "translated".to_string(),
                confidence: 0.8,
            }))
            .await;
        assert_eq!(speech.translate_count(), 1);

        // Same phrase again, later
        let t1 = t0 + ChronoDuration::seconds(10);
        correlator.submit(chunk("a", t1)).await.unwrap();
        correlator
            .handle_event(SpeechEvent::Transcription(transcription("a", phrase, "es", t1)))
            .await;

        assert_eq!(speech.translate_count(), 1, "second call should hit cache");
        let snapshot = store.snapshot().await;
        assert!(snapshot.subtitles[0].is_final);
        assert_eq!(snapshot.subtitles[0].text, "translated");
    }

    #[tokio::test]
    async fn late_translation_for_departed_speaker_is_discarded() {
        let speech = ScriptedSpeech::new();
        let (mut correlator, store) = correlator(Arc::clone(&speech));

        let at = Utc::now();
        correlator.submit(chunk("a", at)).await.unwrap();
        correlator
            .handle_event(SpeechEvent::Transcription(transcription(
                "a",
                "el informe que se presenta no es de un tema nuevo",
                "es",
                at,
            )))
            .await;

        correlator.drop_speaker("a").await;
        assert!(store.snapshot().await.subtitles.is_empty());

        correlator
            .handle_event(SpeechEvent::Translation(TranslationResult {
                speaker_id: "a".to_string(),
                original_text: "el informe que se presenta no es de un tema nuevo".to_string(),
                translated_text: "too late".to_string(),
                confidence: 0.8,
            }))
            .await;

        assert!(store.snapshot().await.subtitles.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_drops_chunks_and_flags_store() {
        let speech = ScriptedSpeech::new();
        speech.fail.store(true, Ordering::SeqCst);
        let (mut correlator, store) = correlator(Arc::clone(&speech));

        correlator.submit(chunk("a", Utc::now())).await.unwrap();

        let snapshot = store.snapshot().await;
        assert!(snapshot.subtitles.is_empty());
        assert!(!snapshot.speech_available);
    }

    #[tokio::test]
    async fn translation_timeout_falls_back_to_original_text() {
        let speech = ScriptedSpeech::new();
        let store = StateStore::new();
        let config = CorrelatorConfig {
            translation_timeout: Duration::from_millis(0),
            ..CorrelatorConfig::default()
        };
        let mut correlator = Correlator::new(config, Arc::clone(&speech) as _, Arc::clone(&store));

        let at = Utc::now() - ChronoDuration::seconds(1);
        correlator.submit(chunk("a", at)).await.unwrap();
        correlator
            .handle_event(SpeechEvent::Transcription(transcription(
                "a",
                "el informe que se presenta no es de un tema nuevo",
                "es",
                at,
            )))
            .await;

        correlator.sweep().await;

        let snapshot = store.snapshot().await;
        let entry = &snapshot.subtitles[0];
        assert!(entry.is_final);
        assert_eq!(entry.text, entry.original_text);
    }

    #[tokio::test]
    async fn result_outside_match_window_is_discarded() {
        let speech = ScriptedSpeech::new();
        let (mut correlator, store) = correlator(Arc::clone(&speech));

        let at = Utc::now();
        correlator.submit(chunk("a", at)).await.unwrap();
        correlator
            .handle_event(SpeechEvent::Transcription(transcription(
                "a",
                "hello",
                "en",
                at + ChronoDuration::seconds(30),
            )))
            .await;

        assert!(store.snapshot().await.subtitles.is_empty());
    }
}

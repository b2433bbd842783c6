//! Audio-to-subtitle flow across the mesh: remote audio chunking, speech
//! correlation, translation placeholders and speech-service outages.

mod common;

use common::{client, wait_for, MemorySignaling};
use globecast_mesh::audio::AudioFrame;
use globecast_mesh::media::LoopbackRegistry;
use globecast_mesh::peer::PeerState;
use globecast_mesh::session::SessionHandle;
use globecast_mesh::speech::{SpeechEvent, TranscriptionResult, TranslationResult};
use std::time::Duration;
use tokio::sync::mpsc;

const SPANISH: &str = "el informe que se presenta no es de un tema nuevo";
const ENGLISH: &str = "the report presented is not on a new topic";

async fn pair_connected(handle: &SessionHandle, remote: &str) -> bool {
    handle
        .store()
        .snapshot()
        .await
        .participants
        .iter()
        .any(|view| view.participant.id == remote && view.link_state == Some(PeerState::Connected))
}

/// Push `ms` of a voiced 220Hz tone into a remote-track sender in 20ms frames
async fn speak(sender: &mpsc::Sender<AudioFrame>, ms: u64) {
    let sample_rate = 16000u32;
    let frame_ms = 20u64;
    let samples_per_frame = (sample_rate as u64 * frame_ms / 1000) as usize;
    let mut phase: f32 = 0.0;
    let step = 2.0 * std::f32::consts::PI * 220.0 / sample_rate as f32;

    for i in 0..(ms / frame_ms) {
        let samples: Vec<i16> = (0..samples_per_frame)
            .map(|_| {
                phase += step;
                (phase.sin() * 0.5 * i16::MAX as f32) as i16
            })
            .collect();
        if sender
            .send(AudioFrame {
                samples,
                sample_rate,
                channels: 1,
                timestamp_ms: i * frame_ms,
            })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(frame_ms)).await;
    }
}

#[tokio::test]
async fn remote_speech_is_translated_with_a_pending_placeholder() {
    let hub = MemorySignaling::new();
    let registry = LoopbackRegistry::new();

    // Alice listens in English; Bob speaks Spanish
    let alice = client(&hub, &registry, "alice", "en", false);
    let bob = client(&hub, &registry, "bob", "es", false);

    let a = alice.orchestrator.create_session("intl").await.unwrap();
    let b = bob.orchestrator.join_session(a.session_id()).await.unwrap();
    wait_for("pair up", || pair_connected(&a, "bob")).await;

    // Bob's voice arrives at Alice over the media transport
    let to_alice = registry
        .remote_audio_sender("bob", "alice")
        .expect("remote track wired");
    tokio::spawn(async move { speak(&to_alice, 1200).await });

    wait_for("transcribe request for bob", || async {
        !alice.speech.transcribe_requests().is_empty()
    })
    .await;
    let (speaker, captured_at) = alice.speech.transcribe_requests()[0].clone();
    assert_eq!(speaker, "bob");

    alice
        .speech
        .emit(SpeechEvent::Transcription(TranscriptionResult {
            speaker_id: "bob".to_string(),
            text: SPANISH.to_string(),
            detected_language: "es".to_string(),
            confidence: 0.9,
            is_final: true,
            timestamp: captured_at,
        }))
        .await;

    // While the translation is in flight the subtitle shows the original
    // text, flagged pending and never final
    wait_for("pending placeholder", || async {
        let snapshot = a.store().snapshot().await;
        snapshot.subtitles.iter().any(|entry| {
            entry.speaker_id == "bob"
                && entry.is_translating
                && !entry.is_final
                && entry.text == SPANISH
        })
    })
    .await;
    assert_eq!(
        alice.speech.translate_requests(),
        vec![("bob".to_string(), SPANISH.to_string())]
    );

    alice
        .speech
        .emit(SpeechEvent::Translation(TranslationResult {
            speaker_id: "bob".to_string(),
            original_text: SPANISH.to_string(),
            translated_text: ENGLISH.to_string(),
            confidence: 0.8,
        }))
        .await;

    wait_for("final translated subtitle", || async {
        let snapshot = a.store().snapshot().await;
        snapshot.subtitles.iter().any(|entry| {
            entry.speaker_id == "bob"
                && entry.is_final
                && !entry.is_translating
                && entry.text == ENGLISH
                && entry.original_language == "es"
        })
    })
    .await;

    a.leave().await;
    b.leave().await;
}

#[tokio::test]
async fn same_language_speech_needs_no_translation() {
    let hub = MemorySignaling::new();
    let registry = LoopbackRegistry::new();

    let alice = client(&hub, &registry, "alice", "en", false);
    let bob = client(&hub, &registry, "bob", "en", false);

    let a = alice.orchestrator.create_session("local").await.unwrap();
    let b = bob.orchestrator.join_session(a.session_id()).await.unwrap();
    wait_for("pair up", || pair_connected(&a, "bob")).await;

    let to_alice = registry
        .remote_audio_sender("bob", "alice")
        .expect("remote track wired");
    tokio::spawn(async move { speak(&to_alice, 800).await });

    wait_for("transcribe request", || async {
        !alice.speech.transcribe_requests().is_empty()
    })
    .await;
    let (_, captured_at) = alice.speech.transcribe_requests()[0].clone();

    alice
        .speech
        .emit(SpeechEvent::Transcription(TranscriptionResult {
            speaker_id: "bob".to_string(),
            text: "good morning everyone".to_string(),
            detected_language: "en".to_string(),
            confidence: 0.95,
            is_final: true,
            timestamp: captured_at,
        }))
        .await;

    wait_for("final subtitle", || async {
        let snapshot = a.store().snapshot().await;
        snapshot.subtitles.iter().any(|entry| {
            entry.speaker_id == "bob" && entry.is_final && entry.text == "good morning everyone"
        })
    })
    .await;
    assert!(alice.speech.translate_requests().is_empty());

    a.leave().await;
    b.leave().await;
}

#[tokio::test]
async fn speech_outage_degrades_subtitles_but_not_the_call() {
    let hub = MemorySignaling::new();
    let registry = LoopbackRegistry::new();

    let alice = client(&hub, &registry, "alice", "en", false);
    let bob = client(&hub, &registry, "bob", "en", false);

    let a = alice.orchestrator.create_session("outage").await.unwrap();
    let b = bob.orchestrator.join_session(a.session_id()).await.unwrap();
    wait_for("pair up", || pair_connected(&a, "bob")).await;

    alice.speech.set_failing(true);

    let to_alice = registry
        .remote_audio_sender("bob", "alice")
        .expect("remote track wired");
    tokio::spawn(async move { speak(&to_alice, 800).await });

    wait_for("speech flagged unavailable", || async {
        !a.store().snapshot().await.speech_available
    })
    .await;

    // Chunks were dropped, the call itself is untouched
    assert!(alice.speech.transcribe_requests().is_empty());
    assert!(pair_connected(&a, "bob").await);

    // Recovery: new audio flows to the service again
    alice.speech.set_failing(false);
    let to_alice = registry
        .remote_audio_sender("bob", "alice")
        .expect("remote track wired");
    tokio::spawn(async move { speak(&to_alice, 800).await });

    wait_for("speech recovered", || async {
        !alice.speech.transcribe_requests().is_empty()
            && a.store().snapshot().await.speech_available
    })
    .await;

    a.leave().await;
    b.leave().await;
}

#[tokio::test]
async fn muting_stops_local_chunk_submission() {
    let hub = MemorySignaling::new();
    let registry = LoopbackRegistry::new();

    // Alice's own microphone produces a voiced tone
    let alice = client(&hub, &registry, "alice", "en", true);

    let a = alice.orchestrator.create_session("mute").await.unwrap();

    wait_for("own speech submitted", || async {
        !alice.speech.transcribe_requests().is_empty()
    })
    .await;

    a.set_audio_enabled(false).await;
    tokio::time::sleep(Duration::from_millis(200)).await; // drain in-flight chunks
    let count_after_mute = alice.speech.transcribe_requests().len();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        alice.speech.transcribe_requests().len(),
        count_after_mute,
        "muted microphone must not produce chunks"
    );

    a.set_audio_enabled(true).await;
    wait_for("capture resumed", || async {
        alice.speech.transcribe_requests().len() > count_after_mute
    })
    .await;

    a.leave().await;
}

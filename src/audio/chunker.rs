use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::backend::AudioFrame;
use super::vad::{VoiceGate, VoiceGateConfig};
use crate::config::AudioConfig;

/// Chunking configuration, one per session
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Working sample rate; frames are normalized to this (mono)
    pub sample_rate: u32,

    /// Gating window length
    pub window_ms: u64,

    /// Max buffered speech before a forced flush
    pub max_buffer_ms: u64,

    /// Flush a held utterance after this much silence on the source
    pub debounce_ms: u64,

    /// Voiced-frame ratio required to keep a window
    pub vad_threshold: f32,

    pub gate: VoiceGateConfig,
}

impl ChunkerConfig {
    pub fn from_audio(cfg: &AudioConfig) -> Self {
        Self {
            sample_rate: cfg.sample_rate,
            window_ms: cfg.window_ms,
            max_buffer_ms: cfg.max_buffer_ms,
            debounce_ms: cfg.debounce_ms,
            vad_threshold: cfg.vad_threshold,
            gate: VoiceGateConfig::default(),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            window_ms: 1000,
            max_buffer_ms: 2000,
            debounce_ms: 800,
            vad_threshold: 0.3,
            gate: VoiceGateConfig::default(),
        }
    }
}

/// One voice-gated slice of a speaker's audio, ready for transcription.
/// Transient: consumed by the correlator and then dropped.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub speaker_id: String,
    pub speaker_name: String,
    /// Little-endian 16-bit mono PCM
    pub pcm: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub duration: Duration,
}

struct SourceHandle {
    task: JoinHandle<()>,
}

/// Converts continuous per-speaker frame streams into discrete speech chunks.
///
/// Sources (the local track plus one per remote participant) run
/// independently; detaching a source halts it and discards whatever it was
/// buffering.
pub struct Chunker {
    config: ChunkerConfig,
    chunk_tx: mpsc::Sender<AudioChunk>,
    sources: HashMap<String, SourceHandle>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, chunk_tx: mpsc::Sender<AudioChunk>) -> Self {
        Self {
            config,
            chunk_tx,
            sources: HashMap::new(),
        }
    }

    /// Attach a frame source for `speaker_id`, replacing any existing one
    pub fn attach(
        &mut self,
        speaker_id: &str,
        speaker_name: &str,
        frames: mpsc::Receiver<AudioFrame>,
    ) {
        self.detach(speaker_id);

        info!("chunker: attaching source for {}", speaker_id);
        let task = tokio::spawn(run_source(
            self.config.clone(),
            speaker_id.to_string(),
            speaker_name.to_string(),
            frames,
            self.chunk_tx.clone(),
        ));
        self.sources
            .insert(speaker_id.to_string(), SourceHandle { task });
    }

    /// Halt a source and discard its buffered audio
    pub fn detach(&mut self, speaker_id: &str) {
        if let Some(handle) = self.sources.remove(speaker_id) {
            handle.task.abort();
            info!("chunker: detached source for {}", speaker_id);
        }
    }

    pub fn detach_all(&mut self) {
        let ids: Vec<String> = self.sources.keys().cloned().collect();
        for id in ids {
            self.detach(&id);
        }
    }
}

impl Drop for Chunker {
    fn drop(&mut self) {
        for handle in self.sources.values() {
            handle.task.abort();
        }
    }
}

async fn run_source(
    config: ChunkerConfig,
    speaker_id: String,
    speaker_name: String,
    mut frames: mpsc::Receiver<AudioFrame>,
    chunk_tx: mpsc::Sender<AudioChunk>,
) {
    let gate = VoiceGate::new(config.gate.clone());
    let window_samples = (config.sample_rate as u64 * config.window_ms / 1000) as usize;
    let max_samples = (config.sample_rate as u64 * config.max_buffer_ms / 1000) as usize;
    let debounce = Duration::from_millis(config.debounce_ms);

    // Raw samples awaiting a full gating window
    let mut window: Vec<i16> = Vec::with_capacity(window_samples);
    // Consecutive voiced windows accumulating into the next chunk
    let mut buffer: Vec<i16> = Vec::with_capacity(max_samples);
    let mut buffer_started_at: Option<DateTime<Utc>> = None;

    debug!("chunker source task started for {}", speaker_id);

    loop {
        match timeout(debounce, frames.recv()).await {
            Ok(Some(frame)) => {
                window.extend(normalize(frame, config.sample_rate));

                while window.len() >= window_samples {
                    let slice: Vec<i16> = window.drain(..window_samples).collect();
                    let verdict = gate.assess(&slice, config.sample_rate);

                    if verdict.voiced(config.vad_threshold) {
                        if buffer.is_empty() {
                            buffer_started_at = Some(Utc::now());
                        }
                        buffer.extend(slice);
                    } else if !buffer.is_empty() {
                        // Utterance ended on a silent window
                        flush(
                            &config,
                            &speaker_id,
                            &speaker_name,
                            &mut buffer,
                            &mut buffer_started_at,
                            &chunk_tx,
                        )
                        .await;
                    }

                    if buffer.len() >= max_samples {
                        flush(
                            &config,
                            &speaker_id,
                            &speaker_name,
                            &mut buffer,
                            &mut buffer_started_at,
                            &chunk_tx,
                        )
                        .await;
                    }
                }
            }
            Ok(None) => {
                // Source removed upstream; discard whatever was held
                debug!("chunker source for {} closed", speaker_id);
                break;
            }
            Err(_) => {
                // Debounce expired with no new frames; don't hold the
                // utterance hostage waiting for more audio.
                if !buffer.is_empty() {
                    flush(
                        &config,
                        &speaker_id,
                        &speaker_name,
                        &mut buffer,
                        &mut buffer_started_at,
                        &chunk_tx,
                    )
                    .await;
                }
            }
        }
    }
}

async fn flush(
    config: &ChunkerConfig,
    speaker_id: &str,
    speaker_name: &str,
    buffer: &mut Vec<i16>,
    started_at: &mut Option<DateTime<Utc>>,
    chunk_tx: &mpsc::Sender<AudioChunk>,
) {
    if buffer.is_empty() {
        return;
    }

    let samples: Vec<i16> = std::mem::take(buffer);
    let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let duration =
        Duration::from_millis(samples.len() as u64 * 1000 / config.sample_rate as u64);

    let chunk = AudioChunk {
        speaker_id: speaker_id.to_string(),
        speaker_name: speaker_name.to_string(),
        pcm,
        captured_at: started_at.take().unwrap_or_else(Utc::now),
        duration,
    };

    debug!(
        "chunker: flushing {:.1}s chunk for {}",
        chunk.duration.as_secs_f64(),
        speaker_id
    );

    if chunk_tx.send(chunk).await.is_err() {
        warn!("chunk consumer gone, dropping chunk from {}", speaker_id);
    }
}

/// Normalize a frame to mono at the working sample rate
fn normalize(frame: AudioFrame, target_rate: u32) -> Vec<i16> {
    let mono = if frame.channels > 1 {
        mix_to_mono(&frame.samples, frame.channels)
    } else {
        frame.samples
    };

    if frame.sample_rate == target_rate {
        return mono;
    }

    let ratio = frame.sample_rate / target_rate;
    if ratio <= 1 {
        return mono; // can't upsample, pass through
    }

    // Decimate: take every Nth sample
    mono.iter().step_by(ratio as usize).copied().collect()
}

/// Sum interleaved channels down to mono, clamping
fn mix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|group| {
            let sum: i32 = group.iter().map(|&s| s as i32).sum();
            sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_to_mono_clamps_on_overflow() {
        let samples = vec![i16::MAX, i16::MAX, -100, 100];
        let mono = mix_to_mono(&samples, 2);
        assert_eq!(mono, vec![i16::MAX, 0]);
    }

    #[test]
    fn normalize_decimates_to_target_rate() {
        let frame = AudioFrame {
            samples: (0..320).map(|i| i as i16).collect(),
            sample_rate: 32000,
            channels: 1,
            timestamp_ms: 0,
        };
        let out = normalize(frame, 16000);
        assert_eq!(out.len(), 160);
        assert_eq!(out[1], 2);
    }
}

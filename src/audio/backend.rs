use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for an audio capture backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // speech service expects 16kHz
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
        }
    }
}

/// Local audio capture backend.
///
/// Device glue is deployment-specific and lives behind this trait; the
/// pipeline only consumes the frame stream.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Creates the local capture backend for a session.
///
/// Failures here surface as `MediaAccessDenied` to the join/create caller.
pub trait AudioSourceFactory: Send + Sync {
    fn create(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;
}

/// Waveform emitted by the synthetic backend
#[derive(Debug, Clone, Copy)]
pub enum SyntheticShape {
    Silence,
    /// Sine tone at the given frequency, handy for exercising the voice gate
    Tone { hz: f32, amplitude: f32 },
}

/// Clock-driven backend that synthesizes frames instead of touching a device.
///
/// Used by the demo binary and tests; real deployments plug a device-backed
/// implementation into [`AudioSourceFactory`].
pub struct SyntheticBackend {
    config: AudioBackendConfig,
    shape: SyntheticShape,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SyntheticBackend {
    pub fn new(config: AudioBackendConfig, shape: SyntheticShape) -> Self {
        Self {
            config,
            shape,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for SyntheticBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(32);

        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let sample_rate = self.config.target_sample_rate;
        let channels = self.config.target_channels;
        let frame_ms = self.config.buffer_duration_ms;
        let samples_per_frame = (sample_rate as u64 * frame_ms / 1000) as usize * channels as usize;
        let shape = self.shape;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(frame_ms));
            let mut elapsed_ms: u64 = 0;
            let mut phase: f32 = 0.0;

            while capturing.load(Ordering::SeqCst) {
                ticker.tick().await;

                let samples = match shape {
                    SyntheticShape::Silence => vec![0i16; samples_per_frame],
                    SyntheticShape::Tone { hz, amplitude } => {
                        let step = 2.0 * std::f32::consts::PI * hz / sample_rate as f32;
                        (0..samples_per_frame)
                            .map(|_| {
                                phase += step;
                                (phase.sin() * amplitude * i16::MAX as f32) as i16
                            })
                            .collect()
                    }
                };

                let frame = AudioFrame {
                    samples,
                    sample_rate,
                    channels,
                    timestamp_ms: elapsed_ms,
                };
                elapsed_ms += frame_ms;

                if tx.send(frame).await.is_err() {
                    break; // receiver gone, capture no longer needed
                }
            }
        });

        self.task = Some(task);
        info!("synthetic audio backend started ({}Hz)", sample_rate);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Factory producing [`SyntheticBackend`]s
pub struct SyntheticAudioFactory {
    pub shape: SyntheticShape,
}

impl SyntheticAudioFactory {
    pub fn silence() -> Self {
        Self {
            shape: SyntheticShape::Silence,
        }
    }
}

impl AudioSourceFactory for SyntheticAudioFactory {
    fn create(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        Ok(Box::new(SyntheticBackend::new(config, self.shape)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_backend_emits_frames_until_stopped() {
        let mut backend = SyntheticBackend::new(
            AudioBackendConfig {
                buffer_duration_ms: 10,
                ..AudioBackendConfig::default()
            },
            SyntheticShape::Silence,
        );

        let mut rx = backend.start().await.unwrap();
        assert!(backend.is_capturing());

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.samples.len(), 160);

        backend.stop().await.unwrap();
        assert!(!backend.is_capturing());
    }
}

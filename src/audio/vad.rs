//! Lightweight voice-activity gate.
//!
//! Classifies fixed windows of PCM as speech or silence/noise before they are
//! allowed to cost a transcription call. Uses time-domain heuristics: RMS
//! energy, zero-crossing rate and the share of signal energy in rapid
//! transitions (a cheap stand-in for band-limited spectral energy). A window
//! counts as voiced when enough of its 30ms frames look like speech.

/// Tuning knobs for the gate
#[derive(Debug, Clone)]
pub struct VoiceGateConfig {
    /// Classification frame length in milliseconds
    pub frame_ms: u64,

    /// Minimum normalized RMS for a frame to be considered non-silent
    pub energy_floor: f32,

    /// Zero-crossing-rate band typical for voiced speech
    pub zcr_min: f32,
    pub zcr_max: f32,
}

impl Default for VoiceGateConfig {
    fn default() -> Self {
        Self {
            frame_ms: 30,
            energy_floor: 0.01,
            zcr_min: 0.02,
            zcr_max: 0.35,
        }
    }
}

/// Gate decision for one window
#[derive(Debug, Clone, Copy)]
pub struct VoiceVerdict {
    /// Fraction of frames classified as voiced (0.0 to 1.0)
    pub score: f32,

    /// Normalized RMS over the whole window
    pub rms: f32,
}

impl VoiceVerdict {
    pub fn voiced(&self, threshold: f32) -> bool {
        self.score >= threshold
    }
}

pub struct VoiceGate {
    config: VoiceGateConfig,
}

impl VoiceGate {
    pub fn new(config: VoiceGateConfig) -> Self {
        Self { config }
    }

    /// Assess one window of mono PCM
    pub fn assess(&self, samples: &[i16], sample_rate: u32) -> VoiceVerdict {
        if samples.is_empty() {
            return VoiceVerdict {
                score: 0.0,
                rms: 0.0,
            };
        }

        let frame_len = (sample_rate as u64 * self.config.frame_ms / 1000) as usize;
        if frame_len == 0 || samples.len() < frame_len {
            return VoiceVerdict {
                score: 0.0,
                rms: rms(samples),
            };
        }

        let mut voiced_frames = 0usize;
        let mut total_frames = 0usize;

        for frame in samples.chunks_exact(frame_len) {
            total_frames += 1;
            if self.frame_is_voiced(frame) {
                voiced_frames += 1;
            }
        }

        let score = if total_frames == 0 {
            0.0
        } else {
            voiced_frames as f32 / total_frames as f32
        };

        VoiceVerdict {
            score,
            rms: rms(samples),
        }
    }

    fn frame_is_voiced(&self, frame: &[i16]) -> bool {
        let energy = rms(frame);
        if energy < self.config.energy_floor {
            return false;
        }

        let zcr = zero_crossing_rate(frame);
        if zcr < self.config.zcr_min || zcr > self.config.zcr_max {
            // Too flat (DC hum) or too busy (broadband noise) for speech
            return false;
        }

        true
    }
}

fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / i16::MAX as f64;
            x * x
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

fn zero_crossing_rate(samples: &[i16]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0) != (pair[1] >= 0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

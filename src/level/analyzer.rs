//! PCM frame analysis for the live loudness meter.
//!
//! Pure math, no I/O. A window of mono signed-16-bit samples goes in, a
//! normalized loudness in [0, 1] comes out.
//!
//! Smoothing policy: fixed-asymmetry exponential filter. Rising readings are
//! weighted 70% new / 30% old so the meter reacts on attack; falling readings
//! 40% new / 60% old so it relaxes instead of flickering. Readings below
//! `NOISE_FLOOR` report exactly 0 to keep the meter still on silence.

/// Linear gain applied after RMS normalization. Tuned so typical speech at
/// normal microphone gain (raw RMS around 0.15-0.25) lands near the top of
/// the meter without pinning it.
pub const GAIN: f32 = 4.5;

/// Weight of the new reading when the level is rising.
const ATTACK: f32 = 0.7;

/// Weight of the new reading when the level is falling.
const RELEASE: f32 = 0.4;

/// Smoothed values below this report exactly 0.
pub const NOISE_FLOOR: f32 = 0.005;

/// Root-mean-square amplitude of a sample window, normalized to [0, 1] with
/// the fixed gain applied and the result clamped.
///
/// An empty or all-zero window returns exactly 0.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();

    let rms = (sum_sq / samples.len() as f64).sqrt() as f32;
    (rms * GAIN).clamp(0.0, 1.0)
}

/// Stateful smoothing accumulator over per-frame RMS readings.
#[derive(Debug, Default)]
pub struct LevelAnalyzer {
    smoothed: f32,
}

impl LevelAnalyzer {
    pub fn new() -> Self {
        Self { smoothed: 0.0 }
    }

    /// Feed one analysis frame; returns the smoothed loudness in [0, 1].
    pub fn process(&mut self, samples: &[i16]) -> f32 {
        let raw = rms_level(samples);

        let weight = if raw > self.smoothed { ATTACK } else { RELEASE };
        self.smoothed = weight * raw + (1.0 - weight) * self.smoothed;

        if self.smoothed < NOISE_FLOOR {
            self.smoothed = 0.0;
        }

        self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }
}

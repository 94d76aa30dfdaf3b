//! Minimal capture-side preprocessing. Anything heavier (noise suppression,
//! echo cancellation) is left to the platform audio stack — extra filtering
//! here just adds latency.

/// One-pole DC-blocking high-pass filter:
/// `y[n] = x[n] - x[n-1] + R * y[n-1]`.
#[derive(Debug)]
pub struct DcBlocker {
    r: f32,
    prev_input: f32,
    prev_output: f32,
}

impl Default for DcBlocker {
    fn default() -> Self {
        Self {
            r: 0.995,
            prev_input: 0.0,
            prev_output: 0.0,
        }
    }
}

impl DcBlocker {
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples {
            let y = *sample - self.prev_input + self.r * self.prev_output;
            self.prev_input = *sample;
            self.prev_output = y;
            *sample = y;
        }
    }
}

/// Fast-attack / slow-release compressor. Tames transient peaks without
/// pumping on normal speech.
#[derive(Debug)]
pub struct Compressor {
    threshold: f32,
    ratio: f32,
    attack: f32,
    release: f32,
    envelope: f32,
}

impl Default for Compressor {
    fn default() -> Self {
        // ~5ms attack / ~120ms release at 24kHz.
        Self {
            threshold: 0.5,
            ratio: 4.0,
            attack: 0.008,
            release: 0.0004,
            envelope: 0.0,
        }
    }
}

impl Compressor {
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples {
            let level = sample.abs();
            let coeff = if level > self.envelope {
                self.attack
            } else {
                self.release
            };
            self.envelope += coeff * (level - self.envelope);

            if self.envelope > self.threshold {
                let excess = self.envelope - self.threshold;
                let compressed = self.threshold + excess / self.ratio;
                let gain = compressed / self.envelope;
                *sample *= gain;
            }
        }
    }
}

/// Smoothed signal level for UI animation: instant attack, exponential decay.
#[derive(Debug)]
pub struct LevelMeter {
    level: f32,
    decay: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self {
            level: 0.0,
            decay: 0.92,
        }
    }
}

impl LevelMeter {
    /// Feeds one block of samples; returns the smoothed level.
    pub fn update(&mut self, samples: &[f32]) -> f32 {
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak > self.level {
            self.level = peak;
        } else {
            self.level *= self.decay;
        }
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_blocker_removes_constant_offset() {
        let mut blocker = DcBlocker::default();
        let mut samples = vec![0.25f32; 4096];
        blocker.process(&mut samples);
        // After settling, a pure DC input decays toward zero.
        let tail_mean: f32 =
            samples[3000..].iter().copied().sum::<f32>() / samples[3000..].len() as f32;
        assert!(tail_mean.abs() < 0.01, "tail mean {tail_mean}");
    }

    #[test]
    fn dc_blocker_passes_alternating_signal() {
        let mut blocker = DcBlocker::default();
        let mut samples: Vec<f32> = (0..512).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        blocker.process(&mut samples);
        let peak = samples[256..].iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(peak > 0.4, "high-frequency content survived: {peak}");
    }

    #[test]
    fn compressor_reduces_loud_peaks_only() {
        let mut compressor = Compressor::default();
        // Warm the envelope up with a sustained loud signal.
        let mut loud = vec![0.95f32; 2048];
        compressor.process(&mut loud);
        assert!(loud.last().unwrap().abs() < 0.95);

        let mut compressor = Compressor::default();
        let mut quiet = vec![0.1f32; 2048];
        compressor.process(&mut quiet);
        // Below threshold, the signal is untouched.
        assert!((quiet.last().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn level_meter_attacks_fast_and_decays_slow() {
        let mut meter = LevelMeter::default();
        let level = meter.update(&[0.8, -0.2]);
        assert!((level - 0.8).abs() < 1e-6, "attack is instant");

        let decayed = meter.update(&[0.0; 64]);
        assert!(decayed < 0.8 && decayed > 0.5, "decay is gradual: {decayed}");
    }
}

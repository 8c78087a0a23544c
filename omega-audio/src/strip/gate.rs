//! Noise gate / downward expander
//!
//! The detector tracks mean-square level with a short one-pole. Below the
//! threshold the signal is pushed down by `ratio` dB for every dB it is
//! under; attack opens the gate, release closes it.

use crate::buffer::db_to_linear;

/// Detector integration time (seconds)
const DETECTOR_SECS: f32 = 0.005;
/// Deepest attenuation the gate applies (dB)
const FLOOR_DB: f32 = -100.0;

pub struct Gate {
    enabled: bool,
    sample_rate: f32,
    threshold: f32, // dB
    ratio: f32,
    attack: f32,  // ms
    release: f32, // ms
    attack_coeff: f32,
    release_coeff: f32,
    detector_coeff: f32,
    mean_square: f32,
    gain: f32,
}

impl Gate {
    pub fn new(sample_rate: f32) -> Self {
        let mut gate = Self {
            enabled: false,
            sample_rate,
            threshold: -40.0,
            ratio: 10.0,
            attack: 1.0,
            release: 50.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            detector_coeff: 1.0 - (-1.0 / (sample_rate * DETECTOR_SECS)).exp(),
            mean_square: 0.0,
            gain: 1.0,
        };
        gate.update_coefficients();
        gate
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    /// Threshold in dB (-80 to 0)
    pub fn set_threshold(&mut self, db: f32) {
        self.threshold = db.clamp(-80.0, 0.0);
    }

    /// Expansion ratio (1 to 100)
    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.clamp(1.0, 100.0);
    }

    /// Attack in ms (0.1 to 100)
    pub fn set_attack_ms(&mut self, ms: f32) {
        self.attack = ms.clamp(0.1, 100.0);
        self.update_coefficients();
    }

    /// Release in ms (5 to 1000)
    pub fn set_release_ms(&mut self, ms: f32) {
        self.release = ms.clamp(5.0, 1000.0);
        self.update_coefficients();
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Current gain applied by the gate (linear)
    pub fn gain(&self) -> f32 {
        self.gain
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = (-1.0 / (self.sample_rate * self.attack / 1000.0)).exp();
        self.release_coeff = (-1.0 / (self.sample_rate * self.release / 1000.0)).exp();
    }

    /// Target gain for a detector level
    #[inline]
    fn target_gain(&self, level_db: f32) -> f32 {
        if level_db >= self.threshold {
            1.0
        } else {
            let under = level_db - self.threshold;
            db_to_linear((under * (self.ratio - 1.0)).max(FLOOR_DB))
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }

        for frame in samples.chunks_exact_mut(2) {
            let peak_sq = (frame[0] * frame[0]).max(frame[1] * frame[1]);
            self.mean_square += self.detector_coeff * (peak_sq - self.mean_square);
            let level_db = if self.mean_square > 1e-20 {
                10.0 * self.mean_square.log10()
            } else {
                -200.0
            };

            let target = self.target_gain(level_db);
            let coeff = if target > self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = coeff * self.gain + (1.0 - coeff) * target;

            frame[0] *= self.gain;
            frame[1] *= self.gain;
        }
    }

    pub fn reset(&mut self) {
        self.mean_square = 0.0;
        self.gain = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let mut gate = Gate::new(48000.0);
        assert!(!gate.is_enabled());
        let mut samples = vec![0.0001; 64];
        gate.process(&mut samples);
        assert_eq!(samples, vec![0.0001; 64]);
    }

    #[test]
    fn test_quiet_signal_is_gated() {
        let mut gate = Gate::new(48000.0);
        gate.set_enabled(true);
        // -60 dB, well under the -40 dB threshold
        let mut samples = vec![0.001; 48000];
        gate.process(&mut samples);
        assert!(samples[47998].abs() < 1e-6);
    }

    #[test]
    fn test_loud_signal_passes() {
        let mut gate = Gate::new(48000.0);
        gate.set_enabled(true);
        let mut samples = vec![0.5; 48000];
        gate.process(&mut samples);
        assert!((samples[47998] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_parameter_clamping() {
        let mut gate = Gate::new(48000.0);
        gate.set_threshold(-120.0);
        assert_eq!(gate.threshold(), -80.0);
        gate.set_ratio(0.5);
        assert_eq!(gate.ratio(), 1.0);
    }
}

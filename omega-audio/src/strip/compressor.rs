//! Channel compressor
//!
//! Feed-forward, soft knee, gain computer in the log domain. The envelope
//! smooths gain reduction (dB) with attack/release one-poles. An external
//! key signal can replace the channel's own level for detection.

use crate::buffer::{db_to_linear, linear_to_db};

pub struct Compressor {
    enabled: bool,
    sample_rate: f32,

    threshold: f32, // dB (-60 to 0)
    ratio: f32,     // 1 to 20
    knee: f32,      // dB (0 to 24)
    attack: f32,    // ms (0.1 to 100)
    release: f32,   // ms (10 to 1000)
    makeup: f32,    // dB (0 to 24)

    attack_coeff: f32,
    release_coeff: f32,

    /// Smoothed gain reduction (dB, <= 0)
    envelope_db: f32,
    /// Deepest reduction seen in the last block, for metering
    block_gr_db: f32,
}

impl Compressor {
    pub fn new(sample_rate: f32) -> Self {
        let mut comp = Self {
            enabled: true,
            sample_rate,
            threshold: -20.0,
            ratio: 4.0,
            knee: 3.0,
            attack: 5.0,
            release: 100.0,
            makeup: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope_db: 0.0,
            block_gr_db: 0.0,
        };
        comp.update_coefficients();
        comp
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

    /// Set threshold in dB (-60 to 0)
    pub fn set_threshold(&mut self, db: f32) {
        self.threshold = db.clamp(-60.0, 0.0);
    }

    /// Set ratio (1 to 20)
    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.clamp(1.0, 20.0);
    }

    /// Set knee width in dB (0 to 24)
    pub fn set_knee(&mut self, knee_db: f32) {
        self.knee = knee_db.clamp(0.0, 24.0);
    }

    /// Set attack in ms (0.1 to 100)
    pub fn set_attack_ms(&mut self, ms: f32) {
        self.attack = ms.clamp(0.1, 100.0);
        self.update_coefficients();
    }

    /// Set release in ms (10 to 1000)
    pub fn set_release_ms(&mut self, ms: f32) {
        self.release = ms.clamp(10.0, 1000.0);
        self.update_coefficients();
    }

    /// Set make-up gain in dB (0 to 24)
    pub fn set_makeup_db(&mut self, db: f32) {
        self.makeup = db.clamp(0.0, 24.0);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn attack_ms(&self) -> f32 {
        self.attack
    }

    /// Gain reduction of the last processed block in dB (<= 0)
    pub fn gain_reduction_db(&self) -> f32 {
        self.block_gr_db
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = (-1.0 / (self.sample_rate * self.attack / 1000.0)).exp();
        self.release_coeff = (-1.0 / (self.sample_rate * self.release / 1000.0)).exp();
    }

    /// Static curve: gain change in dB for an input level in dB
    #[inline]
    fn compute_gain_reduction(&self, input_db: f32) -> f32 {
        let threshold = self.threshold;
        let ratio = self.ratio;
        let knee = self.knee;

        if input_db < threshold - knee / 2.0 {
            0.0
        } else if knee > 0.0 && input_db <= threshold + knee / 2.0 {
            // Quadratic knee
            let x = input_db - (threshold - knee / 2.0);
            (1.0 / ratio - 1.0) * (x * x) / (2.0 * knee)
        } else {
            threshold + (input_db - threshold) / ratio - input_db
        }
    }

    /// Compress `samples` in place, detecting on `key` when given
    pub fn process(&mut self, samples: &mut [f32], key: Option<&[f32]>) {
        if !self.enabled {
            self.block_gr_db = 0.0;
            return;
        }

        let mut deepest = 0.0f32;
        for (i, frame) in samples.chunks_exact_mut(2).enumerate() {
            let peak = match key {
                Some(key) if key.len() >= i * 2 + 2 => key[i * 2].abs().max(key[i * 2 + 1].abs()),
                _ => frame[0].abs().max(frame[1].abs()),
            };
            let target_db = self.compute_gain_reduction(linear_to_db(peak));

            // More reduction is the attack phase
            let coeff = if target_db < self.envelope_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope_db = coeff * self.envelope_db + (1.0 - coeff) * target_db;
            deepest = deepest.min(self.envelope_db);

            let gain = db_to_linear(self.envelope_db + self.makeup);
            frame[0] *= gain;
            frame[1] *= gain;
        }
        self.block_gr_db = deepest;
    }

    pub fn reset(&mut self) {
        self.envelope_db = 0.0;
        self.block_gr_db = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressor_creation() {
        let comp = Compressor::new(48000.0);
        assert!(comp.is_enabled());
        assert!((comp.threshold() - (-20.0)).abs() < 0.01);
        assert!((comp.ratio() - 4.0).abs() < 0.01);
    }

    #[test]
    fn test_disabled_passthrough() {
        let mut comp = Compressor::new(48000.0);
        comp.set_enabled(false);

        let mut samples = vec![0.5, 0.5, 0.3, 0.3];
        comp.process(&mut samples, None);
        assert_eq!(samples, vec![0.5, 0.5, 0.3, 0.3]);
    }

    #[test]
    fn test_quiet_signal_untouched() {
        let mut comp = Compressor::new(48000.0);
        // -40 dB, below threshold and knee
        let mut samples = vec![0.01; 1000];
        comp.process(&mut samples, None);
        assert!(samples.iter().all(|&s| (s - 0.01).abs() < 1e-6));
        assert_eq!(comp.gain_reduction_db(), 0.0);
    }

    #[test]
    fn test_loud_signal_settles_on_curve() {
        let mut comp = Compressor::new(48000.0);
        comp.set_knee(0.0);
        // 0 dBFS in, -20 threshold, 4:1 -> -15 dB out: 15 dB reduction
        let mut samples = vec![1.0; 48000];
        comp.process(&mut samples, None);
        let out_db = linear_to_db(samples[47998]);
        assert!((out_db - (-15.0)).abs() < 0.1, "got {} dB", out_db);
        assert!((comp.gain_reduction_db() - (-15.0)).abs() < 0.1);
    }

    #[test]
    fn test_soft_knee_is_continuous() {
        let comp = Compressor::new(48000.0);
        let below = comp.compute_gain_reduction(-21.5001);
        let edge = comp.compute_gain_reduction(-21.5);
        assert!((below - edge).abs() < 1e-3);
        let top = comp.compute_gain_reduction(-18.5);
        let above = comp.compute_gain_reduction(-18.4999);
        assert!((top - above).abs() < 1e-3);
    }

    #[test]
    fn test_key_drives_reduction() {
        let mut comp = Compressor::new(48000.0);
        let key = vec![1.0; 9600];
        let mut samples = vec![0.01; 9600];
        comp.process(&mut samples, Some(&key));
        assert!(samples[9598] < 0.005);
    }

    #[test]
    fn test_parameter_clamping() {
        let mut comp = Compressor::new(48000.0);
        comp.set_threshold(-100.0);
        assert_eq!(comp.threshold(), -60.0);
        comp.set_ratio(50.0);
        assert_eq!(comp.ratio(), 20.0);
        comp.set_attack_ms(0.0);
        assert!((comp.attack_ms() - 0.1).abs() < 1e-6);
    }
}

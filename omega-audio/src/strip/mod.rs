//! Channel strip: gate, EQ, compressor, output gain and phase
//!
//! Runs in place on a mixer channel buffer before its effect chain. Every
//! parameter is clamped on ingress, so nothing here can fail.

mod compressor;
mod eq;
mod gate;

pub use compressor::Compressor;
pub use eq::{ChannelEq, EqBand};
pub use gate::Gate;

use crate::buffer::{apply_gain, db_to_linear, stereo_levels};

/// Settable strip field; booleans are "on" for values >= 0.5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripParam {
    Enabled,
    GateEnabled,
    GateThreshold,
    GateRatio,
    GateAttack,
    GateRelease,
    EqEnabled,
    LowShelfFreq,
    LowShelfGain,
    LowMidFreq,
    LowMidGain,
    LowMidQ,
    HighMidFreq,
    HighMidGain,
    HighMidQ,
    HighShelfFreq,
    HighShelfGain,
    CompEnabled,
    CompThreshold,
    CompRatio,
    CompAttack,
    CompRelease,
    CompKnee,
    CompMakeup,
    /// dB (-60 to +24)
    OutputGain,
    PhaseInvert,
}

pub struct ChannelStrip {
    enabled: bool,
    gate: Gate,
    eq: ChannelEq,
    compressor: Compressor,
    output_gain_db: f32,
    output_gain: f32,
    phase_invert: bool,
    input_level: f32,
    output_level: f32,
}

impl ChannelStrip {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            enabled: false,
            gate: Gate::new(sr),
            eq: ChannelEq::new(sr),
            compressor: Compressor::new(sr),
            output_gain_db: 0.0,
            output_gain: 1.0,
            phase_invert: false,
            input_level: 0.0,
            output_level: 0.0,
        }
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

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn eq(&self) -> &ChannelEq {
        &self.eq
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    pub fn output_gain_db(&self) -> f32 {
        self.output_gain_db
    }

    pub fn is_phase_inverted(&self) -> bool {
        self.phase_invert
    }

    /// Average RMS of the last block entering the strip
    pub fn input_level(&self) -> f32 {
        self.input_level
    }

    /// Average RMS of the last block leaving the strip
    pub fn output_level(&self) -> f32 {
        self.output_level
    }

    /// Compressor gain reduction of the last block (dB, <= 0)
    pub fn gain_reduction_db(&self) -> f32 {
        if self.enabled {
            self.compressor.gain_reduction_db()
        } else {
            0.0
        }
    }

    pub fn set_param(&mut self, param: StripParam, value: f32) {
        let on = value >= 0.5;
        match param {
            StripParam::Enabled => self.set_enabled(on),
            StripParam::GateEnabled => self.gate.set_enabled(on),
            StripParam::GateThreshold => self.gate.set_threshold(value),
            StripParam::GateRatio => self.gate.set_ratio(value),
            StripParam::GateAttack => self.gate.set_attack_ms(value),
            StripParam::GateRelease => self.gate.set_release_ms(value),
            StripParam::EqEnabled => self.eq.set_enabled(on),
            StripParam::LowShelfFreq => self.eq.set_freq(EqBand::LowShelf, value),
            StripParam::LowShelfGain => self.eq.set_gain(EqBand::LowShelf, value),
            StripParam::LowMidFreq => self.eq.set_freq(EqBand::LowMid, value),
            StripParam::LowMidGain => self.eq.set_gain(EqBand::LowMid, value),
            StripParam::LowMidQ => self.eq.set_q(EqBand::LowMid, value),
            StripParam::HighMidFreq => self.eq.set_freq(EqBand::HighMid, value),
            StripParam::HighMidGain => self.eq.set_gain(EqBand::HighMid, value),
            StripParam::HighMidQ => self.eq.set_q(EqBand::HighMid, value),
            StripParam::HighShelfFreq => self.eq.set_freq(EqBand::HighShelf, value),
            StripParam::HighShelfGain => self.eq.set_gain(EqBand::HighShelf, value),
            StripParam::CompEnabled => self.compressor.set_enabled(on),
            StripParam::CompThreshold => self.compressor.set_threshold(value),
            StripParam::CompRatio => self.compressor.set_ratio(value),
            StripParam::CompAttack => self.compressor.set_attack_ms(value),
            StripParam::CompRelease => self.compressor.set_release_ms(value),
            StripParam::CompKnee => self.compressor.set_knee(value),
            StripParam::CompMakeup => self.compressor.set_makeup_db(value),
            StripParam::OutputGain => {
                self.output_gain_db = if value.is_finite() { value.clamp(-60.0, 24.0) } else { 0.0 };
                self.output_gain = db_to_linear(self.output_gain_db);
            }
            StripParam::PhaseInvert => self.phase_invert = on,
        }
    }

    /// Process `samples` (interleaved stereo) in place. `key` is the
    /// sidechain signal for the compressor detector.
    pub fn process(&mut self, samples: &mut [f32], key: Option<&[f32]>) {
        if !self.enabled {
            return;
        }
        self.input_level = average_rms(samples);

        self.gate.process(samples);
        self.eq.process(samples);
        self.compressor.process(samples, key);

        let gain = if self.phase_invert { -self.output_gain } else { self.output_gain };
        apply_gain(samples, gain);

        self.output_level = average_rms(samples);
    }

    pub fn reset(&mut self) {
        self.gate.reset();
        self.eq.reset();
        self.compressor.reset();
        self.input_level = 0.0;
        self.output_level = 0.0;
    }
}

fn average_rms(samples: &[f32]) -> f32 {
    let [(_, left), (_, right)] = stereo_levels(samples);
    (left + right) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_strip_is_identity() {
        let mut strip = ChannelStrip::new(48000);
        strip.set_param(StripParam::LowShelfGain, 12.0);
        let mut samples = vec![0.9, -0.9, 0.5, 0.5];
        strip.process(&mut samples, None);
        assert_eq!(samples, vec![0.9, -0.9, 0.5, 0.5]);
        assert_eq!(strip.gain_reduction_db(), 0.0);
    }

    #[test]
    fn test_output_gain_and_phase() {
        let mut strip = ChannelStrip::new(48000);
        strip.set_param(StripParam::Enabled, 1.0);
        strip.set_param(StripParam::CompEnabled, 0.0);
        strip.set_param(StripParam::OutputGain, -6.0206);
        strip.set_param(StripParam::PhaseInvert, 1.0);

        let mut samples = vec![0.5; 64];
        strip.process(&mut samples, None);
        assert!(samples.iter().all(|&s| (s + 0.25).abs() < 1e-4));
        assert!((strip.input_level() - 0.5).abs() < 1e-6);
        assert!((strip.output_level() - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_output_gain_clamped() {
        let mut strip = ChannelStrip::new(48000);
        strip.set_param(StripParam::OutputGain, 100.0);
        assert_eq!(strip.output_gain_db(), 24.0);
        strip.set_param(StripParam::OutputGain, f32::NAN);
        assert_eq!(strip.output_gain_db(), 0.0);
    }

    #[test]
    fn test_compressor_reports_reduction() {
        let mut strip = ChannelStrip::new(48000);
        strip.set_param(StripParam::Enabled, 1.0);
        let mut samples = vec![1.0; 9600];
        strip.process(&mut samples, None);
        assert!(strip.gain_reduction_db() < -10.0);
        assert!(strip.output_level() < strip.input_level());
    }

    #[test]
    fn test_enable_flags_defaults() {
        let strip = ChannelStrip::new(48000);
        assert!(!strip.is_enabled());
        assert!(!strip.gate().is_enabled());
        assert!(strip.eq().is_enabled());
        assert!(strip.compressor().is_enabled());
    }
}

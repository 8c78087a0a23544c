//! Sidechain ducker
//!
//! Pulls the signal down by the envelope of the sidechain input. Without a
//! sidechain it passes audio through untouched.

use crate::processor::{ProcessContext, Processor, ProcessorFault};

pub struct SidechainDucker {
    depth: f32,
    attack_ms: f32,
    release_ms: f32,
    attack_coeff: f32,
    release_coeff: f32,
    sample_rate: f32,
    envelope: f32,
}

impl SidechainDucker {
    pub const PARAM_DEPTH: u32 = 0;
    pub const PARAM_ATTACK_MS: u32 = 1;
    pub const PARAM_RELEASE_MS: u32 = 2;

    pub fn new(depth: f32) -> Self {
        let mut ducker = Self {
            depth: depth.clamp(0.0, 1.0),
            attack_ms: 1.0,
            release_ms: 120.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            sample_rate: 48000.0,
            envelope: 0.0,
        };
        ducker.update_coefficients();
        ducker
    }

    /// Current envelope (0..1)
    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = (-1.0 / (self.sample_rate * self.attack_ms / 1000.0)).exp();
        self.release_coeff = (-1.0 / (self.sample_rate * self.release_ms / 1000.0)).exp();
    }
}

impl Processor for SidechainDucker {
    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        self.update_coefficients();
    }

    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
        let Some(key) = ctx.sidechain else {
            return Ok(());
        };

        for (frame, key) in ctx.audio[..ctx.frames * 2]
            .chunks_exact_mut(2)
            .zip(key.chunks_exact(2))
        {
            let level = key[0].abs().max(key[1].abs()).min(1.0);
            let coeff = if level > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

            let gain = 1.0 - self.depth * self.envelope;
            frame[0] *= gain;
            frame[1] *= gain;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn set_parameter(&mut self, id: u32, value: f32) {
        match id {
            Self::PARAM_DEPTH => self.depth = value.clamp(0.0, 1.0),
            Self::PARAM_ATTACK_MS => {
                self.attack_ms = value.clamp(0.1, 100.0);
                self.update_coefficients();
            }
            Self::PARAM_RELEASE_MS => {
                self.release_ms = value.clamp(5.0, 2000.0);
                self.update_coefficients();
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "SidechainDucker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_without_sidechain() {
        let mut ducker = SidechainDucker::new(1.0);
        ducker.prepare(48000, 256);
        let mut audio = vec![0.5; 64];
        ducker
            .process(ProcessContext { audio: &mut audio, events: &[], sidechain: None, frames: 32 })
            .unwrap();
        assert_eq!(audio, vec![0.5; 64]);
    }

    #[test]
    fn test_loud_key_ducks_signal() {
        let mut ducker = SidechainDucker::new(1.0);
        ducker.prepare(48000, 4096);
        let key = vec![1.0; 4096 * 2];
        let mut audio = vec![0.5; 4096 * 2];
        ducker
            .process(ProcessContext { audio: &mut audio, events: &[], sidechain: Some(&key), frames: 4096 })
            .unwrap();
        assert!(audio[8190].abs() < 0.01);
        assert!(ducker.envelope() > 0.99);
    }
}

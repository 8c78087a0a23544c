//! Static gain

use crate::processor::{ProcessContext, Processor, ProcessorFault};

/// Linear gain stage
pub struct Gain {
    gain: f32,
}

impl Gain {
    /// Parameter id for the linear gain
    pub const PARAM_GAIN: u32 = 0;

    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, 16.0),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Processor for Gain {
    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {}

    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
        for s in ctx.audio[..ctx.frames * 2].iter_mut() {
            *s *= self.gain;
        }
        Ok(())
    }

    fn set_parameter(&mut self, id: u32, value: f32) {
        if id == Self::PARAM_GAIN {
            self.gain = value.clamp(0.0, 16.0);
        }
    }

    fn name(&self) -> &'static str {
        "Gain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_scales_block() {
        let mut gain = Gain::new(0.5);
        let mut audio = vec![1.0, -1.0, 0.5, 0.5, 9.0, 9.0];
        gain.process(ProcessContext { audio: &mut audio, events: &[], sidechain: None, frames: 2 })
            .unwrap();
        assert_eq!(audio, vec![0.5, -0.5, 0.25, 0.25, 9.0, 9.0]);
    }

    #[test]
    fn test_gain_clamped() {
        let mut gain = Gain::new(-1.0);
        assert_eq!(gain.gain(), 0.0);
        gain.set_parameter(Gain::PARAM_GAIN, 100.0);
        assert_eq!(gain.gain(), 16.0);
    }
}

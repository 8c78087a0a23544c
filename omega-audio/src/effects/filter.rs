//! Biquad filter effect (high-pass, low-pass, band-pass)

use crate::processor::{ProcessContext, Processor, ProcessorFault};
use std::f32::consts::PI;

/// Response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    LowPass,
    HighPass,
    BandPass,
}

impl FilterType {
    fn from_param(value: f32) -> Self {
        match value.round() as i32 {
            1 => FilterType::HighPass,
            2 => FilterType::BandPass,
            _ => FilterType::LowPass,
        }
    }
}

/// Normalized biquad coefficients (a0 divided out)
#[derive(Debug, Clone, Copy, Default)]
struct Coeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coeffs {
    /// RBJ cookbook response for `kind` at `cutoff` Hz with quality `q`
    fn design(kind: FilterType, sample_rate: f32, cutoff: f32, q: f32) -> Self {
        let w = 2.0 * PI * cutoff.min(sample_rate * 0.49) / sample_rate;
        let (sin, cos) = w.sin_cos();
        let alpha = sin / (2.0 * q);

        let (b0, b1, b2) = match kind {
            FilterType::LowPass => ((1.0 - cos) * 0.5, 1.0 - cos, (1.0 - cos) * 0.5),
            FilterType::HighPass => ((1.0 + cos) * 0.5, -(1.0 + cos), (1.0 + cos) * 0.5),
            FilterType::BandPass => (alpha, 0.0, -alpha),
        };
        let norm = 1.0 / (1.0 + alpha);
        Self {
            b0: b0 * norm,
            b1: b1 * norm,
            b2: b2 * norm,
            a1: -2.0 * cos * norm,
            a2: (1.0 - alpha) * norm,
        }
    }
}

/// Direct form I history of one side
#[derive(Debug, Clone, Copy, Default)]
struct History {
    x: [f32; 2],
    y: [f32; 2],
}

impl History {
    #[inline]
    fn tick(&mut self, c: &Coeffs, input: f32) -> f32 {
        let out = c.b0 * input + c.b1 * self.x[0] + c.b2 * self.x[1] - c.a1 * self.y[0] - c.a2 * self.y[1];
        self.x = [input, self.x[0]];
        self.y = [out, self.y[0]];
        out
    }
}

/// Stereo biquad
pub struct Filter {
    kind: FilterType,
    sample_rate: f32,
    cutoff: f32,
    q: f32,
    coeffs: Coeffs,
    sides: [History; 2],
}

impl Filter {
    pub const PARAM_TYPE: u32 = 0;
    pub const PARAM_CUTOFF: u32 = 1;
    pub const PARAM_RESONANCE: u32 = 2;

    /// Butterworth-Q filter; the cutoff is clamped to 20 Hz..20 kHz
    pub fn new(kind: FilterType, cutoff: f32) -> Self {
        let mut filter = Self {
            kind,
            sample_rate: 48000.0,
            cutoff: cutoff.clamp(20.0, 20000.0),
            q: std::f32::consts::FRAC_1_SQRT_2,
            coeffs: Coeffs::default(),
            sides: [History::default(); 2],
        };
        filter.redesign();
        filter
    }

    pub fn set_type(&mut self, kind: FilterType) {
        self.kind = kind;
        self.redesign();
    }

    /// Cutoff in Hz (20..20000, and below Nyquist when designed)
    pub fn set_cutoff(&mut self, cutoff: f32) {
        self.cutoff = cutoff.clamp(20.0, 20000.0);
        self.redesign();
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// Q factor (0.1 - 20.0)
    pub fn set_resonance(&mut self, q: f32) {
        self.q = q.clamp(0.1, 20.0);
        self.redesign();
    }

    pub fn resonance(&self) -> f32 {
        self.q
    }

    pub fn filter_type(&self) -> FilterType {
        self.kind
    }

    fn redesign(&mut self) {
        self.coeffs = Coeffs::design(self.kind, self.sample_rate, self.cutoff, self.q);
    }
}

impl Processor for Filter {
    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        self.redesign();
        self.reset();
    }

    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
        let [left, right] = &mut self.sides;
        for frame in ctx.audio[..ctx.frames * 2].chunks_exact_mut(2) {
            frame[0] = left.tick(&self.coeffs, frame[0]);
            frame[1] = right.tick(&self.coeffs, frame[1]);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.sides = [History::default(); 2];
    }

    fn set_parameter(&mut self, id: u32, value: f32) {
        match id {
            Self::PARAM_TYPE => self.set_type(FilterType::from_param(value)),
            Self::PARAM_CUTOFF => self.set_cutoff(value),
            Self::PARAM_RESONANCE => self.set_resonance(value),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        match self.kind {
            FilterType::LowPass => "LP Filter",
            FilterType::HighPass => "HP Filter",
            FilterType::BandPass => "BP Filter",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut Filter, audio: &mut [f32]) {
        let frames = audio.len() / 2;
        filter
            .process(ProcessContext { audio, events: &[], sidechain: None, frames })
            .unwrap();
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut filter = Filter::new(FilterType::LowPass, 1000.0);
        filter.prepare(48000, 512);
        let mut audio = vec![1.0; 4096];
        run(&mut filter, &mut audio);
        assert!((audio[4094] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut filter = Filter::new(FilterType::HighPass, 1000.0);
        filter.prepare(48000, 512);
        let mut audio = vec![1.0; 4096];
        run(&mut filter, &mut audio);
        assert!(audio[4094].abs() < 0.01);
    }

    #[test]
    fn test_parameter_clamping() {
        let mut filter = Filter::new(FilterType::LowPass, 1000.0);
        filter.set_parameter(Filter::PARAM_CUTOFF, 50_000.0);
        assert_eq!(filter.cutoff(), 20000.0);
        filter.set_parameter(Filter::PARAM_RESONANCE, 0.0);
        assert!((filter.resonance() - 0.1).abs() < 1e-6);
        filter.set_parameter(Filter::PARAM_TYPE, 2.0);
        assert_eq!(filter.filter_type(), FilterType::BandPass);
    }
}

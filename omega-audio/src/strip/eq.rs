//! 4-band channel EQ
//!
//! Low shelf, two peaking mids and a high shelf, built from RBJ Audio EQ
//! Cookbook biquads. Coefficients are rebuilt only when a parameter changes.

use std::f32::consts::PI;

/// Shelf Q (Butterworth)
const SHELF_Q: f32 = 0.707;
/// Gain range for every band (dB)
const GAIN_RANGE: f32 = 24.0;

/// Biquad filter coefficients
#[derive(Clone, Copy)]
struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl BiquadCoeffs {
    const UNITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };
}

/// Biquad filter state for a single channel
#[derive(Default, Clone, Copy)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, coeffs: &BiquadCoeffs) -> f32 {
        let output = coeffs.a0 * input + coeffs.a1 * self.x1 + coeffs.a2 * self.x2
            - coeffs.b1 * self.y1
            - coeffs.b2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

/// Band shape
#[derive(Clone, Copy, PartialEq, Eq)]
enum Shape {
    LowShelf,
    Peak,
    HighShelf,
}

/// One band with stereo state
#[derive(Clone, Copy)]
struct Band {
    shape: Shape,
    freq: f32,
    gain_db: f32,
    q: f32,
    freq_range: (f32, f32),
    coeffs: BiquadCoeffs,
    state: [BiquadState; 2],
}

impl Band {
    fn new(shape: Shape, freq: f32, q: f32, freq_range: (f32, f32)) -> Self {
        Self {
            shape,
            freq,
            gain_db: 0.0,
            q,
            freq_range,
            coeffs: BiquadCoeffs::UNITY,
            state: [BiquadState::default(); 2],
        }
    }

    fn update(&mut self, sample_rate: f32) {
        self.coeffs = if self.gain_db.abs() < 0.01 {
            BiquadCoeffs::UNITY
        } else {
            let freq = self.freq.min(sample_rate * 0.49);
            match self.shape {
                Shape::LowShelf => low_shelf(sample_rate, freq, self.gain_db, SHELF_Q),
                Shape::Peak => peaking(sample_rate, freq, self.gain_db, self.q),
                Shape::HighShelf => high_shelf(sample_rate, freq, self.gain_db, SHELF_Q),
            }
        };
    }
}

/// Low shelf coefficients (RBJ cookbook)
fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> BiquadCoeffs {
    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * freq / sample_rate;
    let cos_omega = omega.cos();
    let alpha = omega.sin() / (2.0 * q);
    let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

    let a0 = (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha;

    BiquadCoeffs {
        a0: (a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
        a1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
        a2: (a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
        b1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
        b2: ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
    }
}

/// High shelf coefficients (RBJ cookbook)
fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> BiquadCoeffs {
    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * freq / sample_rate;
    let cos_omega = omega.cos();
    let alpha = omega.sin() / (2.0 * q);
    let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

    let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;

    BiquadCoeffs {
        a0: (a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
        a1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
        a2: (a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
        b1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
        b2: ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
    }
}

/// Peaking (bell) coefficients (RBJ cookbook)
fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> BiquadCoeffs {
    let a = 10.0f32.powf(gain_db / 40.0);
    let omega = 2.0 * PI * freq / sample_rate;
    let cos_omega = omega.cos();
    let alpha = omega.sin() / (2.0 * q);

    let a0 = 1.0 + alpha / a;

    BiquadCoeffs {
        a0: (1.0 + alpha * a) / a0,
        a1: (-2.0 * cos_omega) / a0,
        a2: (1.0 - alpha * a) / a0,
        b1: (-2.0 * cos_omega) / a0,
        b2: (1.0 - alpha / a) / a0,
    }
}

/// Band selector for the setters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqBand {
    LowShelf = 0,
    LowMid = 1,
    HighMid = 2,
    HighShelf = 3,
}

/// 4-band stereo EQ
pub struct ChannelEq {
    enabled: bool,
    sample_rate: f32,
    bands: [Band; 4],
    needs_update: bool,
}

impl ChannelEq {
    pub fn new(sample_rate: f32) -> Self {
        let mut eq = Self {
            enabled: true,
            sample_rate,
            bands: [
                Band::new(Shape::LowShelf, 80.0, SHELF_Q, (20.0, 500.0)),
                Band::new(Shape::Peak, 500.0, 1.0, (100.0, 2000.0)),
                Band::new(Shape::Peak, 2000.0, 1.0, (500.0, 8000.0)),
                Band::new(Shape::HighShelf, 8000.0, SHELF_Q, (2000.0, 20000.0)),
            ],
            needs_update: true,
        };
        eq.update_coefficients();
        eq
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

    /// Set band centre/corner frequency, clamped to the band's range
    pub fn set_freq(&mut self, band: EqBand, freq: f32) {
        let band = &mut self.bands[band as usize];
        band.freq = freq.clamp(band.freq_range.0, band.freq_range.1);
        self.needs_update = true;
    }

    /// Set band gain in dB (±24)
    pub fn set_gain(&mut self, band: EqBand, gain_db: f32) {
        self.bands[band as usize].gain_db = gain_db.clamp(-GAIN_RANGE, GAIN_RANGE);
        self.needs_update = true;
    }

    /// Set Q of a mid band (0.1-10); shelves keep a fixed Q
    pub fn set_q(&mut self, band: EqBand, q: f32) {
        let band = &mut self.bands[band as usize];
        if band.shape == Shape::Peak {
            band.q = q.clamp(0.1, 10.0);
            self.needs_update = true;
        }
    }

    pub fn freq(&self, band: EqBand) -> f32 {
        self.bands[band as usize].freq
    }

    pub fn gain(&self, band: EqBand) -> f32 {
        self.bands[band as usize].gain_db
    }

    pub fn q(&self, band: EqBand) -> f32 {
        self.bands[band as usize].q
    }

    fn update_coefficients(&mut self) {
        for band in self.bands.iter_mut() {
            band.update(self.sample_rate);
        }
        self.needs_update = false;
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }
        if self.needs_update {
            self.update_coefficients();
        }

        for frame in samples.chunks_exact_mut(2) {
            let mut left = frame[0];
            let mut right = frame[1];
            for band in self.bands.iter_mut() {
                left = band.state[0].process(left, &band.coeffs);
                right = band.state[1].process(right, &band.coeffs);
            }
            frame[0] = left;
            frame[1] = right;
        }
    }

    pub fn reset(&mut self) {
        for band in self.bands.iter_mut() {
            band.state = [BiquadState::default(); 2];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (2.0 * PI * freq * i as f32 / 48000.0).sin() * 0.5;
                [s, s]
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_flat_eq_is_identity() {
        let mut eq = ChannelEq::new(48000.0);
        let mut samples = sine(1000.0, 512);
        let original = samples.clone();
        eq.process(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_disabled_passthrough() {
        let mut eq = ChannelEq::new(48000.0);
        eq.set_gain(EqBand::LowShelf, 12.0);
        eq.set_enabled(false);
        let mut samples = vec![0.5, 0.5, 0.3, 0.3];
        eq.process(&mut samples);
        assert_eq!(samples, vec![0.5, 0.5, 0.3, 0.3]);
    }

    #[test]
    fn test_low_shelf_boosts_bass() {
        let mut eq = ChannelEq::new(48000.0);
        eq.set_gain(EqBand::LowShelf, 12.0);
        let mut samples = sine(20.0, 48000);
        let before = rms(&samples[48000..]);
        eq.process(&mut samples);
        let after = rms(&samples[48000..]);
        assert!(after > before * 2.5, "expected ~+12 dB, got {} -> {}", before, after);
    }

    #[test]
    fn test_mid_cut_attenuates_centre() {
        let mut eq = ChannelEq::new(48000.0);
        eq.set_gain(EqBand::HighMid, -12.0);
        let mut samples = sine(2000.0, 24000);
        let before = rms(&samples[24000..]);
        eq.process(&mut samples);
        assert!(rms(&samples[24000..]) < before * 0.4);
    }

    #[test]
    fn test_parameter_clamping() {
        let mut eq = ChannelEq::new(48000.0);
        eq.set_gain(EqBand::LowMid, 100.0);
        assert_eq!(eq.gain(EqBand::LowMid), 24.0);
        eq.set_freq(EqBand::HighShelf, 100.0);
        assert_eq!(eq.freq(EqBand::HighShelf), 2000.0);
        eq.set_q(EqBand::LowMid, 0.0);
        assert!((eq.q(EqBand::LowMid) - 0.1).abs() < 1e-6);
        eq.set_q(EqBand::LowShelf, 5.0);
        assert!((eq.q(EqBand::LowShelf) - SHELF_Q).abs() < 1e-6);
    }
}

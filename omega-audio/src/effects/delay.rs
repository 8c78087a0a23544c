//! Feedback delay with a high-passed, soft-saturated feedback path

use crate::processor::{ProcessContext, Processor, ProcessorFault};

/// Longest delay a line is sized for, in seconds
const MAX_SECONDS: f32 = 2.0;
const MAX_FEEDBACK: f32 = 0.98;
/// Corner of the one-pole high-pass in the repeats
const FEEDBACK_HP_HZ: f32 = 80.0;

#[inline(always)]
fn saturate(x: f32) -> f32 {
    x / (1.0 + x.abs())
}

/// One side of the stereo delay: ring buffer plus the feedback high-pass
#[derive(Default)]
struct Line {
    ring: Vec<f32>,
    hp: f32,
}

impl Line {
    /// Linear interpolation between the taps `whole` and `whole + 1` frames back
    #[inline]
    fn read(&self, head: usize, whole: usize, frac: f32) -> f32 {
        let len = self.ring.len();
        let near = self.ring[(head + len - whole) % len];
        let far = self.ring[(head + len - whole - 1) % len];
        near + (far - near) * frac
    }

    #[inline]
    fn write(&mut self, head: usize, input: f32, pole: f32) {
        let lowpassed = self.hp;
        self.hp = input * (1.0 - pole) + lowpassed * pole;
        self.ring[head] = saturate(input - lowpassed);
    }
}

/// Stereo delay effect
pub struct Delay {
    sample_rate: f32,
    lines: [Line; 2],
    head: usize,
    time_ms: f32,
    /// Fractional delay in frames, kept below the line length
    offset: f32,
    feedback: f32,
    /// Wet share inside the effect; 1.0 outputs the echoes only
    mix: f32,
    pole: f32,
}

impl Delay {
    pub const PARAM_TIME_MS: u32 = 0;
    pub const PARAM_FEEDBACK: u32 = 1;
    pub const PARAM_MIX: u32 = 2;

    /// Create a delay; the lines are allocated in `prepare`
    pub fn new(delay_ms: f32, feedback: f32) -> Self {
        let mut delay = Self {
            sample_rate: 48_000.0,
            lines: Default::default(),
            head: 0,
            time_ms: 0.0,
            offset: 1.0,
            feedback: 0.0,
            mix: 0.5,
            pole: 0.0,
        };
        delay.set_delay_ms(delay_ms);
        delay.set_feedback(feedback);
        delay
    }

    pub fn set_delay_ms(&mut self, ms: f32) {
        self.time_ms = ms.clamp(1.0, MAX_SECONDS * 1000.0);
        self.retune();
    }

    pub fn delay_ms(&self) -> f32 {
        self.time_ms
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, MAX_FEEDBACK);
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    fn capacity(&self) -> usize {
        self.lines[0].ring.len()
    }

    fn retune(&mut self) {
        let limit = (self.capacity() as f32 - 2.0).max(1.0);
        self.offset = (self.time_ms * 0.001 * self.sample_rate).clamp(1.0, limit);
    }
}

impl Processor for Delay {
    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        let frames = (self.sample_rate * MAX_SECONDS) as usize + 4;
        for line in &mut self.lines {
            line.ring = vec![0.0; frames];
            line.hp = 0.0;
        }
        self.head = 0;
        self.pole = (-std::f32::consts::TAU * FEEDBACK_HP_HZ / self.sample_rate).exp();
        self.retune();
    }

    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
        let len = self.capacity();
        if len == 0 {
            return Err(ProcessorFault::Internal("delay not prepared"));
        }
        let whole = self.offset as usize;
        let frac = self.offset - whole as f32;
        let (wet, dry) = (self.mix, 1.0 - self.mix);

        for frame in ctx.audio[..ctx.frames * 2].chunks_exact_mut(2) {
            for (sample, line) in frame.iter_mut().zip(self.lines.iter_mut()) {
                let echo = line.read(self.head, whole, frac);
                line.write(self.head, *sample + echo * self.feedback, self.pole);
                *sample = *sample * dry + echo * wet;
            }
            self.head += 1;
            if self.head == len {
                self.head = 0;
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        self.lines = Default::default();
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.ring.fill(0.0);
            line.hp = 0.0;
        }
        self.head = 0;
    }

    fn set_parameter(&mut self, id: u32, value: f32) {
        match id {
            Self::PARAM_TIME_MS => self.set_delay_ms(value),
            Self::PARAM_FEEDBACK => self.set_feedback(value),
            Self::PARAM_MIX => self.set_mix(value),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "Delay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(delay: &mut Delay, audio: &mut [f32]) -> Result<(), ProcessorFault> {
        let frames = audio.len() / 2;
        delay.process(ProcessContext { audio, events: &[], sidechain: None, frames })
    }

    #[test]
    fn test_unprepared_delay_faults() {
        let mut delay = Delay::new(100.0, 0.3);
        let mut audio = vec![0.0; 8];
        assert!(run(&mut delay, &mut audio).is_err());
    }

    #[test]
    fn test_impulse_echoes_after_delay_time() {
        let mut delay = Delay::new(10.0, 0.0);
        delay.prepare(48000, 1024);
        delay.set_mix(1.0);

        // 480 frames at 48 kHz
        let mut audio = vec![0.0; 1024 * 2];
        audio[0] = 1.0;
        audio[1] = 1.0;
        run(&mut delay, &mut audio).unwrap();

        let peak_frame = (0..1024).max_by(|&a, &b| audio[a * 2].abs().total_cmp(&audio[b * 2].abs()));
        assert_eq!(peak_frame, Some(480));
        assert!(audio.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_feedback_and_time_clamped() {
        let mut delay = Delay::new(10_000.0, 1.5);
        assert_eq!(delay.feedback(), MAX_FEEDBACK);
        assert_eq!(delay.delay_ms(), 2000.0);
        delay.set_parameter(Delay::PARAM_TIME_MS, 0.0);
        assert_eq!(delay.delay_ms(), 1.0);
    }

    #[test]
    fn test_saturation_is_bounded() {
        assert!(saturate(10.0) < 1.0);
        assert!(saturate(-10.0) > -1.0);
        assert!((saturate(0.1) - 0.091).abs() < 0.01);
    }

    #[test]
    fn test_reset_silences_tail() {
        let mut delay = Delay::new(5.0, 0.8);
        delay.prepare(48000, 512);
        let mut audio = vec![0.5; 512 * 2];
        run(&mut delay, &mut audio).unwrap();
        delay.reset();
        let mut silence = vec![0.0; 512 * 2];
        run(&mut delay, &mut silence).unwrap();
        assert!(silence.iter().all(|&s| s == 0.0));
    }
}

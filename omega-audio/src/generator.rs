//! Built-in sine instrument
//!
//! A small polyphonic sine voice bank used for channel rack tests and the
//! demo session. It also has a drone mode that sounds a fixed tone
//! regardless of events.

use std::f64::consts::TAU;

use crate::processor::{ChannelLayout, EventKind, ProcessContext, Processor, ProcessorFault};

const MAX_VOICES: usize = 8;

#[derive(Clone, Copy, Default)]
struct Voice {
    note: u8,
    gain: f32,
    phase: f64,
    increment: f64,
    active: bool,
}

/// Polyphonic sine generator
pub struct SineGenerator {
    sample_rate: f64,
    amplitude: f32,
    drone_hz: Option<f64>,
    drone_phase: f64,
    layout: ChannelLayout,
    voices: [Voice; MAX_VOICES],
    next_voice: usize,
}

impl SineGenerator {
    pub const PARAM_AMPLITUDE: u32 = 0;
    pub const PARAM_DRONE_HZ: u32 = 1;

    /// Note-driven instrument
    pub fn new(amplitude: f32) -> Self {
        Self {
            sample_rate: 48000.0,
            amplitude: amplitude.clamp(0.0, 1.0),
            drone_hz: None,
            drone_phase: 0.0,
            layout: ChannelLayout::Stereo,
            voices: [Voice::default(); MAX_VOICES],
            next_voice: 0,
        }
    }

    /// Continuous tone at `hz`, ignoring notes
    pub fn drone(hz: f32, amplitude: f32) -> Self {
        Self {
            drone_hz: Some(hz.max(0.0) as f64),
            ..Self::new(amplitude)
        }
    }

    /// Produce mono output; the engine duplicates it to both sides
    pub fn mono(mut self) -> Self {
        self.layout = ChannelLayout::Mono;
        self
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    /// Number of currently sounding voices
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    fn note_hz(note: u8) -> f64 {
        440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
    }

    fn note_on(&mut self, note: u8, velocity: u8, legato: bool) {
        if velocity == 0 {
            self.note_off(note);
            return;
        }
        let increment = Self::note_hz(note) / self.sample_rate;
        let gain = velocity as f32 / 127.0;

        if legato {
            // Slide: retune whatever is sounding instead of restarting the phase
            if let Some(voice) = self.voices.iter_mut().find(|v| v.active) {
                voice.note = note;
                voice.increment = increment;
                voice.gain = gain;
                return;
            }
        }

        let slot = self
            .voices
            .iter()
            .position(|v| !v.active)
            .unwrap_or(self.next_voice);
        self.next_voice = (slot + 1) % MAX_VOICES;
        self.voices[slot] = Voice {
            note,
            gain,
            phase: 0.0,
            increment,
            active: true,
        };
    }

    fn note_off(&mut self, note: u8) {
        for voice in self.voices.iter_mut().filter(|v| v.active && v.note == note) {
            voice.active = false;
        }
    }

    fn apply(&mut self, kind: EventKind) {
        match kind {
            EventKind::NoteOn { note, velocity, legato } => self.note_on(note, velocity, legato),
            EventKind::NoteOff { note } => self.note_off(note),
            EventKind::AllNotesOff => {
                for voice in self.voices.iter_mut() {
                    voice.active = false;
                }
            }
            EventKind::Parameter { id, value } => self.set_parameter(id, value),
        }
    }

    fn render(&mut self, out: &mut [f32], channels: usize, from: usize, to: usize) {
        for frame in from..to {
            let mut sample = 0.0f64;
            if let Some(hz) = self.drone_hz {
                sample += self.drone_phase.sin();
                self.drone_phase = (self.drone_phase + TAU * hz / self.sample_rate) % TAU;
            }
            for voice in self.voices.iter_mut().filter(|v| v.active) {
                sample += (voice.phase * TAU).sin() * voice.gain as f64;
                voice.phase = (voice.phase + voice.increment).fract();
            }
            let sample = (sample * self.amplitude as f64) as f32;
            for ch in 0..channels {
                out[frame * channels + ch] = sample;
            }
        }
    }
}

impl Processor for SineGenerator {
    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate as f64;
        self.reset();
    }

    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
        let channels = match self.layout {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        };
        let mut cursor = 0usize;
        for event in ctx.events {
            let at = (event.frame as usize).min(ctx.frames);
            self.render(ctx.audio, channels, cursor, at);
            cursor = at;
            self.apply(event.kind);
        }
        self.render(ctx.audio, channels, cursor, ctx.frames);
        Ok(())
    }

    fn reset(&mut self) {
        self.voices = [Voice::default(); MAX_VOICES];
        self.drone_phase = 0.0;
    }

    fn set_parameter(&mut self, id: u32, value: f32) {
        match id {
            Self::PARAM_AMPLITUDE => self.amplitude = value.clamp(0.0, 1.0),
            Self::PARAM_DRONE_HZ if self.drone_hz.is_some() => {
                self.drone_hz = Some(value.clamp(0.0, 20000.0) as f64)
            }
            _ => {}
        }
    }

    fn layout(&self) -> ChannelLayout {
        self.layout
    }

    fn name(&self) -> &'static str {
        "Sine"
    }
}

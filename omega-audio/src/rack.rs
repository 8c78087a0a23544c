//! Channel rack: generators with step patterns
//!
//! Each rack channel owns an instrument and a step pattern. Per block it
//! renders the events the scheduler queued for it and adds the result to
//! the input of its mixer insert.

use crate::buffer::mix_scaled;
use crate::engine::{AudioEvent, Telemetry};
use crate::processor::{run_processor, sort_events, Event, Processor};

/// Longest pattern
pub const MAX_STEPS: usize = 64;
/// Pattern length for new channels
pub const DEFAULT_STEPS: usize = 16;
/// Velocity of a freshly enabled step
pub const DEFAULT_VELOCITY: u8 = 100;

/// One sequencer step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub active: bool,
    /// 0-127
    pub velocity: u8,
    pub accent: bool,
    /// Fuse with the previous note instead of retriggering
    pub slide: bool,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            active: false,
            velocity: DEFAULT_VELOCITY,
            accent: false,
            slide: false,
        }
    }
}

impl Step {
    pub fn on() -> Self {
        Self {
            active: true,
            ..Self::default()
        }
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity.min(127);
        self
    }

    pub fn accented(mut self) -> Self {
        self.accent = true;
        self
    }

    pub fn sliding(mut self) -> Self {
        self.slide = true;
        self
    }
}

/// Fixed-capacity step pattern
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    steps: [Step; MAX_STEPS],
    length: usize,
}

impl Default for Pattern {
    fn default() -> Self {
        Self {
            steps: [Step::default(); MAX_STEPS],
            length: DEFAULT_STEPS,
        }
    }
}

impl Pattern {
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        !self.steps[..self.length].iter().any(|s| s.active)
    }

    /// Step at `index` modulo the pattern length
    pub fn step(&self, index: u64) -> Step {
        self.steps[(index % self.length as u64) as usize]
    }

    pub fn set_step(&mut self, index: usize, step: Step) {
        let step = Step {
            velocity: step.velocity.min(127),
            ..step
        };
        self.steps[index % self.length] = step;
    }

    /// Set a step's velocity (1-127)
    pub fn set_velocity(&mut self, index: usize, velocity: u8) {
        self.steps[index % self.length].velocity = velocity.clamp(1, 127);
    }

    /// Resize to 1..=64 steps; steps beyond the new length are kept
    pub fn set_length(&mut self, length: usize) {
        self.length = length.clamp(1, MAX_STEPS);
    }

    pub fn clear(&mut self) {
        for step in self.steps.iter_mut() {
            step.active = false;
        }
    }

    /// Activate every `interval`-th step, starting at step 0
    pub fn fill(&mut self, interval: usize) {
        let interval = interval.max(1);
        for (i, step) in self.steps[..self.length].iter_mut().enumerate() {
            step.active = i % interval == 0;
        }
    }
}

/// A generator channel in the rack
pub struct RackChannel {
    id: u32,
    name: String,
    color: u32,
    root_note: u8,
    midi_channel: u8,
    muted: bool,
    soloed: bool,
    target: usize,
    pub(crate) pattern: Pattern,
    generator: Option<Box<dyn Processor>>,
    buffer: Vec<f32>,
    pub(crate) events: Vec<Event>,
    /// Note left sounding by the previous step
    pub(crate) sounding: Option<u8>,
    dropped_events: u32,
    failed: bool,
}

impl RackChannel {
    pub fn new(id: u32, name: impl Into<String>, generator: Option<Box<dyn Processor>>) -> Self {
        Self {
            id,
            name: name.into(),
            color: 0x5a_8a_c6,
            root_note: 60,
            midi_channel: 0,
            muted: false,
            soloed: false,
            target: 1,
            pattern: Pattern::default(),
            generator,
            buffer: Vec::new(),
            events: Vec::new(),
            sounding: None,
            dropped_events: 0,
            failed: false,
        }
    }

    pub fn with_target(mut self, mixer_channel: usize) -> Self {
        self.target = mixer_channel;
        self
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn with_root_note(mut self, note: u8) -> Self {
        self.root_note = note.min(127);
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Size buffers and prepare the generator. Control thread only.
    pub fn prepare(&mut self, sample_rate: u32, max_block_size: usize, max_events: usize) {
        self.buffer = vec![0.0; max_block_size * 2];
        self.events = Vec::with_capacity(max_events);
        if let Some(generator) = self.generator.as_mut() {
            generator.prepare(sample_rate, max_block_size);
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn root_note(&self) -> u8 {
        self.root_note
    }

    pub fn midi_channel(&self) -> u8 {
        self.midi_channel
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Queue an event for this block; drops it when the queue is full
    pub(crate) fn push_event(&mut self, event: Event) {
        if self.events.len() < self.events.capacity() {
            self.events.push(event);
        } else {
            self.dropped_events += 1;
        }
    }

    pub(crate) fn generator_mut(&mut self) -> Option<&mut (dyn Processor + 'static)> {
        self.generator.as_deref_mut()
    }

    pub(crate) fn take_generator(&mut self) -> Option<Box<dyn Processor>> {
        self.generator.take()
    }

    /// Render one block into `out` (the mixer insert input), honoring mute
    /// and rack solo. Events are consumed.
    fn render(&mut self, frames: usize, audible: bool, out: &mut [f32], telemetry: &mut Telemetry) {
        sort_events(&mut self.events);
        let samples = frames * 2;

        match self.generator.as_deref_mut() {
            Some(generator) if !self.failed => {
                let result = run_processor(
                    generator,
                    &mut self.buffer,
                    &self.events,
                    None,
                    frames,
                    true,
                );
                if let Err(fault) = result {
                    self.failed = true;
                    self.buffer[..samples].fill(0.0);
                    telemetry.post(AudioEvent::GeneratorFault {
                        channel_id: self.id,
                        processor: generator.name(),
                        fault,
                    });
                }
            }
            _ => self.buffer[..samples].fill(0.0),
        }
        self.events.clear();

        if self.dropped_events > 0 {
            telemetry.post(AudioEvent::EventOverflow {
                channel_id: self.id,
                dropped: self.dropped_events,
            });
            self.dropped_events = 0;
        }

        if audible && !self.muted {
            mix_scaled(&mut out[..samples], &self.buffer[..samples], 1.0);
        }
    }
}

/// Field of a rack channel settable through the bus
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RackField {
    Mute(bool),
    Solo(bool),
    Target(usize),
    RootNote(u8),
    MidiChannel(u8),
    Color(u32),
}

/// Ordered set of rack channels
pub struct ChannelRack {
    channels: Vec<Box<RackChannel>>,
}

impl ChannelRack {
    /// Reserve room for `capacity` channels so adding never allocates
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.channels.len() == self.channels.capacity()
    }

    pub fn channels(&self) -> impl Iterator<Item = &RackChannel> {
        self.channels.iter().map(|c| c.as_ref())
    }

    pub(crate) fn channels_mut(&mut self) -> impl Iterator<Item = &mut RackChannel> {
        self.channels.iter_mut().map(|c| c.as_mut())
    }

    pub fn get(&self, id: u32) -> Option<&RackChannel> {
        self.channels.iter().find(|c| c.id == id).map(|c| c.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut RackChannel> {
        self.channels.iter_mut().find(|c| c.id == id).map(|c| c.as_mut())
    }

    /// Insert a channel; hands it back when the rack is full
    pub(crate) fn add(&mut self, channel: Box<RackChannel>) -> Result<(), Box<RackChannel>> {
        if self.is_full() {
            return Err(channel);
        }
        self.channels.push(channel);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<Box<RackChannel>> {
        let index = self.channels.iter().position(|c| c.id == id)?;
        Some(self.channels.remove(index))
    }

    pub(crate) fn set_field(&mut self, id: u32, field: RackField) -> bool {
        let Some(channel) = self.get_mut(id) else {
            return false;
        };
        match field {
            RackField::Mute(muted) => channel.muted = muted,
            RackField::Solo(soloed) => channel.soloed = soloed,
            RackField::Target(target) => channel.target = target,
            RackField::RootNote(note) => channel.root_note = note.min(127),
            RackField::MidiChannel(midi) => channel.midi_channel = midi.min(15),
            RackField::Color(color) => channel.color = color,
        }
        true
    }

    /// Clear a failed generator so it runs again
    pub(crate) fn reset_channel(&mut self, id: u32) -> bool {
        let Some(channel) = self.get_mut(id) else {
            return false;
        };
        channel.failed = false;
        if let Some(generator) = channel.generator.as_mut() {
            generator.reset();
        }
        true
    }

    /// Render every channel into the mixer insert inputs
    pub(crate) fn render(&mut self, frames: usize, inputs: &mut [Vec<f32>], telemetry: &mut Telemetry) {
        let any_solo = self.channels.iter().any(|c| c.soloed);
        for channel in self.channels.iter_mut() {
            let audible = !any_solo || channel.soloed;
            let Some(out) = inputs.get_mut(channel.target) else {
                channel.events.clear();
                continue;
            };
            channel.render(frames, audible, out, telemetry);
        }
    }
}

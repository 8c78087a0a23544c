//! Processor interface shared by generators and effects
//!
//! A processor is prepared on a control thread, handed to the audio
//! thread through the parameter bus and from then on only touched by the
//! audio thread until it is retired.

use thiserror::Error;

use crate::buffer::{expand_mono, fold_to_mono};

/// Fault signalled by a processor during `process`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorFault {
    #[error("processor produced non-finite output")]
    NonFinite,
    #[error("processor failure: {0}")]
    Internal(&'static str),
}

/// Output layout a processor writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelLayout {
    /// Writes `frames` samples at the front of the buffer
    Mono,
    /// Writes interleaved stereo
    #[default]
    Stereo,
}

/// Kind of a time-stamped event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    NoteOff { note: u8 },
    AllNotesOff,
    Parameter { id: u32, value: f32 },
    /// `legato` marks a note fused with the previous one by a slide step
    NoteOn { note: u8, velocity: u8, legato: bool },
}

impl EventKind {
    /// Ordering of events sharing a frame: note-offs, then parameters, then note-ons
    #[inline]
    pub fn rank(&self) -> u8 {
        match self {
            EventKind::NoteOff { .. } | EventKind::AllNotesOff => 0,
            EventKind::Parameter { .. } => 1,
            EventKind::NoteOn { .. } => 2,
        }
    }
}

/// Event with a frame offset inside the current block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub frame: u32,
    pub kind: EventKind,
}

impl Event {
    pub fn new(frame: u32, kind: EventKind) -> Self {
        Self { frame, kind }
    }
}

/// Stable in-place ordering by (frame, rank).
///
/// Insertion sort: event lists are short and this never allocates.
pub fn sort_events(events: &mut [Event]) {
    for i in 1..events.len() {
        let mut j = i;
        while j > 0 {
            let a = &events[j - 1];
            let b = &events[j];
            if (a.frame, a.kind.rank()) > (b.frame, b.kind.rank()) {
                events.swap(j - 1, j);
                j -= 1;
            } else {
                break;
            }
        }
    }
}

/// Everything a processor sees for one block
pub struct ProcessContext<'a> {
    /// Interleaved stereo, `frames * 2` samples (mono processors use the first `frames`)
    pub audio: &'a mut [f32],
    /// Events sorted by frame
    pub events: &'a [Event],
    /// Post-fader output of the sidechain source, interleaved stereo
    pub sidechain: Option<&'a [f32]>,
    pub frames: usize,
}

/// A generator or effect driven by the engine
pub trait Processor: Send {
    /// Allocate and size internal state. Called off the audio thread.
    fn prepare(&mut self, sample_rate: u32, max_block_size: usize);

    /// Process one block in place
    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault>;

    /// Free resources. Called off the audio thread before drop.
    fn release(&mut self) {}

    /// Clear internal state (delay lines, envelopes)
    fn reset(&mut self) {}

    /// Set a processor-defined parameter
    fn set_parameter(&mut self, id: u32, value: f32) {
        let _ = (id, value);
    }

    fn layout(&self) -> ChannelLayout {
        ChannelLayout::Stereo
    }

    fn name(&self) -> &'static str;
}

/// Run a processor over a stereo buffer, adapting mono processors.
///
/// `generate` means the processor is a source: the buffer is cleared first
/// and mono output is duplicated. For mono effects the input is folded
/// down before and duplicated after.
pub(crate) fn run_processor(
    processor: &mut dyn Processor,
    audio: &mut [f32],
    events: &[Event],
    sidechain: Option<&[f32]>,
    frames: usize,
    generate: bool,
) -> Result<(), ProcessorFault> {
    let audio = &mut audio[..frames * 2];
    if generate {
        audio.fill(0.0);
    }
    let mono = processor.layout() == ChannelLayout::Mono;
    if mono && !generate {
        fold_to_mono(audio, frames);
    }
    processor.process(ProcessContext {
        audio: &mut *audio,
        events,
        sidechain,
        frames,
    })?;
    if mono {
        expand_mono(audio, frames);
    }
    if !crate::buffer::is_finite(audio) {
        return Err(ProcessorFault::NonFinite);
    }
    Ok(())
}

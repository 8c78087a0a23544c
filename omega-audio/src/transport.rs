//! Clock and transport
//!
//! Owns the sample position, tempo and loop/punch regions. Each block the
//! engine asks for a [`TransportBlock`]: the timeline ranges that block
//! covers, split where the loop wraps so consumers always see contiguous
//! positions.

use arrayvec::ArrayVec;

use crate::error::{EngineError, Result};

/// Upper bound on loop wraps inside a single block
pub const MAX_SPANS: usize = 8;

/// A start/end region on the timeline, in frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub start: u64,
    pub end: u64,
    pub enabled: bool,
}

impl Region {
    pub fn new(start: u64, end: u64, enabled: bool) -> Self {
        Self { start, end, enabled }
    }

    /// Enabled and non-empty
    pub fn is_active(&self) -> bool {
        self.enabled && self.end > self.start
    }
}

/// Transport requests from the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    /// Stop and return to the start of the timeline
    Stop,
    /// Stop in place
    Pause,
    /// Move the playhead
    Locate(u64),
}

/// A contiguous run of timeline frames inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Timeline position of the first frame
    pub position: u64,
    /// Frame offset of the first frame inside the block
    pub offset: usize,
    pub frames: usize,
}

impl Span {
    pub fn end(&self) -> u64 {
        self.position + self.frames as u64
    }
}

/// Snapshot of the transport for one block
#[derive(Debug, Clone, PartialEq)]
pub struct TransportBlock {
    pub spans: ArrayVec<Span, MAX_SPANS>,
    pub frames: usize,
    pub playing: bool,
    pub recording: bool,
    /// Transport went from playing to stopped at the start of this block
    pub stopped: bool,
    /// Position jumped (locate, stop) since the previous block
    pub relocated: bool,
    pub tempo: f64,
}

/// Clock and transport state
pub struct Transport {
    sample_rate: u32,
    position: u64,
    tempo: f64,
    time_signature: (u8, u8),
    playing: bool,
    record_armed: bool,
    loop_region: Region,
    punch: Region,
    stop_pending: bool,
    relocated: bool,
}

impl Transport {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            tempo: 120.0,
            time_signature: (4, 4),
            playing: false,
            record_armed: false,
            loop_region: Region::default(),
            punch: Region::default(),
            stop_pending: false,
            relocated: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn time_signature(&self) -> (u8, u8) {
        self.time_signature
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn loop_region(&self) -> Region {
        self.loop_region
    }

    pub fn punch_region(&self) -> Region {
        self.punch
    }

    /// Recording happens only while playing with recording armed
    pub fn is_recording(&self) -> bool {
        self.playing && self.record_armed
    }

    /// Validate a tempo without applying it
    pub fn check_tempo(bpm: f64) -> Result<f64> {
        if bpm.is_finite() && bpm > 0.0 {
            Ok(bpm)
        } else {
            Err(EngineError::InvalidTempo(bpm))
        }
    }

    pub fn set_tempo(&mut self, bpm: f64) -> Result<()> {
        self.tempo = Self::check_tempo(bpm)?;
        Ok(())
    }

    pub fn set_time_signature(&mut self, numerator: u8, denominator: u8) {
        let denominator = match denominator {
            1 | 2 | 4 | 8 | 16 | 32 => denominator,
            _ => 4,
        };
        self.time_signature = (numerator.clamp(1, 32), denominator);
    }

    pub fn set_loop(&mut self, region: Region) {
        self.loop_region = region;
    }

    pub fn set_punch(&mut self, region: Region) {
        self.punch = region;
    }

    pub fn set_record_armed(&mut self, armed: bool) {
        self.record_armed = armed;
    }

    pub fn apply(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::Play => self.playing = true,
            TransportCommand::Stop => {
                self.stop_pending |= self.playing;
                self.playing = false;
                self.relocated |= self.position != 0;
                self.position = 0;
            }
            TransportCommand::Pause => {
                self.stop_pending |= self.playing;
                self.playing = false;
            }
            TransportCommand::Locate(position) => {
                self.relocated |= self.position != position;
                self.position = position;
            }
        }
    }

    /// True when `position` lies inside the punch region (or punch is off)
    pub fn in_punch(&self, position: u64) -> bool {
        !self.punch.enabled || (position >= self.punch.start && position < self.punch.end)
    }

    /// Frames of `span` that fall inside the punch window, as (offset within span, frames)
    pub fn punch_overlap(&self, span: &Span) -> Option<(usize, usize)> {
        if !self.punch.enabled {
            return Some((0, span.frames));
        }
        let start = span.position.max(self.punch.start);
        let end = span.end().min(self.punch.end);
        if end <= start {
            return None;
        }
        Some(((start - span.position) as usize, (end - start) as usize))
    }

    /// Produce the timeline ranges for the next `frames` and advance.
    ///
    /// While stopped the block covers the current position without moving.
    pub fn advance(&mut self, frames: usize) -> TransportBlock {
        let mut spans = ArrayVec::new();
        let stopped = std::mem::take(&mut self.stop_pending);
        let relocated = std::mem::take(&mut self.relocated);

        if !self.playing {
            spans.push(Span { position: self.position, offset: 0, frames });
            return TransportBlock {
                spans,
                frames,
                playing: false,
                recording: false,
                stopped,
                relocated,
                tempo: self.tempo,
            };
        }

        let mut offset = 0usize;
        let mut position = self.position;
        let looping = self.loop_region.is_active();
        while offset < frames {
            let remaining = frames - offset;
            let wraps = looping && position < self.loop_region.end && spans.len() + 1 < MAX_SPANS;
            let take = if wraps {
                remaining.min((self.loop_region.end - position) as usize)
            } else {
                remaining
            };
            spans.push(Span { position, offset, frames: take });
            offset += take;
            position += take as u64;
            if wraps && position == self.loop_region.end {
                position = self.loop_region.start;
            }
        }
        self.position = position;

        TransportBlock {
            spans,
            frames,
            playing: true,
            recording: self.is_recording(),
            stopped,
            relocated,
            tempo: self.tempo,
        }
    }

    /// Seconds represented by `frames` at the current sample rate
    pub fn frames_to_seconds(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }
}

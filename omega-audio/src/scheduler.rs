//! Event scheduler
//!
//! Turns step patterns and automation lanes into frame-stamped events for
//! the current block. Step times come from a tempo anchor so a tempo change
//! only affects steps after it.

use crate::mixer::{MixerChange, MixerParam};
use crate::processor::{Event, EventKind};
use crate::rack::{ChannelRack, RackChannel};
use crate::transport::{Span, TransportBlock};

/// Automation lanes the scheduler can hold
pub const MAX_LANES: usize = 64;

/// What an automation lane drives
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationTarget {
    /// A generator parameter on a rack channel
    Generator { channel_id: u32, param: u32 },
    /// A mixer channel parameter
    Mixer { channel: usize, param: MixerParam },
}

/// A value change at a timeline position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationPoint {
    pub position: u64,
    pub value: f32,
}

/// Time-ordered parameter changes for one target
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationLane {
    target: AutomationTarget,
    points: Vec<AutomationPoint>,
}

impl AutomationLane {
    /// Build a lane; points are sorted by position
    pub fn new(target: AutomationTarget, mut points: Vec<AutomationPoint>) -> Self {
        points.sort_by_key(|p| p.position);
        Self { target, points }
    }

    pub fn target(&self) -> AutomationTarget {
        self.target
    }

    pub fn points(&self) -> &[AutomationPoint] {
        &self.points
    }

    /// Points with `start <= position < end`
    fn range(&self, start: u64, end: u64) -> &[AutomationPoint] {
        let lo = self.points.partition_point(|p| p.position < start);
        let hi = self.points.partition_point(|p| p.position < end);
        &self.points[lo..hi]
    }
}

/// Step and automation scheduler
pub struct Scheduler {
    sample_rate: f64,
    steps_per_beat: u32,
    accent_amount: u8,
    tempo: f64,
    anchor_position: u64,
    anchor_step: f64,
    lanes: Vec<Box<AutomationLane>>,
}

impl Scheduler {
    pub fn new(sample_rate: u32, steps_per_beat: u32, accent_amount: u8) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            steps_per_beat: steps_per_beat.max(1),
            accent_amount,
            tempo: 120.0,
            anchor_position: 0,
            anchor_step: 0.0,
            lanes: Vec::with_capacity(MAX_LANES),
        }
    }

    /// Frames between two steps at `tempo`
    pub fn frames_per_step(&self, tempo: f64) -> f64 {
        self.sample_rate * 60.0 / (tempo * self.steps_per_beat as f64)
    }

    /// Fractional step index at a timeline position
    pub fn step_at(&self, position: u64) -> f64 {
        self.anchor_step
            + (position as f64 - self.anchor_position as f64) / self.frames_per_step(self.tempo)
    }

    /// Timeline frame where step `k` starts: `round(step_time * sample_rate)`
    pub fn step_position(&self, k: u64) -> i64 {
        let offset = (k as f64 - self.anchor_step) * self.frames_per_step(self.tempo);
        self.anchor_position as i64 + offset.round() as i64
    }

    /// Re-anchor on a tempo change so earlier steps keep their positions
    fn follow_tempo(&mut self, tempo: f64, position: u64) {
        if tempo != self.tempo {
            self.anchor_step = self.step_at(position);
            self.anchor_position = position;
            self.tempo = tempo;
        }
    }

    /// Positions before the anchor have no tempo history; restart the grid
    /// at zero with the current tempo
    fn rewind(&mut self, position: u64) {
        if position < self.anchor_position {
            self.anchor_position = 0;
            self.anchor_step = 0.0;
        }
    }

    pub fn lanes(&self) -> impl Iterator<Item = &AutomationLane> {
        self.lanes.iter().map(|l| l.as_ref())
    }

    /// Insert or replace the lane for its target; returns the replaced
    /// lane, or the new one when no room is left
    pub(crate) fn set_lane(&mut self, lane: Box<AutomationLane>) -> Option<Box<AutomationLane>> {
        if let Some(existing) = self.lanes.iter_mut().find(|l| l.target == lane.target) {
            return Some(std::mem::replace(existing, lane));
        }
        if self.lanes.len() == self.lanes.capacity() {
            return Some(lane);
        }
        self.lanes.push(lane);
        None
    }

    pub(crate) fn remove_lane(&mut self, target: AutomationTarget) -> Option<Box<AutomationLane>> {
        let index = self.lanes.iter().position(|l| l.target == target)?;
        Some(self.lanes.remove(index))
    }

    /// Queue this block's events on rack channels and mixer changes in `mixer_changes`
    pub(crate) fn schedule(
        &mut self,
        block: &TransportBlock,
        rack: &mut ChannelRack,
        mixer_changes: &mut Vec<MixerChange>,
    ) {
        if block.stopped || block.relocated {
            for channel in rack.channels_mut() {
                if let Some(note) = channel.sounding.take() {
                    channel.push_event(Event::new(0, EventKind::NoteOff { note }));
                }
                if block.stopped {
                    channel.push_event(Event::new(0, EventKind::AllNotesOff));
                }
            }
        }
        if !block.playing {
            return;
        }

        if let Some(first) = block.spans.first() {
            self.rewind(first.position);
            self.follow_tempo(block.tempo, first.position);
        }
        for span in block.spans.iter() {
            // a loop wrap can land before the anchor mid-block
            self.rewind(span.position);
            self.schedule_steps(span, rack);
            self.schedule_automation(span, rack, mixer_changes);
        }
    }

    fn schedule_steps(&self, span: &Span, rack: &mut ChannelRack) {
        let start = span.position as i64;
        let end = span.end() as i64;
        let mut k = (self.step_at(span.position).floor() as i64 - 1).max(0) as u64;
        while self.step_position(k) < start {
            k += 1;
        }
        loop {
            let position = self.step_position(k);
            if position >= end {
                break;
            }
            let frame = (span.offset as i64 + position - start) as u32;
            for channel in rack.channels_mut() {
                self.emit_step(channel, k, frame);
            }
            k += 1;
        }
    }

    fn emit_step(&self, channel: &mut RackChannel, k: u64, frame: u32) {
        let step = channel.pattern.step(k);
        let velocity = if step.accent {
            step.velocity.saturating_add(self.accent_amount).min(127)
        } else {
            step.velocity
        };
        let plays = step.active && velocity > 0;
        let fuse = plays && step.slide && channel.sounding.is_some();

        if let Some(note) = channel.sounding {
            if !fuse {
                channel.push_event(Event::new(frame, EventKind::NoteOff { note }));
                channel.sounding = None;
            }
        }
        if plays {
            let note = channel.root_note();
            channel.push_event(Event::new(
                frame,
                EventKind::NoteOn {
                    note,
                    velocity,
                    legato: fuse,
                },
            ));
            channel.sounding = Some(note);
        }
    }

    fn schedule_automation(
        &self,
        span: &Span,
        rack: &mut ChannelRack,
        mixer_changes: &mut Vec<MixerChange>,
    ) {
        for lane in self.lanes.iter() {
            for point in lane.range(span.position, span.end()) {
                let frame = span.offset + (point.position - span.position) as usize;
                match lane.target {
                    AutomationTarget::Generator { channel_id, param } => {
                        if let Some(channel) = rack.get_mut(channel_id) {
                            channel.push_event(Event::new(
                                frame as u32,
                                EventKind::Parameter {
                                    id: param,
                                    value: point.value,
                                },
                            ));
                        }
                    }
                    AutomationTarget::Mixer { channel, param } => {
                        if mixer_changes.len() < mixer_changes.capacity() {
                            mixer_changes.push(MixerChange {
                                channel,
                                param,
                                value: point.value,
                                frame_offset: frame as u32,
                            });
                        }
                    }
                }
            }
        }
    }
}

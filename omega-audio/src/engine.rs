//! Audio engine - the block loop run by the device callback
//!
//! Per block: drain commands, snapshot the transport, schedule steps and
//! automation, render the channel rack into mixer inputs, run the mixer in
//! routing-plan order, capture the recorder and post telemetry. Nothing in
//! here allocates, frees or blocks once the engine is built; replaced
//! objects go back to the control side on the retire queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::chain::EffectSlot;
use crate::config::EngineConfig;
use crate::mixer::{
    MixerChange, Mixer, MonitorSettings, ReferenceSlot, SendConfig, SidechainConfig, VcaSettings,
};
use crate::processor::{Event, EventKind, ProcessorFault};
use crate::rack::{ChannelRack, RackChannel, RackField, Step};
use crate::recorder::{RecordSource, RecordedTake, Recorder, RecordingInfo};
use crate::routing::RoutingPlan;
use crate::scheduler::{AutomationLane, AutomationTarget, Scheduler};
use crate::strip::StripParam;
use crate::transport::{Region, Transport, TransportCommand};

/// Retired objects the audio thread can park when the retire queue is full
const RETIRE_OVERFLOW: usize = 64;

/// Commands sent to the audio engine
pub enum AudioCommand {
    // Transport
    SetTempo(f64),
    SetTimeSignature(u8, u8),
    Transport(TransportCommand),
    SetLoop(Region),
    SetPunch(Region),

    // Channel rack
    AddChannel(Box<RackChannel>),
    RemoveChannel(u32),
    SetChannelStep { channel_id: u32, index: usize, step: Step },
    SetStepVelocity { channel_id: u32, index: usize, velocity: u8 },
    SetPatternLength { channel_id: u32, length: usize },
    ClearSteps(u32),
    FillSteps { channel_id: u32, interval: usize },
    SetChannelField { channel_id: u32, field: RackField },
    SetGeneratorParam { channel_id: u32, param: u32, value: f32, frame_offset: u32 },
    ResetChannel(u32),

    // Automation
    SetAutomation(Box<AutomationLane>),
    RemoveAutomation(AutomationTarget),

    // Mixer
    SetMixerParam(MixerChange),
    SetStripParam { channel: usize, param: StripParam, value: f32 },

    // Topology; the plan was computed by the control side's routing graph
    SetRoute { channel: usize, target: usize, plan: Box<RoutingPlan> },
    SetSend { channel: usize, index: usize, send: SendConfig, plan: Box<RoutingPlan> },
    SetSidechain { channel: usize, sidechain: SidechainConfig, plan: Box<RoutingPlan> },

    // Effect slots
    AddEffectSlot { channel: usize, index: usize, slot: EffectSlot },
    RemoveEffectSlot { channel: usize, index: usize },
    MoveEffectSlot { channel: usize, from: usize, to: usize },
    SetDryWet { channel: usize, slot: usize, value: f32 },
    SetBypass { channel: usize, slot: usize, bypassed: bool },
    SetSlotSolo { channel: usize, slot: usize, soloed: bool },
    SetProcessorParam { channel: usize, slot: usize, param: u32, value: f32, frame_offset: u32 },
    ResetSlot { channel: usize, slot: usize },

    // VCA and monitor
    SetVca { id: usize, settings: Option<VcaSettings> },
    SetMonitor(MonitorSettings),
    CaptureReference(ReferenceSlot),
    SetReferenceAudio { slot: ReferenceSlot, samples: Vec<f32> },

    // Recording
    StartRecording(Box<RecordedTake>),
    StopRecording,
    GrowRecorder(Vec<f32>),
}

/// Events sent from the audio engine
#[derive(Debug, Clone)]
pub enum AudioEvent {
    /// Periodic transport state
    TransportUpdate { position: u64, playing: bool, recording: bool },
    /// Periodic progress of an active recording
    RecordingProgress(RecordingInfo),
    /// An effect slot failed and is bypassed until reset
    ProcessorFault {
        channel: usize,
        slot: usize,
        processor: &'static str,
        fault: ProcessorFault,
    },
    /// A rack channel's generator failed and is silent until reset
    GeneratorFault {
        channel_id: u32,
        processor: &'static str,
        fault: ProcessorFault,
    },
    /// Events dropped because a channel's event queue was full
    EventOverflow { channel_id: u32, dropped: u32 },
    /// Master contained non-finite samples; the block was silenced
    MasterFault,
    /// Recorder buffer full; samples were dropped
    BufferOverrun { dropped_frames: u64 },
    /// Recorder passed its watermark and wants a bigger buffer
    RecorderNeedsCapacity { current: usize, requested: usize },
    /// A recording finished
    RecordingComplete(Box<RecordedTake>),
    /// A new routing plan is in use
    PlanApplied { generation: u64 },
    /// The retire queue was full; an object is parked or leaked
    RetireOverflow,
    /// A command could not be applied
    Rejected(&'static str),
}

/// Audio-to-control event sender. Never blocks; events that do not fit
/// are counted and dropped.
pub struct Telemetry {
    tx: Sender<AudioEvent>,
    dropped: u64,
}

impl Telemetry {
    pub fn new(tx: Sender<AudioEvent>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Post an event carrying no heap data; false if it was dropped
    pub fn post(&mut self, event: AudioEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped += 1;
                false
            }
        }
    }

    /// Post an event, handing it back when the queue is full
    pub fn try_post(&mut self, event: AudioEvent) -> Result<(), AudioEvent> {
        self.tx.try_send(event).map_err(TrySendError::into_inner)
    }

    /// Events dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// An object the audio thread no longer uses. Dropped by the control side
/// once the grace period has passed.
pub enum Retired {
    Channel(Box<RackChannel>),
    Slot(EffectSlot),
    Plan(Box<RoutingPlan>),
    Lane(Box<AutomationLane>),
    Samples(Vec<f32>),
    Take(Box<RecordedTake>),
}

impl Retired {
    /// Release any processor before the value is dropped
    pub fn release(self) {
        match self {
            Retired::Channel(mut channel) => {
                if let Some(mut generator) = channel.take_generator() {
                    generator.release();
                }
            }
            Retired::Slot(slot) => slot.into_processor().release(),
            _ => {}
        }
    }
}

/// A retired object stamped with the block it was retired in
pub type RetiredEntry = (u64, Retired);

/// Sending side of deferred delete
struct RetireQueue {
    tx: Sender<RetiredEntry>,
    overflow: Vec<RetiredEntry>,
}

impl RetireQueue {
    fn push(&mut self, block: u64, item: Retired, telemetry: &mut Telemetry) {
        if let Err(e) = self.tx.try_send((block, item)) {
            let entry = e.into_inner();
            if self.overflow.len() < self.overflow.capacity() {
                self.overflow.push(entry);
            } else {
                // freeing here could block; leaking is the last resort
                std::mem::forget(entry);
            }
            telemetry.post(AudioEvent::RetireOverflow);
        }
    }

    fn retry(&mut self) {
        while let Some(entry) = self.overflow.pop() {
            if let Err(e) = self.tx.try_send(entry) {
                self.overflow.push(e.into_inner());
                break;
            }
        }
    }
}

/// Queue ends handed to [`EngineState::new`]
pub(crate) struct EngineLinks {
    pub commands: Receiver<AudioCommand>,
    pub events: Sender<AudioEvent>,
    pub retire: Sender<RetiredEntry>,
    pub block_counter: Arc<AtomicU64>,
}

/// Audio engine state (held in audio thread)
pub struct EngineState {
    transport: Transport,
    scheduler: Scheduler,
    rack: ChannelRack,
    mixer: Mixer,
    recorder: Recorder,
    commands: Receiver<AudioCommand>,
    command_budget: usize,
    telemetry: Telemetry,
    retire: RetireQueue,
    block_counter: Arc<AtomicU64>,
    blocks: u64,
    telemetry_interval: u64,
    max_block_size: usize,
    input_channels: usize,
    // Pre-allocated processing buffers (avoids allocation in audio callback)
    mixer_changes: Vec<MixerChange>,
    input: Vec<f32>,
    tap: Vec<f32>,
}

impl EngineState {
    pub(crate) fn new(config: &EngineConfig, mixer: Mixer, links: EngineLinks) -> Self {
        Self {
            transport: Transport::new(config.sample_rate),
            scheduler: Scheduler::new(config.sample_rate, config.steps_per_beat, config.accent_amount),
            rack: ChannelRack::with_capacity(config.rack_channels),
            mixer,
            recorder: Recorder::new(config.recorder_watermark),
            commands: links.commands,
            command_budget: config.command_capacity,
            telemetry: Telemetry::new(links.events),
            retire: RetireQueue {
                tx: links.retire,
                overflow: Vec::with_capacity(RETIRE_OVERFLOW),
            },
            block_counter: links.block_counter,
            blocks: 0,
            telemetry_interval: config.telemetry_interval_blocks.max(1),
            max_block_size: config.max_block_size,
            input_channels: config.input_channels,
            mixer_changes: Vec::with_capacity(config.max_events_per_block),
            input: vec![0.0; config.max_block_size * config.input_channels],
            tap: vec![0.0; config.block_samples()],
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn rack(&self) -> &ChannelRack {
        &self.rack
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Blocks processed so far
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Telemetry events dropped because the event queue was full
    pub fn dropped_events(&self) -> u64 {
        self.telemetry.dropped()
    }

    fn retire(&mut self, item: Retired) {
        self.retire.push(self.blocks, item, &mut self.telemetry);
    }

    fn reject(&mut self, reason: &'static str) {
        self.telemetry.post(AudioEvent::Rejected(reason));
    }

    fn plan_applied(&mut self, before: u64, old: Box<RoutingPlan>) {
        let generation = self.mixer.plan().generation();
        self.retire(Retired::Plan(old));
        if generation != before {
            self.telemetry.post(AudioEvent::PlanApplied { generation });
        } else {
            self.reject("routing plan does not fit the mixer");
        }
    }

    /// Process a command
    pub fn handle_command(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::SetTempo(bpm) => {
                if self.transport.set_tempo(bpm).is_err() {
                    self.reject("tempo out of range");
                }
            }
            AudioCommand::SetTimeSignature(numerator, denominator) => {
                self.transport.set_time_signature(numerator, denominator)
            }
            AudioCommand::Transport(command) => self.transport.apply(command),
            AudioCommand::SetLoop(region) => self.transport.set_loop(region),
            AudioCommand::SetPunch(region) => self.transport.set_punch(region),

            AudioCommand::AddChannel(channel) => {
                if let Err(channel) = self.rack.add(channel) {
                    self.retire(Retired::Channel(channel));
                    self.reject("channel rack is full");
                }
            }
            AudioCommand::RemoveChannel(id) => {
                if let Some(channel) = self.rack.remove(id) {
                    self.retire(Retired::Channel(channel));
                }
            }
            AudioCommand::SetChannelStep { channel_id, index, step } => {
                if let Some(channel) = self.rack.get_mut(channel_id) {
                    channel.pattern.set_step(index, step);
                }
            }
            AudioCommand::SetStepVelocity { channel_id, index, velocity } => {
                if let Some(channel) = self.rack.get_mut(channel_id) {
                    channel.pattern.set_velocity(index, velocity);
                }
            }
            AudioCommand::SetPatternLength { channel_id, length } => {
                if let Some(channel) = self.rack.get_mut(channel_id) {
                    channel.pattern.set_length(length);
                }
            }
            AudioCommand::ClearSteps(channel_id) => {
                if let Some(channel) = self.rack.get_mut(channel_id) {
                    channel.pattern.clear();
                }
            }
            AudioCommand::FillSteps { channel_id, interval } => {
                if let Some(channel) = self.rack.get_mut(channel_id) {
                    channel.pattern.fill(interval);
                }
            }
            AudioCommand::SetChannelField { channel_id, field } => {
                self.rack.set_field(channel_id, field);
            }
            AudioCommand::SetGeneratorParam { channel_id, param, value, frame_offset } => {
                if let Some(channel) = self.rack.get_mut(channel_id) {
                    channel.push_event(Event::new(frame_offset, EventKind::Parameter { id: param, value }));
                }
            }
            AudioCommand::ResetChannel(channel_id) => {
                self.rack.reset_channel(channel_id);
            }

            AudioCommand::SetAutomation(lane) => {
                if let Some(old) = self.scheduler.set_lane(lane) {
                    self.retire(Retired::Lane(old));
                }
            }
            AudioCommand::RemoveAutomation(target) => {
                if let Some(old) = self.scheduler.remove_lane(target) {
                    self.retire(Retired::Lane(old));
                }
            }

            AudioCommand::SetMixerParam(change) => {
                self.mixer.apply_change(&change);
            }
            AudioCommand::SetStripParam { channel, param, value } => {
                self.mixer.set_strip_param(channel, param, value);
            }

            AudioCommand::SetRoute { channel, target, plan } => {
                let before = self.mixer.plan().generation();
                let old = self.mixer.set_route(channel, target, plan);
                self.plan_applied(before, old);
            }
            AudioCommand::SetSend { channel, index, send, plan } => {
                let before = self.mixer.plan().generation();
                let old = self.mixer.set_send(channel, index, send, plan);
                self.plan_applied(before, old);
            }
            AudioCommand::SetSidechain { channel, sidechain, plan } => {
                let before = self.mixer.plan().generation();
                let old = self.mixer.set_sidechain(channel, sidechain, plan);
                self.plan_applied(before, old);
            }

            AudioCommand::AddEffectSlot { channel, index, slot } => {
                let result = match self.mixer.chain_mut(channel) {
                    Some(chain) => chain.insert(index, slot),
                    None => Err(slot),
                };
                if let Err(slot) = result {
                    self.retire(Retired::Slot(slot));
                    self.reject("effect slot not inserted");
                }
            }
            AudioCommand::RemoveEffectSlot { channel, index } => {
                if let Some(slot) = self.mixer.chain_mut(channel).and_then(|c| c.remove(index)) {
                    self.retire(Retired::Slot(slot));
                }
            }
            AudioCommand::MoveEffectSlot { channel, from, to } => {
                if let Some(chain) = self.mixer.chain_mut(channel) {
                    chain.move_slot(from, to);
                }
            }
            AudioCommand::SetDryWet { channel, slot, value } => {
                if let Some(chain) = self.mixer.chain_mut(channel) {
                    chain.set_dry_wet(slot, value);
                }
            }
            AudioCommand::SetBypass { channel, slot, bypassed } => {
                if let Some(chain) = self.mixer.chain_mut(channel) {
                    chain.set_bypass(slot, bypassed);
                }
            }
            AudioCommand::SetSlotSolo { channel, slot, soloed } => {
                if let Some(chain) = self.mixer.chain_mut(channel) {
                    chain.set_solo(slot, soloed);
                }
            }
            // Processor parameters are stepped at the block start
            AudioCommand::SetProcessorParam { channel, slot, param, value, frame_offset: _ } => {
                if let Some(chain) = self.mixer.chain_mut(channel) {
                    chain.set_parameter(slot, param, value);
                }
            }
            AudioCommand::ResetSlot { channel, slot } => {
                if let Some(chain) = self.mixer.chain_mut(channel) {
                    chain.reset_slot(slot);
                }
            }

            AudioCommand::SetVca { id, settings } => {
                if !self.mixer.set_vca(id, settings) {
                    self.reject("no such VCA group");
                }
            }
            AudioCommand::SetMonitor(settings) => self.mixer.monitor_mut().set(settings),
            AudioCommand::CaptureReference(slot) => self.mixer.monitor_mut().capture_reference(slot),
            AudioCommand::SetReferenceAudio { slot, samples } => {
                let old = self.mixer.monitor_mut().load_reference(slot, samples);
                self.retire(Retired::Samples(old));
            }

            AudioCommand::StartRecording(take) => match self.recorder.start(take) {
                Ok(()) => self.transport.set_record_armed(true),
                Err(take) => {
                    self.retire(Retired::Take(take));
                    self.reject("recording already active");
                }
            },
            AudioCommand::StopRecording => {
                if self.recorder.stop() {
                    self.transport.set_record_armed(false);
                    self.recorder.flush(&mut self.telemetry);
                }
            }
            AudioCommand::GrowRecorder(buffer) => {
                let old = self.recorder.grow(buffer);
                self.retire(Retired::Samples(old));
            }
        }
    }

    fn drain_commands(&mut self) {
        for _ in 0..self.command_budget {
            match self.commands.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => break,
            }
        }
    }

    /// One block of at most `max_block_size` frames. Device input for the
    /// block must already be in `self.input`.
    fn process_block(&mut self, frames: usize) {
        self.drain_commands();
        self.retire.retry();
        self.recorder.flush(&mut self.telemetry);

        let block = self.transport.advance(frames);
        self.mixer.begin_block(frames);

        self.mixer_changes.clear();
        self.scheduler.schedule(&block, &mut self.rack, &mut self.mixer_changes);
        for change in self.mixer_changes.iter() {
            self.mixer.apply_change(change);
        }

        self.rack.render(frames, self.mixer.inputs_mut(), &mut self.telemetry);

        let tap_channel = match self.recorder.source() {
            Some(RecordSource::MixerInput(channel)) => Some(channel),
            _ => None,
        };
        let tapped = self.mixer.process(frames, tap_channel, &mut self.tap, &mut self.telemetry);

        match self.recorder.source() {
            Some(RecordSource::DeviceInput) => {
                let data = &self.input[..frames * self.input_channels];
                self.recorder
                    .capture(&self.transport, &block, data, self.input_channels, &mut self.telemetry);
            }
            Some(RecordSource::MixerInput(_)) if tapped => {
                let data = &self.tap[..frames * 2];
                self.recorder.capture(&self.transport, &block, data, 2, &mut self.telemetry);
            }
            _ => {}
        }

        if self.blocks % self.telemetry_interval == 0 {
            self.telemetry.post(AudioEvent::TransportUpdate {
                position: self.transport.position(),
                playing: block.playing,
                recording: block.recording,
            });
            if let Some(info) = self.recorder.info() {
                self.telemetry.post(AudioEvent::RecordingProgress(info));
            }
        }

        self.blocks += 1;
        self.block_counter.store(self.blocks, Ordering::Release);
    }

    /// Device callback body.
    ///
    /// `output` is interleaved with `output_channels` per frame; `input`
    /// holds the device input interleaved at the configured input channel
    /// count (missing input reads as silence). Buffers longer than the
    /// maximum block size run as consecutive sub-blocks.
    pub fn process(&mut self, output: &mut [f32], input: &[f32], output_channels: usize) {
        let output_channels = output_channels.max(1);
        let total = output.len() / output_channels;
        let in_ch = self.input_channels;
        let mut done = 0usize;

        while done < total {
            let frames = (total - done).min(self.max_block_size);

            let src_start = (done * in_ch).min(input.len());
            let src_end = ((done + frames) * in_ch).min(input.len());
            let src = &input[src_start..src_end];
            self.input[..src.len()].copy_from_slice(src);
            self.input[src.len()..frames * in_ch].fill(0.0);

            self.process_block(frames);

            let master = self.mixer.master_out(frames);
            let out = &mut output[done * output_channels..(done + frames) * output_channels];
            for (frame, lr) in out.chunks_exact_mut(output_channels).zip(master.chunks_exact(2)) {
                match frame {
                    [mono] => *mono = (lr[0] + lr[1]) * 0.5,
                    [l, r, rest @ ..] => {
                        *l = lr[0];
                        *r = lr[1];
                        rest.fill(0.0);
                    }
                    [] => {}
                }
            }
            done += frames;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::AudioEngine;
    use crate::generator::SineGenerator;

    fn engine() -> (AudioEngine, EngineState) {
        let config = EngineConfig {
            mixer_channels: 4,
            max_block_size: 64,
            ..EngineConfig::default()
        };
        AudioEngine::create(config).unwrap()
    }

    #[test]
    fn test_silent_without_channels() {
        let (_engine, mut state) = engine();
        let mut out = vec![1.0; 128];
        state.process(&mut out, &[], 2);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(state.blocks(), 1);
    }

    #[test]
    fn test_long_buffer_split_into_blocks() {
        let (_engine, mut state) = engine();
        let mut out = vec![0.0; 200 * 2];
        state.process(&mut out, &[], 2);
        assert_eq!(state.blocks(), 4);
    }

    #[test]
    fn test_mono_output_folds() {
        let (engine, mut state) = engine();
        let channel = RackChannel::new(1, "drone", Some(Box::new(SineGenerator::drone(440.0, 0.5)))).with_target(1);
        engine.add_channel(channel).unwrap();
        engine.set_mixer_param(1, crate::mixer::MixerParam::Pan, 1.0, 0).unwrap();
        let mut stereo = vec![0.0; 128];
        state.process(&mut stereo, &[], 2);
        let mut mono = vec![0.0; 64];
        state.process(&mut mono, &[], 1);
        assert!(mono.iter().any(|&s| s != 0.0));
        assert!(stereo.chunks(2).all(|f| f[0] == 0.0));
    }

    #[test]
    fn test_commands_applied_at_block_start() {
        let (engine, mut state) = engine();
        engine.set_tempo(140.0).unwrap();
        engine.play().unwrap();
        let mut out = vec![0.0; 128];
        state.process(&mut out, &[], 2);
        assert_eq!(state.transport().tempo(), 140.0);
        assert_eq!(state.transport().position(), 64);
    }

    #[test]
    fn test_removed_channel_is_retired_not_dropped() {
        let (engine, mut state) = engine();
        engine.add_channel(RackChannel::new(7, "x", Some(Box::new(SineGenerator::new(0.5))))).unwrap();
        let mut out = vec![0.0; 128];
        state.process(&mut out, &[], 2);
        engine.remove_channel(7).unwrap();
        state.process(&mut out, &[], 2);
        assert!(state.rack().get(7).is_none());

        // still inside the grace period
        assert_eq!(engine.reclaim(), 0);
        state.process(&mut out, &[], 2);
        state.process(&mut out, &[], 2);
        assert_eq!(engine.reclaim(), 1);
    }

    #[test]
    fn test_telemetry_reports_transport() {
        let (engine, mut state) = engine();
        let mut out = vec![0.0; 128];
        state.process(&mut out, &[], 2);
        let events = engine.poll();
        assert!(events
            .iter()
            .any(|e| matches!(e, AudioEvent::TransportUpdate { position: 0, playing: false, .. })));
    }
}

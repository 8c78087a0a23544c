//! Control-side handle to the audio engine
//!
//! Everything here runs off the audio thread. Requests are validated
//! against a mirror of the engine's state, then sent as commands over the
//! bounded parameter bus. Topology changes are checked on a copy of the
//! routing graph and travel with their new plan, so a rejected change
//! never reaches the audio thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::chain::{EffectSlot, MAX_SLOTS};
use crate::config::EngineConfig;
use crate::engine::{AudioCommand, AudioEvent, EngineLinks, EngineState, RetiredEntry};
use crate::error::{EngineError, Result};
use crate::meter::{MeterBank, MeterSnapshot};
use crate::mixer::{
    ChannelState, Mixer, MixerChange, MixerParam, MixerSnapshot, MonitorSettings, ReferenceSlot, SendConfig,
    SidechainConfig, SnapshotBank, VcaSettings, MAX_SENDS, MAX_VCA_GROUPS,
};
use crate::processor::Processor;
use crate::rack::{RackChannel, RackField, Step, MAX_STEPS};
use crate::recorder::{RecordSettings, RecordSource, RecordedTake};
use crate::routing::{RoutingGraph, RoutingPlan, MASTER};
use crate::scheduler::{AutomationLane, AutomationTarget};
use crate::strip::StripParam;
use crate::transport::{Region, Transport, TransportCommand};

/// Attempts made on a full command queue before giving up
const SEND_ATTEMPTS: u32 = 8;
/// First backoff sleep; doubled after every attempt
const SEND_BACKOFF: Duration = Duration::from_micros(250);

/// Mirror of the state the control side validates against
struct ControlModel {
    graph: RoutingGraph,
    mixer: Vec<ChannelState>,
    slots: Vec<usize>,
    rack: Vec<(u32, usize)>,
    snapshots: SnapshotBank,
    recording: bool,
}

/// Handle to communicate with the audio engine
pub struct AudioEngine {
    config: EngineConfig,
    command_tx: Sender<AudioCommand>,
    event_rx: Receiver<AudioEvent>,
    retire_rx: Receiver<RetiredEntry>,
    reclaim: Mutex<VecDeque<RetiredEntry>>,
    block_counter: Arc<AtomicU64>,
    meters: Arc<MeterBank>,
    model: Mutex<ControlModel>,
    shutdown: AtomicBool,
}

impl AudioEngine {
    /// Build the control handle and the audio-thread state, connected by
    /// bounded queues
    pub fn create(config: EngineConfig) -> Result<(AudioEngine, EngineState)> {
        config.validate()?;
        let channels = config.total_mixer_channels();
        let graph = RoutingGraph::new(channels);
        let plan = Box::new(graph.plan()?);
        let meters = Arc::new(MeterBank::new(channels));
        let mixer = Mixer::new(&config, Arc::clone(&meters), plan);

        let (command_tx, command_rx) = bounded(config.command_capacity);
        let (event_tx, event_rx) = bounded(config.event_capacity);
        let (retire_tx, retire_rx) = bounded(config.command_capacity);
        let block_counter = Arc::new(AtomicU64::new(0));

        let state = EngineState::new(
            &config,
            mixer,
            EngineLinks {
                commands: command_rx,
                events: event_tx,
                retire: retire_tx,
                block_counter: Arc::clone(&block_counter),
            },
        );

        let model = ControlModel {
            graph,
            mixer: vec![ChannelState::default(); channels],
            slots: vec![0; channels],
            rack: Vec::with_capacity(config.rack_channels),
            snapshots: SnapshotBank::new(),
            recording: false,
        };

        info!(
            sample_rate = config.sample_rate,
            max_block_size = config.max_block_size,
            mixer_channels = config.mixer_channels,
            "audio engine created"
        );

        let engine = AudioEngine {
            config,
            command_tx,
            event_rx,
            retire_rx,
            reclaim: Mutex::new(VecDeque::new()),
            block_counter,
            meters,
            model: Mutex::new(model),
            shutdown: AtomicBool::new(false),
        };
        Ok((engine, state))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Send a command, retrying with bounded backoff while the queue is full
    pub fn send(&self, cmd: AudioCommand) -> Result<()> {
        let mut cmd = cmd;
        let mut delay = SEND_BACKOFF;
        for attempt in 0..SEND_ATTEMPTS {
            match self.command_tx.try_send(cmd) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(EngineError::Disconnected),
                Err(TrySendError::Full(returned)) => {
                    cmd = returned;
                    if attempt + 1 < SEND_ATTEMPTS {
                        std::thread::sleep(delay);
                        delay *= 2;
                    }
                }
            }
        }
        warn!("command queue full; command dropped");
        Err(EngineError::QueueFull)
    }

    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Blocks the audio thread has completed
    pub fn block_count(&self) -> u64 {
        self.block_counter.load(Ordering::Acquire)
    }

    // ---- transport -------------------------------------------------------

    pub fn set_tempo(&self, bpm: f64) -> Result<()> {
        let bpm = Transport::check_tempo(bpm)?;
        self.send(AudioCommand::SetTempo(bpm))
    }

    pub fn set_time_signature(&self, numerator: u8, denominator: u8) -> Result<()> {
        if numerator == 0 || !denominator.is_power_of_two() {
            return Err(EngineError::InvalidParameter {
                name: "time signature",
                value: denominator as f64,
            });
        }
        self.send(AudioCommand::SetTimeSignature(numerator, denominator))
    }

    pub fn play(&self) -> Result<()> {
        self.send(AudioCommand::Transport(TransportCommand::Play))
    }

    pub fn stop(&self) -> Result<()> {
        self.send(AudioCommand::Transport(TransportCommand::Stop))
    }

    pub fn pause(&self) -> Result<()> {
        self.send(AudioCommand::Transport(TransportCommand::Pause))
    }

    pub fn locate(&self, position: u64) -> Result<()> {
        self.send(AudioCommand::Transport(TransportCommand::Locate(position)))
    }

    pub fn set_loop(&self, start: u64, end: u64, enabled: bool) -> Result<()> {
        check_region("loop", start, end, enabled)?;
        self.send(AudioCommand::SetLoop(Region::new(start, end, enabled)))
    }

    pub fn set_punch(&self, start: u64, end: u64, enabled: bool) -> Result<()> {
        check_region("punch", start, end, enabled)?;
        self.send(AudioCommand::SetPunch(Region::new(start, end, enabled)))
    }

    // ---- channel rack ----------------------------------------------------

    /// Prepare a channel's generator and add it to the rack
    pub fn add_channel(&self, mut channel: RackChannel) -> Result<()> {
        let mut model = self.model.lock();
        if model.rack.len() >= self.config.rack_channels {
            return Err(EngineError::RackFull);
        }
        if model.rack.iter().any(|&(id, _)| id == channel.id()) {
            return Err(EngineError::InvalidParameter {
                name: "rack channel id",
                value: channel.id() as f64,
            });
        }
        self.check_mixer_channel(channel.target())?;

        channel.prepare(self.config.sample_rate, self.config.max_block_size, self.config.max_events_per_block);
        let entry = (channel.id(), channel.target());
        self.send(AudioCommand::AddChannel(Box::new(channel)))?;
        model.rack.push(entry);
        debug!(channel_id = entry.0, target = entry.1, "rack channel added");
        Ok(())
    }

    pub fn remove_channel(&self, channel_id: u32) -> Result<()> {
        let mut model = self.model.lock();
        let index = rack_index(&model, channel_id)?;
        self.send(AudioCommand::RemoveChannel(channel_id))?;
        model.rack.remove(index);
        Ok(())
    }

    pub fn set_channel_step(&self, channel_id: u32, index: usize, step: Step) -> Result<()> {
        self.check_rack_channel(channel_id)?;
        check_step(index)?;
        self.send(AudioCommand::SetChannelStep { channel_id, index, step })
    }

    /// Velocity of an existing step, clamped to 1..=127
    pub fn set_step_velocity(&self, channel_id: u32, index: usize, velocity: u8) -> Result<()> {
        self.check_rack_channel(channel_id)?;
        check_step(index)?;
        let velocity = velocity.clamp(1, 127);
        self.send(AudioCommand::SetStepVelocity { channel_id, index, velocity })
    }

    pub fn set_pattern_length(&self, channel_id: u32, length: usize) -> Result<()> {
        self.check_rack_channel(channel_id)?;
        if !(1..=MAX_STEPS).contains(&length) {
            return Err(EngineError::InvalidParameter {
                name: "pattern length",
                value: length as f64,
            });
        }
        self.send(AudioCommand::SetPatternLength { channel_id, length })
    }

    pub fn clear_steps(&self, channel_id: u32) -> Result<()> {
        self.check_rack_channel(channel_id)?;
        self.send(AudioCommand::ClearSteps(channel_id))
    }

    /// Activate every `interval`-th step
    pub fn fill_steps(&self, channel_id: u32, interval: usize) -> Result<()> {
        self.check_rack_channel(channel_id)?;
        self.send(AudioCommand::FillSteps {
            channel_id,
            interval: interval.max(1),
        })
    }

    pub fn set_channel_mute(&self, channel_id: u32, muted: bool) -> Result<()> {
        self.set_channel_field(channel_id, RackField::Mute(muted))
    }

    pub fn set_channel_solo(&self, channel_id: u32, soloed: bool) -> Result<()> {
        self.set_channel_field(channel_id, RackField::Solo(soloed))
    }

    /// Mixer insert the channel feeds
    pub fn set_channel_target(&self, channel_id: u32, mixer_channel: usize) -> Result<()> {
        self.check_mixer_channel(mixer_channel)?;
        self.set_channel_field(channel_id, RackField::Target(mixer_channel))?;
        let mut model = self.model.lock();
        if let Some(entry) = model.rack.iter_mut().find(|(id, _)| *id == channel_id) {
            entry.1 = mixer_channel;
        }
        Ok(())
    }

    pub fn set_channel_root_note(&self, channel_id: u32, note: u8) -> Result<()> {
        self.set_channel_field(channel_id, RackField::RootNote(note.min(127)))
    }

    pub fn set_channel_midi_channel(&self, channel_id: u32, midi_channel: u8) -> Result<()> {
        self.set_channel_field(channel_id, RackField::MidiChannel(midi_channel.min(15)))
    }

    pub fn set_channel_color(&self, channel_id: u32, color: u32) -> Result<()> {
        self.set_channel_field(channel_id, RackField::Color(color))
    }

    fn set_channel_field(&self, channel_id: u32, field: RackField) -> Result<()> {
        self.check_rack_channel(channel_id)?;
        self.send(AudioCommand::SetChannelField { channel_id, field })
    }

    /// Generator parameter, applied at `frame_offset` of the next block
    pub fn set_generator_param(&self, channel_id: u32, param: u32, value: f32, frame_offset: u32) -> Result<()> {
        self.check_rack_channel(channel_id)?;
        let value = check_value("generator parameter", value)?;
        self.send(AudioCommand::SetGeneratorParam {
            channel_id,
            param,
            value,
            frame_offset: self.clamp_offset(frame_offset),
        })
    }

    /// Clear a failed generator
    pub fn reset_channel(&self, channel_id: u32) -> Result<()> {
        self.check_rack_channel(channel_id)?;
        self.send(AudioCommand::ResetChannel(channel_id))
    }

    // ---- automation ------------------------------------------------------

    pub fn set_automation(&self, lane: AutomationLane) -> Result<()> {
        match lane.target() {
            AutomationTarget::Mixer { channel, .. } => self.check_mixer_channel(channel)?,
            AutomationTarget::Generator { channel_id, .. } => self.check_rack_channel(channel_id)?,
        }
        if let Some(point) = lane.points().iter().find(|p| !p.value.is_finite()) {
            return Err(EngineError::InvalidParameter {
                name: "automation value",
                value: point.value as f64,
            });
        }
        self.send(AudioCommand::SetAutomation(Box::new(lane)))
    }

    pub fn remove_automation(&self, target: AutomationTarget) -> Result<()> {
        self.send(AudioCommand::RemoveAutomation(target))
    }

    // ---- mixer -----------------------------------------------------------

    /// Fader and pan ramp to reach `value` at `frame_offset`; the other
    /// fields switch at the start of the next block
    pub fn set_mixer_param(&self, channel: usize, param: MixerParam, value: f32, frame_offset: u32) -> Result<()> {
        self.check_mixer_channel(channel)?;
        let value = check_value("mixer parameter", value)?;
        let mut model = self.model.lock();
        self.send(AudioCommand::SetMixerParam(MixerChange {
            channel,
            param,
            value,
            frame_offset: self.clamp_offset(frame_offset),
        }))?;
        model.mixer[channel].apply(param, clamp_mixer(param, value));
        Ok(())
    }

    pub fn set_strip_param(&self, channel: usize, param: StripParam, value: f32) -> Result<()> {
        self.check_mixer_channel(channel)?;
        let value = check_value("strip parameter", value)?;
        self.send(AudioCommand::SetStripParam { channel, param, value })
    }

    /// Mixer-side view of a channel's fader, pan, mute and solo
    pub fn channel_state(&self, channel: usize) -> Option<ChannelState> {
        self.model.lock().mixer.get(channel).copied()
    }

    // ---- routing ---------------------------------------------------------

    /// Route a channel's output; fails with `RoutingCycle` and leaves the
    /// active plan untouched when the route would close a loop
    pub fn set_route(&self, channel: usize, target: usize) -> Result<()> {
        let mut model = self.model.lock();
        let before = model.graph.clone();
        let plan = model.graph.set_route(channel, target)?;
        let generation = plan.generation();
        if let Err(e) = self.send(AudioCommand::SetRoute {
            channel,
            target,
            plan: Box::new(plan),
        }) {
            model.graph = before;
            return Err(e);
        }
        debug!(channel, target, generation, "route changed");
        Ok(())
    }

    pub fn set_send(&self, channel: usize, index: usize, send: SendConfig) -> Result<()> {
        if index >= MAX_SENDS {
            return Err(EngineError::InvalidParameter {
                name: "send index",
                value: index as f64,
            });
        }
        let send = SendConfig {
            level: check_value("send level", send.level)?.clamp(0.0, 1.0),
            ..send
        };
        let mut model = self.model.lock();
        let before = model.graph.clone();
        let plan = model.graph.set_send(channel, index, send)?;
        if let Err(e) = self.send(AudioCommand::SetSend {
            channel,
            index,
            send,
            plan: Box::new(plan),
        }) {
            model.graph = before;
            return Err(e);
        }
        Ok(())
    }

    pub fn set_sidechain(&self, channel: usize, sidechain: SidechainConfig) -> Result<()> {
        let mut model = self.model.lock();
        let before = model.graph.clone();
        let plan = model.graph.set_sidechain(channel, sidechain)?;
        if let Err(e) = self.send(AudioCommand::SetSidechain {
            channel,
            sidechain,
            plan: Box::new(plan),
        }) {
            model.graph = before;
            return Err(e);
        }
        Ok(())
    }

    /// Plan for the current topology
    pub fn routing_plan(&self) -> Result<RoutingPlan> {
        self.model.lock().graph.plan()
    }

    pub fn route_of(&self, channel: usize) -> Option<usize> {
        self.model.lock().graph.target(channel)
    }

    // ---- effect slots ----------------------------------------------------

    /// Prepare `processor` and insert it at `index` (clamped to the chain
    /// length) on a mixer channel
    pub fn add_effect(
        &self,
        channel: usize,
        index: usize,
        mut processor: Box<dyn Processor>,
        dry_wet: f32,
    ) -> Result<()> {
        self.check_mixer_channel(channel)?;
        let dry_wet = check_value("dry/wet", dry_wet)?;
        let mut model = self.model.lock();
        if model.slots[channel] >= MAX_SLOTS {
            return Err(EngineError::ChainFull(channel));
        }
        processor.prepare(self.config.sample_rate, self.config.max_block_size);
        let name = processor.name();
        let slot = EffectSlot::new(processor).with_dry_wet(dry_wet);
        self.send(AudioCommand::AddEffectSlot { channel, index, slot })?;
        model.slots[channel] += 1;
        debug!(channel, index, processor = name, "effect slot added");
        Ok(())
    }

    pub fn remove_effect(&self, channel: usize, index: usize) -> Result<()> {
        let mut model = self.model.lock();
        self.check_slot(&model, channel, index)?;
        self.send(AudioCommand::RemoveEffectSlot { channel, index })?;
        model.slots[channel] -= 1;
        Ok(())
    }

    pub fn move_effect(&self, channel: usize, from: usize, to: usize) -> Result<()> {
        let model = self.model.lock();
        self.check_slot(&model, channel, from)?;
        self.check_slot(&model, channel, to)?;
        self.send(AudioCommand::MoveEffectSlot { channel, from, to })
    }

    pub fn set_dry_wet(&self, channel: usize, slot: usize, value: f32) -> Result<()> {
        let value = check_value("dry/wet", value)?;
        self.check_slot(&self.model.lock(), channel, slot)?;
        self.send(AudioCommand::SetDryWet { channel, slot, value })
    }

    pub fn set_bypass(&self, channel: usize, slot: usize, bypassed: bool) -> Result<()> {
        self.check_slot(&self.model.lock(), channel, slot)?;
        self.send(AudioCommand::SetBypass { channel, slot, bypassed })
    }

    pub fn set_slot_solo(&self, channel: usize, slot: usize, soloed: bool) -> Result<()> {
        self.check_slot(&self.model.lock(), channel, slot)?;
        self.send(AudioCommand::SetSlotSolo { channel, slot, soloed })
    }

    /// Processor parameter; stepped at the start of the next block
    pub fn set_processor_param(
        &self,
        channel: usize,
        slot: usize,
        param: u32,
        value: f32,
        frame_offset: u32,
    ) -> Result<()> {
        let value = check_value("processor parameter", value)?;
        self.check_slot(&self.model.lock(), channel, slot)?;
        self.send(AudioCommand::SetProcessorParam {
            channel,
            slot,
            param,
            value,
            frame_offset: self.clamp_offset(frame_offset),
        })
    }

    /// Clear a failed-until-reset mark and the processor's state
    pub fn reset_slot(&self, channel: usize, slot: usize) -> Result<()> {
        self.check_slot(&self.model.lock(), channel, slot)?;
        self.send(AudioCommand::ResetSlot { channel, slot })
    }

    // ---- VCA and monitor -------------------------------------------------

    /// Create or replace (`Some`) or remove (`None`) a VCA group
    pub fn set_vca(&self, id: usize, settings: Option<VcaSettings>) -> Result<()> {
        if id >= MAX_VCA_GROUPS {
            return Err(EngineError::InvalidParameter {
                name: "vca id",
                value: id as f64,
            });
        }
        if let Some(settings) = settings.as_ref() {
            check_value("vca gain", settings.gain)?;
            if let Some(bad) = (0..crate::mixer::ChannelSet::CAPACITY)
                .find(|&c| settings.members.contains(c) && c >= self.config.total_mixer_channels())
            {
                return Err(EngineError::UnknownMixerChannel(bad));
            }
        }
        self.send(AudioCommand::SetVca { id, settings })
    }

    pub fn set_monitor(&self, settings: MonitorSettings) -> Result<()> {
        check_value("dim level", settings.dim_db)?;
        self.send(AudioCommand::SetMonitor(settings))
    }

    /// Capture the master into a reference slot
    pub fn capture_reference(&self, slot: ReferenceSlot) -> Result<()> {
        self.send(AudioCommand::CaptureReference(slot))
    }

    /// Load interleaved stereo reference audio into a slot
    pub fn load_reference(&self, slot: ReferenceSlot, samples: Vec<f32>) -> Result<()> {
        if samples.len() % 2 != 0 {
            return Err(EngineError::InvalidParameter {
                name: "reference length",
                value: samples.len() as f64,
            });
        }
        self.send(AudioCommand::SetReferenceAudio { slot, samples })
    }

    // ---- recording -------------------------------------------------------

    /// Arm the recorder with a buffer sized for the configured minimum
    /// duration. Capture starts once the transport plays (inside the punch
    /// region when punch is enabled).
    pub fn start_recording(&self, settings: RecordSettings) -> Result<()> {
        let channels = match settings.source {
            RecordSource::DeviceInput => self.config.input_channels,
            RecordSource::MixerInput(channel) => {
                self.check_mixer_channel(channel)?;
                2
            }
        };
        let capacity = self.recorder_capacity(channels);
        let take = RecordedTake::with_capacity(settings, channels as u16, self.config.sample_rate, capacity);
        let mut model = self.model.lock();
        self.send(AudioCommand::StartRecording(Box::new(take)))?;
        model.recording = true;
        info!(channels, capacity, "recording armed");
        Ok(())
    }

    /// Stop recording; a second stop is a no-op
    pub fn stop_recording(&self) -> Result<()> {
        let mut model = self.model.lock();
        if !model.recording {
            return Ok(());
        }
        self.send(AudioCommand::StopRecording)?;
        model.recording = false;
        Ok(())
    }

    fn recorder_capacity(&self, channels: usize) -> usize {
        let frames = self.config.seconds_to_frames(self.config.recorder_min_seconds) as usize;
        (frames * channels)
            .max(self.config.max_block_size * channels)
            .next_power_of_two()
    }

    // ---- snapshots -------------------------------------------------------

    /// Store the current fader, pan, mute and solo of every mixer channel
    pub fn capture_snapshot(&self, name: &str) {
        let mut model = self.model.lock();
        let snapshot = MixerSnapshot::capture(name, &model.mixer);
        model.snapshots.store(snapshot);
    }

    /// Move toward a stored snapshot by `amount` (1.0 recalls it fully).
    /// Returns the number of parameter changes sent.
    pub fn recall_snapshot(&self, name: &str, amount: f32) -> Result<usize> {
        let changes = {
            let model = self.model.lock();
            let snapshot = model.snapshots.get(name).ok_or(EngineError::InvalidParameter {
                name: "snapshot",
                value: f64::NAN,
            })?;
            snapshot.morph(&model.mixer, amount)
        };
        for &(channel, param, value) in changes.iter() {
            self.set_mixer_param(channel, param, value, 0)?;
        }
        Ok(changes.len())
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        self.model.lock().snapshots.names().map(str::to_owned).collect()
    }

    pub fn remove_snapshot(&self, name: &str) -> bool {
        self.model.lock().snapshots.remove(name).is_some()
    }

    // ---- read-out --------------------------------------------------------

    pub fn meters(&self) -> Arc<MeterBank> {
        Arc::clone(&self.meters)
    }

    pub fn meter(&self, channel: usize) -> Option<MeterSnapshot> {
        self.meters.snapshot(channel)
    }

    /// Drop retired objects whose grace period has passed. Returns how
    /// many were released.
    pub fn reclaim(&self) -> usize {
        let mut pending = self.reclaim.lock();
        pending.extend(self.retire_rx.try_iter());
        let now = self.block_count();
        let grace = self.config.reclaim_grace_blocks;
        let mut released = 0;
        while let Some((retired_at, _)) = pending.front() {
            if retired_at + grace > now {
                break;
            }
            if let Some((_, item)) = pending.pop_front() {
                item.release();
                released += 1;
            }
        }
        released
    }

    /// Reclaim, answer recorder growth requests and log telemetry. Returns
    /// the drained events for the host.
    pub fn poll(&self) -> Vec<AudioEvent> {
        self.reclaim();
        let events: Vec<AudioEvent> = self.event_rx.try_iter().collect();
        for event in events.iter() {
            self.observe(event);
        }
        events
    }

    fn observe(&self, event: &AudioEvent) {
        match event {
            AudioEvent::TransportUpdate { position, playing, recording } => {
                trace!(position, playing, recording, "transport")
            }
            AudioEvent::RecordingProgress(info) => trace!(frames = info.frames, peak = info.peak, "recording"),
            AudioEvent::ProcessorFault { channel, slot, processor, fault } => {
                warn!(channel, slot, processor, %fault, "effect slot failed; bypassed until reset")
            }
            AudioEvent::GeneratorFault { channel_id, processor, fault } => {
                warn!(channel_id, processor, %fault, "generator failed; silent until reset")
            }
            AudioEvent::EventOverflow { channel_id, dropped } => {
                warn!(channel_id, dropped, "channel event queue overflowed")
            }
            AudioEvent::MasterFault => error!("master output was not finite; block silenced"),
            AudioEvent::BufferOverrun { dropped_frames } => {
                warn!(dropped_frames, "recorder buffer full; samples dropped")
            }
            AudioEvent::RecorderNeedsCapacity { current, requested } => {
                debug!(current, requested, "growing recorder buffer");
                if let Err(e) = self.send(AudioCommand::GrowRecorder(Vec::with_capacity(*requested))) {
                    warn!(error = %e, "could not send recorder buffer");
                }
            }
            AudioEvent::RecordingComplete(take) => {
                self.model.lock().recording = false;
                info!(
                    frames = take.frames(),
                    channels = take.channels,
                    peak = take.peak,
                    "recording complete"
                )
            }
            AudioEvent::PlanApplied { generation } => debug!(generation, "routing plan applied"),
            AudioEvent::RetireOverflow => warn!("retire queue full; object parked on the audio thread"),
            AudioEvent::Rejected(reason) => warn!(reason, "command rejected by audio thread"),
        }
    }

    // ---- validation ------------------------------------------------------

    fn check_mixer_channel(&self, channel: usize) -> Result<()> {
        if channel < self.config.total_mixer_channels() {
            Ok(())
        } else {
            Err(EngineError::UnknownMixerChannel(channel))
        }
    }

    fn check_rack_channel(&self, channel_id: u32) -> Result<()> {
        rack_index(&self.model.lock(), channel_id).map(|_| ())
    }

    fn check_slot(&self, model: &ControlModel, channel: usize, index: usize) -> Result<()> {
        self.check_mixer_channel(channel)?;
        if index < model.slots[channel] {
            Ok(())
        } else {
            Err(EngineError::SlotIndex { channel, index })
        }
    }

    fn clamp_offset(&self, frame_offset: u32) -> u32 {
        frame_offset.min(self.config.max_block_size.saturating_sub(1) as u32)
    }
}

fn rack_index(model: &ControlModel, channel_id: u32) -> Result<usize> {
    model
        .rack
        .iter()
        .position(|&(id, _)| id == channel_id)
        .ok_or(EngineError::UnknownChannel(channel_id))
}

fn check_value(name: &'static str, value: f32) -> Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::InvalidParameter {
            name,
            value: value as f64,
        })
    }
}

fn check_step(index: usize) -> Result<()> {
    if index < MAX_STEPS {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter {
            name: "step index",
            value: index as f64,
        })
    }
}

fn check_region(name: &'static str, start: u64, end: u64, enabled: bool) -> Result<()> {
    if enabled && end <= start {
        return Err(EngineError::InvalidParameter {
            name,
            value: end as f64,
        });
    }
    Ok(())
}

/// Clamp to the range the mixer applies, so the mirror matches
fn clamp_mixer(param: MixerParam, value: f32) -> f32 {
    match param {
        MixerParam::Fader => value.clamp(0.0, crate::mixer::MAX_FADER),
        MixerParam::Pan => value.clamp(-1.0, 1.0),
        _ => value,
    }
}

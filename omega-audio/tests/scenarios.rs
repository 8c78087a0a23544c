//! End-to-end sessions driven through the public control handle.
//!
//! Every test builds an engine, sends commands the way a host would, runs
//! the audio side by hand and checks the rendered buffers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use omega_audio::effects::{Filter, FilterType, Gain};
use omega_audio::mixer::ChannelSet;
use omega_audio::{
    AudioEngine, AudioEvent, EngineConfig, EngineError, EngineState, EventKind, MixerParam, ProcessContext,
    Processor, ProcessorFault, RackChannel, RecordSettings, SendConfig, SidechainConfig, SineGenerator, Step,
    VcaSettings, MASTER,
};

/// Writes the same value to every sample
struct Constant(f32);

impl Processor for Constant {
    fn prepare(&mut self, _: u32, _: usize) {}

    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
        ctx.audio[..ctx.frames * 2].fill(self.0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Constant"
    }
}

/// Passes audio through and records the first sidechain sample it saw
struct SidechainTap(Arc<AtomicU32>);

impl Processor for SidechainTap {
    fn prepare(&mut self, _: u32, _: usize) {}

    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
        let seen = ctx.sidechain.map_or(f32::NAN, |key| key[0]);
        self.0.store(seen.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SidechainTap"
    }
}

/// Outputs 1.0 while a note is held, 0.0 otherwise
#[derive(Default)]
struct NoteGate {
    level: f32,
}

impl Processor for NoteGate {
    fn prepare(&mut self, _: u32, _: usize) {}

    fn process(&mut self, ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
        let audio = &mut ctx.audio[..ctx.frames * 2];
        audio.fill(self.level);
        for event in ctx.events {
            self.level = match event.kind {
                EventKind::NoteOn { .. } => 1.0,
                EventKind::NoteOff { .. } | EventKind::AllNotesOff => 0.0,
                EventKind::Parameter { .. } => continue,
            };
            audio[event.frame as usize * 2..].fill(self.level);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "NoteGate"
    }
}

fn config(mixer_channels: usize, block: usize) -> EngineConfig {
    EngineConfig {
        mixer_channels,
        max_block_size: block,
        ..EngineConfig::default()
    }
}

/// Engine with every fader (master included) at unity
fn unity_engine(config: EngineConfig) -> (AudioEngine, EngineState) {
    let channels = config.total_mixer_channels();
    let (engine, state) = AudioEngine::create(config).unwrap();
    for c in 0..channels {
        engine.set_mixer_param(c, MixerParam::Fader, 1.0, 0).unwrap();
    }
    (engine, state)
}

fn constant(engine: &AudioEngine, id: u32, target: usize, value: f32) {
    let channel = RackChannel::new(id, format!("dc{id}"), Some(Box::new(Constant(value)))).with_target(target);
    engine.add_channel(channel).unwrap();
}

fn render(state: &mut EngineState, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0; frames * 2];
    state.process(&mut out, &[], 2);
    out
}

#[test]
fn test_muted_drone_is_silent() {
    let (engine, mut state) = AudioEngine::create(config(4, 1024)).unwrap();
    let drone = RackChannel::new(1, "drone", Some(Box::new(SineGenerator::drone(440.0, 0.5)))).with_target(1);
    engine.add_channel(drone).unwrap();
    engine.set_mixer_param(1, MixerParam::Mute, 1.0, 0).unwrap();
    engine.play().unwrap();

    let out = render(&mut state, 1024);
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn test_pre_fader_send_ignores_fader() {
    let (engine, mut state) = unity_engine(config(4, 64));
    constant(&engine, 1, 1, 1.0);
    engine.set_mixer_param(1, MixerParam::Fader, 0.0, 0).unwrap();
    engine
        .set_send(1, 0, SendConfig { target: Some(2), level: 1.0, pre_fader: true, enabled: true })
        .unwrap();

    let out = render(&mut state, 64);
    assert!(state.mixer().output(1).unwrap().iter().all(|&s| s == 0.0));
    assert!(out.iter().all(|&s| s == 1.0));
}

#[test]
fn test_routing_cycle_rejected_without_audible_change() {
    let build = || {
        let (engine, state) = unity_engine(config(4, 64));
        constant(&engine, 1, 1, 0.25);
        constant(&engine, 2, 2, 0.5);
        engine.set_route(1, 2).unwrap();
        (engine, state)
    };
    let (engine, mut state) = build();
    let (_twin_engine, mut twin) = build();

    let plan = engine.routing_plan().unwrap();
    assert!(matches!(engine.set_route(2, 1), Err(EngineError::RoutingCycle { .. })));
    assert_eq!(engine.routing_plan().unwrap(), plan);

    for _ in 0..4 {
        assert_eq!(render(&mut state, 64), render(&mut twin, 64));
    }
    assert_eq!(state.mixer().plan(), twin.mixer().plan());
}

#[test]
fn test_punch_recording_is_sample_accurate() {
    const BLOCK: usize = 512;
    let config = EngineConfig {
        input_channels: 1,
        ..config(2, BLOCK)
    };
    let (engine, mut state) = AudioEngine::create(config).unwrap();
    engine.set_punch(96_000, 192_000, true).unwrap();
    engine.locate(48_000).unwrap();
    engine.start_recording(RecordSettings::default()).unwrap();
    engine.play().unwrap();

    // each input sample carries its own timeline position
    let mut out = vec![0.0; BLOCK * 2];
    let mut input = vec![0.0; BLOCK];
    for block in 0..375u64 {
        let start = 48_000 + block * BLOCK as u64;
        for (i, s) in input.iter_mut().enumerate() {
            *s = (start + i as u64) as f32;
        }
        state.process(&mut out, &input, 2);
    }
    engine.stop_recording().unwrap();
    state.process(&mut out, &input, 2);

    let take = engine
        .poll()
        .into_iter()
        .find_map(|e| match e {
            AudioEvent::RecordingComplete(take) => Some(take),
            _ => None,
        })
        .expect("take delivered");
    assert_eq!(take.channels, 1);
    assert_eq!(take.samples.len(), 96_000);
    assert_eq!(take.samples[0], 96_000.0);
    assert_eq!(take.samples[95_999], 191_999.0);
    assert_eq!(take.start_position, Some(96_000));
}

#[test]
fn test_vca_solo_and_gain() {
    let (engine, mut state) = unity_engine(config(4, 64));
    constant(&engine, 1, 1, 1.0);
    constant(&engine, 2, 2, 1.0);
    constant(&engine, 3, 3, 1.0);
    engine.set_mixer_param(2, MixerParam::Fader, 0.5, 0).unwrap();

    let mut members = ChannelSet::new();
    members.insert(1);
    members.insert(2);
    engine
        .set_vca(0, Some(VcaSettings { gain: 0.5, soloed: true, members, ..VcaSettings::default() }))
        .unwrap();

    let out = render(&mut state, 64);
    assert!(state.mixer().output(3).unwrap().iter().all(|&s| s == 0.0));
    assert!(out.iter().all(|&s| s == 0.75));
}

#[test]
fn test_bypassed_slot_is_skipped() {
    let (engine, mut state) = unity_engine(config(2, 64));
    constant(&engine, 1, 1, 1.0);
    engine.add_effect(1, 0, Box::new(Gain::new(0.5)), 1.0).unwrap();
    engine.add_effect(1, 1, Box::new(Gain::new(0.0)), 1.0).unwrap();
    engine.add_effect(1, 2, Box::new(Filter::new(FilterType::LowPass, 1_000.0)), 1.0).unwrap();
    engine.set_bypass(1, 1, true).unwrap();
    render(&mut state, 64);

    let mut expected = vec![1.0; 128];
    let mut gain = Gain::new(0.5);
    let mut filter = Filter::new(FilterType::LowPass, 1_000.0);
    filter.prepare(48_000, 64);
    for processor in [&mut gain as &mut dyn Processor, &mut filter] {
        processor
            .process(ProcessContext { audio: &mut expected, events: &[], sidechain: None, frames: 64 })
            .unwrap();
    }
    assert_eq!(state.mixer().output(1).unwrap(), &expected[..]);
}

#[test]
fn test_transport_monotonic_while_playing() {
    let (engine, mut state) = AudioEngine::create(config(2, 64)).unwrap();
    engine.play().unwrap();
    let mut last = 0;
    for frames in [64, 17, 64, 33, 64] {
        render(&mut state, frames);
        let position = state.transport().position();
        assert_eq!(position, last + frames as u64);
        last = position;
    }
}

#[test]
fn test_send_does_not_touch_other_channels() {
    let (engine, mut state) = unity_engine(config(4, 64));
    constant(&engine, 1, 1, 1.0);
    constant(&engine, 2, 2, 0.5);
    render(&mut state, 64);
    let before = state.mixer().output(2).unwrap().to_vec();

    engine
        .set_send(1, 0, SendConfig { target: Some(3), level: 0.5, pre_fader: false, enabled: true })
        .unwrap();
    render(&mut state, 64);
    assert_eq!(state.mixer().output(2).unwrap(), &before[..]);
    assert!(state.mixer().output(3).unwrap().iter().all(|&s| s == 0.5));
}

#[test]
fn test_sidechain_reads_source_of_same_block() {
    let (engine, mut state) = unity_engine(config(4, 64));
    constant(&engine, 1, 1, 1.0);
    engine.set_mixer_param(1, MixerParam::Fader, 0.5, 0).unwrap();
    let seen = Arc::new(AtomicU32::new(0));
    engine.add_effect(2, 0, Box::new(SidechainTap(Arc::clone(&seen))), 1.0).unwrap();
    engine
        .set_sidechain(2, SidechainConfig { source: Some(1), enabled: true, delayed: false })
        .unwrap();

    render(&mut state, 64);
    assert_eq!(f32::from_bits(seen.load(Ordering::Relaxed)), 0.5);
}

#[test]
fn test_delayed_sidechain_lags_one_block() {
    let (engine, mut state) = unity_engine(config(4, 64));
    constant(&engine, 1, 1, 1.0);
    engine.set_mixer_param(1, MixerParam::Fader, 0.5, 0).unwrap();
    engine.set_route(1, 2).unwrap();
    let seen = Arc::new(AtomicU32::new(0));
    engine.add_effect(2, 0, Box::new(SidechainTap(Arc::clone(&seen))), 1.0).unwrap();

    // a same-block key from 2 into 1 would close a loop
    let feedback = SidechainConfig { source: Some(2), enabled: true, delayed: false };
    assert!(matches!(engine.set_sidechain(1, feedback), Err(EngineError::RoutingCycle { .. })));

    engine
        .set_sidechain(2, SidechainConfig { source: Some(1), enabled: true, delayed: true })
        .unwrap();
    render(&mut state, 64);
    assert_eq!(f32::from_bits(seen.load(Ordering::Relaxed)), 0.0);
    render(&mut state, 64);
    assert_eq!(f32::from_bits(seen.load(Ordering::Relaxed)), 0.5);
}

#[test]
fn test_solo_keeps_path_to_master() {
    let (engine, mut state) = unity_engine(config(4, 64));
    constant(&engine, 1, 1, 1.0);
    constant(&engine, 2, 2, 1.0);
    engine.set_route(1, 3).unwrap();
    engine.set_mixer_param(1, MixerParam::Solo, 1.0, 0).unwrap();

    let out = render(&mut state, 64);
    let mixer = state.mixer();
    assert!(mixer.is_audible(1) && mixer.is_audible(3) && mixer.is_audible(MASTER));
    assert!(!mixer.is_audible(2));
    assert!(out.iter().all(|&s| s == 1.0));
}

#[test]
fn test_dry_wet_zero_is_identity() {
    let (engine, mut state) = unity_engine(config(2, 64));
    constant(&engine, 1, 1, 0.75);
    engine.add_effect(1, 0, Box::new(Gain::new(0.1)), 0.0).unwrap();

    render(&mut state, 64);
    assert!(state.mixer().output(1).unwrap().iter().all(|&s| s == 0.75));
}

#[test]
fn test_stop_twice_yields_one_take() {
    let (engine, mut state) = AudioEngine::create(config(2, 64)).unwrap();
    engine.start_recording(RecordSettings::default()).unwrap();
    engine.play().unwrap();
    let input = vec![0.25; 128];
    let mut out = vec![0.0; 128];
    for _ in 0..4 {
        state.process(&mut out, &input, 2);
    }
    engine.stop_recording().unwrap();
    engine.stop_recording().unwrap();
    for _ in 0..4 {
        state.process(&mut out, &input, 2);
    }

    let takes: Vec<_> = engine
        .poll()
        .into_iter()
        .filter_map(|e| match e {
            AudioEvent::RecordingComplete(take) => Some(take),
            _ => None,
        })
        .collect();
    assert_eq!(takes.len(), 1);
    assert_eq!(takes[0].frames(), 256);
    assert!(!state.is_recording());
}

#[test]
fn test_block_split_is_deterministic() {
    let build = || {
        let (engine, state) = AudioEngine::create(config(2, 64)).unwrap();
        let drone = RackChannel::new(1, "drone", Some(Box::new(SineGenerator::drone(330.0, 0.5)))).with_target(1);
        engine.add_channel(drone).unwrap();
        engine.add_effect(1, 0, Box::new(Filter::new(FilterType::LowPass, 2_000.0)), 0.5).unwrap();
        engine.play().unwrap();
        (engine, state)
    };
    let (_a, mut whole) = build();
    let (_b, mut split) = build();

    let one = render(&mut whole, 256);
    let mut parts = Vec::new();
    for _ in 0..4 {
        parts.extend(render(&mut split, 64));
    }
    assert_eq!(one, parts);
}

/// Step 0 on every fourth step, played from 100000 at 120 BPM and then
/// switched to 140 BPM a block later
fn gated_after_tempo_change() -> (AudioEngine, EngineState) {
    let (engine, mut state) = unity_engine(config(2, 512));
    let gate = RackChannel::new(1, "gate", Some(Box::new(NoteGate::default()))).with_target(1);
    engine.add_channel(gate).unwrap();
    engine.set_channel_step(1, 0, Step::on()).unwrap();
    engine.locate(100_000).unwrap();
    engine.play().unwrap();
    render(&mut state, 512);
    engine.set_tempo(140.0).unwrap();
    render(&mut state, 512);
    (engine, state)
}

fn first_sounding_frame(out: &[f32]) -> Option<usize> {
    out.chunks_exact(2).position(|frame| frame[0] > 0.5)
}

#[test]
fn test_pattern_restarts_on_frame_zero_after_stop() {
    let (engine, mut state) = gated_after_tempo_change();
    engine.stop().unwrap();
    engine.play().unwrap();
    let out = render(&mut state, 512);
    assert_eq!(first_sounding_frame(&out), Some(0));
}

#[test]
fn test_pattern_restarts_on_frame_zero_after_locate() {
    let (engine, mut state) = gated_after_tempo_change();
    engine.locate(0).unwrap();
    let out = render(&mut state, 512);
    assert_eq!(first_sounding_frame(&out), Some(0));
}

#[test]
fn test_pattern_restarts_at_loop_wrap() {
    let (engine, mut state) = gated_after_tempo_change();
    // the playhead sits at 101024
    engine.set_loop(0, 101_124, true).unwrap();
    let out = render(&mut state, 512);
    assert_eq!(first_sounding_frame(&out), Some(100));
}

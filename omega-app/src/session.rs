//! Demo session loaded at start-up
//!
//! A four-on-the-floor kick on insert 1, an offbeat bass on 2 and a drone
//! pad on 3 that ducks under the kick. Bass and pad share a delay bus on 4
//! and a VCA; the pad filter opens over the first eight bars.

use omega_audio::effects::{Delay, Filter, FilterType, SidechainDucker};
use omega_audio::mixer::ChannelSet;
use omega_audio::{
    AudioEngine, AutomationLane, AutomationPoint, AutomationTarget, MixerParam, RackChannel, Result, SendConfig,
    SidechainConfig, SineGenerator, Step, StripParam, VcaSettings,
};

const KICK: usize = 1;
const BASS: usize = 2;
const PAD: usize = 3;
const DELAY_BUS: usize = 4;

pub fn load(engine: &AudioEngine, bpm: f64) -> Result<()> {
    engine.set_tempo(bpm)?;

    engine.add_channel(
        RackChannel::new(1, "Kick", Some(Box::new(SineGenerator::new(0.9).mono())))
            .with_target(KICK)
            .with_root_note(36),
    )?;
    engine.fill_steps(1, 4)?;

    engine.add_channel(
        RackChannel::new(2, "Bass", Some(Box::new(SineGenerator::new(0.5))))
            .with_target(BASS)
            .with_root_note(43)
            .with_color(0xc6_5a_5a),
    )?;
    for index in [2, 6, 10, 14] {
        engine.set_channel_step(2, index, Step::on().with_velocity(90))?;
    }
    engine.set_channel_step(2, 15, Step::on().accented().sliding())?;

    engine.add_channel(
        RackChannel::new(3, "Pad", Some(Box::new(SineGenerator::drone(220.0, 0.25))))
            .with_target(PAD)
            .with_color(0x5a_c6_8a),
    )?;

    engine.set_strip_param(KICK, StripParam::Enabled, 1.0)?;
    engine.set_strip_param(KICK, StripParam::CompEnabled, 1.0)?;

    engine.add_effect(PAD, 0, Box::new(Filter::new(FilterType::LowPass, 400.0)), 1.0)?;
    engine.add_effect(PAD, 1, Box::new(SidechainDucker::new(0.7)), 1.0)?;
    engine.set_sidechain(PAD, SidechainConfig { source: Some(KICK), enabled: true, delayed: false })?;

    engine.add_effect(DELAY_BUS, 0, Box::new(Delay::new(60_000.0 / bpm as f32 * 0.75, 0.45)), 1.0)?;
    let send = SendConfig { target: Some(DELAY_BUS), level: 0.35, pre_fader: false, enabled: true };
    engine.set_send(BASS, 0, send)?;
    engine.set_send(PAD, 0, SendConfig { level: 0.5, ..send })?;

    let mut members = ChannelSet::new();
    members.insert(BASS);
    members.insert(PAD);
    engine.set_vca(0, Some(VcaSettings { gain: 0.8, members, ..VcaSettings::named("Music") }))?;

    engine.set_mixer_param(KICK, MixerParam::Fader, 0.9, 0)?;
    engine.set_mixer_param(BASS, MixerParam::Pan, -0.2, 0)?;
    engine.set_mixer_param(PAD, MixerParam::Pan, 0.2, 0)?;

    // eight bars of 4/4
    let sample_rate = engine.config().sample_rate as f64;
    let eight_bars = (32.0 * 60.0 / bpm * sample_rate) as u64;
    engine.set_automation(AutomationLane::new(
        AutomationTarget::Mixer { channel: PAD, param: MixerParam::Fader },
        vec![
            AutomationPoint { position: 0, value: 0.2 },
            AutomationPoint { position: eight_bars, value: 0.8 },
        ],
    ))?;

    engine.capture_snapshot("intro");
    Ok(())
}

//! Mixer: inserts, buses and master
//!
//! Channel 0 is master. Every block, channels run in routing-plan order:
//! strip, effect chain, pre-fader sends, fader/pan/VCA/mute, post-fader
//! sends, then the result is added to the routing target's input. Sources
//! always run before their destinations, so a destination's input is
//! complete by the time it is processed.

mod channel;
mod monitor;
mod snapshot;
mod vca;

pub use channel::{
    pan_gains, MixerChange, MixerChannel, MixerParam, SendConfig, SidechainConfig, DEFAULT_FADER, MAX_FADER,
    MAX_SENDS,
};
pub use monitor::{Monitor, MonitorSettings, ReferenceSlot};
pub use snapshot::{ChannelState, MixerSnapshot, SnapshotBank};
pub use vca::{ChannelSet, VcaGroups, VcaSettings, MAX_VCA_GAIN, MAX_VCA_GROUPS, VCA_NAME_LEN};

use std::sync::Arc;

use crate::buffer::{is_finite, mix_scaled, pair_mut};
use crate::chain::EffectChain;
use crate::config::EngineConfig;
use crate::engine::{AudioEvent, Telemetry};
use crate::meter::{MeterBank, MeterState};
use crate::routing::{RoutingPlan, MASTER};
use crate::strip::StripParam;

pub struct Mixer {
    channels: Vec<MixerChannel>,
    inputs: Vec<Vec<f32>>,
    outputs: Vec<Vec<f32>>,
    /// Previous block's outputs, for delayed sidechains
    prev_outputs: Vec<Vec<f32>>,
    plan: Box<RoutingPlan>,
    vca: VcaGroups,
    monitor: Monitor,
    meters: Arc<MeterBank>,
    audible: Vec<bool>,
    upstream: Vec<bool>,
    downstream: Vec<bool>,
    gain_l: Vec<f32>,
    gain_r: Vec<f32>,
    monitor_out: Vec<f32>,
}

impl Mixer {
    /// Allocate every channel and buffer. `plan` must cover all channels.
    pub fn new(config: &EngineConfig, meters: Arc<MeterBank>, plan: Box<RoutingPlan>) -> Self {
        let count = config.total_mixer_channels();
        let samples = config.block_samples();
        let hold = config.seconds_to_frames(config.peak_hold_secs);
        let clip = config.seconds_to_frames(config.clip_hold_secs);
        let reference = config.seconds_to_frames(config.reference_seconds) as usize * 2;

        Self {
            channels: (0..count)
                .map(|i| {
                    MixerChannel::new(
                        i,
                        config.sample_rate,
                        config.max_block_size,
                        MeterState::new(hold, clip),
                    )
                })
                .collect(),
            inputs: vec![vec![0.0; samples]; count],
            outputs: vec![vec![0.0; samples]; count],
            prev_outputs: vec![vec![0.0; samples]; count],
            plan,
            vca: VcaGroups::new(count),
            monitor: Monitor::new(config.dim_db, reference),
            meters,
            audible: vec![true; count],
            upstream: vec![false; count],
            downstream: vec![false; count],
            gain_l: vec![0.0; config.max_block_size],
            gain_r: vec![0.0; config.max_block_size],
            monitor_out: vec![0.0; samples],
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel(&self, index: usize) -> Option<&MixerChannel> {
        self.channels.get(index)
    }

    pub fn plan(&self) -> &RoutingPlan {
        &self.plan
    }

    pub fn vca(&self) -> &VcaGroups {
        &self.vca
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Post-fader output of a channel from the last block
    pub fn output(&self, index: usize) -> Option<&[f32]> {
        self.outputs.get(index).map(|b| b.as_slice())
    }

    /// True when solo and VCA-solo leave the channel audible
    pub fn is_audible(&self, index: usize) -> bool {
        self.audible.get(index).copied().unwrap_or(false)
    }

    /// Monitor output of the last block
    pub fn master_out(&self, frames: usize) -> &[f32] {
        &self.monitor_out[..frames * 2]
    }

    /// Insert inputs, filled by the channel rack each block
    pub(crate) fn inputs_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.inputs
    }

    pub(crate) fn chain_mut(&mut self, index: usize) -> Option<&mut EffectChain> {
        self.channels.get_mut(index).map(|c| &mut c.chain)
    }

    pub(crate) fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    pub(crate) fn apply_change(&mut self, change: &MixerChange) -> bool {
        match self.channels.get_mut(change.channel) {
            Some(channel) => {
                channel.apply(change.param, change.value, change.frame_offset);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_strip_param(&mut self, index: usize, param: StripParam, value: f32) -> bool {
        match self.channels.get_mut(index) {
            Some(channel) => {
                channel.strip.set_param(param, value);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_vca(&mut self, id: usize, settings: Option<VcaSettings>) -> bool {
        self.vca.set(id, settings)
    }

    /// Swap in a plan; returns the plan to retire (the old one, or `plan`
    /// itself if it does not fit this mixer)
    fn swap_plan(&mut self, plan: Box<RoutingPlan>) -> Box<RoutingPlan> {
        if plan.order().len() != self.channels.len() {
            return plan;
        }
        std::mem::replace(&mut self.plan, plan)
    }

    pub(crate) fn set_route(&mut self, channel: usize, target: usize, plan: Box<RoutingPlan>) -> Box<RoutingPlan> {
        if channel == MASTER || channel >= self.channels.len() || target >= self.channels.len() {
            return plan;
        }
        self.channels[channel].set_target(target);
        self.swap_plan(plan)
    }

    pub(crate) fn set_send(
        &mut self,
        channel: usize,
        index: usize,
        send: SendConfig,
        plan: Box<RoutingPlan>,
    ) -> Box<RoutingPlan> {
        let valid_target = send.target.map_or(true, |t| t < self.channels.len());
        let applied = valid_target && self.channels.get_mut(channel).map_or(false, |ch| ch.set_send(index, send));
        if applied {
            self.swap_plan(plan)
        } else {
            plan
        }
    }

    pub(crate) fn set_sidechain(
        &mut self,
        channel: usize,
        sidechain: SidechainConfig,
        plan: Box<RoutingPlan>,
    ) -> Box<RoutingPlan> {
        let valid_source = sidechain.source.map_or(true, |s| s < self.channels.len());
        match self.channels.get_mut(channel) {
            Some(ch) if valid_source => {
                ch.set_sidechain(sidechain);
                self.swap_plan(plan)
            }
            _ => plan,
        }
    }

    /// Clear inputs for a new block and rotate the output history
    pub(crate) fn begin_block(&mut self, frames: usize) {
        std::mem::swap(&mut self.outputs, &mut self.prev_outputs);
        for input in self.inputs.iter_mut() {
            input[..frames * 2].fill(0.0);
        }
    }

    /// Rebuild the solo mask from channel solo and VCA solo
    fn update_audible(&mut self) {
        let any_solo = self.channels.iter().any(|c| c.is_soloed());
        let vca_solo = self.vca.any_solo();
        self.audible.fill(true);
        if !any_solo && !vca_solo {
            return;
        }
        let order = self.plan.order();

        if any_solo {
            // Upstream: sinks first, so every edge's far end is known
            self.upstream.fill(false);
            for &c in order.iter().rev() {
                let channel = &self.channels[c];
                let feeds_solo = channel.is_soloed() || outgoing(channel).any(|t| self.upstream[t]);
                self.upstream[c] = feeds_solo;
            }
            propagate_down(order, &self.channels, |c| self.channels[c].is_soloed(), &mut self.downstream);
            for c in 0..self.audible.len() {
                self.audible[c] &= c == MASTER || self.upstream[c] || self.downstream[c];
            }
        }

        if vca_solo {
            let members = *self.vca.solo_members();
            propagate_down(order, &self.channels, |c| members.contains(c), &mut self.downstream);
            for c in 0..self.audible.len() {
                self.audible[c] &= c == MASTER || self.downstream[c];
            }
        }
    }

    /// Run every channel in plan order and the monitor on master.
    ///
    /// When `record_tap` names an armed channel, its input (before the
    /// strip) is copied into `tap` and `true` is returned.
    pub(crate) fn process(
        &mut self,
        frames: usize,
        record_tap: Option<usize>,
        tap: &mut [f32],
        telemetry: &mut Telemetry,
    ) -> bool {
        self.update_audible();
        let samples = frames * 2;
        let mut tapped = false;

        let Self {
            channels,
            inputs,
            outputs,
            prev_outputs,
            plan,
            vca,
            meters,
            audible,
            gain_l,
            gain_r,
            ..
        } = self;

        for &c in plan.order() {
            let channel = &mut channels[c];

            if record_tap == Some(c) && channel.is_armed() {
                tap[..samples].copy_from_slice(&inputs[c][..samples]);
                tapped = true;
            }

            // Strip and chain, with the sidechain source's post-fader signal
            {
                let sc = channel.sidechain();
                let key = match (sc.enabled, sc.source) {
                    (true, Some(src)) if src != c && src < outputs.len() => Some(if sc.delayed {
                        &prev_outputs[src][..samples]
                    } else {
                        &outputs[src][..samples]
                    }),
                    _ => None,
                };
                let buf = &mut inputs[c][..samples];
                channel.strip.process(buf, key);
                channel.chain.process(buf, frames, key, c, telemetry);
            }

            let open = audible[c] && !channel.is_muted() && !vca.is_muted(c);

            if open {
                for send in channel.sends().iter().filter(|s| s.pre_fader && s.is_live()) {
                    match send.target {
                        Some(t) if t != c && t < inputs.len() => {
                            let (src, dst) = pair_mut(inputs, c, t);
                            mix_scaled(&mut dst[..samples], &src[..samples], send.level);
                        }
                        _ => {}
                    }
                }
            }

            channel.render_gains(gain_l, gain_r, frames);
            let vca_gain = if open { vca.gain(c) } else { 0.0 };
            for (i, (out, input)) in outputs[c][..samples]
                .chunks_exact_mut(2)
                .zip(inputs[c][..samples].chunks_exact(2))
                .enumerate()
            {
                out[0] = input[0] * gain_l[i] * vca_gain;
                out[1] = input[1] * gain_r[i] * vca_gain;
            }

            if open {
                for send in channel.sends().iter().filter(|s| !s.pre_fader && s.is_live()) {
                    match send.target {
                        Some(t) if t != c && t < inputs.len() => {
                            mix_scaled(&mut inputs[t][..samples], &outputs[c][..samples], send.level);
                        }
                        _ => {}
                    }
                }
            }

            if let Some(t) = channel.target() {
                if t != c && t < inputs.len() {
                    mix_scaled(&mut inputs[t][..samples], &outputs[c][..samples], 1.0);
                }
            }

            if let Some(meter) = meters.get(c) {
                let strip = &channel.strip;
                let levels = if strip.is_enabled() {
                    (strip.input_level(), strip.output_level())
                } else {
                    (0.0, 0.0)
                };
                channel
                    .meter
                    .update(meter, &outputs[c][..samples], frames, strip.gain_reduction_db(), levels);
            }
        }

        let master = &mut self.outputs[MASTER][..samples];
        if !is_finite(master) {
            master.fill(0.0);
            telemetry.post(AudioEvent::MasterFault);
        }
        self.monitor.process(master, &mut self.monitor_out[..samples]);
        tapped
    }
}

/// Signal edges of a channel: its route and live sends
fn outgoing(channel: &MixerChannel) -> impl Iterator<Item = usize> + '_ {
    channel
        .target()
        .into_iter()
        .chain(channel.sends().iter().filter(|s| s.enabled).filter_map(|s| s.target))
}

/// Mark `seed` channels and everything they feed, in plan order
fn propagate_down(order: &[usize], channels: &[MixerChannel], seed: impl Fn(usize) -> bool, out: &mut [bool]) {
    out.fill(false);
    for &c in order {
        if seed(c) {
            out[c] = true;
        }
        if out[c] {
            for t in outgoing(&channels[c]) {
                if let Some(slot) = out.get_mut(t) {
                    *slot = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::energy;
    use crate::routing::RoutingGraph;

    const FRAMES: usize = 64;

    fn mixer(channels: usize) -> (Mixer, RoutingGraph) {
        let config = EngineConfig {
            mixer_channels: channels,
            max_block_size: FRAMES,
            ..EngineConfig::default()
        };
        let graph = RoutingGraph::new(config.total_mixer_channels());
        let plan = Box::new(graph.plan().unwrap());
        let meters = Arc::new(MeterBank::new(config.total_mixer_channels()));
        let mut mixer = Mixer::new(&config, meters, plan);
        for c in 0..mixer.len() {
            mixer.apply_change(&MixerChange { channel: c, param: MixerParam::Fader, value: 1.0, frame_offset: 0 });
        }
        (mixer, graph)
    }

    fn run(mixer: &mut Mixer, feed: &[(usize, f32)]) {
        let (tx, _rx) = crossbeam_channel::bounded(16);
        let mut telemetry = Telemetry::new(tx);
        mixer.begin_block(FRAMES);
        for &(c, value) in feed {
            mixer.inputs_mut()[c][..FRAMES * 2].fill(value);
        }
        let mut tap = vec![0.0; FRAMES * 2];
        mixer.process(FRAMES, None, &mut tap, &mut telemetry);
    }

    fn out(mixer: &Mixer, c: usize) -> &[f32] {
        &mixer.output(c).unwrap()[..FRAMES * 2]
    }

    #[test]
    fn test_channels_sum_into_master() {
        let (mut mixer, _) = mixer(3);
        run(&mut mixer, &[(1, 0.25), (2, 0.5)]);
        assert!(out(&mixer, MASTER).iter().all(|&s| (s - 0.75).abs() < 1e-6));
        assert!(mixer.master_out(FRAMES).iter().all(|&s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_muted_channel_contributes_nothing() {
        let (mut mixer, _) = mixer(2);
        mixer.apply_change(&MixerChange { channel: 1, param: MixerParam::Mute, value: 1.0, frame_offset: 0 });
        run(&mut mixer, &[(1, 0.5)]);
        assert_eq!(energy(out(&mixer, MASTER)), 0.0);
    }

    #[test]
    fn test_pre_fader_send_ignores_fader() {
        let (mut mixer, mut graph) = mixer(2);
        let send = SendConfig { target: Some(2), level: 1.0, pre_fader: true, enabled: true };
        let plan = graph.set_send(1, 0, send).unwrap();
        let old = mixer.set_send(1, 0, send, Box::new(plan));
        assert_eq!(old.generation(), 0);
        mixer.apply_change(&MixerChange { channel: 1, param: MixerParam::Fader, value: 0.0, frame_offset: 0 });

        run(&mut mixer, &[(1, 1.0)]);
        assert!(out(&mixer, 2).iter().all(|&s| (s - 1.0).abs() < 1e-6));
        assert!(out(&mixer, 1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_post_fader_send_follows_fader() {
        let (mut mixer, mut graph) = mixer(2);
        let send = SendConfig { target: Some(2), level: 0.5, pre_fader: false, enabled: true };
        let plan = graph.set_send(1, 0, send).unwrap();
        mixer.set_send(1, 0, send, Box::new(plan));
        mixer.apply_change(&MixerChange { channel: 1, param: MixerParam::Fader, value: 0.5, frame_offset: 0 });

        run(&mut mixer, &[(1, 1.0)]);
        assert!(out(&mixer, 2).iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_rejected_send_keeps_current_plan() {
        let (mut mixer, mut graph) = mixer(2);
        let send = SendConfig { target: Some(2), level: 0.5, pre_fader: false, enabled: true };
        let plan = Box::new(graph.set_send(1, 0, send).unwrap());
        let generation = plan.generation();

        // out-of-range index and target hand the new plan straight back
        let returned = mixer.set_send(1, MAX_SENDS, send, plan);
        assert_eq!(returned.generation(), generation);
        let bad_target = SendConfig { target: Some(9), ..send };
        let returned = mixer.set_send(1, 0, bad_target, returned);
        assert_eq!(returned.generation(), generation);
        assert_eq!(mixer.plan().generation(), 0);

        let old = mixer.set_send(1, 0, send, returned);
        assert_eq!(old.generation(), 0);
        assert_eq!(mixer.plan().generation(), generation);
    }

    #[test]
    fn test_solo_keeps_bus_and_master() {
        // 1 -> 3 (bus) -> master, 2 -> master
        let (mut mixer, mut graph) = mixer(3);
        let plan = graph.set_route(1, 3).unwrap();
        mixer.set_route(1, 3, Box::new(plan));
        mixer.apply_change(&MixerChange { channel: 1, param: MixerParam::Solo, value: 1.0, frame_offset: 0 });

        run(&mut mixer, &[(1, 0.5), (2, 0.5)]);
        assert!(mixer.is_audible(1));
        assert!(mixer.is_audible(3));
        assert!(!mixer.is_audible(2));
        assert_eq!(energy(out(&mixer, 2)), 0.0);
        assert!(out(&mixer, MASTER).iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_solo_keeps_feeding_channels() {
        // 1 -> 3 (bus, soloed) -> master, 2 -> master
        let (mut mixer, mut graph) = mixer(3);
        let plan = graph.set_route(1, 3).unwrap();
        mixer.set_route(1, 3, Box::new(plan));
        mixer.apply_change(&MixerChange { channel: 3, param: MixerParam::Solo, value: 1.0, frame_offset: 0 });

        run(&mut mixer, &[(1, 0.5), (2, 0.5)]);
        assert!(mixer.is_audible(1));
        assert!(!mixer.is_audible(2));
    }

    #[test]
    fn test_vca_gain_and_solo() {
        let (mut mixer, _) = mixer(3);
        let members: ChannelSet = [1, 2].into_iter().collect();
        mixer.set_vca(0, Some(VcaSettings { gain: 0.5, soloed: true, members, ..Default::default() }));

        run(&mut mixer, &[(1, 1.0), (2, 1.0), (3, 1.0)]);
        assert!(out(&mixer, 1).iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(energy(out(&mixer, 3)), 0.0);
        assert!(out(&mixer, MASTER).iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_rejected_plan_size_is_returned() {
        let (mut mixer, _) = mixer(2);
        let small = Box::new(RoutingGraph::new(2).plan().unwrap());
        let returned = mixer.set_route(1, 2, small);
        assert_eq!(returned.order().len(), 2);
        assert_eq!(mixer.plan().order().len(), 3);
    }

    #[test]
    fn test_master_fault_silences() {
        let (tx, rx) = crossbeam_channel::bounded(16);
        let mut telemetry = Telemetry::new(tx);
        let (mut mixer, _) = mixer(1);
        mixer.begin_block(FRAMES);
        mixer.inputs_mut()[1][0] = f32::INFINITY;
        let mut tap = vec![0.0; FRAMES * 2];
        mixer.process(FRAMES, None, &mut tap, &mut telemetry);
        assert!(mixer.master_out(FRAMES).iter().all(|&s| s == 0.0));
        assert!(matches!(rx.try_recv(), Ok(AudioEvent::MasterFault)));
    }

    #[test]
    fn test_record_tap_needs_arm() {
        let (tx, _rx) = crossbeam_channel::bounded(16);
        let mut telemetry = Telemetry::new(tx);
        let (mut mixer, _) = mixer(1);
        let mut tap = vec![0.0; FRAMES * 2];

        mixer.begin_block(FRAMES);
        assert!(!mixer.process(FRAMES, Some(1), &mut tap, &mut telemetry));

        mixer.apply_change(&MixerChange { channel: 1, param: MixerParam::Armed, value: 1.0, frame_offset: 0 });
        mixer.begin_block(FRAMES);
        mixer.inputs_mut()[1][..FRAMES * 2].fill(0.3);
        assert!(mixer.process(FRAMES, Some(1), &mut tap, &mut telemetry));
        assert!(tap.iter().all(|&s| s == 0.3));
    }
}

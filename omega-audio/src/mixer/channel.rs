//! A single mixer insert or bus

use arrayvec::ArrayVec;

use crate::chain::EffectChain;
use crate::meter::MeterState;
use crate::routing::MASTER;
use crate::strip::ChannelStrip;

/// Sends per mixer channel
pub const MAX_SENDS: usize = 12;
/// Fader ceiling (linear, about +6 dB)
pub const MAX_FADER: f32 = 2.0;
/// Fader position of a fresh channel
pub const DEFAULT_FADER: f32 = 0.8;

/// Pending ramp points per parameter in one block
const MAX_RAMP_POINTS: usize = 16;

/// One send: a tap of the channel scaled into another channel's input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendConfig {
    pub target: Option<usize>,
    /// 0..1
    pub level: f32,
    pub pre_fader: bool,
    pub enabled: bool,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            target: None,
            level: 0.0,
            pre_fader: false,
            enabled: false,
        }
    }
}

impl SendConfig {
    pub(crate) fn clamped(self) -> Self {
        Self {
            level: if self.level.is_finite() { self.level.clamp(0.0, 1.0) } else { 0.0 },
            ..self
        }
    }

    /// True when the send deposits anything
    pub(crate) fn is_live(&self) -> bool {
        self.enabled && self.target.is_some() && self.level > 0.0
    }
}

/// Sidechain input of a channel, by source id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SidechainConfig {
    pub source: Option<usize>,
    pub enabled: bool,
    /// Read the source's previous block instead of this one
    pub delayed: bool,
}

/// Mixer channel field settable through the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerParam {
    Fader,
    Pan,
    Mute,
    Solo,
    Armed,
}

/// A time-stamped mixer parameter change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerChange {
    pub channel: usize,
    pub param: MixerParam,
    pub value: f32,
    pub frame_offset: u32,
}

/// Linear ramp that reaches each queued value exactly at its frame
#[derive(Debug, Clone)]
pub(crate) struct Ramp {
    value: f32,
    points: ArrayVec<(u32, f32), MAX_RAMP_POINTS>,
}

impl Ramp {
    fn new(value: f32) -> Self {
        Self {
            value,
            points: ArrayVec::new(),
        }
    }

    pub(crate) fn value(&self) -> f32 {
        self.value
    }

    /// Queue `target` at `frame`; keeps points ordered by frame
    fn push(&mut self, frame: u32, target: f32) {
        if self.points.is_full() {
            // keep the latest intent
            self.points.pop();
        }
        let at = self.points.partition_point(|&(f, _)| f <= frame);
        self.points.insert(at, (frame, target));
    }

    fn is_static(&self) -> bool {
        self.points.is_empty()
    }

    /// Write one value per frame into `out[..frames]` and consume the points
    fn render(&mut self, out: &mut [f32], frames: usize) {
        let out = &mut out[..frames];
        let mut pos = 0usize;
        let mut start = self.value;
        for &(frame, target) in self.points.iter() {
            let end = (frame as usize).min(frames.saturating_sub(1));
            if end < pos {
                // same frame as the previous point
                if pos > 0 {
                    out[pos - 1] = target;
                }
                start = target;
                continue;
            }
            let len = end + 1 - pos;
            for i in 0..len {
                out[pos + i] = start + (target - start) * (i + 1) as f32 / len as f32;
            }
            pos = end + 1;
            start = target;
        }
        out[pos..].fill(start);
        self.value = start;
        self.points.clear();
    }
}

/// A mixer channel: strip, chain, fader, pan, sends and sidechain tap
pub struct MixerChannel {
    pub(crate) fader: Ramp,
    pub(crate) pan: Ramp,
    muted: bool,
    soloed: bool,
    armed: bool,
    target: Option<usize>,
    sends: [SendConfig; MAX_SENDS],
    sidechain: SidechainConfig,
    pub(crate) strip: ChannelStrip,
    pub(crate) chain: EffectChain,
    pub(crate) meter: MeterState,
}

impl MixerChannel {
    pub(crate) fn new(index: usize, sample_rate: u32, max_block_size: usize, meter: MeterState) -> Self {
        Self {
            fader: Ramp::new(DEFAULT_FADER),
            pan: Ramp::new(0.0),
            muted: false,
            soloed: false,
            armed: false,
            target: (index != MASTER).then_some(MASTER),
            sends: [SendConfig::default(); MAX_SENDS],
            sidechain: SidechainConfig::default(),
            strip: ChannelStrip::new(sample_rate),
            chain: EffectChain::new(max_block_size),
            meter,
        }
    }

    pub fn fader(&self) -> f32 {
        self.fader.value()
    }

    pub fn pan(&self) -> f32 {
        self.pan.value()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Routing target; `None` only for master
    pub fn target(&self) -> Option<usize> {
        self.target
    }

    pub fn sends(&self) -> &[SendConfig; MAX_SENDS] {
        &self.sends
    }

    pub fn sidechain(&self) -> SidechainConfig {
        self.sidechain
    }

    pub fn strip(&self) -> &ChannelStrip {
        &self.strip
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    pub(crate) fn set_target(&mut self, target: usize) {
        self.target = Some(target);
    }

    pub(crate) fn set_send(&mut self, index: usize, send: SendConfig) -> bool {
        match self.sends.get_mut(index) {
            Some(slot) => {
                *slot = send.clamped();
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_sidechain(&mut self, sidechain: SidechainConfig) {
        self.sidechain = sidechain;
    }

    /// Apply a parameter change. Fader and pan ramp to `frame_offset`;
    /// switches take effect for the whole block.
    pub(crate) fn apply(&mut self, param: MixerParam, value: f32, frame_offset: u32) {
        let value = if value.is_finite() { value } else { 0.0 };
        let on = value >= 0.5;
        match param {
            MixerParam::Fader => self.fader.push(frame_offset, value.clamp(0.0, MAX_FADER)),
            MixerParam::Pan => self.pan.push(frame_offset, value.clamp(-1.0, 1.0)),
            MixerParam::Mute => self.muted = on,
            MixerParam::Solo => self.soloed = on,
            MixerParam::Armed => self.armed = on,
        }
    }

    /// Per-frame left and right gains for this block
    pub(crate) fn render_gains(&mut self, left: &mut [f32], right: &mut [f32], frames: usize) {
        if self.fader.is_static() && self.pan.is_static() {
            let (l, r) = pan_gains(self.fader.value(), self.pan.value());
            left[..frames].fill(l);
            right[..frames].fill(r);
            return;
        }
        self.fader.render(left, frames);
        self.pan.render(right, frames);
        for (l, r) in left[..frames].iter_mut().zip(right[..frames].iter_mut()) {
            let (gl, gr) = pan_gains(*l, *r);
            *l = gl;
            *r = gr;
        }
    }
}

/// Linear pan law: the far side is attenuated, the near side stays at unity
#[inline]
pub fn pan_gains(volume: f32, pan: f32) -> (f32, f32) {
    let left = volume * if pan <= 0.0 { 1.0 } else { 1.0 - pan };
    let right = volume * if pan >= 0.0 { 1.0 } else { 1.0 + pan };
    (left, right)
}

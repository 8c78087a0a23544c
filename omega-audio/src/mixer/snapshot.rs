//! Mixer snapshots
//!
//! Control-side scenes of every channel's fader, pan, mute and solo. A
//! recall or morph produces ordinary mixer parameter changes; nothing here
//! runs on the audio thread.

use super::channel::{MixerParam, DEFAULT_FADER};

/// The scene-relevant state of one mixer channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    pub fader: f32,
    pub pan: f32,
    pub muted: bool,
    pub soloed: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            fader: DEFAULT_FADER,
            pan: 0.0,
            muted: false,
            soloed: false,
        }
    }
}

impl ChannelState {
    /// Record a parameter change in the mirror
    pub fn apply(&mut self, param: MixerParam, value: f32) {
        match param {
            MixerParam::Fader => self.fader = value,
            MixerParam::Pan => self.pan = value,
            MixerParam::Mute => self.muted = value >= 0.5,
            MixerParam::Solo => self.soloed = value >= 0.5,
            MixerParam::Armed => {}
        }
    }
}

/// A named mixer scene
#[derive(Debug, Clone, PartialEq)]
pub struct MixerSnapshot {
    pub name: String,
    pub channels: Vec<ChannelState>,
}

impl MixerSnapshot {
    pub fn capture(name: impl Into<String>, channels: &[ChannelState]) -> Self {
        Self {
            name: name.into(),
            channels: channels.to_vec(),
        }
    }

    /// Changes that move `current` toward this snapshot by `amount` (0..=1).
    ///
    /// Fader and pan interpolate; mute and solo switch at the halfway
    /// point. Channels already at the morphed value are skipped.
    pub fn morph(&self, current: &[ChannelState], amount: f32) -> Vec<(usize, MixerParam, f32)> {
        let t = if amount.is_finite() { amount.clamp(0.0, 1.0) } else { 0.0 };
        let mut changes = Vec::new();
        for (channel, (from, to)) in current.iter().zip(self.channels.iter()).enumerate() {
            let fader = from.fader + (to.fader - from.fader) * t;
            let pan = from.pan + (to.pan - from.pan) * t;
            let (muted, soloed) = if t >= 0.5 { (to.muted, to.soloed) } else { (from.muted, from.soloed) };

            if fader != from.fader {
                changes.push((channel, MixerParam::Fader, fader));
            }
            if pan != from.pan {
                changes.push((channel, MixerParam::Pan, pan));
            }
            if muted != from.muted {
                changes.push((channel, MixerParam::Mute, flag(muted)));
            }
            if soloed != from.soloed {
                changes.push((channel, MixerParam::Solo, flag(soloed)));
            }
        }
        changes
    }
}

fn flag(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// Named snapshots; capturing an existing name replaces it
#[derive(Debug, Default)]
pub struct SnapshotBank {
    snapshots: Vec<MixerSnapshot>,
}

impl SnapshotBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, snapshot: MixerSnapshot) {
        match self.snapshots.iter_mut().find(|s| s.name == snapshot.name) {
            Some(existing) => *existing = snapshot,
            None => self.snapshots.push(snapshot),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MixerSnapshot> {
        self.snapshots.iter().find(|s| s.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<MixerSnapshot> {
        let index = self.snapshots.iter().position(|s| s.name == name)?;
        Some(self.snapshots.remove(index))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.snapshots.iter().map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(fader: f32, pan: f32, muted: bool) -> ChannelState {
        ChannelState { fader, pan, muted, soloed: false }
    }

    #[test]
    fn test_full_recall() {
        let current = [state(0.8, 0.0, false), state(1.0, 0.0, false)];
        let scene = MixerSnapshot::capture("verse", &[state(0.8, 0.0, false), state(0.5, -1.0, true)]);
        let changes = scene.morph(&current, 1.0);
        assert_eq!(
            changes,
            vec![
                (1, MixerParam::Fader, 0.5),
                (1, MixerParam::Pan, -1.0),
                (1, MixerParam::Mute, 1.0),
            ]
        );
    }

    #[test]
    fn test_half_morph() {
        let current = [state(0.0, 0.0, false)];
        let scene = MixerSnapshot::capture("drop", &[state(1.0, 0.5, true)]);
        let changes = scene.morph(&current, 0.25);
        assert_eq!(changes, vec![(0, MixerParam::Fader, 0.25), (0, MixerParam::Pan, 0.125)]);
        let changes = scene.morph(&current, 0.5);
        assert!(changes.contains(&(0, MixerParam::Mute, 1.0)));
    }

    #[test]
    fn test_bank_replaces_by_name() {
        let mut bank = SnapshotBank::new();
        bank.store(MixerSnapshot::capture("a", &[state(0.1, 0.0, false)]));
        bank.store(MixerSnapshot::capture("a", &[state(0.9, 0.0, false)]));
        assert_eq!(bank.names().count(), 1);
        assert_eq!(bank.get("a").map(|s| s.channels[0].fader), Some(0.9));
        assert!(bank.remove("a").is_some());
        assert!(bank.get("a").is_none());
    }
}

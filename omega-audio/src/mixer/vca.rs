//! VCA groups
//!
//! A group scales and mutes its members without carrying audio. Per-channel
//! multipliers are recomputed whenever a group changes, so the block loop
//! only does a lookup.

use arrayvec::ArrayString;

use crate::routing::MASTER;

/// Groups available on the mixer
pub const MAX_VCA_GROUPS: usize = 16;
/// Group gain ceiling (linear)
pub const MAX_VCA_GAIN: f32 = 2.0;
/// Longest group name in bytes
pub const VCA_NAME_LEN: usize = 32;

const WORDS: usize = 3;

/// Fixed-size set of mixer channel indices (0..192)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSet([u64; WORDS]);

impl ChannelSet {
    pub const CAPACITY: usize = WORDS * 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a channel; indices beyond capacity are ignored
    pub fn insert(&mut self, channel: usize) -> bool {
        if channel >= Self::CAPACITY {
            return false;
        }
        self.0[channel / 64] |= 1 << (channel % 64);
        true
    }

    pub fn remove(&mut self, channel: usize) {
        if channel < Self::CAPACITY {
            self.0[channel / 64] &= !(1 << (channel % 64));
        }
    }

    pub fn contains(&self, channel: usize) -> bool {
        channel < Self::CAPACITY && self.0[channel / 64] & (1 << (channel % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl FromIterator<usize> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

/// Settings of one VCA group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VcaSettings {
    pub name: ArrayString<VCA_NAME_LEN>,
    pub gain: f32,
    pub muted: bool,
    pub soloed: bool,
    pub members: ChannelSet,
}

impl Default for VcaSettings {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            gain: 1.0,
            muted: false,
            soloed: false,
            members: ChannelSet::new(),
        }
    }
}

impl VcaSettings {
    /// Default settings under `name`, cut to the last whole character that fits
    pub fn named(name: &str) -> Self {
        let mut settings = Self::default();
        for c in name.chars() {
            if settings.name.try_push(c).is_err() {
                break;
            }
        }
        settings
    }
}

/// All groups plus the derived per-channel multipliers
pub struct VcaGroups {
    groups: [Option<VcaSettings>; MAX_VCA_GROUPS],
    gain: Vec<f32>,
    muted: Vec<bool>,
    solo_members: ChannelSet,
    any_solo: bool,
}

impl VcaGroups {
    pub fn new(channels: usize) -> Self {
        Self {
            groups: [None; MAX_VCA_GROUPS],
            gain: vec![1.0; channels],
            muted: vec![false; channels],
            solo_members: ChannelSet::new(),
            any_solo: false,
        }
    }

    pub fn group(&self, id: usize) -> Option<&VcaSettings> {
        self.groups.get(id).and_then(|g| g.as_ref())
    }

    /// Create, replace or (with `None`) remove a group
    pub fn set(&mut self, id: usize, settings: Option<VcaSettings>) -> bool {
        let Some(slot) = self.groups.get_mut(id) else {
            return false;
        };
        *slot = settings.map(|s| VcaSettings {
            gain: if s.gain.is_finite() { s.gain.clamp(0.0, MAX_VCA_GAIN) } else { 1.0 },
            ..s
        });
        self.recompute();
        true
    }

    fn recompute(&mut self) {
        self.gain.fill(1.0);
        self.muted.fill(false);
        self.solo_members = ChannelSet::new();
        self.any_solo = false;

        for group in self.groups.iter().flatten() {
            for channel in 0..self.gain.len() {
                if group.members.contains(channel) {
                    self.gain[channel] *= group.gain;
                    self.muted[channel] |= group.muted;
                    if group.soloed {
                        self.solo_members.insert(channel);
                    }
                }
            }
            self.any_solo |= group.soloed;
        }
    }

    /// Product of member group gains (1.0 when in no group)
    #[inline]
    pub fn gain(&self, channel: usize) -> f32 {
        self.gain.get(channel).copied().unwrap_or(1.0)
    }

    /// Muted by any containing group
    #[inline]
    pub fn is_muted(&self, channel: usize) -> bool {
        channel != MASTER && self.muted.get(channel).copied().unwrap_or(false)
    }

    /// True while any group is soloed
    pub fn any_solo(&self) -> bool {
        self.any_solo
    }

    /// Members of soloed groups
    pub fn solo_members(&self) -> &ChannelSet {
        &self.solo_members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_set() {
        let mut set: ChannelSet = [1, 64, 128].into_iter().collect();
        assert!(set.contains(64));
        assert!(!set.contains(2));
        assert_eq!(set.len(), 3);
        assert!(!set.insert(500));
        set.remove(64);
        assert!(!set.contains(64));
    }

    #[test]
    fn test_gain_product_and_mute() {
        let mut vca = VcaGroups::new(4);
        vca.set(0, Some(VcaSettings { gain: 0.5, members: [1, 2].into_iter().collect(), ..Default::default() }));
        vca.set(1, Some(VcaSettings { gain: 0.5, muted: true, members: [2].into_iter().collect(), ..Default::default() }));

        assert_eq!(vca.gain(1), 0.5);
        assert_eq!(vca.gain(2), 0.25);
        assert_eq!(vca.gain(3), 1.0);
        assert!(!vca.is_muted(1));
        assert!(vca.is_muted(2));

        vca.set(1, None);
        assert!(!vca.is_muted(2));
        assert_eq!(vca.gain(2), 0.5);
    }

    #[test]
    fn test_solo_members() {
        let mut vca = VcaGroups::new(4);
        vca.set(3, Some(VcaSettings { soloed: true, members: [1, 2].into_iter().collect(), ..Default::default() }));
        assert!(vca.any_solo());
        assert!(vca.solo_members().contains(2));
        assert!(!vca.solo_members().contains(3));
        assert!(!vca.set(MAX_VCA_GROUPS, None));
    }

    #[test]
    fn test_name_kept_and_truncated() {
        let mut vca = VcaGroups::new(2);
        vca.set(2, Some(VcaSettings { gain: 0.5, ..VcaSettings::named("Drums") }));
        assert_eq!(vca.group(2).map(|g| g.name.as_str()), Some("Drums"));

        let long = "é".repeat(VCA_NAME_LEN);
        let settings = VcaSettings::named(&long);
        assert_eq!(settings.name.len(), VCA_NAME_LEN);
        assert_eq!(settings.name.chars().count(), VCA_NAME_LEN / 2);
    }

    #[test]
    fn test_gain_clamped() {
        let mut vca = VcaGroups::new(2);
        vca.set(0, Some(VcaSettings { gain: 9.0, members: [1].into_iter().collect(), ..Default::default() }));
        assert_eq!(vca.gain(1), MAX_VCA_GAIN);
    }
}

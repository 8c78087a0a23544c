//! Mixer channel meters
//!
//! Written once per block by the audio thread, read from anywhere. Each
//! field is its own atomic: writers release-store, readers acquire-load, so
//! every field is consistent on its own but a snapshot may mix two blocks.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::buffer::stereo_levels;

/// An `f32` stored as its bit pattern
#[derive(Default)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    #[inline]
    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    #[inline]
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Read-out of one channel's meters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterSnapshot {
    pub peak_l: f32,
    pub peak_r: f32,
    pub rms_l: f32,
    pub rms_r: f32,
    /// Compressor gain reduction (dB, <= 0)
    pub gain_reduction_db: f32,
    pub peak_hold_l: f32,
    pub peak_hold_r: f32,
    /// Latched while a sample reached full scale recently
    pub clipped: bool,
    /// Strip input level (average RMS)
    pub strip_in: f32,
    /// Strip output level (average RMS)
    pub strip_out: f32,
}

/// Atomic meter fields for one mixer channel
#[derive(Default)]
pub struct ChannelMeters {
    peak_l: AtomicF32,
    peak_r: AtomicF32,
    rms_l: AtomicF32,
    rms_r: AtomicF32,
    gain_reduction_db: AtomicF32,
    peak_hold_l: AtomicF32,
    peak_hold_r: AtomicF32,
    clipped: AtomicBool,
    strip_in: AtomicF32,
    strip_out: AtomicF32,
}

impl ChannelMeters {
    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            peak_l: self.peak_l.load(),
            peak_r: self.peak_r.load(),
            rms_l: self.rms_l.load(),
            rms_r: self.rms_r.load(),
            gain_reduction_db: self.gain_reduction_db.load(),
            peak_hold_l: self.peak_hold_l.load(),
            peak_hold_r: self.peak_hold_r.load(),
            clipped: self.clipped.load(Ordering::Acquire),
            strip_in: self.strip_in.load(),
            strip_out: self.strip_out.load(),
        }
    }
}

/// Meters for every mixer channel, shared between threads behind an `Arc`
pub struct MeterBank {
    channels: Vec<ChannelMeters>,
}

impl MeterBank {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: (0..channels).map(|_| ChannelMeters::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, channel: usize) -> Option<&ChannelMeters> {
        self.channels.get(channel)
    }

    pub fn snapshot(&self, channel: usize) -> Option<MeterSnapshot> {
        self.get(channel).map(ChannelMeters::snapshot)
    }
}

/// Audio-side hold and clip timers for one channel
#[derive(Debug, Clone, Copy)]
pub(crate) struct MeterState {
    hold_frames: u64,
    clip_frames: u64,
    hold: [f32; 2],
    hold_left: [u64; 2],
    clip_left: u64,
}

impl MeterState {
    pub(crate) fn new(hold_frames: u64, clip_frames: u64) -> Self {
        Self {
            hold_frames,
            clip_frames,
            hold: [0.0; 2],
            hold_left: [0; 2],
            clip_left: 0,
        }
    }

    /// Measure a post-fader block and publish it
    pub(crate) fn update(
        &mut self,
        meters: &ChannelMeters,
        block: &[f32],
        frames: usize,
        gain_reduction_db: f32,
        strip_levels: (f32, f32),
    ) {
        let levels = stereo_levels(block);
        let frames = frames as u64;

        for (ch, &(peak, _)) in levels.iter().enumerate() {
            if peak >= self.hold[ch] {
                self.hold[ch] = peak;
                self.hold_left[ch] = self.hold_frames;
            } else if self.hold_left[ch] > frames {
                self.hold_left[ch] -= frames;
            } else {
                self.hold[ch] = peak;
                self.hold_left[ch] = 0;
            }
        }

        if levels[0].0 >= 1.0 || levels[1].0 >= 1.0 {
            self.clip_left = self.clip_frames;
        } else {
            self.clip_left = self.clip_left.saturating_sub(frames);
        }

        meters.peak_l.store(levels[0].0);
        meters.peak_r.store(levels[1].0);
        meters.rms_l.store(levels[0].1);
        meters.rms_r.store(levels[1].1);
        meters.gain_reduction_db.store(gain_reduction_db);
        meters.peak_hold_l.store(self.hold[0]);
        meters.peak_hold_r.store(self.hold[1]);
        meters.clipped.store(self.clip_left > 0, Ordering::Release);
        meters.strip_in.store(strip_levels.0);
        meters.strip_out.store(strip_levels.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_published() {
        let bank = MeterBank::new(2);
        let mut state = MeterState::new(100, 100);
        let block = [0.5, -0.25, -0.5, 0.25];
        state.update(bank.get(1).unwrap(), &block, 2, -3.0, (0.1, 0.2));

        let snap = bank.snapshot(1).unwrap();
        assert_eq!(snap.peak_l, 0.5);
        assert_eq!(snap.peak_r, 0.25);
        assert!((snap.rms_l - 0.5).abs() < 1e-6);
        assert_eq!(snap.gain_reduction_db, -3.0);
        assert_eq!(snap.strip_out, 0.2);
        assert!(!snap.clipped);
        assert_eq!(bank.snapshot(0), Some(MeterSnapshot::default()));
        assert!(bank.snapshot(2).is_none());
    }

    #[test]
    fn test_peak_hold_expires() {
        let bank = MeterBank::new(1);
        let meters = bank.get(0).unwrap();
        let mut state = MeterState::new(100, 100);

        state.update(meters, &[0.8, 0.8], 1, 0.0, (0.0, 0.0));
        let quiet = vec![0.1; 128];
        state.update(meters, &quiet, 64, 0.0, (0.0, 0.0));
        assert_eq!(meters.snapshot().peak_hold_l, 0.8);
        state.update(meters, &quiet, 64, 0.0, (0.0, 0.0));
        assert_eq!(meters.snapshot().peak_hold_l, 0.1);
    }

    #[test]
    fn test_clip_latch() {
        let bank = MeterBank::new(1);
        let meters = bank.get(0).unwrap();
        let mut state = MeterState::new(10, 100);

        state.update(meters, &[1.2, 0.0], 1, 0.0, (0.0, 0.0));
        assert!(meters.snapshot().clipped);
        let quiet = vec![0.0; 128];
        state.update(meters, &quiet, 64, 0.0, (0.0, 0.0));
        assert!(meters.snapshot().clipped);
        state.update(meters, &quiet, 64, 0.0, (0.0, 0.0));
        assert!(!meters.snapshot().clipped);
    }
}

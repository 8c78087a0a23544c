//! Monitor section on the master output
//!
//! Source select (master or a stored A/B reference), then mono fold, dim
//! and hard mute. The master itself is metered before any of this.

use crate::buffer::{apply_gain, db_to_linear};

/// Reference capture slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSlot {
    A,
    B,
}

impl ReferenceSlot {
    fn index(self) -> usize {
        match self {
            ReferenceSlot::A => 0,
            ReferenceSlot::B => 1,
        }
    }
}

/// Monitor controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub dim: bool,
    /// Dim level (dB, -60 to 0)
    pub dim_db: f32,
    pub mono: bool,
    /// Play a stored reference instead of the master
    pub reference: Option<ReferenceSlot>,
    pub muted: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            dim: false,
            dim_db: -12.0,
            mono: false,
            reference: None,
            muted: false,
        }
    }
}

/// Looping reference buffer
struct Reference {
    samples: Vec<f32>,
    /// Capture length in samples
    limit: usize,
    read: usize,
}

impl Reference {
    fn with_capacity(samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(samples),
            limit: samples,
            read: 0,
        }
    }

    /// Append up to the capture length without reallocating; false once full
    fn capture(&mut self, block: &[f32]) -> bool {
        let limit = self.limit.min(self.samples.capacity());
        let take = limit.saturating_sub(self.samples.len()).min(block.len());
        self.samples.extend_from_slice(&block[..take]);
        self.samples.len() < limit
    }

    fn play(&mut self, out: &mut [f32]) {
        if self.samples.is_empty() {
            out.fill(0.0);
            return;
        }
        for s in out.iter_mut() {
            if self.read >= self.samples.len() {
                self.read = 0;
            }
            *s = self.samples[self.read];
            self.read += 1;
        }
    }
}

pub struct Monitor {
    settings: MonitorSettings,
    dim_gain: f32,
    references: [Reference; 2],
    capturing: Option<ReferenceSlot>,
}

impl Monitor {
    /// `reference_samples` is the interleaved size of each reference slot
    pub fn new(dim_db: f32, reference_samples: usize) -> Self {
        let mut monitor = Self {
            settings: MonitorSettings::default(),
            dim_gain: 1.0,
            references: [
                Reference::with_capacity(reference_samples),
                Reference::with_capacity(reference_samples),
            ],
            capturing: None,
        };
        monitor.set(MonitorSettings { dim_db, ..MonitorSettings::default() });
        monitor
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    pub fn set(&mut self, settings: MonitorSettings) {
        let dim_db = if settings.dim_db.is_finite() { settings.dim_db.clamp(-60.0, 0.0) } else { -12.0 };
        if settings.reference != self.settings.reference {
            for reference in self.references.iter_mut() {
                reference.read = 0;
            }
        }
        self.settings = MonitorSettings { dim_db, ..settings };
        self.dim_gain = db_to_linear(dim_db);
    }

    /// Start capturing the master into `slot` from the next block
    pub fn capture_reference(&mut self, slot: ReferenceSlot) {
        let reference = &mut self.references[slot.index()];
        reference.samples.clear();
        reference.read = 0;
        self.capturing = Some(slot);
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.is_some()
    }

    /// Captured length of a slot in samples
    pub fn reference_len(&self, slot: ReferenceSlot) -> usize {
        self.references[slot.index()].samples.len()
    }

    /// Swap in externally loaded reference audio; returns the old buffer
    pub fn load_reference(&mut self, slot: ReferenceSlot, samples: Vec<f32>) -> Vec<f32> {
        if self.capturing == Some(slot) {
            self.capturing = None;
        }
        let reference = &mut self.references[slot.index()];
        reference.read = 0;
        std::mem::replace(&mut reference.samples, samples)
    }

    /// Produce the monitor output for one master block
    pub fn process(&mut self, master: &[f32], out: &mut [f32]) {
        if let Some(slot) = self.capturing {
            if !self.references[slot.index()].capture(master) {
                self.capturing = None;
            }
        }

        match self.settings.reference {
            Some(slot) => self.references[slot.index()].play(out),
            None => out.copy_from_slice(master),
        }

        if self.settings.mono {
            for frame in out.chunks_exact_mut(2) {
                let mid = (frame[0] + frame[1]) * 0.5;
                frame[0] = mid;
                frame[1] = mid;
            }
        }
        if self.settings.dim {
            apply_gain(out, self.dim_gain);
        }
        if self.settings.muted {
            out.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_by_default() {
        let mut monitor = Monitor::new(-12.0, 16);
        let master = [0.5, -0.5, 0.25, 0.0];
        let mut out = [0.0; 4];
        monitor.process(&master, &mut out);
        assert_eq!(out, master);
    }

    #[test]
    fn test_dim_mono_mute() {
        let mut monitor = Monitor::new(-12.0, 16);
        monitor.set(MonitorSettings { dim: true, dim_db: -6.0206, mono: true, ..Default::default() });
        let master = [1.0, 0.0];
        let mut out = [0.0; 2];
        monitor.process(&master, &mut out);
        assert!((out[0] - 0.25).abs() < 1e-4);
        assert_eq!(out[0], out[1]);

        monitor.set(MonitorSettings { muted: true, ..Default::default() });
        monitor.process(&master, &mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_reference_capture_and_playback() {
        let mut monitor = Monitor::new(-12.0, 4);
        monitor.capture_reference(ReferenceSlot::A);
        let mut out = [0.0; 4];
        monitor.process(&[0.1, 0.2, 0.3, 0.4], &mut out);
        assert!(!monitor.is_capturing());
        assert_eq!(monitor.reference_len(ReferenceSlot::A), 4);

        monitor.set(MonitorSettings { reference: Some(ReferenceSlot::A), ..Default::default() });
        let mut out = [0.0; 6];
        monitor.process(&[9.0; 6], &mut out);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.1, 0.2]);
    }

    #[test]
    fn test_empty_reference_is_silent() {
        let mut monitor = Monitor::new(-12.0, 4);
        monitor.set(MonitorSettings { reference: Some(ReferenceSlot::B), ..Default::default() });
        let mut out = [1.0; 2];
        monitor.process(&[0.5, 0.5], &mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_load_reference_returns_old() {
        let mut monitor = Monitor::new(-12.0, 4);
        let old = monitor.load_reference(ReferenceSlot::B, vec![0.5, 0.5]);
        assert!(old.is_empty());
        assert_eq!(monitor.reference_len(ReferenceSlot::B), 2);
    }
}

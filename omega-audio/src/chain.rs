//! Effect slot chain
//!
//! Up to ten processors run in series on a mixer channel. Each slot has its
//! own dry/wet, bypass and solo. A slot whose processor faults is marked
//! failed and skipped until it is explicitly reset.

use arrayvec::ArrayVec;

use crate::engine::{AudioEvent, Telemetry};
use crate::processor::{run_processor, Processor};

/// Slots per mixer channel
pub const MAX_SLOTS: usize = 10;

/// One processor in a chain
pub struct EffectSlot {
    processor: Box<dyn Processor>,
    dry_wet: f32,
    bypassed: bool,
    soloed: bool,
    failed: bool,
}

impl EffectSlot {
    /// Fully wet, active slot. The processor must already be prepared.
    pub fn new(processor: Box<dyn Processor>) -> Self {
        Self {
            processor,
            dry_wet: 1.0,
            bypassed: false,
            soloed: false,
            failed: false,
        }
    }

    pub fn with_dry_wet(mut self, dry_wet: f32) -> Self {
        self.set_dry_wet(dry_wet);
        self
    }

    pub fn processor_name(&self) -> &'static str {
        self.processor.name()
    }

    pub fn dry_wet(&self) -> f32 {
        self.dry_wet
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    fn set_dry_wet(&mut self, dry_wet: f32) {
        self.dry_wet = if dry_wet.is_finite() { dry_wet.clamp(0.0, 1.0) } else { 1.0 };
    }

    /// Hand the processor back for release off the audio thread
    pub fn into_processor(self) -> Box<dyn Processor> {
        self.processor
    }
}

/// Serial chain of effect slots
pub struct EffectChain {
    slots: ArrayVec<EffectSlot, MAX_SLOTS>,
    /// Input snapshot for dry/wet mixing
    dry: Vec<f32>,
}

impl EffectChain {
    pub fn new(max_block_size: usize) -> Self {
        Self {
            slots: ArrayVec::new(),
            dry: vec![0.0; max_block_size * 2],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.is_full()
    }

    pub fn slot(&self, index: usize) -> Option<&EffectSlot> {
        self.slots.get(index)
    }

    /// Insert at `index` (clamped to the end); hands the slot back when full
    pub fn insert(&mut self, index: usize, slot: EffectSlot) -> Result<(), EffectSlot> {
        let index = index.min(self.slots.len());
        self.slots.try_insert(index, slot).map_err(|e| e.element())
    }

    pub fn remove(&mut self, index: usize) -> Option<EffectSlot> {
        self.slots.pop_at(index)
    }

    /// Move a slot from one position to another; false if either is out of range
    pub fn move_slot(&mut self, from: usize, to: usize) -> bool {
        let len = self.slots.len();
        if from >= len || to >= len {
            return false;
        }
        if from < to {
            self.slots[from..=to].rotate_left(1);
        } else {
            self.slots[to..=from].rotate_right(1);
        }
        true
    }

    pub fn set_dry_wet(&mut self, index: usize, dry_wet: f32) -> bool {
        self.slots.get_mut(index).map(|s| s.set_dry_wet(dry_wet)).is_some()
    }

    pub fn set_bypass(&mut self, index: usize, bypassed: bool) -> bool {
        self.slots.get_mut(index).map(|s| s.bypassed = bypassed).is_some()
    }

    pub fn set_solo(&mut self, index: usize, soloed: bool) -> bool {
        self.slots.get_mut(index).map(|s| s.soloed = soloed).is_some()
    }

    pub fn set_parameter(&mut self, index: usize, param: u32, value: f32) -> bool {
        self.slots
            .get_mut(index)
            .map(|s| s.processor.set_parameter(param, value))
            .is_some()
    }

    /// Clear the failed mark and the processor state
    pub fn reset_slot(&mut self, index: usize) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        slot.failed = false;
        slot.processor.reset();
        true
    }

    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.processor.reset();
        }
    }

    /// Remove every slot into `out`, in order
    pub(crate) fn drain_into(&mut self, out: &mut impl Extend<EffectSlot>) {
        out.extend(self.slots.drain(..));
    }

    /// Run the chain over `audio` in place.
    ///
    /// `channel` is only used to identify faults in telemetry.
    pub(crate) fn process(
        &mut self,
        audio: &mut [f32],
        frames: usize,
        sidechain: Option<&[f32]>,
        channel: usize,
        telemetry: &mut Telemetry,
    ) {
        let any_solo = self.slots.iter().any(|s| s.soloed);
        let samples = frames * 2;
        let audio = &mut audio[..samples];

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.bypassed || slot.failed || (any_solo && !slot.soloed) {
                continue;
            }

            let wet = slot.dry_wet;
            let keep_dry = wet < 1.0;
            if keep_dry {
                self.dry[..samples].copy_from_slice(audio);
            }

            let result = run_processor(slot.processor.as_mut(), audio, &[], sidechain, frames, false);

            if let Err(fault) = result {
                slot.failed = true;
                if keep_dry {
                    audio.copy_from_slice(&self.dry[..samples]);
                } else {
                    // input is gone; the slot is skipped from the next block on
                    audio.fill(0.0);
                }
                telemetry.post(AudioEvent::ProcessorFault {
                    channel,
                    slot: index,
                    processor: slot.processor.name(),
                    fault,
                });
                continue;
            }

            if keep_dry {
                let dry_gain = 1.0 - wet;
                for (out, dry) in audio.iter_mut().zip(self.dry[..samples].iter()) {
                    *out = *dry * dry_gain + *out * wet;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Gain;
    use crate::processor::{ProcessContext, ProcessorFault};

    struct Broken;

    impl Processor for Broken {
        fn prepare(&mut self, _: u32, _: usize) {}
        fn process(&mut self, _ctx: ProcessContext<'_>) -> Result<(), ProcessorFault> {
            Err(ProcessorFault::Internal("boom"))
        }
        fn name(&self) -> &'static str {
            "Broken"
        }
    }

    fn telemetry() -> (Telemetry, crossbeam_channel::Receiver<AudioEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(16);
        (Telemetry::new(tx), rx)
    }

    fn gain(g: f32) -> EffectSlot {
        EffectSlot::new(Box::new(Gain::new(g)))
    }

    #[test]
    fn test_dry_wet_zero_is_identity() {
        let (mut t, _rx) = telemetry();
        let mut chain = EffectChain::new(64);
        assert!(chain.insert(0, gain(0.25).with_dry_wet(0.0)).is_ok());
        let input: Vec<f32> = (0..128).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut audio = input.clone();
        chain.process(&mut audio, 64, None, 1, &mut t);
        assert_eq!(audio, input);
    }

    #[test]
    fn test_dry_wet_half_mixes() {
        let (mut t, _rx) = telemetry();
        let mut chain = EffectChain::new(8);
        assert!(chain.insert(0, gain(0.0).with_dry_wet(0.5)).is_ok());
        let mut audio = vec![1.0; 16];
        chain.process(&mut audio, 8, None, 1, &mut t);
        assert!(audio.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_bypass_skips_processor() {
        let (mut t, _rx) = telemetry();
        let mut chain = EffectChain::new(8);
        assert!(chain.insert(0, gain(2.0)).is_ok());
        assert!(chain.insert(1, gain(0.0)).is_ok());
        assert!(chain.insert(2, gain(3.0)).is_ok());
        chain.set_bypass(1, true);

        let mut audio = vec![1.0; 16];
        chain.process(&mut audio, 8, None, 1, &mut t);
        assert!(audio.iter().all(|&s| (s - 6.0).abs() < 1e-6));
    }

    #[test]
    fn test_solo_skips_others() {
        let (mut t, _rx) = telemetry();
        let mut chain = EffectChain::new(8);
        assert!(chain.insert(0, gain(2.0)).is_ok());
        assert!(chain.insert(1, gain(3.0)).is_ok());
        chain.set_solo(1, true);

        let mut audio = vec![1.0; 16];
        chain.process(&mut audio, 8, None, 1, &mut t);
        assert!(audio.iter().all(|&s| (s - 3.0).abs() < 1e-6));
    }

    #[test]
    fn test_fault_marks_slot_until_reset() {
        let (mut t, rx) = telemetry();
        let mut chain = EffectChain::new(8);
        assert!(chain.insert(0, EffectSlot::new(Box::new(Broken)).with_dry_wet(0.5)).is_ok());
        assert!(chain.insert(1, gain(2.0)).is_ok());

        let mut audio = vec![1.0; 16];
        chain.process(&mut audio, 8, None, 3, &mut t);
        // Failed slot restores its input; the rest of the chain still runs
        assert!(audio.iter().all(|&s| (s - 2.0).abs() < 1e-6));
        assert!(chain.slot(0).map_or(false, |s| s.has_failed()));
        assert!(matches!(
            rx.try_recv(),
            Ok(AudioEvent::ProcessorFault { channel: 3, slot: 0, processor: "Broken", .. })
        ));

        let mut audio = vec![1.0; 16];
        chain.process(&mut audio, 8, None, 3, &mut t);
        assert!(rx.try_recv().is_err());

        assert!(chain.reset_slot(0));
        assert!(!chain.slot(0).map_or(true, |s| s.has_failed()));
    }

    #[test]
    fn test_insert_move_remove() {
        let mut chain = EffectChain::new(8);
        for i in 0..MAX_SLOTS {
            assert!(chain.insert(i, gain(i as f32)).is_ok());
        }
        assert!(chain.is_full());
        assert!(chain.insert(0, gain(1.0)).is_err());

        assert!(chain.move_slot(0, 3));
        assert!(chain.set_parameter(3, Gain::PARAM_GAIN, 0.5));
        assert!(!chain.move_slot(0, MAX_SLOTS));
        assert!(chain.remove(3).is_some());
        assert!(chain.remove(MAX_SLOTS).is_none());
        assert_eq!(chain.len(), MAX_SLOTS - 1);
    }
}

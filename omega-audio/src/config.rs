//! Engine configuration
//!
//! Everything here is fixed for the lifetime of an engine: buffer sizes,
//! queue capacities and the timing constants used by meters and the
//! recorder are all derived from it once at start.

use crate::error::{EngineError, Result};

/// Lowest supported device sample rate (Hz)
pub const MIN_SAMPLE_RATE: u32 = 22_050;
/// Highest supported device sample rate (Hz)
pub const MAX_SAMPLE_RATE: u32 = 192_000;
/// Smallest internal block (frames)
pub const MIN_BLOCK_SIZE: usize = 32;
/// Largest internal block (frames)
pub const MAX_BLOCK_SIZE: usize = 8192;
/// Insert channels available on the mixer, master excluded
pub const MAX_MIXER_CHANNELS: usize = 128;

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Device sample rate in Hz
    pub sample_rate: u32,
    /// Largest block processed in one pass; longer callbacks are split
    pub max_block_size: usize,
    /// Number of insert channels (master is added on top)
    pub mixer_channels: usize,
    /// Channel rack capacity
    pub rack_channels: usize,
    /// Control -> audio queue capacity
    pub command_capacity: usize,
    /// Audio -> control queue capacity
    pub event_capacity: usize,
    /// Per-channel scheduled event capacity for one block
    pub max_events_per_block: usize,
    /// Initial recorder size in seconds
    pub recorder_min_seconds: f32,
    /// Fill fraction at which the recorder asks for more room
    pub recorder_watermark: f32,
    /// Interleaved channels captured from the device input
    pub input_channels: usize,
    /// Velocity added by an accented step
    pub accent_amount: u8,
    /// Pattern steps per quarter note
    pub steps_per_beat: u32,
    /// Monitor dim level (dB)
    pub dim_db: f32,
    /// Length of each monitor reference capture (seconds)
    pub reference_seconds: f32,
    /// Meter peak hold time (seconds)
    pub peak_hold_secs: f32,
    /// Meter clip indicator latch time (seconds)
    pub clip_hold_secs: f32,
    /// Blocks a retired object waits before it is dropped
    pub reclaim_grace_blocks: u64,
    /// Blocks between transport telemetry updates
    pub telemetry_interval_blocks: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            max_block_size: 1024,
            mixer_channels: MAX_MIXER_CHANNELS,
            rack_channels: 64,
            // Same headroom the command channels have always had
            command_capacity: 1024,
            event_capacity: 1024,
            max_events_per_block: 256,
            recorder_min_seconds: 60.0,
            recorder_watermark: 0.75,
            input_channels: 2,
            accent_amount: 20,
            steps_per_beat: 4,
            dim_db: -12.0,
            reference_seconds: 4.0,
            peak_hold_secs: 2.0,
            clip_hold_secs: 3.0,
            reclaim_grace_blocks: 2,
            telemetry_interval_blocks: 16,
        }
    }
}

impl EngineConfig {
    /// Config for a given sample rate and block size, other fields default
    pub fn new(sample_rate: u32, max_block_size: usize) -> Self {
        Self {
            sample_rate,
            max_block_size,
            ..Self::default()
        }
    }

    /// Check every field against its supported range
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(EngineError::InvalidConfig(format!(
                "sample rate {} outside {}..={}",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.max_block_size) {
            return Err(EngineError::InvalidConfig(format!(
                "block size {} outside {}..={}",
                self.max_block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }
        if self.mixer_channels == 0 || self.mixer_channels > MAX_MIXER_CHANNELS {
            return Err(EngineError::InvalidConfig(format!(
                "mixer channels {} outside 1..={}",
                self.mixer_channels, MAX_MIXER_CHANNELS
            )));
        }
        if self.command_capacity == 0 || self.event_capacity == 0 {
            return Err(EngineError::InvalidConfig("queue capacity must be non-zero".into()));
        }
        if self.input_channels == 0 || self.input_channels > 2 {
            return Err(EngineError::InvalidConfig(format!(
                "input channels {} outside 1..=2",
                self.input_channels
            )));
        }
        if !(self.recorder_watermark > 0.0 && self.recorder_watermark < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "recorder watermark {} outside (0, 1)",
                self.recorder_watermark
            )));
        }
        if !(self.recorder_min_seconds > 0.0) || !(self.reference_seconds >= 0.0) {
            return Err(EngineError::InvalidConfig("durations must be positive".into()));
        }
        if self.steps_per_beat == 0 {
            return Err(EngineError::InvalidConfig("steps per beat must be non-zero".into()));
        }
        Ok(())
    }

    /// Total mixer channels including master
    pub fn total_mixer_channels(&self) -> usize {
        self.mixer_channels + 1
    }

    /// Interleaved stereo samples in one full block
    pub fn block_samples(&self) -> usize {
        self.max_block_size * 2
    }

    /// Initial recorder allocation in interleaved samples, rounded up to a power of two
    pub fn recorder_initial_samples(&self) -> usize {
        let samples =
            (self.recorder_min_seconds as f64 * self.sample_rate as f64) as usize * self.input_channels;
        samples.max(self.block_samples()).next_power_of_two()
    }

    pub(crate) fn seconds_to_frames(&self, secs: f32) -> u64 {
        (secs.max(0.0) as f64 * self.sample_rate as f64) as u64
    }
}

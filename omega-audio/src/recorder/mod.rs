//! Recorder
//!
//! The control side allocates a take (with its sample buffer) and hands it
//! to the audio thread. The audio thread appends captured frames within the
//! buffer's capacity, asks for a bigger buffer when the watermark is passed,
//! and drops samples rather than allocate when the buffer is full. On stop
//! the same take travels back to the control side.

mod export;

pub use export::{normalize, normalize_gain, write_take, RecordError, NORMALIZE_TARGET_DB};

use std::path::PathBuf;

use crate::engine::{AudioEvent, Telemetry};
use crate::transport::{Transport, TransportBlock};

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    Wav16,
    #[default]
    Wav24,
    Wav32Float,
    Flac,
}

impl RecordFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RecordFormat::Flac => "flac",
            _ => "wav",
        }
    }

    /// Parse a config value (`wav`, `wav16`, `wav24`, `wav32`, `flac`)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wav" | "wav24" => Some(RecordFormat::Wav24),
            "wav16" => Some(RecordFormat::Wav16),
            "wav32" | "float" => Some(RecordFormat::Wav32Float),
            "flac" => Some(RecordFormat::Flac),
            _ => None,
        }
    }
}

/// Where the recorder takes its signal from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordSource {
    /// The device input, at the configured input channel count
    #[default]
    DeviceInput,
    /// A mixer channel's input before its strip; the channel must be armed
    MixerInput(usize),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSettings {
    pub source: RecordSource,
    /// Peak-normalize to [`NORMALIZE_TARGET_DB`] when written
    pub normalize: bool,
    pub format: RecordFormat,
    /// Destination file; the host picks one when unset
    pub path: Option<PathBuf>,
}

/// A recording session's audio and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTake {
    /// Interleaved samples, `channels` per frame
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Absolute peak of everything captured
    pub peak: f32,
    /// Transport position of the first captured frame
    pub start_position: Option<u64>,
    pub settings: RecordSettings,
}

impl RecordedTake {
    /// An empty take able to hold `capacity` samples without reallocating
    pub fn with_capacity(settings: RecordSettings, channels: u16, sample_rate: u32, capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            channels: channels.max(1),
            sample_rate,
            peak: 0.0,
            start_position: None,
            settings,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Progress report of an active recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingInfo {
    pub frames: u64,
    pub capacity_frames: u64,
    pub peak: f32,
    pub start_position: Option<u64>,
}

/// Audio-thread side of recording
pub(crate) struct Recorder {
    take: Option<Box<RecordedTake>>,
    /// Finished take waiting for room on the event queue
    pending: Option<Box<RecordedTake>>,
    watermark: f32,
    grow_requested: bool,
    overrun_reported: bool,
}

impl Recorder {
    pub(crate) fn new(watermark: f32) -> Self {
        Self {
            take: None,
            pending: None,
            watermark,
            grow_requested: false,
            overrun_reported: false,
        }
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.take.is_some()
    }

    pub(crate) fn source(&self) -> Option<RecordSource> {
        self.take.as_ref().map(|t| t.settings.source)
    }

    /// Begin a session with a preallocated take. Hands the take back if a
    /// session is already running.
    pub(crate) fn start(&mut self, mut take: Box<RecordedTake>) -> Result<(), Box<RecordedTake>> {
        if self.take.is_some() {
            return Err(take);
        }
        take.samples.clear();
        take.peak = 0.0;
        take.start_position = None;
        self.take = Some(take);
        self.grow_requested = false;
        self.overrun_reported = false;
        Ok(())
    }

    /// Move captured audio into a larger buffer. Returns the buffer to
    /// retire: the old one, or `buffer` itself if it is no larger.
    pub(crate) fn grow(&mut self, mut buffer: Vec<f32>) -> Vec<f32> {
        let Some(take) = self.take.as_mut() else {
            return buffer;
        };
        if buffer.capacity() <= take.samples.capacity() {
            return buffer;
        }
        buffer.clear();
        buffer.extend_from_slice(&take.samples);
        self.grow_requested = false;
        self.overrun_reported = false;
        std::mem::replace(&mut take.samples, buffer)
    }

    /// Append the frames of `data` (interleaved, `channels` wide) that the
    /// transport marks as recordable
    pub(crate) fn capture(
        &mut self,
        transport: &Transport,
        block: &TransportBlock,
        data: &[f32],
        channels: usize,
        telemetry: &mut Telemetry,
    ) {
        let Some(take) = self.take.as_mut() else {
            return;
        };
        if !block.recording || channels != take.channels as usize {
            return;
        }

        let mut dropped = 0usize;
        for span in block.spans.iter() {
            let Some((offset, frames)) = transport.punch_overlap(span) else {
                continue;
            };
            let start = (span.offset + offset) * channels;
            let end = (start + frames * channels).min(data.len());
            if start >= end {
                continue;
            }
            let chunk = &data[start..end];

            if take.start_position.is_none() {
                take.start_position = Some(span.position + offset as u64);
            }
            let room = take.samples.capacity() - take.samples.len();
            let keep = chunk.len().min(room) / channels * channels;
            take.samples.extend_from_slice(&chunk[..keep]);
            take.peak = chunk[..keep].iter().fold(take.peak, |p, s| p.max(s.abs()));
            dropped += chunk.len() - keep;
        }

        let capacity = take.samples.capacity();
        let used = take.samples.len();
        if dropped > 0 && !self.overrun_reported {
            self.overrun_reported = telemetry.post(AudioEvent::BufferOverrun {
                dropped_frames: (dropped / channels) as u64,
            });
        }
        if !self.grow_requested && used as f32 >= capacity as f32 * self.watermark {
            self.grow_requested = telemetry.post(AudioEvent::RecorderNeedsCapacity {
                current: capacity,
                requested: (capacity.max(1) * 2).next_power_of_two(),
            });
        }
    }

    /// End the session. A second stop is a no-op and returns false.
    pub(crate) fn stop(&mut self) -> bool {
        match self.take.take() {
            Some(take) => {
                self.pending = Some(take);
                true
            }
            None => false,
        }
    }

    /// Hand a finished take to the control side; retried each block until
    /// the event queue has room
    pub(crate) fn flush(&mut self, telemetry: &mut Telemetry) {
        if let Some(take) = self.pending.take() {
            if let Err(AudioEvent::RecordingComplete(take)) = telemetry.try_post(AudioEvent::RecordingComplete(take)) {
                self.pending = Some(take);
            }
        }
    }

    pub(crate) fn info(&self) -> Option<RecordingInfo> {
        let take = self.take.as_ref()?;
        let channels = take.channels.max(1) as u64;
        Some(RecordingInfo {
            frames: take.samples.len() as u64 / channels,
            capacity_frames: take.samples.capacity() as u64 / channels,
            peak: take.peak,
            start_position: take.start_position,
        })
    }
}

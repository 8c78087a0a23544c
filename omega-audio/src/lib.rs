//! Audio engine for Omega - channel rack, mixer, routing and recording
//!
//! This module provides the real-time processing core:
//! - Transport and Scheduler: timeline, loop/punch, step and automation events
//! - Channel rack: step-sequenced generator channels feeding mixer inserts
//! - Mixer: channel strips, effect chains, sends, sidechains, VCA, monitor
//! - Routing: cycle-checked processing plans built on the control side
//! - Recorder: punch-aware capture with a grow-on-watermark buffer
//!
//! [`AudioEngine`] is the control-side handle; [`EngineState`] is owned by
//! the audio callback. They only talk through bounded queues.

mod buffer;
mod chain;
mod config;
mod control;
pub mod effects;
mod engine;
mod error;
mod generator;
mod meter;
pub mod mixer;
mod processor;
mod rack;
pub mod recorder;
mod routing;
mod scheduler;
pub mod strip;
mod transport;

pub use buffer::{db_to_linear, energy, linear_to_db, STEREO};
pub use chain::{EffectChain, EffectSlot, MAX_SLOTS};
pub use config::{EngineConfig, MAX_BLOCK_SIZE, MAX_MIXER_CHANNELS, MAX_SAMPLE_RATE, MIN_BLOCK_SIZE, MIN_SAMPLE_RATE};
pub use control::AudioEngine;
pub use engine::{AudioCommand, AudioEvent, EngineState, Retired, RetiredEntry, Telemetry};
pub use error::{EngineError, Result};
pub use generator::SineGenerator;
pub use meter::{ChannelMeters, MeterBank, MeterSnapshot};
pub use mixer::{Mixer, MixerParam, MonitorSettings, ReferenceSlot, SendConfig, SidechainConfig, VcaSettings};
pub use processor::{sort_events, ChannelLayout, Event, EventKind, ProcessContext, Processor, ProcessorFault};
pub use rack::{ChannelRack, Pattern, RackChannel, RackField, Step, MAX_STEPS};
pub use recorder::{RecordFormat, RecordSettings, RecordSource, RecordedTake, RecordingInfo};
pub use routing::{RoutingGraph, RoutingPlan, MASTER};
pub use scheduler::{AutomationLane, AutomationPoint, AutomationTarget, Scheduler};
pub use strip::{ChannelStrip, StripParam};
pub use transport::{Region, Span, Transport, TransportBlock, TransportCommand};

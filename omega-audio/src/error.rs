//! Error types for the engine control surface

use thiserror::Error;

/// Errors surfaced to control threads.
///
/// The audio thread never produces these; it reports trouble through
/// [`AudioEvent`](crate::AudioEvent) telemetry instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid tempo: {0} BPM")]
    InvalidTempo(f64),

    #[error("invalid value {value} for {name}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("routing cycle through edge {from} -> {to}")]
    RoutingCycle { from: usize, to: usize },

    #[error("unknown rack channel {0}")]
    UnknownChannel(u32),

    #[error("unknown mixer channel {0}")]
    UnknownMixerChannel(usize),

    #[error("no effect slot {index} on mixer channel {channel}")]
    SlotIndex { channel: usize, index: usize },

    #[error("effect chain on mixer channel {0} is full")]
    ChainFull(usize),

    #[error("channel rack is full")]
    RackFull,

    #[error("parameter bus is full")]
    QueueFull,

    #[error("audio device lost: {0}")]
    DeviceLost(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("audio thread disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, EngineError>;

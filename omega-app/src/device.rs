//! cpal device streams driving the engine
//!
//! The output callback is the engine's clock: it pulls captured input from
//! an SPSC ring filled by the input callback and runs one `process` call
//! per device buffer. The engine state sits behind a mutex only so the
//! control loop can keep it across device re-acquisition; the callback
//! never waits on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use omega_audio::{EngineConfig, EngineError, EngineState};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use tracing::{error, info, warn};

/// Largest device buffer the callback handles input for (frames)
const MAX_CALLBACK_FRAMES: usize = 16_384;

/// Sample rate of the default output device
pub fn default_sample_rate() -> anyhow::Result<u32> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(no_output)?;
    Ok(device.default_output_config()?.sample_rate().0)
}

fn no_output() -> EngineError {
    EngineError::DeviceLost("no audio output device found".into())
}

/// Live device streams; dropping them stops the callbacks
pub struct DeviceStreams {
    _output: Stream,
    _input: Option<Stream>,
}

/// Open the default output (and input, when available) at the engine's
/// sample rate. `lost` is raised when the device disappears.
pub fn open(state: Arc<Mutex<EngineState>>, config: &EngineConfig, lost: Arc<AtomicBool>) -> anyhow::Result<DeviceStreams> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(no_output)?;
    let default = device.default_output_config().context("querying output config")?;
    let channels = default.channels() as usize;
    let stream_config = StreamConfig {
        channels: default.channels(),
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let in_channels = config.input_channels;
    let ring = HeapRb::<f32>::new(MAX_CALLBACK_FRAMES * in_channels * 2);
    let (producer, mut consumer) = ring.split();

    let input = host.default_input_device().and_then(|device| match open_input(&device, config, producer) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "input unavailable; device input records as silence");
            None
        }
    });

    let mut scratch = vec![0.0f32; MAX_CALLBACK_FRAMES * in_channels];
    let output = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                let wanted = (frames * in_channels).min(scratch.len());
                let got = consumer.pop_slice(&mut scratch[..wanted]);
                match state.try_lock() {
                    Some(mut engine) => engine.process(data, &scratch[..got], channels),
                    // held by the control loop while it swaps devices
                    None => data.fill(0.0),
                }
            },
            move |err| {
                error!(error = %err, "output stream error");
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    lost.store(true, Ordering::Release);
                }
            },
            None,
        )
        .context("building output stream")?;
    output.play().context("starting output stream")?;

    info!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate,
        channels,
        input = input.is_some(),
        "audio device opened"
    );
    Ok(DeviceStreams {
        _output: output,
        _input: input,
    })
}

fn open_input(device: &cpal::Device, config: &EngineConfig, mut producer: HeapProd<f32>) -> anyhow::Result<Stream> {
    let input_config = StreamConfig {
        channels: config.input_channels as u16,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let stream = device.build_input_stream(
        &input_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // overflow drops the newest input
            producer.push_slice(data);
        },
        |err| warn!(error = %err, "input stream error"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

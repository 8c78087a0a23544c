//! Omega - headless pattern sequencer host
//!
//! Opens the default audio device, loads the demo session and runs the
//! control loop: telemetry, deferred deletes, recorder growth and handing
//! finished takes to the writer thread.

mod config;
mod device;
mod session;
mod writer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use omega_audio::{
    AudioEngine, AudioEvent, EngineState, MixerParam, RecordSettings, RecordSource, RecordedTake, MASTER,
};

use config::AppConfig;
use device::DeviceStreams;
use writer::TakeWriter;

/// Control loop period
const TICK: Duration = Duration::from_millis(10);
/// Wait between attempts to re-open a lost device
const REOPEN_INTERVAL: Duration = Duration::from_secs(1);
/// How long shutdown waits for the last take
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load();
    let device_rate = match config.sample_rate {
        Some(rate) => rate,
        None => device::default_sample_rate().unwrap_or_else(|e| {
            warn!(error = %e, "no default device rate; using 48 kHz");
            48_000
        }),
    };

    let (engine, state) = AudioEngine::create(config.engine_config(device_rate)).context("creating engine")?;
    let state = Arc::new(Mutex::new(state));
    session::load(&engine, config.bpm).context("loading session")?;

    let writer = TakeWriter::spawn(config.record_dir.clone()).context("starting writer thread")?;
    let lost = Arc::new(AtomicBool::new(false));
    let streams = device::open(Arc::clone(&state), engine.config(), Arc::clone(&lost))?;

    engine.play()?;
    if config.record {
        // bounce the master bus, before its strip
        engine.set_mixer_param(MASTER, MixerParam::Armed, 1.0, 0)?;
        engine.start_recording(RecordSettings {
            source: RecordSource::MixerInput(MASTER),
            format: config.record_format,
            ..RecordSettings::default()
        })?;
    }

    let mut pending = VecDeque::new();
    let streams = run(&engine, &state, &writer, &mut pending, &lost, Some(streams), &config);

    engine.stop()?;
    if config.record {
        engine.stop_recording()?;
    }
    drain(&engine, &writer, &mut pending, config.record);
    for take in pending {
        error!(frames = take.frames(), "take could not be written");
    }
    engine.shutdown();
    drop(streams);

    let written = writer.finish();
    info!(takes = written, blocks = engine.block_count(), "shut down");
    Ok(())
}

/// Control loop; returns the open streams once the configured run time
/// has elapsed or shutdown was requested
fn run(
    engine: &AudioEngine,
    state: &Arc<Mutex<EngineState>>,
    writer: &TakeWriter,
    pending: &mut VecDeque<Box<RecordedTake>>,
    lost: &Arc<AtomicBool>,
    mut streams: Option<DeviceStreams>,
    config: &AppConfig,
) -> Option<DeviceStreams> {
    let started = Instant::now();
    let deadline = config.run_seconds.map(|secs| started + Duration::from_secs_f64(secs));
    let mut last_attempt = started;

    while !engine.is_shutdown() && deadline.map_or(true, |d| Instant::now() < d) {
        collect(engine, pending);
        hand_off(writer, pending);

        if lost.swap(false, Ordering::AcqRel) {
            warn!("audio device lost; engine suspended");
            streams = None;
            last_attempt = Instant::now();
        }
        if streams.is_none() && last_attempt.elapsed() >= REOPEN_INTERVAL {
            last_attempt = Instant::now();
            // the transport keeps its position while no callback runs
            match device::open(Arc::clone(state), engine.config(), Arc::clone(lost)) {
                Ok(s) => {
                    info!(position = state.lock().transport().position(), "audio device re-acquired");
                    streams = Some(s);
                }
                Err(e) => warn!(error = %e, "audio device still unavailable"),
            }
        }

        thread::sleep(TICK);
    }
    streams
}

/// Queue finished takes from telemetry
fn collect(engine: &AudioEngine, pending: &mut VecDeque<Box<RecordedTake>>) -> usize {
    let before = pending.len();
    for event in engine.poll() {
        if let AudioEvent::RecordingComplete(take) = event {
            pending.push_back(take);
        }
    }
    pending.len() - before
}

/// Pass queued takes to the writer in order, stopping at the first refusal
fn hand_off(writer: &TakeWriter, pending: &mut VecDeque<Box<RecordedTake>>) {
    while let Some(take) = pending.pop_front() {
        if let Err(take) = writer.submit(take) {
            pending.push_front(take);
            break;
        }
    }
}

/// Keep polling until the last take (if one is expected) and every held
/// take reach the writer
fn drain(engine: &AudioEngine, writer: &TakeWriter, pending: &mut VecDeque<Box<RecordedTake>>, expect_take: bool) {
    let until = Instant::now() + DRAIN_TIMEOUT;
    let mut waiting = expect_take;
    while Instant::now() < until {
        if collect(engine, pending) > 0 {
            waiting = false;
        }
        hand_off(writer, pending);
        if !waiting && pending.is_empty() {
            return;
        }
        thread::sleep(TICK);
    }
}

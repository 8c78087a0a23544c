//! Writing finished takes to disk

use std::path::Path;

use thiserror::Error;

use super::{RecordFormat, RecordedTake};
use crate::buffer::db_to_linear;

/// Peak level a normalized take is scaled to (dBFS)
pub const NORMALIZE_TARGET_DB: f32 = -0.92;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("encoder error: {0}")]
    Encode(String),

    #[error("take contains no audio")]
    Empty,
}

/// Gain that brings `peak` to the normalize target; 1.0 for silence
pub fn normalize_gain(peak: f32) -> f32 {
    if peak > 0.0 && peak.is_finite() {
        db_to_linear(NORMALIZE_TARGET_DB) / peak
    } else {
        1.0
    }
}

/// Peak-normalize in place; returns the gain applied
pub fn normalize(samples: &mut [f32]) -> f32 {
    let peak = samples.iter().fold(0.0f32, |p, s| p.max(s.abs()));
    let gain = normalize_gain(peak);
    for s in samples.iter_mut() {
        *s *= gain;
    }
    gain
}

/// Write a take in its configured format, normalizing on the way out when
/// the take asks for it
pub fn write_take(take: &RecordedTake, path: &Path) -> Result<(), RecordError> {
    if take.samples.is_empty() {
        return Err(RecordError::Empty);
    }
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let gain = if take.settings.normalize { normalize_gain(take.peak) } else { 1.0 };

    match take.settings.format {
        RecordFormat::Wav16 => write_wav(take, path, 16, gain),
        RecordFormat::Wav24 => write_wav(take, path, 24, gain),
        RecordFormat::Wav32Float => write_wav(take, path, 32, gain),
        RecordFormat::Flac => write_flac(take, path, gain),
    }
}

fn to_int(sample: f32, gain: f32, bits: u16) -> i32 {
    let max = ((1i64 << (bits - 1)) - 1) as f32;
    ((sample * gain).clamp(-1.0, 1.0) * max).round() as i32
}

fn write_wav(take: &RecordedTake, path: &Path, bits: u16, gain: f32) -> Result<(), RecordError> {
    let float = bits == 32;
    let spec = hound::WavSpec {
        channels: take.channels,
        sample_rate: take.sample_rate,
        bits_per_sample: bits,
        sample_format: if float { hound::SampleFormat::Float } else { hound::SampleFormat::Int },
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    for &sample in &take.samples {
        if float {
            writer.write_sample(sample * gain)?;
        } else if bits == 16 {
            writer.write_sample(to_int(sample, gain, 16) as i16)?;
        } else {
            writer.write_sample(to_int(sample, gain, bits))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(feature = "flac")]
fn write_flac(take: &RecordedTake, path: &Path, gain: f32) -> Result<(), RecordError> {
    use flacenc::component::BitRepr;
    use flacenc::error::Verify;

    const BITS: u16 = 24;

    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|(_, e)| RecordError::Encode(format!("{e:?}")))?;
    let ints: Vec<i32> = take.samples.iter().map(|&s| to_int(s, gain, BITS)).collect();
    let source = flacenc::source::MemSource::from_samples(
        &ints,
        take.channels as usize,
        BITS as usize,
        take.sample_rate as usize,
    );
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| RecordError::Encode(format!("{e:?}")))?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|e| RecordError::Encode(format!("{e:?}")))?;
    std::fs::write(path, sink.as_slice())?;
    Ok(())
}

#[cfg(not(feature = "flac"))]
fn write_flac(_take: &RecordedTake, _path: &Path, _gain: f32) -> Result<(), RecordError> {
    Err(RecordError::Encode("built without FLAC support".into()))
}

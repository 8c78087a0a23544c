//! Interleaved stereo buffer helpers
//!
//! All engine buffers are `L,R,L,R,...` and preallocated to the maximum
//! block size. These helpers only touch the first `frames` frames.

/// Channels in every engine bus
pub const STEREO: usize = 2;

/// Add `src * gain` into `dst`
#[inline]
pub fn mix_scaled(dst: &mut [f32], src: &[f32], gain: f32) {
    if gain == 0.0 {
        return;
    }
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d += *s * gain;
    }
}

/// Multiply every sample by `gain`
#[inline]
pub fn apply_gain(buf: &mut [f32], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for s in buf.iter_mut() {
        *s *= gain;
    }
}

/// Duplicate a mono signal held in `buf[..frames]` into interleaved stereo.
///
/// Walks backwards so the expansion can happen in place.
pub fn expand_mono(buf: &mut [f32], frames: usize) {
    let frames = frames.min(buf.len() / STEREO);
    for i in (0..frames).rev() {
        let s = buf[i];
        buf[i * 2] = s;
        buf[i * 2 + 1] = s;
    }
}

/// Fold interleaved stereo into mono at the front of the buffer
pub fn fold_to_mono(buf: &mut [f32], frames: usize) {
    let frames = frames.min(buf.len() / STEREO);
    for i in 0..frames {
        buf[i] = (buf[i * 2] + buf[i * 2 + 1]) * 0.5;
    }
}

/// Sum of squares, accumulated in f64
pub fn energy(buf: &[f32]) -> f64 {
    buf.iter().map(|&s| s as f64 * s as f64).sum()
}

/// True when no sample is NaN or infinite
#[inline]
pub fn is_finite(buf: &[f32]) -> bool {
    buf.iter().all(|s| s.is_finite())
}

/// Per-channel (peak, rms) of an interleaved stereo block
pub fn stereo_levels(buf: &[f32]) -> [(f32, f32); 2] {
    let mut peak = [0.0f32; 2];
    let mut sum = [0.0f64; 2];
    let mut frames = 0usize;
    for frame in buf.chunks_exact(2) {
        for ch in 0..2 {
            let s = frame[ch];
            peak[ch] = peak[ch].max(s.abs());
            sum[ch] += s as f64 * s as f64;
        }
        frames += 1;
    }
    let rms = |sum: f64| {
        if frames == 0 {
            0.0
        } else {
            (sum / frames as f64).sqrt() as f32
        }
    };
    [(peak[0], rms(sum[0])), (peak[1], rms(sum[1]))]
}

/// Mutable references to two distinct elements of a slice
pub(crate) fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = items.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = items.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

/// Convert dB to linear gain
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert linear gain to dB, floored at -200 dB
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear > 1e-10 {
        20.0 * linear.log10()
    } else {
        -200.0
    }
}

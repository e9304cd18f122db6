//! Audio resampling.
//!
//! Uses rubato's FFT resampler (band-limited, deterministic) to bring mono
//! audio to the classifier's 22050 Hz input rate.

use anyhow::{Context, Result};
use audioadapter_buffers::owned::InterleavedOwned;
use rubato::{Fft, FixedSync, Resampler};

/// Resample mono samples from `source_rate` to `target_rate`.
///
/// Output length is `source_len * target_rate / source_rate`, give or take
/// the resampler's edge rounding.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = Fft::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        1024,
        2,
        1,
        FixedSync::Input,
    )
    .context("Failed to create resampler")?;

    let output_len = resampler.process_all_needed_output_len(samples.len());

    let input_buf = InterleavedOwned::new_from(samples.to_vec(), 1, samples.len())
        .context("Failed to create input buffer")?;

    let mut output_buf = InterleavedOwned::new(0.0f32, 1, output_len);

    let (_, actual_output_len) = resampler
        .process_all_into_buffer(&input_buf, &mut output_buf, samples.len(), None)
        .context("Failed to resample audio")?;

    let mut output = output_buf.take_data();
    output.truncate(actual_output_len);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, rate: u32, secs: f32) -> Vec<f32> {
        let n = (rate as f32 * secs) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = tone(440.0, 22050, 0.1);
        let out = resample(&input, 22050, 22050).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_length_scales_with_ratio() {
        for (source, secs) in [(44100u32, 1.0f32), (16000, 0.5), (48000, 0.25), (8000, 1.0)] {
            let input = tone(440.0, source, secs);
            let out = resample(&input, source, 22050).unwrap();
            let expected = input.len() as f64 * 22050.0 / source as f64;
            let diff = (out.len() as f64 - expected).abs();
            assert!(
                diff <= 2.0,
                "{source} Hz: got {} samples, expected ~{expected:.1}",
                out.len()
            );
        }
    }

    #[test]
    fn test_deterministic() {
        let input = tone(1000.0, 44100, 0.3);
        let a = resample(&input, 44100, 22050).unwrap();
        let b = resample(&input, 44100, 22050).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_preserves_amplitude_of_in_band_tone() {
        let input = tone(440.0, 44100, 1.0);
        let out = resample(&input, 44100, 22050).unwrap();
        // Ignore edges where the filter ramps in and out
        let mid = &out[2000..out.len() - 2000];
        let peak = mid.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {peak}");
    }
}

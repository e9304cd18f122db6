//! Channel and sample-rate normalization.
//!
//! Channels are averaged to mono *before* resampling; the classifier was
//! trained on audio prepared in that order.

use tracing::debug;

use super::io::AudioBuffer;
use super::resample::resample;
use crate::error::{ClassifyError, ClassifyResult};
use crate::SAMPLE_RATE;

/// Mono audio at [`SAMPLE_RATE`], guaranteed non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAudio {
    samples: Vec<f32>,
}

impl NormalizedAudio {
    /// Samples at 22050 Hz.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there are no samples (never true after [`normalize`]).
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / SAMPLE_RATE as f32
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Average interleaved channels into one, frame by frame.
pub fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Collapse to mono, then resample to 22050 Hz.
pub fn normalize(audio: AudioBuffer) -> ClassifyResult<NormalizedAudio> {
    if audio.channels == 0 || audio.frames() == 0 {
        return Err(ClassifyError::EmptyAudio);
    }

    let channels = audio.channels as usize;
    let source_rate = audio.sample_rate;

    let mono = if channels > 1 {
        debug!(channels, "Collapsing channels to mono");
        to_mono(&audio.samples, channels)
    } else {
        audio.samples
    };

    let samples = if source_rate != SAMPLE_RATE {
        debug!("Resampling {} Hz -> {} Hz", source_rate, SAMPLE_RATE);
        resample(&mono, source_rate, SAMPLE_RATE)
            .map_err(|e| ClassifyError::Internal(format!("{e:#}")))?
    } else {
        mono
    };

    if samples.is_empty() {
        return Err(ClassifyError::EmptyAudio);
    }

    Ok(NormalizedAudio { samples })
}

//! Log-mel spectrogram computation.
//!
//! Matches torchaudio's `MelSpectrogram` + `AmplitudeToDB` with the
//! classifier's recipe: 22050 Hz input, n_fft=1024, hop=512, 128 HTK mel
//! bands over [0, 11025] Hz, power spectrum, dB with a 1e-10 floor.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::SAMPLE_RATE;

/// Configuration for mel spectrogram computation.
#[derive(Debug, Clone)]
pub struct MelConfig {
    /// Sample rate of input audio (default: 22050)
    pub sample_rate: u32,
    /// FFT size (default: 1024)
    pub n_fft: usize,
    /// Hop length between frames (default: 512)
    pub hop_length: usize,
    /// Window length (defaults to n_fft)
    pub win_length: Option<usize>,
    /// Number of mel bands (default: 128)
    pub n_mels: usize,
    /// Minimum frequency for mel filterbank
    pub fmin: f32,
    /// Maximum frequency for mel filterbank (defaults to sample_rate / 2)
    pub fmax: Option<f32>,
    /// Floor applied before the dB conversion
    pub amin: f32,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            n_fft: 1024,
            hop_length: 512,
            win_length: None,
            n_mels: 128,
            fmin: 0.0,
            fmax: Some(SAMPLE_RATE as f32 / 2.0),
            amin: 1e-10,
        }
    }
}

/// A mel spectrogram stored mel-major: `values[mel * n_frames + frame]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    n_mels: usize,
    n_frames: usize,
    values: Vec<f32>,
}

impl Spectrogram {
    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Value at `(mel, frame)`.
    pub fn get(&self, mel: usize, frame: usize) -> f32 {
        self.values[mel * self.n_frames + frame]
    }

    /// Flat mel-major values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// One row per mel band.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks(self.n_frames)
    }

    /// Network input shape `[batch, channel, mel, time]`.
    pub fn input_shape(&self) -> [usize; 4] {
        [1, 1, self.n_mels, self.n_frames]
    }

    /// Upload as a `[1, 1, n_mels, n_frames]` tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        Tensor::from_data(
            TensorData::new(self.values.clone(), self.input_shape()),
            device,
        )
    }
}

/// Mel-spectrogram extractor.
///
/// The filterbank, window and FFT plan are built once and reused for every
/// request; `compute*` takes `&self` and allocates only per-call buffers.
pub struct MelSpectrogram {
    config: MelConfig,
    mel_basis: Vec<Vec<f32>>,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for MelSpectrogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelSpectrogram")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for MelSpectrogram {
    fn default() -> Self {
        Self::new(MelConfig::default())
    }
}

impl MelSpectrogram {
    /// Create a new mel spectrogram extractor with given configuration.
    pub fn new(config: MelConfig) -> Self {
        let win_length = config.win_length.unwrap_or(config.n_fft);
        let fmax = config.fmax.unwrap_or(config.sample_rate as f32 / 2.0);

        let mel_basis = Self::create_mel_filterbank(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            config.fmin,
            fmax,
        );

        let window = Self::hann_window(win_length);
        let fft = FftPlanner::new().plan_fft_forward(config.n_fft);

        Self {
            config,
            mel_basis,
            window,
            fft,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// Mel power spectrogram.
    pub fn compute(&self, samples: &[f32]) -> Spectrogram {
        let power_spec = self.power_stft(samples);
        let n_frames = power_spec.len();
        let n_mels = self.config.n_mels;

        let mut values = vec![0.0f32; n_mels * n_frames];
        for (frame_idx, frame) in power_spec.iter().enumerate() {
            for (mel_idx, filter) in self.mel_basis.iter().enumerate() {
                values[mel_idx * n_frames + frame_idx] =
                    filter.iter().zip(frame.iter()).map(|(f, p)| f * p).sum();
            }
        }

        Spectrogram {
            n_mels,
            n_frames,
            values,
        }
    }

    /// Mel spectrogram in decibels: `10 * log10(max(power, amin))`.
    pub fn compute_db(&self, samples: &[f32]) -> Spectrogram {
        let mut spec = self.compute(samples);
        let amin = self.config.amin;
        for v in spec.values.iter_mut() {
            *v = 10.0 * v.max(amin).log10();
        }
        spec
    }

    /// Number of frames for a given number of samples (centered framing).
    pub fn num_frames(&self, num_samples: usize) -> usize {
        let pad_length = self.config.n_fft / 2;
        let padded_len = num_samples + 2 * pad_length;
        (padded_len - self.config.n_fft) / self.config.hop_length + 1
    }

    /// Power spectrum per frame, `[n_frames][n_fft / 2 + 1]`.
    fn power_stft(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop_length = self.config.hop_length;
        let win_length = self.window.len();
        // torch.stft centers a shorter window inside the FFT frame
        let win_offset = (n_fft - win_length.min(n_fft)) / 2;

        let padded = reflect_pad(samples, n_fft / 2);
        let n_frames = self.num_frames(samples.len());
        let mut result = Vec::with_capacity(n_frames);

        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
        for i in 0..n_frames {
            let start = i * hop_length;

            for (j, slot) in buffer.iter_mut().enumerate() {
                let sample = if j >= win_offset && j - win_offset < win_length {
                    padded[start + j] * self.window[j - win_offset]
                } else {
                    0.0
                };
                *slot = Complex::new(sample, 0.0);
            }

            self.fft.process(&mut buffer);

            result.push(buffer.iter().take(n_fft / 2 + 1).map(|c| c.norm_sqr()).collect());
        }

        result
    }

    /// Convert frequency in Hz to the HTK mel scale.
    fn hz_to_mel(f: f32) -> f32 {
        2595.0 * (1.0 + f / 700.0).log10()
    }

    /// Convert an HTK mel value to Hz.
    fn mel_to_hz(m: f32) -> f32 {
        700.0 * (10f32.powf(m / 2595.0) - 1.0)
    }

    /// Corner frequencies of the triangular filters (`n_mels + 2` points).
    fn filter_corners(n_mels: usize, fmin: f32, fmax: f32) -> Vec<f32> {
        let mel_min = Self::hz_to_mel(fmin);
        let mel_max = Self::hz_to_mel(fmax);
        (0..=n_mels + 1)
            .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
            .map(Self::mel_to_hz)
            .collect()
    }

    /// Triangular filterbank `[n_mels][n_fft / 2 + 1]`, no area normalization
    /// (torchaudio `melscale_fbanks` with `norm=None`).
    fn create_mel_filterbank(
        sample_rate: u32,
        n_fft: usize,
        n_mels: usize,
        fmin: f32,
        fmax: f32,
    ) -> Vec<Vec<f32>> {
        let n_freqs = n_fft / 2 + 1;
        let hz_points = Self::filter_corners(n_mels, fmin, fmax);

        let fft_freqs: Vec<f32> = (0..n_freqs)
            .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
            .collect();

        let mut filterbank = vec![vec![0.0f32; n_freqs]; n_mels];

        for (i, filter) in filterbank.iter_mut().enumerate() {
            let f_lower = hz_points[i];
            let f_center = hz_points[i + 1];
            let f_upper = hz_points[i + 2];

            for (weight, &freq) in filter.iter_mut().zip(fft_freqs.iter()) {
                let down = (freq - f_lower) / (f_center - f_lower);
                let up = (f_upper - freq) / (f_upper - f_center);
                *weight = down.min(up).max(0.0);
            }
        }

        filterbank
    }

    /// Create Hann window (periodic mode, matching torch.hann_window default).
    fn hann_window(length: usize) -> Vec<f32> {
        (0..length)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / length as f32).cos()))
            .collect()
    }
}

/// Reflect-pad `pad` samples on each side (numpy/torch `reflect` mode).
///
/// Signals shorter than the pad bounce back and forth; a single sample is
/// repeated; an empty signal pads with zeros.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let n = samples.len();
    let total = n + 2 * pad;
    if n == 0 {
        return vec![0.0; total];
    }
    if n == 1 {
        return vec![samples[0]; total];
    }

    let period = 2 * (n - 1) as i64;
    (0..total as i64)
        .map(|i| {
            let m = (i - pad as i64).rem_euclid(period);
            let idx = if m >= n as i64 { period - m } else { m };
            samples[idx as usize]
        })
        .collect()
}

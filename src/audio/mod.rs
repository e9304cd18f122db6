//! Audio pre-processing for the classifier.
//!
//! Handles payload decoding, mono/sample-rate normalization, resampling and
//! log-mel spectrogram computation.

pub mod io;
pub mod mel;
pub mod normalize;
pub mod resample;

pub use io::{decode_base64, decode_bytes, AudioBuffer};
pub use mel::{MelConfig, MelSpectrogram, Spectrogram};
pub use normalize::{normalize, to_mono, NormalizedAudio};
pub use resample::resample;

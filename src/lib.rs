//! # Audio CNN Inference
//!
//! Environmental sound classification in pure Rust using the Burn framework.
//! A residual CNN scores a log-mel spectrogram and the service returns the
//! three most likely classes.
//!
//! ## Architecture
//!
//! ```text
//! base64 -> decode -> mono 22050 Hz -> Mel dB [1, 1, 128, T]
//!   -> AudioCnn -> logits [1, N] -> sanitize -> softmax -> top-3
//! ```
//!
//! Checkpoints are GGUF files carrying F32/F16 weights and the ordered class
//! list. CPU inference uses the NdArray backend; build with the `wgpu`
//! feature for GPU.

pub mod audio;
pub mod classify;
pub mod error;
pub mod gguf;
pub mod model;
pub mod rank;
pub mod service;

pub use audio::AudioBuffer;
pub use classify::{AudioClassifier, InferenceRequest, InferenceResponse};
pub use error::{ClassifyError, ClassifyResult};
pub use rank::Prediction;

/// Sample rate the classifier was trained at.
pub const SAMPLE_RATE: u32 = 22050;

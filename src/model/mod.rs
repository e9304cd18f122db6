//! Spectrogram classifier.
//!
//! [`SpectrogramClassifier`] is the forward-pass contract the pipeline
//! depends on; [`AudioCnn`] is the residual CNN loaded from a checkpoint.

pub mod block;
pub mod cnn;
pub mod config;
pub mod layers;

pub use cnn::AudioCnn;
pub use config::{AudioCnnConfig, StageConfig};

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// An intermediate activation exposed for visualization.
pub struct FeatureMap<B: Backend> {
    pub name: String,
    /// [B, C, H, W]
    pub activation: Tensor<B, 4>,
}

impl<B: Backend> FeatureMap<B> {
    pub fn new(name: impl Into<String>, activation: Tensor<B, 4>) -> Self {
        Self {
            name: name.into(),
            activation,
        }
    }
}

/// Forward-only classifier over `[1, 1, n_mels, T]` spectrograms.
///
/// Implementations run on a non-autodiff backend, so no gradients are
/// recorded.
pub trait SpectrogramClassifier<B: Backend> {
    /// Length of the logit vector.
    fn num_classes(&self) -> usize;

    /// Input: [1, 1, n_mels, T], output: raw logits [1, num_classes].
    fn forward(&self, spectrogram: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Like [`forward`](Self::forward), also returning named intermediate
    /// activations. Models without interesting internals return none.
    fn forward_with_features(
        &self,
        spectrogram: Tensor<B, 4>,
    ) -> (Tensor<B, 2>, Vec<FeatureMap<B>>) {
        (self.forward(spectrogram), Vec::new())
    }
}

//! Composite AudioCnn model (stem + residual stages + linear head).

use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::module::max_pool2d;
use burn::tensor::Tensor;

use super::block::ResidualBlock;
use super::config::AudioCnnConfig;
use super::layers::{ConvBn, Linear};
use super::{FeatureMap, SpectrogramClassifier};

pub struct AudioCnn<B: Backend> {
    /// 7x7 stride-2 conv + BN, followed by ReLU and 3x3 stride-2 max-pool
    stem: ConvBn<B>,
    stages: Vec<Vec<ResidualBlock<B>>>,
    fc: Linear<B>,
    config: AudioCnnConfig,
}

impl<B: Backend> AudioCnn<B> {
    pub fn new(
        stem: ConvBn<B>,
        stages: Vec<Vec<ResidualBlock<B>>>,
        fc: Linear<B>,
        config: AudioCnnConfig,
    ) -> Self {
        Self {
            stem,
            stages,
            fc,
            config,
        }
    }

    pub fn config(&self) -> &AudioCnnConfig {
        &self.config
    }

    /// Input: [B, 1, n_mels, T]
    /// Output: logits [B, num_classes], plus per-layer activations when
    /// `collect` is set.
    fn run(&self, x: Tensor<B, 4>, collect: bool) -> (Tensor<B, 2>, Vec<FeatureMap<B>>) {
        let mut features = Vec::new();

        // Stem: [B, 1, 128, T] -> [B, C, 32, ~T/4]
        let x = relu(self.stem.forward(x));
        let mut x = max_pool2d(x, [3, 3], [2, 2], [1, 1], [1, 1]);
        if collect {
            features.push(FeatureMap::new("stem", x.clone()));
        }

        for (i, stage) in self.stages.iter().enumerate() {
            for block in stage {
                x = block.forward(x);
            }
            if collect {
                features.push(FeatureMap::new(format!("layer{}", i + 1), x.clone()));
            }
        }

        // Global average pool: [B, C, H, W] -> [B, C]
        let [batch, channels, _, _] = x.dims();
        let pooled: Tensor<B, 2> = x.mean_dim(3).mean_dim(2).reshape([batch, channels]);

        // Dropout is the identity at inference
        (self.fc.forward(pooled), features)
    }
}

impl<B: Backend> SpectrogramClassifier<B> for AudioCnn<B> {
    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn forward(&self, spectrogram: Tensor<B, 4>) -> Tensor<B, 2> {
        self.run(spectrogram, false).0
    }

    fn forward_with_features(
        &self,
        spectrogram: Tensor<B, 4>,
    ) -> (Tensor<B, 2>, Vec<FeatureMap<B>>) {
        self.run(spectrogram, true)
    }
}

//! Basic layers for AudioCnn: Conv2d, folded BatchNorm, Linear.
//!
//! Layers hold plain tensors loaded from a checkpoint and run through Burn's
//! functional ops; there is no autodiff state.

use burn::tensor::backend::Backend;
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Tensor, TensorData};

/// 2D convolution with square kernel, stride and padding.
pub struct Conv2d<B: Backend> {
    /// Weight shape: [out_channels, in_channels, kernel, kernel]
    weight: Tensor<B, 4>,
    bias: Option<Tensor<B, 1>>,
    stride: usize,
    padding: usize,
}

impl<B: Backend> Conv2d<B> {
    pub fn new(
        weight: Tensor<B, 4>,
        bias: Option<Tensor<B, 1>>,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self {
            weight,
            bias,
            stride,
            padding,
        }
    }

    /// Input shape: [B, C_in, H, W]
    /// Output shape: [B, C_out, H_out, W_out]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let options = ConvOptions::new(
            [self.stride, self.stride],
            [self.padding, self.padding],
            [1, 1],
            1,
        );
        conv2d(x, self.weight.clone(), self.bias.clone(), options)
    }
}

/// Inference-mode batch normalization with running statistics folded into a
/// per-channel affine transform: `x * scale + shift`.
pub struct BatchNorm<B: Backend> {
    /// [1, C, 1, 1]
    scale: Tensor<B, 4>,
    /// [1, C, 1, 1]
    shift: Tensor<B, 4>,
}

impl<B: Backend> BatchNorm<B> {
    /// Fold `(x - mean) / sqrt(var + eps) * gamma + beta` into scale/shift.
    pub fn from_running_stats(
        gamma: &[f32],
        beta: &[f32],
        running_mean: &[f32],
        running_var: &[f32],
        eps: f32,
        device: &B::Device,
    ) -> Self {
        let channels = gamma.len();
        let scale: Vec<f32> = gamma
            .iter()
            .zip(running_var)
            .map(|(g, v)| g / (v + eps).sqrt())
            .collect();
        let shift: Vec<f32> = beta
            .iter()
            .zip(running_mean)
            .zip(&scale)
            .map(|((b, m), s)| b - m * s)
            .collect();

        Self {
            scale: Tensor::from_data(TensorData::new(scale, [1, channels, 1, 1]), device),
            shift: Tensor::from_data(TensorData::new(shift, [1, channels, 1, 1]), device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        x * self.scale.clone() + self.shift.clone()
    }
}

/// Convolution followed by batch norm (no activation).
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    pub fn new(conv: Conv2d<B>, bn: BatchNorm<B>) -> Self {
        Self { conv, bn }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Fully connected layer: `x @ weight^T + bias`.
pub struct Linear<B: Backend> {
    /// Transposed weight: [in_features, out_features]
    weight_t: Tensor<B, 2>,
    bias: Tensor<B, 1>,
}

impl<B: Backend> Linear<B> {
    /// `weight` shape: `[out_features, in_features]` (PyTorch convention).
    pub fn new(weight: Tensor<B, 2>, bias: Tensor<B, 1>) -> Self {
        Self {
            weight_t: weight.transpose(),
            bias,
        }
    }

    /// Input: [B, in_features], output: [B, out_features]
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.matmul(self.weight_t.clone()) + self.bias.clone().unsqueeze::<2>()
    }
}

//! Residual block: two 3x3 conv-BN layers plus a shortcut.

use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::layers::ConvBn;

pub struct ResidualBlock<B: Backend> {
    conv1: ConvBn<B>,
    conv2: ConvBn<B>,
    /// 1x1 projection when stride or width changes, identity otherwise
    shortcut: Option<ConvBn<B>>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(conv1: ConvBn<B>, conv2: ConvBn<B>, shortcut: Option<ConvBn<B>>) -> Self {
        Self {
            conv1,
            conv2,
            shortcut,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = match &self.shortcut {
            Some(projection) => projection.forward(x.clone()),
            None => x.clone(),
        };

        let h = relu(self.conv1.forward(x));
        let h = self.conv2.forward(h);
        relu(h + residual)
    }
}

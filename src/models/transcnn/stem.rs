//! Convolutional stem: two stride-2 convolutions, net stride 4.

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::norm::{Norm2d, Norm2dConfig};
use crate::models::transcnn::init::init_conv2d;
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// The combined stride of the stem.
pub const STEM_STRIDE: usize = 4;

/// Configuration for [`ConvStem`].
#[derive(Config, Debug)]
pub struct ConvStemConfig {
    /// Input image channel count.
    pub d_input: usize,

    /// Intermediate stem width.
    pub d_stem: usize,

    /// Output channel width (the first stage's width).
    pub d_output: usize,

    /// Activation kind.
    #[config(default = "ActivationConfig::Silu")]
    pub activation: ActivationConfig,

    /// Normalization kind.
    #[config(default = "Norm2dConfig::BatchNorm")]
    pub norm: Norm2dConfig,
}

impl ConvStemConfig {
    /// Initializes a new [`ConvStem`].
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvStem<B> {
        ConvStem {
            conv1: init_conv2d(
                Conv2dConfig::new([self.d_input, self.d_stem], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1)),
                device,
            ),
            norm: self.norm.init(self.d_stem, device),
            act: self.activation.init(device),
            conv2: init_conv2d(
                Conv2dConfig::new([self.d_stem, self.d_output], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1)),
                device,
            ),
        }
    }
}

/// Convolutional stem module.
#[derive(Module, Debug)]
pub struct ConvStem<B: Backend> {
    /// First stride-2 convolution.
    pub conv1: Conv2d<B>,

    /// Normalization between the convolutions.
    pub norm: Norm2d<B>,

    /// Activation between the convolutions.
    pub act: Activation<B>,

    /// Second stride-2 convolution.
    pub conv2: Conv2d<B>,
}

impl<B: Backend> ConvStem<B> {
    /// Get the input channel count.
    pub fn d_input(&self) -> usize {
        self.conv1.weight.dims()[1]
    }

    /// Get the output channel width.
    pub fn d_output(&self) -> usize {
        self.conv2.weight.dims()[0]
    }

    /// Applies the stem.
    ///
    /// # Shapes
    ///
    /// - input: `(N, C_in, H, W)`, `H` and `W` divisible by
    ///   [`STEM_STRIDE`]
    /// - output: `(N, C_out, H / 4, W / 4)`
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.act.forward(self.norm.forward(self.conv1.forward(x)));
        self.conv2.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stem_shape() {
        let device = Default::default();

        let stem = ConvStemConfig::new(3, 16, 64).init::<NdArray>(&device);
        assert_eq!(stem.d_input(), 3);
        assert_eq!(stem.d_output(), 64);

        let x = Tensor::<NdArray, 4>::random(
            [2, 3, 32, 16],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        assert_eq!(stem.forward(x).dims(), [2, 64, 8, 4]);
    }
}

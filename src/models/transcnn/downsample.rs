//! Stage transition: halve the spatial extent, change the channel width.

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::norm::{Norm2d, Norm2dConfig};
use crate::models::transcnn::init::init_conv2d;
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};

/// Configuration for [`Downsample`].
#[derive(Config, Debug)]
pub struct DownsampleConfig {
    /// Input channel width.
    pub d_input: usize,

    /// Output channel width.
    pub d_output: usize,

    /// Activation kind.
    #[config(default = "ActivationConfig::Silu")]
    pub activation: ActivationConfig,

    /// Normalization kind.
    #[config(default = "Norm2dConfig::BatchNorm")]
    pub norm: Norm2dConfig,
}

impl DownsampleConfig {
    /// Initializes a new [`Downsample`].
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Downsample<B> {
        Downsample {
            conv: init_conv2d(
                Conv2dConfig::new([self.d_input, self.d_output], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1)),
                device,
            ),
            conv_norm: self.norm.init(self.d_output, device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            shortcut: init_conv2d(
                Conv2dConfig::new([self.d_input, self.d_output], [1, 1]),
                device,
            ),
            shortcut_norm: self.norm.init(self.d_output, device),
            act: self.activation.init(device),
        }
    }
}

/// Dual-path stage transition.
///
/// A stride-2 convolution (learned downsampling) summed with a max-pool
/// followed by a pointwise projection (a pooling shortcut), then activated.
/// Unlike the rest of the backbone, both convolutions here carry a bias
/// even though each is followed by a norm; the asymmetry is inherited from
/// the reference network and preserved.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    /// Stride-2 3x3 convolution path.
    pub conv: Conv2d<B>,

    /// Normalization for the convolution path.
    pub conv_norm: Norm2d<B>,

    /// 2x2 max-pool for the shortcut path.
    pub pool: MaxPool2d,

    /// Pointwise projection for the shortcut path.
    pub shortcut: Conv2d<B>,

    /// Normalization for the shortcut path.
    pub shortcut_norm: Norm2d<B>,

    /// Activation over the summed paths.
    pub act: Activation<B>,
}

impl<B: Backend> Downsample<B> {
    /// Get the input channel width.
    pub fn d_input(&self) -> usize {
        self.conv.weight.dims()[1]
    }

    /// Get the output channel width.
    pub fn d_output(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    /// Applies the stage transition.
    ///
    /// Odd extents are rejected rather than truncated: the two paths would
    /// disagree on the output size.
    ///
    /// # Shapes
    ///
    /// - input: `(N, C_in, H, W)`, `H` and `W` even
    /// - output: `(N, C_out, H / 2, W / 2)`
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_, _, h, w] = x.dims();
        assert!(
            h % 2 == 0 && w % 2 == 0,
            "Downsample requires an even spatial extent, but got ({h}, {w})"
        );

        let learned = self.conv_norm.forward(self.conv.forward(x.clone()));
        let shortcut = self
            .shortcut_norm
            .forward(self.shortcut.forward(self.pool.forward(x)));

        self.act.forward(learned + shortcut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_downsample_shape() {
        let device = Default::default();

        let ds = DownsampleConfig::new(8, 16).init::<NdArray>(&device);
        assert_eq!(ds.d_input(), 8);
        assert_eq!(ds.d_output(), 16);

        let x = Tensor::<NdArray, 4>::random(
            [2, 8, 12, 10],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        assert_eq!(ds.forward(x).dims(), [2, 16, 6, 5]);
    }

    #[test]
    #[should_panic(expected = "even spatial extent")]
    fn test_odd_extent_rejected() {
        let device: <NdArray as Backend>::Device = Default::default();

        let ds = DownsampleConfig::new(4, 8).init::<NdArray>(&device);

        let x = Tensor::<NdArray, 4>::random(
            [1, 4, 7, 8],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let _y = ds.forward(x);
    }

    #[test]
    fn test_biases_present() {
        let device: <NdArray as Backend>::Device = Default::default();

        let ds = DownsampleConfig::new(4, 8).init::<NdArray>(&device);
        assert!(ds.conv.bias.is_some());
        assert!(ds.shortcut.bias.is_some());
    }
}

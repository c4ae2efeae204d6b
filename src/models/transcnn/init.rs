//! Weight initialization policy.
//!
//! One explicit strategy over the closed set of learnable layer kinds,
//! applied once at construction:
//!
//! - Convolution and linear weights draw from `Normal(0, 0.02)`
//!   (the Burn surrogate for a truncated normal).
//! - Convolution and linear biases start at zero.
//! - Normalization layers keep Burn's unit-scale / zero-shift defaults.
//!
//! Forward computation never mutates weights; training is external.

use burn::module::{Param, ParamId};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::Backend;

/// Standard deviation for convolution and linear weight initialization.
pub const INIT_STD: f64 = 0.02;

/// The weight initializer for convolution and linear layers.
#[must_use]
pub fn weight_initializer() -> Initializer {
    Initializer::Normal {
        mean: 0.0,
        std: INIT_STD,
    }
}

/// Initialize a [`Conv2d`] under the model's weight policy.
#[must_use]
pub fn init_conv2d<B: Backend>(
    config: Conv2dConfig,
    device: &B::Device,
) -> Conv2d<B> {
    let mut conv = config.with_initializer(weight_initializer()).init(device);
    conv.bias = conv
        .bias
        .map(|bias| Param::initialized(ParamId::new(), bias.val().zeros_like()));
    conv
}

/// Initialize a [`Linear`] under the model's weight policy.
#[must_use]
pub fn init_linear<B: Backend>(
    config: LinearConfig,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = config.with_initializer(weight_initializer()).init(device);
    linear.bias = linear
        .bias
        .map(|bias| Param::initialized(ParamId::new(), bias.val().zeros_like()));
    linear
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_conv2d_policy() {
        let device = Default::default();

        let conv: Conv2d<NdArray> =
            init_conv2d(Conv2dConfig::new([4, 8], [1, 1]), &device);

        let bias = conv.bias.expect("bias enabled by default");
        let values = bias.val().to_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|&v| v == 0.0));

        // Weights drawn near zero with a tight spread.
        let max = conv.weight.val().abs().max().into_scalar();
        assert!(max < 0.5, "unexpected weight magnitude: {max}");
    }

    #[test]
    fn test_linear_policy() {
        let device = Default::default();

        let linear: Linear<NdArray> = init_linear(LinearConfig::new(4, 8), &device);

        let bias = linear.bias.expect("bias enabled by default");
        let values = bias.val().to_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|&v| v == 0.0));
    }
}

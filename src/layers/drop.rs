//! Stochastic regularization layers: drop-path (stochastic depth) and
//! channel dropout.
//!
//! Papers:
//! Deep Networks with Stochastic Depth (https://arxiv.org/abs/1603.09382)
//!
//! Efficient Object Localization Using Convolutional Networks
//! (https://arxiv.org/abs/1411.4280)

use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;

/// Checks that a probability lies in `[0, 1]`.
#[inline(always)]
fn check_probability(prob: f64) -> f64 {
    if !(0.0..=1.0).contains(&prob) {
        panic!("Probability should be between 0 and 1, but got {}", prob);
    }
    prob
}

/// Applies a Bernoulli keep-gate of the given mask shape to `x`.
///
/// Returns `x` unchanged when not training or when `drop_prob` is zero;
/// otherwise samples a keep mask, rescales it by `1 / keep_prob`, and
/// multiplies it in.
#[inline(always)]
#[must_use]
fn bernoulli_gate<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    mask_shape: [usize; D],
    drop_prob: f64,
    training: bool,
) -> Tensor<B, D> {
    check_probability(drop_prob);

    if !training || drop_prob == 0.0 {
        return x;
    }

    let keep_prob = 1.0 - drop_prob;

    let mask = Tensor::<B, D>::random(
        mask_shape,
        Distribution::Bernoulli(keep_prob),
        &x.device(),
    );

    x * mask.div_scalar(keep_prob)
}

/// DropPath (stochastic depth) regularization.
///
/// Drops the entire tensor per sample: the mask broadcasts over every
/// non-batch dimension.
///
/// ## Arguments
///
/// * `x`: Input tensor; the leading dimension is the batch.
/// * `drop_prob`: Probability of dropping a path.
/// * `training`: Whether the model is in training mode.
#[must_use]
pub fn drop_path<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    drop_prob: f64,
    training: bool,
) -> Tensor<B, D> {
    let mut mask_shape = [1; D];
    mask_shape[0] = x.dims()[0];

    bernoulli_gate(x, mask_shape, drop_prob, training)
}

/// Channel dropout for `(N, C, H, W)` feature maps.
///
/// Drops whole channels per sample: the mask has shape `(N, C, 1, 1)` and
/// broadcasts over the spatial dimensions.
///
/// ## Arguments
///
/// * `x`: Input tensor of shape `(N, C, H, W)`.
/// * `drop_prob`: Probability of dropping a channel.
/// * `training`: Whether the model is in training mode.
#[must_use]
pub fn channel_drop<B: Backend>(
    x: Tensor<B, 4>,
    drop_prob: f64,
    training: bool,
) -> Tensor<B, 4> {
    let [n, c, _, _] = x.dims();

    bernoulli_gate(x, [n, c, 1, 1], drop_prob, training)
}

/// Configuration for the [`DropPath`] module.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// Probability of dropping the gated branch.
    #[config(default = 0.0)]
    pub drop_prob: f64,
}

impl DropPathConfig {
    /// Initializes a new [`DropPath`] module.
    #[must_use]
    pub fn init(&self) -> DropPath {
        DropPath {
            drop_prob: check_probability(self.drop_prob),
        }
    }
}

/// The DropPath (stochastic depth) module.
///
/// `drop_prob` is plain mutable state, not a weight; the owning model may
/// rewrite it between forward passes to reschedule stochastic depth.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// Probability of dropping the gated branch.
    pub drop_prob: f64,
}

impl DropPath {
    /// Applies the forward pass on the input tensor.
    ///
    /// Identity at inference; an independent per-sample gate while training.
    ///
    /// # Shapes
    ///
    /// - input: `[batch, ...]`
    /// - output: `[batch, ...]`
    #[must_use]
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        drop_path(input, self.drop_prob, B::ad_enabled())
    }

    /// Applies an inner function under a stochastic residual/depth-skip
    /// connection: `x + drop_path(f(x))`.
    ///
    /// Each call draws its own gate, so two gated branches in one block are
    /// dropped independently.
    #[inline]
    #[must_use]
    pub fn with_skip<B: Backend, const D: usize, F>(
        &self,
        x: Tensor<B, D>,
        f: F,
    ) -> Tensor<B, D>
    where
        F: FnOnce(Tensor<B, D>) -> Tensor<B, D>,
    {
        x.clone() + self.forward(f(x))
    }
}

/// Configuration for the [`ChannelDrop`] module.
#[derive(Config, Debug)]
pub struct ChannelDropConfig {
    /// Probability of dropping a channel.
    #[config(default = 0.0)]
    pub drop_prob: f64,
}

impl ChannelDropConfig {
    /// Initializes a new [`ChannelDrop`] module.
    #[must_use]
    pub fn init(&self) -> ChannelDrop {
        ChannelDrop {
            drop_prob: check_probability(self.drop_prob),
        }
    }
}

/// Channel dropout module for `(N, C, H, W)` feature maps.
#[derive(Module, Clone, Debug)]
pub struct ChannelDrop {
    /// Probability of dropping a channel.
    pub drop_prob: f64,
}

impl ChannelDrop {
    /// Applies the forward pass on the input tensor.
    ///
    /// Identity at inference.
    ///
    /// # Shapes
    ///
    /// - input: `(N, C, H, W)`
    /// - output: `(N, C, H, W)`
    #[must_use]
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        channel_drop(input, self.drop_prob, B::ad_enabled())
    }
}

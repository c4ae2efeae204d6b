use burn::config::Config;
use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig};
use burn::prelude::{Backend, Tensor};

/// [`Norm2d`] configuration.
///
/// Selects the normalization kind; the channel count is supplied at
/// initialization by the layer that owns the norm.
#[derive(Config, Debug)]
pub enum Norm2dConfig {
    /// Per-channel batch normalization.
    BatchNorm,

    /// Group normalization with the given number of groups.
    GroupNorm(usize),
}

impl Norm2dConfig {
    /// Initialize a normalization layer over `num_features` channels.
    pub fn init<B: Backend>(
        &self,
        num_features: usize,
        device: &B::Device,
    ) -> Norm2d<B> {
        match self {
            Norm2dConfig::BatchNorm => {
                Norm2d::Batch(BatchNormConfig::new(num_features).init(device))
            }
            Norm2dConfig::GroupNorm(num_groups) => {
                Norm2d::Group(GroupNormConfig::new(*num_groups, num_features).init(device))
            }
        }
    }
}

/// Normalization layer wrapper for `(N, C, H, W)` feature maps.
///
/// Scale initializes to one and shift to zero for every variant, per the
/// `burn::nn` defaults.
#[derive(Module, Debug)]
pub enum Norm2d<B: Backend> {
    /// Batch normalization over 2 spatial dimensions.
    Batch(BatchNorm<B, 2>),

    /// Group normalization.
    Group(GroupNorm<B>),
}

impl<B: Backend> Norm2d<B> {
    /// Forward pass.
    ///
    /// # Shapes
    ///
    /// - input: `(N, C, H, W)`
    /// - output: `(N, C, H, W)`
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Norm2d::Batch(layer) => layer.forward(input),
            Norm2d::Group(layer) => layer.forward(input),
        }
    }
}

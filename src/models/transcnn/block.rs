//! The backbone block: attention then inverted-residual feed-forward,
//! each behind a stochastic-depth residual.

use crate::layers::activation::ActivationConfig;
use crate::layers::drop::{DropPath, DropPathConfig};
use crate::layers::norm::Norm2dConfig;
use crate::models::transcnn::attention::{Attention, AttentionConfig, AttentionMeta};
use crate::models::transcnn::conv_ffn::{
    InvertedResidual, InvertedResidualConfig, InvertedResidualMeta,
};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for [`TransCnnBlock`].
pub trait TransCnnBlockMeta {
    /// Get the input/output dimension size.
    fn d_input(&self) -> usize;

    /// Get the per-head dimension size.
    fn head_dim(&self) -> usize;

    /// Get the attention grid size; 1 means pure global attention.
    fn grid_size(&self) -> usize;

    /// Get the coarse-branch downsample ratio.
    fn ds_ratio(&self) -> usize;

    /// Get the feed-forward expansion factor.
    fn expansion(&self) -> usize;

    /// Get the depthwise kernel size.
    fn kernel_size(&self) -> usize;

    /// Get the channel dropout rate.
    fn drop_rate(&self) -> f64;

    /// Get the stochastic-depth rate.
    fn drop_path_rate(&self) -> f64;
}

/// Configuration for [`TransCnnBlock`].
#[derive(Config, Debug)]
pub struct TransCnnBlockConfig {
    /// Input/output dimension size.
    pub d_input: usize,

    /// Per-head dimension size; must divide `d_input`.
    pub head_dim: usize,

    /// Attention grid size; 1 selects pure global attention.
    #[config(default = 1)]
    pub grid_size: usize,

    /// Coarse-branch downsample ratio.
    #[config(default = 1)]
    pub ds_ratio: usize,

    /// Feed-forward expansion factor.
    #[config(default = 4)]
    pub expansion: usize,

    /// Depthwise kernel size.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Channel dropout rate.
    #[config(default = 0.0)]
    pub drop_rate: f64,

    /// Stochastic-depth rate.
    #[config(default = 0.0)]
    pub drop_path_rate: f64,

    /// Activation kind.
    #[config(default = "ActivationConfig::Silu")]
    pub activation: ActivationConfig,

    /// Normalization kind.
    #[config(default = "Norm2dConfig::BatchNorm")]
    pub norm: Norm2dConfig,
}

impl TransCnnBlockMeta for TransCnnBlockConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn head_dim(&self) -> usize {
        self.head_dim
    }

    fn grid_size(&self) -> usize {
        self.grid_size
    }

    fn ds_ratio(&self) -> usize {
        self.ds_ratio
    }

    fn expansion(&self) -> usize {
        self.expansion
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    fn drop_path_rate(&self) -> f64 {
        self.drop_path_rate
    }
}

impl TransCnnBlockConfig {
    /// Initializes a new [`TransCnnBlock`].
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> TransCnnBlock<B> {
        let attn = AttentionConfig::new(self.d_input, self.head_dim)
            .with_grid_size(self.grid_size)
            .with_ds_ratio(self.ds_ratio)
            .with_drop_rate(self.drop_rate)
            .with_norm(self.norm.clone())
            .init(device);

        let conv = InvertedResidualConfig::new(self.d_input)
            .with_d_hidden(Some(self.d_input * self.expansion))
            .with_d_output(Some(self.d_input))
            .with_kernel_size(self.kernel_size)
            .with_drop_rate(self.drop_rate)
            .with_activation(self.activation.clone())
            .with_norm(self.norm.clone())
            .init(device);

        TransCnnBlock {
            drop_path: DropPathConfig::new()
                .with_drop_prob(self.drop_path_rate)
                .init(),
            attn,
            conv,
        }
    }
}

/// One backbone block: `x + drop_path(attn(x))`, then
/// `x + drop_path(conv(x))`.
///
/// The two branches share a rate but draw independent per-sample gates.
#[derive(Module, Debug)]
pub struct TransCnnBlock<B: Backend> {
    /// Stochastic-depth gate, shared rate for both branches.
    pub drop_path: DropPath,

    /// The attention sublayer.
    pub attn: Attention<B>,

    /// The inverted-residual feed-forward sublayer.
    pub conv: InvertedResidual<B>,
}

impl<B: Backend> TransCnnBlockMeta for TransCnnBlock<B> {
    fn d_input(&self) -> usize {
        self.attn.d_input()
    }

    fn head_dim(&self) -> usize {
        self.attn.head_dim()
    }

    fn grid_size(&self) -> usize {
        self.attn.grid_size()
    }

    fn ds_ratio(&self) -> usize {
        self.attn.ds_ratio()
    }

    fn expansion(&self) -> usize {
        self.conv.d_hidden() / self.conv.d_input()
    }

    fn kernel_size(&self) -> usize {
        self.conv.kernel_size()
    }

    fn drop_rate(&self) -> f64 {
        self.conv.drop_rate()
    }

    fn drop_path_rate(&self) -> f64 {
        self.drop_path.drop_prob
    }
}

impl<B: Backend> TransCnnBlock<B> {
    /// Applies the block.
    ///
    /// # Shapes
    ///
    /// - input: `(N, C, H, W)`
    /// - output: `(N, C, H, W)`
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.drop_path.with_skip(x, |x| self.attn.forward(x));
        self.drop_path.with_skip(x, |x| self.conv.forward(x))
    }
}

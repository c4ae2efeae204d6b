//! Inverted-residual convolution block, used as the feed-forward sublayer.

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::drop::{ChannelDrop, ChannelDropConfig};
use crate::layers::norm::{Norm2d, Norm2dConfig};
use crate::models::transcnn::init::init_conv2d;
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for [`InvertedResidual`].
pub trait InvertedResidualMeta {
    /// Get the input dimension size.
    fn d_input(&self) -> usize;

    /// Get the expanded hidden dimension size.
    fn d_hidden(&self) -> usize;

    /// Get the output dimension size.
    fn d_output(&self) -> usize;

    /// Get the depthwise kernel size.
    fn kernel_size(&self) -> usize;

    /// Get the channel dropout rate.
    fn drop_rate(&self) -> f64;
}

/// Configuration for [`InvertedResidual`].
///
/// `d_hidden` and `d_output` default to `d_input`; the optional fields are
/// resolved to concrete widths before any weight is allocated.
#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    /// Input dimension size.
    pub d_input: usize,

    /// Expanded hidden dimension size; defaults to `d_input`.
    #[config(default = "None")]
    pub d_hidden: Option<usize>,

    /// Output dimension size; defaults to `d_input`.
    #[config(default = "None")]
    pub d_output: Option<usize>,

    /// Depthwise kernel size; must be odd so the block is shape-preserving.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Channel dropout rate.
    #[config(default = 0.0)]
    pub drop_rate: f64,

    /// Activation kind.
    #[config(default = "ActivationConfig::Silu")]
    pub activation: ActivationConfig,

    /// Normalization kind.
    #[config(default = "Norm2dConfig::BatchNorm")]
    pub norm: Norm2dConfig,
}

impl InvertedResidualMeta for InvertedResidualConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_hidden(&self) -> usize {
        self.d_hidden.unwrap_or(self.d_input)
    }

    fn d_output(&self) -> usize {
        self.d_output.unwrap_or(self.d_input)
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn drop_rate(&self) -> f64 {
        self.drop_rate
    }
}

impl InvertedResidualConfig {
    /// Initializes a new [`InvertedResidual`] block.
    ///
    /// # Panics
    ///
    /// If the kernel size is even.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> InvertedResidual<B> {
        assert!(
            self.kernel_size % 2 == 1,
            "kernel_size must be odd to preserve the spatial extent: {self:#?}"
        );

        let d_input = self.d_input();
        let d_hidden = self.d_hidden();
        let d_output = self.d_output();
        let pad = (self.kernel_size - 1) / 2;

        InvertedResidual {
            expand: init_conv2d(
                Conv2dConfig::new([d_input, d_hidden], [1, 1]).with_bias(false),
                device,
            ),
            expand_norm: self.norm.init(d_hidden, device),
            depthwise: init_conv2d(
                Conv2dConfig::new([d_hidden, d_hidden], [self.kernel_size, self.kernel_size])
                    .with_padding(PaddingConfig2d::Explicit(pad, pad))
                    .with_groups(d_hidden)
                    .with_bias(false),
                device,
            ),
            depthwise_norm: self.norm.init(d_hidden, device),
            project: init_conv2d(
                Conv2dConfig::new([d_hidden, d_output], [1, 1]).with_bias(false),
                device,
            ),
            project_norm: self.norm.init(d_output, device),
            act: self.activation.init(device),
            drop: ChannelDropConfig::new()
                .with_drop_prob(self.drop_rate)
                .init(),
        }
    }
}

/// Inverted residual block: expand, depthwise, project.
///
/// Pointwise expansion and projection are bias-free (each is followed by a
/// norm); the depthwise convolution does the spatial mixing. No residual
/// is added here; the caller wires the skip connection.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    /// Pointwise expansion, `C_in -> hidden`.
    pub expand: Conv2d<B>,

    /// Normalization after expansion.
    pub expand_norm: Norm2d<B>,

    /// Depthwise convolution, `groups = hidden`.
    pub depthwise: Conv2d<B>,

    /// Normalization after the depthwise convolution.
    pub depthwise_norm: Norm2d<B>,

    /// Pointwise projection, `hidden -> C_out`.
    pub project: Conv2d<B>,

    /// Normalization after projection.
    pub project_norm: Norm2d<B>,

    /// Activation after the expansion and depthwise norms.
    pub act: Activation<B>,

    /// Channel dropout, applied after the depthwise stack and again after
    /// projection.
    pub drop: ChannelDrop,
}

impl<B: Backend> InvertedResidualMeta for InvertedResidual<B> {
    fn d_input(&self) -> usize {
        self.expand.weight.dims()[1] * self.expand.groups
    }

    fn d_hidden(&self) -> usize {
        self.depthwise.weight.dims()[0]
    }

    fn d_output(&self) -> usize {
        self.project.weight.dims()[0]
    }

    fn kernel_size(&self) -> usize {
        self.depthwise.weight.dims()[2]
    }

    fn drop_rate(&self) -> f64 {
        self.drop.drop_prob
    }
}

impl<B: Backend> InvertedResidual<B> {
    /// Applies the block.
    ///
    /// # Shapes
    ///
    /// - input: `(N, C_in, H, W)`
    /// - output: `(N, C_out, H, W)`
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.act.forward(self.expand_norm.forward(self.expand.forward(x)));
        let x = self.act.forward(self.depthwise_norm.forward(self.depthwise.forward(x)));
        let x = self.drop.forward(x);
        let x = self.project_norm.forward(self.project.forward(x));
        self.drop.forward(x)
    }
}

//! Hybrid grid / pooled-global self-attention over channel-first feature
//! maps.
//!
//! The operating mode is resolved once, at construction, from the grid
//! size:
//!
//! - `grid_size == 1` builds a [`GlobalAttention`]: plain scaled
//!   dot-product attention over all `H * W` positions.
//! - `grid_size > 1` builds a [`GridGlobalAttention`]: windowed attention
//!   inside non-overlapping `grid_size` x `grid_size` cells, fused back at
//!   full resolution, followed by attention of every full-resolution query
//!   against an average-pooled coarse key/value set.
//!
//! The second form costs `O(H*W * grid_size^2 + (H*W)^2 / ds_ratio^2)`
//! instead of `O((H*W)^2)`, which is what makes attention affordable in
//! the early, high-resolution pyramid stages.

use crate::layers::drop::{ChannelDrop, ChannelDropConfig};
use crate::layers::norm::{Norm2d, Norm2dConfig};
use crate::models::transcnn::griding::{
    flatten_heads, grid_partition_heads, grid_reverse_heads, unflatten_heads,
};
use crate::models::transcnn::init::init_conv2d;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;

/// Scaled dot-product attention probabilities.
///
/// The logits are scaled by `scale` *before* the softmax; the softmax runs
/// over the key axis, so every query row is a probability distribution.
///
/// ## Shapes
///
/// - `q`: `(..., n_queries, head_dim)`
/// - `k`: `(..., n_keys, head_dim)`
/// - output: `(..., n_queries, n_keys)`
#[must_use]
pub fn attention_probs<B: Backend, const D: usize>(
    q: Tensor<B, D>,
    k: Tensor<B, D>,
    scale: f64,
) -> Tensor<B, D> {
    softmax(q.matmul(k.swap_dims(D - 2, D - 1)).mul_scalar(scale), D - 1)
}

/// Common introspection interface for the attention operator.
pub trait AttentionMeta {
    /// Get the input/channel dimension size.
    fn d_input(&self) -> usize;

    /// Get the per-head dimension size.
    fn head_dim(&self) -> usize;

    /// Get the number of attention heads.
    fn num_heads(&self) -> usize {
        self.d_input() / self.head_dim()
    }

    /// Get the softmax logit scale, `head_dim^-0.5`.
    fn scale(&self) -> f64 {
        (self.head_dim() as f64).powf(-0.5)
    }

    /// Get the grid window edge length; 1 means pure global attention.
    fn grid_size(&self) -> usize;

    /// Is the windowed-local stage enabled?
    fn grid_enabled(&self) -> bool {
        self.grid_size() > 1
    }

    /// Get the coarse-branch downsample ratio.
    fn ds_ratio(&self) -> usize;

    /// Get the channel dropout rate applied after projection.
    fn drop_rate(&self) -> f64;
}

/// Configuration for the [`Attention`] operator.
#[derive(Config, Debug)]
pub struct AttentionConfig {
    /// Input/channel dimension size.
    pub d_input: usize,

    /// Per-head dimension size; must divide `d_input`.
    pub head_dim: usize,

    /// Grid window edge length; 1 selects pure global attention.
    #[config(default = 1)]
    pub grid_size: usize,

    /// Coarse-branch downsample ratio; only used when `grid_size > 1`.
    #[config(default = 1)]
    pub ds_ratio: usize,

    /// Channel dropout rate applied after projection.
    #[config(default = 0.0)]
    pub drop_rate: f64,

    /// Normalization kind.
    #[config(default = "Norm2dConfig::BatchNorm")]
    pub norm: Norm2dConfig,
}

impl AttentionMeta for AttentionConfig {
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

    fn drop_rate(&self) -> f64 {
        self.drop_rate
    }
}

impl AttentionConfig {
    #[inline(always)]
    fn check(&self) {
        assert!(
            self.head_dim > 0 && self.d_input % self.head_dim == 0,
            "d_input must be a positive multiple of head_dim: {self:#?}"
        );
        assert!(
            self.grid_size > 0 && self.ds_ratio > 0,
            "grid_size and ds_ratio must be positive: {self:#?}"
        );
    }

    /// Initializes the attention operator.
    ///
    /// The operating mode is fixed here, once, from `grid_size`; the
    /// forward pass never re-inspects it.
    ///
    /// # Panics
    ///
    /// If `d_input` is not a positive multiple of `head_dim`.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Attention<B> {
        self.check();

        let num_heads = self.num_heads();
        let head_dim = self.head_dim;
        let scale = self.scale();

        let norm = self.norm.init(self.d_input, device);
        let qkv = init_conv2d(
            Conv2dConfig::new([self.d_input, self.d_input * 3], [1, 1]),
            device,
        );
        let proj = init_conv2d(
            Conv2dConfig::new([self.d_input, self.d_input], [1, 1]),
            device,
        );
        let drop = ChannelDropConfig::new()
            .with_drop_prob(self.drop_rate)
            .init();

        if self.grid_size == 1 {
            Attention::Global(GlobalAttention {
                num_heads,
                head_dim,
                scale,
                norm,
                qkv,
                proj,
                drop,
            })
        } else {
            Attention::Grid(GridGlobalAttention {
                num_heads,
                head_dim,
                scale,
                grid_size: self.grid_size,
                ds_ratio: self.ds_ratio,
                norm,
                qkv,
                grid_norm: self.norm.init(self.d_input, device),
                pool: AvgPool2dConfig::new([self.ds_ratio, self.ds_ratio])
                    .with_strides([self.ds_ratio, self.ds_ratio])
                    .init(),
                ds_norm: self.norm.init(self.d_input, device),
                q: init_conv2d(
                    Conv2dConfig::new([self.d_input, self.d_input], [1, 1]),
                    device,
                ),
                kv: init_conv2d(
                    Conv2dConfig::new([self.d_input, self.d_input * 2], [1, 1]),
                    device,
                ),
                proj,
                drop,
            })
        }
    }
}

/// The attention operator, with its mode fixed at construction.
#[derive(Module, Debug)]
pub enum Attention<B: Backend> {
    /// Pure global attention over all spatial positions.
    Global(GlobalAttention<B>),

    /// Windowed-local attention fused with pooled-global attention.
    Grid(GridGlobalAttention<B>),
}

impl<B: Backend> Attention<B> {
    /// Applies the attention operator.
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
        match self {
            Attention::Global(attn) => attn.forward(x),
            Attention::Grid(attn) => attn.forward(x),
        }
    }
}

impl<B: Backend> AttentionMeta for Attention<B> {
    fn d_input(&self) -> usize {
        match self {
            Attention::Global(attn) => attn.num_heads * attn.head_dim,
            Attention::Grid(attn) => attn.num_heads * attn.head_dim,
        }
    }

    fn head_dim(&self) -> usize {
        match self {
            Attention::Global(attn) => attn.head_dim,
            Attention::Grid(attn) => attn.head_dim,
        }
    }

    fn grid_size(&self) -> usize {
        match self {
            Attention::Global(_) => 1,
            Attention::Grid(attn) => attn.grid_size,
        }
    }

    fn ds_ratio(&self) -> usize {
        match self {
            Attention::Global(_) => 1,
            Attention::Grid(attn) => attn.ds_ratio,
        }
    }

    fn drop_rate(&self) -> f64 {
        match self {
            Attention::Global(attn) => attn.drop.drop_prob,
            Attention::Grid(attn) => attn.drop.drop_prob,
        }
    }
}

/// Pure global self-attention over all spatial positions.
///
/// Quadratic in `H * W`; used where the resolution is already small.
#[derive(Module, Debug)]
pub struct GlobalAttention<B: Backend> {
    /// Number of attention heads.
    pub num_heads: usize,

    /// Per-head dimension size.
    pub head_dim: usize,

    /// Softmax logit scale, `head_dim^-0.5`.
    pub scale: f64,

    /// Input normalization.
    pub norm: Norm2d<B>,

    /// Joint query/key/value projection, `C -> 3C`.
    pub qkv: Conv2d<B>,

    /// Output projection.
    pub proj: Conv2d<B>,

    /// Channel dropout after projection.
    pub drop: ChannelDrop,
}

impl<B: Backend> GlobalAttention<B> {
    /// Applies global attention.
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
        let [_, c, h, w] = x.dims();

        let qkv = self.qkv.forward(self.norm.forward(x));
        // (n, 3c, h, w)

        let q = flatten_heads(qkv.clone().narrow(1, 0, c), self.num_heads);
        let k = flatten_heads(qkv.clone().narrow(1, c, c), self.num_heads);
        let v = flatten_heads(qkv.narrow(1, 2 * c, c), self.num_heads);
        // (n, heads, h*w, head_dim)

        let attn = attention_probs(q, k, self.scale);
        // (n, heads, h*w, h*w)

        let x = unflatten_heads(attn.matmul(v), h, w);
        // (n, c, h, w)

        self.drop.forward(self.proj.forward(x))
    }
}

/// Windowed-local attention fused with attention against a pooled coarse
/// summary.
///
/// Every position gets exact context from its own window and approximate
/// global context from the coarse key/value set.
#[derive(Module, Debug)]
pub struct GridGlobalAttention<B: Backend> {
    /// Number of attention heads.
    pub num_heads: usize,

    /// Per-head dimension size.
    pub head_dim: usize,

    /// Softmax logit scale, `head_dim^-0.5`.
    pub scale: f64,

    /// Grid window edge length.
    pub grid_size: usize,

    /// Coarse-branch downsample ratio.
    pub ds_ratio: usize,

    /// Input normalization.
    pub norm: Norm2d<B>,

    /// Joint query/key/value projection for the windowed stage, `C -> 3C`.
    pub qkv: Conv2d<B>,

    /// Normalization of the fused windowed output.
    pub grid_norm: Norm2d<B>,

    /// Average pooling producing the coarse token set.
    pub pool: AvgPool2d,

    /// Normalization of the pooled coarse map.
    pub ds_norm: Norm2d<B>,

    /// Query projection for the pooled-global stage.
    pub q: Conv2d<B>,

    /// Joint key/value projection for the pooled-global stage, `C -> 2C`.
    pub kv: Conv2d<B>,

    /// Output projection.
    pub proj: Conv2d<B>,

    /// Channel dropout after projection.
    pub drop: ChannelDrop,
}

impl<B: Backend> GridGlobalAttention<B> {
    /// Applies windowed-local then pooled-global attention.
    ///
    /// `H` and `W` must be divisible by `grid_size`, and `H / grid_size`,
    /// `W / grid_size` by `ds_ratio`.
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
        run_every_nth!({
            static CONTRACT: ShapeContract = shape_contract!(
                "batch",
                "num_heads" * "head_dim",
                "h_cells" * "grid_size" * "ds_ratio",
                "w_cells" * "grid_size" * "ds_ratio"
            );
            CONTRACT.assert_shape(
                &x.dims(),
                &[
                    ("num_heads", self.num_heads),
                    ("head_dim", self.head_dim),
                    ("grid_size", self.grid_size),
                    ("ds_ratio", self.ds_ratio),
                ],
            );
        });

        let qkv = self.qkv.forward(self.norm.forward(x.clone()));
        // (n, 3c, h, w)

        let grid_x = self.local_attention(x, qkv);
        // (n, c, h, w), locally attended, residual-fused, normalized

        let x = self.pooled_global_attention(grid_x.clone()) + grid_x;

        self.drop.forward(self.proj.forward(x))
    }

    /// Windowed attention, restricted to tokens inside the same grid cell,
    /// fused back at full resolution: `grid_norm(input + attended)`.
    #[must_use]
    fn local_attention(
        &self,
        x: Tensor<B, 4>,
        qkv: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_, qkv_c, h, w] = qkv.dims();
        let c = qkv_c / 3;

        let q = grid_partition_heads(qkv.clone().narrow(1, 0, c), self.num_heads, self.grid_size);
        let k = grid_partition_heads(qkv.clone().narrow(1, c, c), self.num_heads, self.grid_size);
        let v = grid_partition_heads(qkv.narrow(1, 2 * c, c), self.num_heads, self.grid_size);
        // (n * heads * windows, grid_size^2, head_dim)

        let attn = attention_probs(q, k, self.scale);
        // (n * heads * windows, grid_size^2, grid_size^2)

        let grid = grid_reverse_heads(attn.matmul(v), self.num_heads, self.grid_size, h, w);
        // (n, c, h, w)

        self.grid_norm.forward(x + grid)
    }

    /// Full-resolution queries attending to the average-pooled coarse
    /// key/value set.
    #[must_use]
    fn pooled_global_attention(
        &self,
        grid_x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_, c, h, w] = grid_x.dims();

        let q = flatten_heads(self.q.forward(grid_x.clone()), self.num_heads);
        // (n, heads, h*w, head_dim)

        let kv = self.kv.forward(self.ds_norm.forward(self.pool.forward(grid_x)));
        // (n, 2c, h/ds, w/ds)

        let k = flatten_heads(kv.clone().narrow(1, 0, c), self.num_heads);
        let v = flatten_heads(kv.narrow(1, c, c), self.num_heads);
        // (n, heads, h*w/ds^2, head_dim)

        let attn = attention_probs(q, k, self.scale);
        // (n, heads, h*w, h*w/ds^2)

        unflatten_heads(attn.matmul(v), h, w)
        // (n, c, h, w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    fn max_abs_diff(
        a: Tensor<NdArray, 4>,
        b: Tensor<NdArray, 4>,
    ) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn test_attention_probs_rows_are_distributions() {
        let device = Default::default();

        let q = Tensor::<NdArray, 4>::random([2, 3, 5, 4], Distribution::Normal(0.0, 1.0), &device);
        let k = Tensor::<NdArray, 4>::random([2, 3, 7, 4], Distribution::Normal(0.0, 1.0), &device);

        let probs = attention_probs(q, k, (4.0f64).powf(-0.5));
        assert_eq!(probs.dims(), [2, 3, 5, 7]);

        let min: f32 = probs.clone().min().into_scalar();
        assert!(min >= 0.0, "negative attention weight: {min}");

        let row_sums = probs.sum_dim(3);
        let worst: f32 = row_sums.sub_scalar(1.0).abs().max().into_scalar();
        assert!(worst < 1e-5, "rows do not sum to 1: off by {worst}");
    }

    #[test]
    fn test_attention_probs_windowed_layout() {
        let device = Default::default();

        let q = Tensor::<NdArray, 3>::random([6, 4, 8], Distribution::Normal(0.0, 1.0), &device);
        let k = q.clone();

        let probs = attention_probs(q, k, (8.0f64).powf(-0.5));
        assert_eq!(probs.dims(), [6, 4, 4]);

        let worst: f32 = probs.sum_dim(2).sub_scalar(1.0).abs().max().into_scalar();
        assert!(worst < 1e-5);
    }

    #[test]
    fn test_global_attention_shape() {
        let device = Default::default();

        let config = AttentionConfig::new(12, 4);
        assert_eq!(config.num_heads(), 3);
        assert!(!config.grid_enabled());

        let attn = config.init::<NdArray>(&device);
        assert!(matches!(attn, Attention::Global(_)));

        let x = Tensor::<NdArray, 4>::random(
            [2, 12, 6, 5],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        assert_eq!(attn.forward(x.clone()).dims(), x.dims());
    }

    #[test]
    fn test_grid_attention_shape() {
        let device = Default::default();

        let config = AttentionConfig::new(8, 4).with_grid_size(4).with_ds_ratio(2);
        let attn = config.init::<NdArray>(&device);
        assert!(matches!(attn, Attention::Grid(_)));
        assert_eq!(attn.grid_size(), 4);
        assert_eq!(attn.ds_ratio(), 2);

        let x = Tensor::<NdArray, 4>::random(
            [2, 8, 8, 16],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        assert_eq!(attn.forward(x.clone()).dims(), x.dims());
    }

    /// Global attention has no positional bias: a consistent spatial
    /// permutation of the input permutes the output the same way.
    #[test]
    fn test_global_attention_permutation_equivariance() {
        let device = Default::default();

        let attn = AttentionConfig::new(8, 4).init::<NdArray>(&device);

        let x = Tensor::<NdArray, 4>::random(
            [2, 8, 4, 6],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let flipped_out = attn.forward(x.clone().flip([3]));
        let out_flipped = attn.forward(x).flip([3]);

        let diff = max_abs_diff(flipped_out, out_flipped);
        assert!(diff < 1e-4, "not permutation-equivariant: diff {diff}");
    }

    /// One window covering everything makes the local stage a full global
    /// pass; with `ds_ratio = 1` the coarse branch is unpooled too. The
    /// composite must still be well-formed and finite.
    #[test]
    fn test_full_extent_grid_smoke() {
        let device = Default::default();

        let h = 4;
        let config = AttentionConfig::new(8, 4).with_grid_size(h).with_ds_ratio(1);
        let attn = config.init::<NdArray>(&device);

        let x = Tensor::<NdArray, 4>::random(
            [2, 8, h, h],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let y = attn.forward(x.clone());
        assert_eq!(y.dims(), x.dims());

        let values = y.to_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    #[should_panic(expected = "d_input must be a positive multiple of head_dim")]
    fn test_indivisible_heads() {
        let device: <NdArray as Backend>::Device = Default::default();
        let _attn = AttentionConfig::new(10, 4).init::<NdArray>(&device);
    }
}

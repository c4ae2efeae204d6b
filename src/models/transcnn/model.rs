//! The TransCNN backbone: a four-stage pyramid of grid/global attention
//! blocks and inverted-residual convolutions, with a convolutional stem
//! and a linear classification head.

use crate::layers::activation::ActivationConfig;
use crate::layers::norm::Norm2dConfig;
use crate::models::transcnn::block::TransCnnBlockMeta;
use crate::models::transcnn::downsample::{Downsample, DownsampleConfig};
use crate::models::transcnn::error::{ConfigurationError, ShapeError};
use crate::models::transcnn::init::init_linear;
use crate::models::transcnn::schedule::StochasticDepthSchedule;
use crate::models::transcnn::stage::{Stage, StageConfig, StageMeta};
use crate::models::transcnn::stem::{ConvStem, ConvStemConfig, STEM_STRIDE};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for the TransCNN model.
pub trait TransCnnMeta {
    /// The square input image resolution the model was configured for.
    fn img_size(&self) -> usize;

    /// The number of input image channels.
    fn in_channels(&self) -> usize;

    /// The number of output classes.
    fn num_classes(&self) -> usize;

    /// The intermediate stem width.
    fn stem_width(&self) -> usize;

    /// Per-stage channel widths.
    fn dims(&self) -> Vec<usize>;

    /// The per-head dimension size, shared by all stages.
    fn head_dim(&self) -> usize;

    /// Per-stage feed-forward expansion factors.
    fn expansions(&self) -> Vec<usize>;

    /// Per-stage attention grid sizes.
    fn grid_sizes(&self) -> Vec<usize>;

    /// Per-stage coarse-branch downsample ratios.
    fn ds_ratios(&self) -> Vec<usize>;

    /// Per-stage block counts.
    fn depths(&self) -> Vec<usize>;

    /// Per-stage depthwise kernel sizes.
    fn kernel_sizes(&self) -> Vec<usize>;

    /// The number of stages.
    fn num_stages(&self) -> usize {
        self.depths().len()
    }

    /// Channel dropout rate.
    fn drop_rate(&self) -> f64;

    /// Maximum stochastic-depth rate.
    fn drop_path_rate(&self) -> f64;

    /// Classifier-head dropout rate.
    fn head_drop_rate(&self) -> f64;
}

/// Configuration for [`TransCnn`].
///
/// The defaults are the reference network's defaults; the named presets
/// ([`tiny`](TransCnnConfig::tiny), [`small`](TransCnnConfig::small),
/// [`medium`](TransCnnConfig::medium), [`large`](TransCnnConfig::large))
/// override them per model size.
#[derive(Config, Debug)]
pub struct TransCnnConfig {
    /// Square input image resolution.
    #[config(default = 256)]
    pub img_size: usize,

    /// Number of input image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// Number of output classes.
    #[config(default = 1000)]
    pub num_classes: usize,

    /// Intermediate stem width.
    #[config(default = 16)]
    pub stem_width: usize,

    /// Per-stage channel widths.
    #[config(default = "vec![64, 128, 256, 512]")]
    pub dims: Vec<usize>,

    /// Per-head dimension size; must divide every stage width.
    #[config(default = 32)]
    pub head_dim: usize,

    /// Per-stage feed-forward expansion factors.
    #[config(default = "vec![4, 4, 6, 6]")]
    pub expansions: Vec<usize>,

    /// Per-stage attention grid sizes; 1 selects pure global attention.
    #[config(default = "vec![1, 1, 1, 1]")]
    pub grid_sizes: Vec<usize>,

    /// Per-stage coarse-branch downsample ratios.
    #[config(default = "vec![8, 4, 2, 1]")]
    pub ds_ratios: Vec<usize>,

    /// Per-stage block counts.
    #[config(default = "vec![3, 4, 8, 3]")]
    pub depths: Vec<usize>,

    /// Per-stage depthwise kernel sizes.
    #[config(default = "vec![5, 3, 5, 3]")]
    pub kernel_sizes: Vec<usize>,

    /// Channel dropout rate.
    #[config(default = 0.0)]
    pub drop_rate: f64,

    /// Maximum stochastic-depth rate, reached by the final block.
    #[config(default = 0.0)]
    pub drop_path_rate: f64,

    /// Classifier-head dropout rate.
    #[config(default = 0.2)]
    pub head_drop_rate: f64,

    /// Activation kind.
    #[config(default = "ActivationConfig::Silu")]
    pub activation: ActivationConfig,

    /// Normalization kind.
    #[config(default = "Norm2dConfig::BatchNorm")]
    pub norm: Norm2dConfig,
}

impl TransCnnMeta for TransCnnConfig {
    fn img_size(&self) -> usize {
        self.img_size
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn stem_width(&self) -> usize {
        self.stem_width
    }

    fn dims(&self) -> Vec<usize> {
        self.dims.clone()
    }

    fn head_dim(&self) -> usize {
        self.head_dim
    }

    fn expansions(&self) -> Vec<usize> {
        self.expansions.clone()
    }

    fn grid_sizes(&self) -> Vec<usize> {
        self.grid_sizes.clone()
    }

    fn ds_ratios(&self) -> Vec<usize> {
        self.ds_ratios.clone()
    }

    fn depths(&self) -> Vec<usize> {
        self.depths.clone()
    }

    fn kernel_sizes(&self) -> Vec<usize> {
        self.kernel_sizes.clone()
    }

    fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    fn drop_path_rate(&self) -> f64 {
        self.drop_path_rate
    }

    fn head_drop_rate(&self) -> f64 {
        self.head_drop_rate
    }
}

/// The resolved shape plan of a validated configuration.
#[derive(Debug)]
pub struct TransCnnPlan {
    /// Attention-time resolution of each stage, as `[height, width]`.
    pub stage_resolutions: Vec<[usize; 2]>,

    /// Channel width of each stage.
    pub stage_dims: Vec<usize>,

    /// Total block count across all stages.
    pub total_depth: usize,
}

impl TransCnnConfig {
    /// The Tiny preset.
    #[must_use]
    pub fn tiny() -> Self {
        Self::new()
            .with_dims(vec![64, 128, 256, 512])
            .with_head_dim(64)
            .with_expansions(vec![4, 4, 4, 4])
            .with_grid_sizes(vec![8, 8, 8, 1])
            .with_ds_ratios(vec![8, 4, 2, 1])
            .with_depths(vec![2, 2, 4, 2])
    }

    /// The Small preset.
    #[must_use]
    pub fn small() -> Self {
        Self::new()
            .with_dims(vec![64, 128, 256, 512])
            .with_head_dim(64)
            .with_expansions(vec![4, 4, 6, 6])
            .with_grid_sizes(vec![8, 8, 8, 1])
            .with_ds_ratios(vec![8, 4, 2, 1])
            .with_depths(vec![3, 4, 8, 3])
    }

    /// The Medium preset.
    #[must_use]
    pub fn medium() -> Self {
        Self::small()
            .with_dims(vec![64, 128, 320, 640])
            .with_depths(vec![3, 4, 12, 3])
    }

    /// The Large preset.
    #[must_use]
    pub fn large() -> Self {
        Self::small()
            .with_dims(vec![64, 128, 384, 768])
            .with_depths(vec![3, 4, 16, 3])
    }

    /// Check config validity and resolve the model's shape plan.
    ///
    /// Performs every constraint check without allocating any weight, so
    /// an invalid configuration fails fast and loudly.
    pub fn validate(&self) -> Result<TransCnnPlan, ConfigurationError> {
        let num_stages = self.dims.len();
        if num_stages == 0 {
            return Err(ConfigurationError::NoStages);
        }

        for (field, len) in [
            ("expansions", self.expansions.len()),
            ("grid_sizes", self.grid_sizes.len()),
            ("ds_ratios", self.ds_ratios.len()),
            ("depths", self.depths.len()),
            ("kernel_sizes", self.kernel_sizes.len()),
        ] {
            if len != num_stages {
                return Err(ConfigurationError::StageArityMismatch {
                    field,
                    expected: num_stages,
                    actual: len,
                });
            }
        }

        for (field, value) in [
            ("drop_rate", self.drop_rate),
            ("drop_path_rate", self.drop_path_rate),
            ("head_drop_rate", self.head_drop_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidRate { field, value });
            }
        }

        if self.img_size % STEM_STRIDE != 0 {
            return Err(ConfigurationError::IndivisibleStem {
                img_size: self.img_size,
                stride: STEM_STRIDE,
            });
        }

        let mut stage_resolutions = Vec::with_capacity(num_stages);
        let mut extent = self.img_size / STEM_STRIDE;

        for stage in 0..num_stages {
            if self.dims[stage] % self.head_dim != 0 {
                return Err(ConfigurationError::IndivisibleHeads {
                    stage,
                    dim: self.dims[stage],
                    head_dim: self.head_dim,
                });
            }
            if self.depths[stage] == 0 {
                return Err(ConfigurationError::EmptyStage { stage });
            }

            if stage > 0 {
                // Evenness was checked when the previous stage was planned.
                extent /= 2;
            }
            let resolution = [extent, extent];

            if extent == 0 {
                return Err(ConfigurationError::OddTransition { stage, resolution });
            }

            let grid_size = self.grid_sizes[stage];
            if grid_size == 0 || extent % grid_size != 0 {
                return Err(ConfigurationError::IndivisibleGrid {
                    stage,
                    resolution,
                    grid_size,
                });
            }

            if grid_size > 1 {
                let ds_ratio = self.ds_ratios[stage];
                let cells = extent / grid_size;
                if ds_ratio == 0 || cells % ds_ratio != 0 {
                    return Err(ConfigurationError::IndivisiblePool {
                        stage,
                        grid_extent: [cells, cells],
                        ds_ratio,
                    });
                }
            }

            if stage + 1 < num_stages && extent % 2 != 0 {
                return Err(ConfigurationError::OddTransition {
                    stage,
                    resolution,
                });
            }

            stage_resolutions.push(resolution);
        }

        Ok(TransCnnPlan {
            stage_resolutions,
            stage_dims: self.dims.clone(),
            total_depth: self.depths.iter().sum(),
        })
    }

    /// Initialize a new [`TransCnn`] model.
    ///
    /// # Panics
    ///
    /// If [`validate`](Self::validate) rejects the configuration.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> TransCnn<B> {
        let _plan = self.validate().unwrap();

        let stem = ConvStemConfig::new(self.in_channels, self.stem_width, self.dims[0])
            .with_activation(self.activation.clone())
            .with_norm(self.norm.clone())
            .init(device);

        let stage_rates = StochasticDepthSchedule::rates_for(self.drop_path_rate, &self.depths);

        let stages: Vec<Stage<B>> = (0..self.dims.len())
            .map(|stage| {
                StageConfig::new(self.dims[stage], self.head_dim, self.depths[stage])
                    .with_grid_size(self.grid_sizes[stage])
                    .with_ds_ratio(self.ds_ratios[stage])
                    .with_expansion(self.expansions[stage])
                    .with_kernel_size(self.kernel_sizes[stage])
                    .with_drop_rate(self.drop_rate)
                    .with_drop_path_rates(Some(stage_rates[stage].clone()))
                    .with_activation(self.activation.clone())
                    .with_norm(self.norm.clone())
                    .init(device)
            })
            .collect();

        let downsamples: Vec<Downsample<B>> = (0..self.dims.len() - 1)
            .map(|stage| {
                DownsampleConfig::new(self.dims[stage], self.dims[stage + 1])
                    .with_activation(self.activation.clone())
                    .with_norm(self.norm.clone())
                    .init(device)
            })
            .collect();

        TransCnn {
            img_size: self.img_size,
            drop_path_rate: self.drop_path_rate,
            stem,
            stages,
            downsamples,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head_drop: DropoutConfig::new(self.head_drop_rate).init(),
            head: init_linear(
                LinearConfig::new(*self.dims.last().unwrap(), self.num_classes),
                device,
            ),
        }
    }
}

/// The TransCNN model.
///
/// Forward computation is pure: it reads weights and writes only its own
/// intermediates, so concurrent inference over shared weights needs no
/// synchronization. The only mutation the model supports is
/// [`reschedule_drop_path`](Self::reschedule_drop_path), which requires
/// `&mut self` and therefore cannot overlap a forward pass.
#[derive(Module, Debug)]
pub struct TransCnn<B: Backend> {
    /// Configured square input resolution.
    pub img_size: usize,

    /// Maximum stochastic-depth rate currently scheduled.
    pub drop_path_rate: f64,

    /// Convolutional stem, net stride 4.
    pub stem: ConvStem<B>,

    /// The pyramid stages.
    pub stages: Vec<Stage<B>>,

    /// Stage transitions, one between each pair of adjacent stages.
    pub downsamples: Vec<Downsample<B>>,

    /// Global average pooling over the final feature map.
    pub pool: AdaptiveAvgPool2d,

    /// Classifier-head dropout.
    pub head_drop: Dropout,

    /// Linear classifier.
    pub head: Linear<B>,
}

impl<B: Backend> TransCnnMeta for TransCnn<B> {
    fn img_size(&self) -> usize {
        self.img_size
    }

    fn in_channels(&self) -> usize {
        self.stem.d_input()
    }

    fn num_classes(&self) -> usize {
        self.head.weight.dims()[1]
    }

    fn stem_width(&self) -> usize {
        self.stem.conv1.weight.dims()[0]
    }

    fn dims(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.d_input()).collect()
    }

    fn head_dim(&self) -> usize {
        self.stages[0].blocks[0].head_dim()
    }

    fn expansions(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.blocks[0].expansion()).collect()
    }

    fn grid_sizes(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.blocks[0].grid_size()).collect()
    }

    fn ds_ratios(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.blocks[0].ds_ratio()).collect()
    }

    fn depths(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.depth()).collect()
    }

    fn kernel_sizes(&self) -> Vec<usize> {
        self.stages
            .iter()
            .map(|s| s.blocks[0].kernel_size())
            .collect()
    }

    fn drop_rate(&self) -> f64 {
        self.stages[0].blocks[0].drop_rate()
    }

    fn drop_path_rate(&self) -> f64 {
        self.drop_path_rate
    }

    fn head_drop_rate(&self) -> f64 {
        self.head_drop.prob
    }
}

impl<B: Backend> TransCnn<B> {
    /// Checks that a concrete input shape is consumable by this model.
    ///
    /// The input resolution need not match the configured `img_size`, but
    /// it must satisfy the same stride, grid, pool, and transition
    /// divisibility constraints.
    pub fn check_input(
        &self,
        dims: [usize; 4],
    ) -> Result<(), ShapeError> {
        let [_, c, h, w] = dims;

        if c != self.in_channels() {
            return Err(ShapeError::ChannelMismatch {
                expected: self.in_channels(),
                actual: c,
            });
        }

        if h % STEM_STRIDE != 0 || w % STEM_STRIDE != 0 {
            return Err(ShapeError::indivisible(
                [h, w],
                format!("stem stride {STEM_STRIDE} does not divide the extent"),
            ));
        }

        let mut extent = [h / STEM_STRIDE, w / STEM_STRIDE];

        for (stage, stage_mod) in self.stages.iter().enumerate() {
            if stage > 0 {
                extent = [extent[0] / 2, extent[1] / 2];
            }

            if extent[0] == 0 || extent[1] == 0 {
                return Err(ShapeError::indivisible(
                    [h, w],
                    format!("stage {stage} would see an empty feature map"),
                ));
            }

            let grid_size = stage_mod.blocks[0].grid_size();
            if extent[0] % grid_size != 0 || extent[1] % grid_size != 0 {
                return Err(ShapeError::indivisible(
                    [h, w],
                    format!(
                        "stage {stage} resolution {extent:?} is not divisible by grid size {grid_size}"
                    ),
                ));
            }

            if grid_size > 1 {
                let ds_ratio = stage_mod.blocks[0].ds_ratio();
                let cells = [extent[0] / grid_size, extent[1] / grid_size];
                if cells[0] % ds_ratio != 0 || cells[1] % ds_ratio != 0 {
                    return Err(ShapeError::indivisible(
                        [h, w],
                        format!(
                            "stage {stage} grid extent {cells:?} is not divisible by downsample ratio {ds_ratio}"
                        ),
                    ));
                }
            }

            if stage + 1 < self.stages.len() && (extent[0] % 2 != 0 || extent[1] % 2 != 0) {
                return Err(ShapeError::indivisible(
                    [h, w],
                    format!("stage {stage} resolution {extent:?} cannot be halved"),
                ));
            }
        }

        Ok(())
    }

    /// Applies the model without the classification head.
    ///
    /// # Arguments
    ///
    /// * `input`: A 4D image tensor of shape `(N, C, H, W)`.
    ///
    /// # Returns
    ///
    /// A 2D tensor of shape `(N, C_last)`: the globally pooled features of
    /// the final stage.
    #[must_use]
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        // Reject incompatible inputs before any computation runs.
        self.check_input(input.dims()).unwrap();

        let mut x = self.stem.forward(input);

        for stage in 0..self.stages.len() {
            if stage > 0 {
                x = self.downsamples[stage - 1].forward(x);
            }
            x = self.stages[stage].forward(x);
        }
        // (n, c_last, h_last, w_last)

        let x = self.pool.forward(x);
        // (n, c_last, 1, 1)

        x.flatten::<2>(1, 3)
        // (n, c_last)
    }

    /// Applies the model to an image batch and returns classification
    /// logits.
    ///
    /// # Arguments
    ///
    /// * `input`: A 4D image tensor of shape `(N, C, H, W)`.
    ///
    /// # Returns
    ///
    /// A 2D tensor of shape `(N, num_classes)`.
    #[must_use]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch, _, _, _] = input.dims();

        let features = self.forward_features(input);

        let logits = self.head.forward(self.head_drop.forward(features));

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract = shape_contract!("batch", "num_classes");
            OUTPUT_CONTRACT.assert_shape(
                &logits.dims(),
                &[("batch", batch), ("num_classes", self.num_classes())],
            );
        });

        logits
    }

    /// Recomputes every block's stochastic-depth rate from the linear
    /// schedule with a new maximum.
    ///
    /// Weights are untouched; only the per-block rate scalars change, in
    /// stage-major, depth-minor order.
    pub fn reschedule_drop_path(
        &mut self,
        drop_path_rate: f64,
    ) {
        let depths: Vec<usize> = self.stages.iter().map(|s| s.depth()).collect();
        let stage_rates = StochasticDepthSchedule::rates_for(drop_path_rate, &depths);

        for (stage, rates) in self.stages.iter_mut().zip(stage_rates) {
            stage.set_drop_path_rates(&rates);
        }

        self.drop_path_rate = drop_path_rate;
    }

    /// Every block's stochastic-depth rate, in stage-major, depth-minor
    /// order.
    #[must_use]
    pub fn drop_path_rates(&self) -> Vec<f64> {
        self.stages
            .iter()
            .flat_map(|s| s.drop_path_rates())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    /// A small valid configuration that keeps tests fast.
    fn small_test_config() -> TransCnnConfig {
        TransCnnConfig::new()
            .with_img_size(32)
            .with_num_classes(10)
            .with_stem_width(4)
            .with_dims(vec![8, 16])
            .with_head_dim(4)
            .with_expansions(vec![2, 2])
            .with_grid_sizes(vec![2, 1])
            .with_ds_ratios(vec![2, 1])
            .with_depths(vec![1, 1])
            .with_kernel_sizes(vec![3, 3])
    }

    #[test]
    fn test_config_defaults() {
        let config = TransCnnConfig::new();

        assert_eq!(config.img_size(), 256);
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.num_classes(), 1000);
        assert_eq!(config.stem_width(), 16);
        assert_eq!(config.dims(), vec![64, 128, 256, 512]);
        assert_eq!(config.head_dim(), 32);
        assert_eq!(config.expansions(), vec![4, 4, 6, 6]);
        assert_eq!(config.grid_sizes(), vec![1, 1, 1, 1]);
        assert_eq!(config.ds_ratios(), vec![8, 4, 2, 1]);
        assert_eq!(config.depths(), vec![3, 4, 8, 3]);
        assert_eq!(config.kernel_sizes(), vec![5, 3, 5, 3]);
        assert_eq!(config.drop_rate(), 0.0);
        assert_eq!(config.drop_path_rate(), 0.0);
        assert_eq!(config.head_drop_rate(), 0.2);
    }

    #[test]
    fn test_presets_validate() {
        for config in [
            TransCnnConfig::tiny(),
            TransCnnConfig::small(),
            TransCnnConfig::medium(),
            TransCnnConfig::large(),
        ] {
            let plan = config.validate().unwrap();
            assert_eq!(plan.stage_resolutions[0], [64, 64]);
            assert_eq!(plan.stage_resolutions[3], [8, 8]);
        }

        assert_eq!(TransCnnConfig::tiny().depths(), vec![2, 2, 4, 2]);
        assert_eq!(TransCnnConfig::medium().dims(), vec![64, 128, 320, 640]);
        assert_eq!(TransCnnConfig::large().dims(), vec![64, 128, 384, 768]);
    }

    #[test]
    fn test_validate_rejects_indivisible_heads() {
        let config = small_test_config().with_dims(vec![8, 18]);

        assert_eq!(
            config.validate().unwrap_err(),
            ConfigurationError::IndivisibleHeads {
                stage: 1,
                dim: 18,
                head_dim: 4,
            }
        );
    }

    #[test]
    fn test_validate_rejects_indivisible_grid() {
        let config = small_test_config().with_grid_sizes(vec![3, 1]);

        assert_eq!(
            config.validate().unwrap_err(),
            ConfigurationError::IndivisibleGrid {
                stage: 0,
                resolution: [8, 8],
                grid_size: 3,
            }
        );
    }

    #[test]
    fn test_validate_rejects_indivisible_pool() {
        let config = small_test_config().with_ds_ratios(vec![3, 1]);

        assert_eq!(
            config.validate().unwrap_err(),
            ConfigurationError::IndivisiblePool {
                stage: 0,
                grid_extent: [4, 4],
                ds_ratio: 3,
            }
        );
    }

    #[test]
    fn test_validate_rejects_arity_mismatch() {
        let config = small_test_config().with_depths(vec![1, 1, 1]);

        assert_eq!(
            config.validate().unwrap_err(),
            ConfigurationError::StageArityMismatch {
                field: "depths",
                expected: 2,
                actual: 3,
            }
        );
    }

    #[test]
    fn test_validate_rejects_invalid_rate() {
        let config = small_test_config().with_drop_path_rate(1.5);

        assert_eq!(
            config.validate().unwrap_err(),
            ConfigurationError::InvalidRate {
                field: "drop_path_rate",
                value: 1.5,
            }
        );
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();

        let config = small_test_config();
        let model: TransCnn<NdArray> = config.init(&device);

        assert_eq!(model.num_classes(), 10);
        assert_eq!(model.dims(), vec![8, 16]);
        assert_eq!(model.depths(), vec![1, 1]);
        assert_eq!(model.grid_sizes(), vec![2, 1]);

        let input = Tensor::<NdArray, 4>::random(
            [2, 3, 32, 32],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let logits = model.forward(input);

        assert_eq!(logits.dims(), [2, 10]);
    }

    #[test]
    fn test_forward_accepts_other_valid_resolutions() {
        let device = Default::default();

        let model: TransCnn<NdArray> = small_test_config().init(&device);

        // 64 satisfies every constraint the configured 32 does.
        let input = Tensor::<NdArray, 4>::random(
            [1, 3, 64, 64],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        assert_eq!(model.forward(input).dims(), [1, 10]);
    }

    #[test]
    fn test_check_input_errors() {
        let device = Default::default();

        let model: TransCnn<NdArray> = small_test_config().init(&device);

        assert_eq!(
            model.check_input([1, 4, 32, 32]).unwrap_err(),
            ShapeError::ChannelMismatch {
                expected: 3,
                actual: 4,
            }
        );

        assert!(matches!(
            model.check_input([1, 3, 30, 32]).unwrap_err(),
            ShapeError::IndivisibleExtent { .. }
        ));

        // 24/4 = 6 passes the stage-0 grid of 2, but its 3 grid cells are
        // not divisible by the stage-0 downsample ratio of 2.
        assert!(matches!(
            model.check_input([1, 3, 24, 24]).unwrap_err(),
            ShapeError::IndivisibleExtent { .. }
        ));
    }

    #[test]
    fn test_reschedule_drop_path() {
        let device = Default::default();

        let config = small_test_config()
            .with_depths(vec![2, 2])
            .with_drop_path_rate(0.3);
        let mut model: TransCnn<NdArray> = config.init(&device);

        let rates = model.drop_path_rates();
        assert_eq!(rates.len(), 4);
        assert_eq!(rates[0], 0.0);
        assert!((rates[3] - 0.3).abs() < 1e-9);

        model.reschedule_drop_path(0.0);
        assert!(model.drop_path_rates().iter().all(|&r| r == 0.0));
        assert_eq!(model.drop_path_rate(), 0.0);
    }

    #[test]
    fn test_inference_invariant_to_drop_path_rate() {
        let device = Default::default();

        let mut model: TransCnn<NdArray> = small_test_config()
            .with_drop_path_rate(0.5)
            .init(&device);

        let input = Tensor::<NdArray, 4>::random(
            [2, 3, 32, 32],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let before = model.forward(input.clone());
        model.reschedule_drop_path(0.0);
        let after = model.forward(input);

        // Inference disables the gates entirely, so the outputs are
        // bit-identical across reschedules.
        before.to_data().assert_eq(&after.to_data(), true);
    }

    /// End-to-end: the Tiny preset consumes a zero batch at full
    /// resolution and produces finite logits of the right shape.
    #[test]
    fn test_tiny_end_to_end() {
        let device = Default::default();

        let model: TransCnn<NdArray> = TransCnnConfig::tiny().init(&device);

        let input = Tensor::<NdArray, 4>::zeros([2, 3, 256, 256], &device);
        let logits = model.forward(input);

        assert_eq!(logits.dims(), [2, 1000]);

        let values = logits.to_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }
}

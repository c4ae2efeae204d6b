//! One pyramid stage: an ordered sequence of blocks at a fixed channel
//! width and resolution.

use crate::layers::activation::ActivationConfig;
use crate::layers::norm::Norm2dConfig;
use crate::models::transcnn::block::{TransCnnBlock, TransCnnBlockConfig, TransCnnBlockMeta};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for [`Stage`].
pub trait StageMeta {
    /// Get the stage channel width.
    fn d_input(&self) -> usize;

    /// Get the number of blocks in the stage.
    fn depth(&self) -> usize;

    /// Get the per-block stochastic-depth rates, in block order.
    fn drop_path_rates(&self) -> Vec<f64>;
}

/// Configuration for [`Stage`].
#[derive(Config, Debug)]
pub struct StageConfig {
    /// Stage channel width.
    pub d_input: usize,

    /// Per-head dimension size; must divide `d_input`.
    pub head_dim: usize,

    /// Number of blocks in the stage.
    pub depth: usize,

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

    /// Per-block stochastic-depth rates; one entry per block. Defaults to
    /// all-zero.
    #[config(default = "None")]
    pub drop_path_rates: Option<Vec<f64>>,

    /// Activation kind.
    #[config(default = "ActivationConfig::Silu")]
    pub activation: ActivationConfig,

    /// Normalization kind.
    #[config(default = "Norm2dConfig::BatchNorm")]
    pub norm: Norm2dConfig,
}

impl StageMeta for StageConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn drop_path_rates(&self) -> Vec<f64> {
        match self.drop_path_rates {
            Some(ref rates) => {
                assert_eq!(rates.len(), self.depth);
                rates.clone()
            }
            None => vec![0.0; self.depth],
        }
    }
}

impl StageConfig {
    /// Initializes a new [`Stage`].
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Stage<B> {
        let blocks = self
            .drop_path_rates()
            .into_iter()
            .map(|drop_path_rate| {
                TransCnnBlockConfig::new(self.d_input, self.head_dim)
                    .with_grid_size(self.grid_size)
                    .with_ds_ratio(self.ds_ratio)
                    .with_expansion(self.expansion)
                    .with_kernel_size(self.kernel_size)
                    .with_drop_rate(self.drop_rate)
                    .with_drop_path_rate(drop_path_rate)
                    .with_activation(self.activation.clone())
                    .with_norm(self.norm.clone())
                    .init(device)
            })
            .collect();

        Stage { blocks }
    }
}

/// A pyramid stage: `depth` blocks applied in sequence.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    /// The blocks, in application order.
    pub blocks: Vec<TransCnnBlock<B>>,
}

impl<B: Backend> StageMeta for Stage<B> {
    fn d_input(&self) -> usize {
        self.blocks[0].d_input()
    }

    fn depth(&self) -> usize {
        self.blocks.len()
    }

    fn drop_path_rates(&self) -> Vec<f64> {
        self.blocks.iter().map(|b| b.drop_path_rate()).collect()
    }
}

impl<B: Backend> Stage<B> {
    /// Applies the stage.
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
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }

    /// Rewrites every block's stochastic-depth rate, in block order.
    ///
    /// Touches only the per-block rate scalars, never weights. Requires
    /// exclusive access, so it cannot interleave with a running forward.
    pub fn set_drop_path_rates(
        &mut self,
        rates: &[f64],
    ) {
        assert_eq!(
            rates.len(),
            self.blocks.len(),
            "Expected one rate per block; got {} rates for {} blocks",
            rates.len(),
            self.blocks.len()
        );
        for (block, &rate) in self.blocks.iter_mut().zip(rates) {
            block.drop_path.drop_prob = rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stage_forward() {
        let device = Default::default();

        let config = StageConfig::new(8, 4, 2).with_grid_size(2).with_ds_ratio(2);
        let stage = config.init::<NdArray>(&device);

        assert_eq!(stage.d_input(), 8);
        assert_eq!(stage.depth(), 2);
        assert_eq!(stage.drop_path_rates(), vec![0.0, 0.0]);

        let x = Tensor::<NdArray, 4>::random(
            [2, 8, 8, 8],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        assert_eq!(stage.forward(x.clone()).dims(), x.dims());
    }

    #[test]
    fn test_set_drop_path_rates() {
        let device = Default::default();

        let config = StageConfig::new(8, 4, 3).with_drop_path_rates(Some(vec![0.0, 0.1, 0.2]));
        let mut stage = config.init::<NdArray>(&device);

        assert_eq!(stage.drop_path_rates(), vec![0.0, 0.1, 0.2]);

        stage.set_drop_path_rates(&[0.0, 0.0, 0.0]);
        assert_eq!(stage.drop_path_rates(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "Expected one rate per block")]
    fn test_rate_arity() {
        let device: <NdArray as Backend>::Device = Default::default();

        let mut stage = StageConfig::new(8, 4, 2).init::<NdArray>(&device);
        stage.set_drop_path_rates(&[0.1]);
    }
}

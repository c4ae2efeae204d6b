//! Error types for model construction and input validation.

use std::fmt::Display;

/// A model configuration that can never produce a valid module tree.
///
/// Raised at construction (or by [`validate`](super::TransCnnConfig::validate))
/// before any weight is allocated; never silently coerced.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A stage's channel width is not divisible by the head dimension.
    IndivisibleHeads {
        /// Stage index.
        stage: usize,
        /// Stage channel width.
        dim: usize,
        /// Configured head dimension.
        head_dim: usize,
    },

    /// A stage's attention resolution is not divisible by its grid size.
    IndivisibleGrid {
        /// Stage index.
        stage: usize,
        /// Stage resolution as `[height, width]`.
        resolution: [usize; 2],
        /// Configured grid size.
        grid_size: usize,
    },

    /// A stage's grid-reduced extent is not divisible by the coarse-branch
    /// downsample ratio.
    IndivisiblePool {
        /// Stage index.
        stage: usize,
        /// Grid-reduced extent as `[height, width]` in grid cells.
        grid_extent: [usize; 2],
        /// Configured downsample ratio.
        ds_ratio: usize,
    },

    /// A stage transition would see an odd spatial extent.
    OddTransition {
        /// Stage index feeding the transition.
        stage: usize,
        /// Stage resolution as `[height, width]`.
        resolution: [usize; 2],
    },

    /// The configured image size is not divisible by the stem stride.
    IndivisibleStem {
        /// Configured image size.
        img_size: usize,
        /// The stem's combined stride.
        stride: usize,
    },

    /// A stage was configured with zero blocks.
    EmptyStage {
        /// Stage index.
        stage: usize,
    },

    /// The configuration names no stages at all.
    NoStages,

    /// A per-stage parameter list does not match the number of stages.
    StageArityMismatch {
        /// Name of the offending field.
        field: &'static str,
        /// Expected number of stages.
        expected: usize,
        /// Actual list length.
        actual: usize,
    },

    /// A probability parameter lies outside `[0, 1]`.
    InvalidRate {
        /// Name of the offending field.
        field: &'static str,
        /// The offending value.
        value: f64,
    },
}

impl Display for ConfigurationError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ConfigurationError::IndivisibleHeads {
                stage,
                dim,
                head_dim,
            } => write!(
                f,
                "Stage {stage}: channel width {dim} is not divisible by head dimension {head_dim}"
            ),
            ConfigurationError::IndivisibleGrid {
                stage,
                resolution,
                grid_size,
            } => write!(
                f,
                "Stage {stage}: resolution {resolution:?} is not divisible by grid size {grid_size}"
            ),
            ConfigurationError::IndivisiblePool {
                stage,
                grid_extent,
                ds_ratio,
            } => write!(
                f,
                "Stage {stage}: grid extent {grid_extent:?} is not divisible by downsample ratio {ds_ratio}"
            ),
            ConfigurationError::OddTransition { stage, resolution } => write!(
                f,
                "Stage {stage}: resolution {resolution:?} cannot be halved by the stage transition"
            ),
            ConfigurationError::IndivisibleStem { img_size, stride } => write!(
                f,
                "Image size {img_size} is not divisible by the stem stride {stride}"
            ),
            ConfigurationError::EmptyStage { stage } => {
                write!(f, "Stage {stage} has zero blocks")
            }
            ConfigurationError::NoStages => {
                write!(f, "At least one stage is required")
            }
            ConfigurationError::StageArityMismatch {
                field,
                expected,
                actual,
            } => write!(
                f,
                "Per-stage field `{field}` has {actual} entries; expected {expected}"
            ),
            ConfigurationError::InvalidRate { field, value } => {
                write!(f, "Rate `{field}` = {value} lies outside [0, 1]")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// A concrete input tensor that the configured model cannot consume.
///
/// Raised at forward time, before any computation proceeds partway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// The input channel count does not match the configured one.
    ChannelMismatch {
        /// Configured input channel count.
        expected: usize,
        /// Channel count of the offered tensor.
        actual: usize,
    },

    /// The input spatial extent is incompatible with the stem stride and
    /// the per-stage grid/pool/transition constraints.
    IndivisibleExtent {
        /// Input extent as `[height, width]`.
        input: [usize; 2],
        /// Description of the violated constraint.
        constraint: String,
    },
}

impl Display for ShapeError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ShapeError::ChannelMismatch { expected, actual } => {
                write!(f, "Expected {expected} input channels, but got {actual}")
            }
            ShapeError::IndivisibleExtent { input, constraint } => {
                write!(f, "Input extent {input:?} is unusable: {constraint}")
            }
        }
    }
}

impl std::error::Error for ShapeError {}

impl ShapeError {
    /// Creates a [`ShapeError::IndivisibleExtent`] with a formatted
    /// constraint description.
    pub fn indivisible(
        input: [usize; 2],
        constraint: impl Into<String>,
    ) -> Self {
        ShapeError::IndivisibleExtent {
            input,
            constraint: constraint.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ConfigurationError::IndivisibleHeads {
            stage: 2,
            dim: 100,
            head_dim: 32,
        };
        assert_eq!(
            err.to_string(),
            "Stage 2: channel width 100 is not divisible by head dimension 32"
        );

        let err = ShapeError::indivisible([100, 100], "stem stride 4 does not divide 100");
        assert_eq!(
            err.to_string(),
            "Input extent [100, 100] is unusable: stem stride 4 does not divide 100"
        );
    }
}

//! Grid partitioning for channel-first feature maps.
//!
//! The attention operator works on `(N, C, H, W)` maps whose channel axis
//! factors as `(num_heads, head_dim)` and whose spatial axes factor as
//! `(grids, grid_size)` row-major. These helpers move between that layout
//! and the flat token layouts the attention math consumes.

use bimm_contracts::{ShapeContract, shape_contract};
use burn::prelude::{Backend, Tensor};

/// Grid partition.
///
/// Splits a feature map into non-overlapping `grid_size` x `grid_size`
/// windows and flattens each window into a token sequence, one sequence per
/// `(batch, head, window)` triple.
///
/// ## Parameters
///
/// - `tensor`: Input tensor of shape `(N, num_heads * head_dim, H, W)`.
/// - `num_heads`: Number of attention heads.
/// - `grid_size`: Window edge length; must divide both `H` and `W`.
///
/// ## Returns
///
/// Output tensor of shape
/// `(N * num_heads * h_grids * w_grids, grid_size * grid_size, head_dim)`.
#[must_use]
pub fn grid_partition_heads<B: Backend>(
    tensor: Tensor<B, 4>,
    num_heads: usize,
    grid_size: usize,
) -> Tensor<B, 3> {
    static CONTRACT: ShapeContract = shape_contract!(
        "batch",
        "num_heads" * "head_dim",
        "h_grids" * "grid_size",
        "w_grids" * "grid_size"
    );
    let [b, head_dim, h_grids, w_grids] = CONTRACT.unpack_shape(
        &tensor.dims(),
        &["batch", "head_dim", "h_grids", "w_grids"],
        &[("num_heads", num_heads), ("grid_size", grid_size)],
    );

    tensor
        .reshape([
            b,
            num_heads,
            head_dim,
            h_grids,
            grid_size,
            w_grids,
            grid_size,
        ])
        .permute([0, 1, 3, 5, 4, 6, 2])
        // (b, heads, h_grids, w_grids, grid_size, grid_size, head_dim)
        .reshape([
            b * num_heads * h_grids * w_grids,
            grid_size * grid_size,
            head_dim,
        ])
}

/// Grid reverse.
///
/// The inverse of [`grid_partition_heads`]: scatters per-window token
/// sequences back into a `(N, C, H, W)` feature map.
///
/// ## Parameters
///
/// - `grids`: Input tensor of shape
///   `(N * num_heads * h_grids * w_grids, grid_size * grid_size, head_dim)`.
/// - `num_heads`: Number of attention heads.
/// - `grid_size`: Window edge length.
/// - `h`: Height of the original feature map.
/// - `w`: Width of the original feature map.
///
/// ## Returns
///
/// Output tensor of shape `(N, num_heads * head_dim, H, W)`.
#[must_use]
pub fn grid_reverse_heads<B: Backend>(
    grids: Tensor<B, 3>,
    num_heads: usize,
    grid_size: usize,
    h: usize,
    w: usize,
) -> Tensor<B, 4> {
    let h_grids = h / grid_size;
    let w_grids = w / grid_size;

    static CONTRACT: ShapeContract = shape_contract!(
        "batch" * "num_heads" * "windows",
        "grid_size" * "grid_size",
        "head_dim"
    );
    let [b, head_dim] = CONTRACT.unpack_shape(
        &grids.dims(),
        &["batch", "head_dim"],
        &[
            ("num_heads", num_heads),
            ("windows", h_grids * w_grids),
            ("grid_size", grid_size),
        ],
    );

    grids
        .reshape([
            b,
            num_heads,
            h_grids,
            w_grids,
            grid_size,
            grid_size,
            head_dim,
        ])
        .permute([0, 1, 6, 2, 4, 3, 5])
        // (b, heads, head_dim, h_grids, grid_size, w_grids, grid_size)
        .reshape([b, num_heads * head_dim, h, w])
}

/// Flattens a feature map into one full-length token sequence per head.
///
/// ## Parameters
///
/// - `tensor`: Input tensor of shape `(N, num_heads * head_dim, H, W)`.
/// - `num_heads`: Number of attention heads.
///
/// ## Returns
///
/// Output tensor of shape `(N, num_heads, H * W, head_dim)`.
#[must_use]
pub fn flatten_heads<B: Backend>(
    tensor: Tensor<B, 4>,
    num_heads: usize,
) -> Tensor<B, 4> {
    let [b, c, h, w] = tensor.dims();
    let head_dim = c / num_heads;

    tensor
        .reshape([b, num_heads, head_dim, h * w])
        .swap_dims(2, 3)
}

/// The inverse of [`flatten_heads`].
///
/// ## Parameters
///
/// - `tokens`: Input tensor of shape `(N, num_heads, H * W, head_dim)`.
/// - `h`: Height of the original feature map.
/// - `w`: Width of the original feature map.
///
/// ## Returns
///
/// Output tensor of shape `(N, num_heads * head_dim, H, W)`.
#[must_use]
pub fn unflatten_heads<B: Backend>(
    tokens: Tensor<B, 4>,
    h: usize,
    w: usize,
) -> Tensor<B, 4> {
    let [b, num_heads, _, head_dim] = tokens.dims();

    tokens
        .swap_dims(2, 3)
        .reshape([b, num_heads * head_dim, h, w])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_grid_partition_round_trip() {
        let device = Default::default();

        let b = 2;
        let num_heads = 3;
        let head_dim = 4;
        let grid_size = 2;
        let h = 4;
        let w = 6;

        let input = Tensor::<NdArray, 4>::random(
            [b, num_heads * head_dim, h, w],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let grids = grid_partition_heads(input.clone(), num_heads, grid_size);
        assert_eq!(
            grids.dims(),
            [
                b * num_heads * (h / grid_size) * (w / grid_size),
                grid_size * grid_size,
                head_dim
            ]
        );

        grid_reverse_heads(grids, num_heads, grid_size, h, w)
            .to_data()
            .assert_eq(&input.to_data(), true);
    }

    #[test]
    fn test_flatten_heads_round_trip() {
        let device = Default::default();

        let b = 2;
        let num_heads = 2;
        let head_dim = 3;
        let h = 4;
        let w = 5;

        let input = Tensor::<NdArray, 4>::random(
            [b, num_heads * head_dim, h, w],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let tokens = flatten_heads(input.clone(), num_heads);
        assert_eq!(tokens.dims(), [b, num_heads, h * w, head_dim]);

        unflatten_heads(tokens, h, w)
            .to_data()
            .assert_eq(&input.to_data(), true);
    }

    /// With one window covering the whole map, grid tokens are the global
    /// token sequence: the windowed layout collapses to the flat layout.
    #[test]
    fn test_full_extent_grid_is_global_layout() {
        let device = Default::default();

        let b = 2;
        let num_heads = 2;
        let head_dim = 3;
        let h = 4;
        let w = 4;

        let input = Tensor::<NdArray, 4>::random(
            [b, num_heads * head_dim, h, w],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let grids = grid_partition_heads(input.clone(), num_heads, h);
        let flat = flatten_heads(input, num_heads).reshape([b * num_heads, h * w, head_dim]);

        grids.to_data().assert_eq(&flat.to_data(), true);
    }
}

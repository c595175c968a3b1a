use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Generate continuous pixel indices `(x, y)` for rows `row_start..row_end`.
///
/// Returns a tensor of shape `[N, 2]` in row-major order, with every
/// `stride`-th pixel along both axes.
///
/// # Arguments
/// * `size` - Grid extent `[width, height]`
/// * `rows` - Half-open row range to emit
/// * `stride` - Sampling step in pixels (1 for a dense grid)
/// * `device` - The device to create the tensor on
pub fn generate_grid_rows<B: Backend>(
    size: [usize; 2],
    rows: std::ops::Range<usize>,
    stride: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let stride = stride.max(1);
    let w = size[0].div_ceil(stride);
    let row_start = rows.start.div_ceil(stride);
    let row_end = rows.end.min(size[1]).div_ceil(stride);
    let h = row_end.saturating_sub(row_start);

    if w == 0 || h == 0 {
        return Tensor::<B, 2>::zeros([0, 2], device);
    }

    let y_range = Tensor::<B, 1, Int>::arange(row_start as i64..row_end as i64, device);
    let x_range = Tensor::<B, 1, Int>::arange(0..w as i64, device);

    let y_grid = y_range.reshape([h, 1]).repeat(&[1, w]).reshape([h * w]);
    let x_grid = x_range.reshape([1, w]).repeat(&[h, 1]).reshape([h * w]);

    let scale = stride as f32;
    let x_grid = x_grid.float().mul_scalar(scale);
    let y_grid = y_grid.float().mul_scalar(scale);

    Tensor::cat(vec![x_grid.unsqueeze_dim(1), y_grid.unsqueeze_dim(1)], 1)
}

/// Dense or strided index grid over the whole extent.
pub fn generate_grid<B: Backend>(size: [usize; 2], stride: usize, device: &B::Device) -> Tensor<B, 2> {
    generate_grid_rows(size, 0..size[1], stride, device)
}

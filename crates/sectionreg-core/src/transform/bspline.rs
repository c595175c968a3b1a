//! B-Spline transform implementation.
//!
//! A cubic B-spline free-form deformation over a regular grid of control
//! points. The grid extends one spacing before the image origin and at least
//! two spacings past its far edge, so every image point has full support.

use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Shape, Tensor, TensorData};

use super::trait_::Transform;
use crate::image::ImageDomain;

/// B-Spline Transform (free-form deformation).
///
/// `T(x) = x + sum_k B(x - p_k) d_k` where `p_k` are control points placed at
/// `grid_origin + k * grid_spacing` and `d_k` their displacements.
#[derive(Module, Debug)]
pub struct BSplineTransform<B: Backend> {
    /// Control points along `[x, y]`
    grid_size: [usize; 2],
    /// Physical location of control point `(0, 0)`
    grid_origin: [f64; 2],
    /// Physical distance between control points
    grid_spacing: [f64; 2],
    /// Control point displacements `[nx * ny, 2]`, row-major over `(y, x)`
    coefficients: Param<Tensor<B, 2>>,
}

impl<B: Backend> BSplineTransform<B> {
    /// Create a B-Spline transform.
    ///
    /// # Arguments
    /// * `grid_size` - Number of control points along each axis
    /// * `grid_origin` - Physical position of the first control point
    /// * `grid_spacing` - Physical spacing between control points
    /// * `coefficients` - Control point displacements `[nx * ny, 2]`
    pub fn new(
        grid_size: [usize; 2],
        grid_origin: [f64; 2],
        grid_spacing: [f64; 2],
        coefficients: Tensor<B, 2>,
    ) -> Self {
        Self {
            grid_size,
            grid_origin,
            grid_spacing,
            coefficients: Param::from_tensor(coefficients),
        }
    }

    /// Zero-displacement grid covering `domain` with control points every
    /// `spacing` physical units.
    pub fn identity_for_domain(domain: &ImageDomain, spacing: f64, device: &B::Device) -> Self {
        let (grid_size, grid_origin) = Self::grid_for_domain(domain, spacing);
        let coefficients = Tensor::zeros([grid_size[0] * grid_size[1], 2], device);
        Self::new(grid_size, grid_origin, [spacing, spacing], coefficients)
    }

    /// Grid size and origin covering `domain` at `spacing`.
    pub fn grid_for_domain(domain: &ImageDomain, spacing: f64) -> ([usize; 2], [f64; 2]) {
        let extent = domain.physical_extent();
        let grid_size = std::array::from_fn(|axis| (extent[axis] / spacing).ceil() as usize + 4);
        let grid_origin = std::array::from_fn(|axis| domain.origin[axis] - spacing);
        (grid_size, grid_origin)
    }

    /// Build from displacements laid out as all x components then all y.
    pub fn from_flat_parameters(
        grid_size: [usize; 2],
        grid_origin: [f64; 2],
        grid_spacing: [f64; 2],
        parameters: &[f64],
        device: &B::Device,
    ) -> Option<Self> {
        let n = grid_size[0] * grid_size[1];
        if parameters.len() != 2 * n || n == 0 {
            return None;
        }
        let interleaved: Vec<f32> = (0..n)
            .flat_map(|k| [parameters[k] as f32, parameters[n + k] as f32])
            .collect();
        let coefficients = Tensor::from_data(TensorData::new(interleaved, Shape::new([n, 2])), device);
        Some(Self::new(grid_size, grid_origin, grid_spacing, coefficients))
    }

    /// Displacements as all x components then all y.
    pub fn flat_parameters(&self) -> Vec<f64> {
        let values: Vec<f64> = self.coefficients.val().into_data().iter::<f64>().collect();
        let xs = values.iter().step_by(2).copied();
        let ys = values.iter().skip(1).step_by(2).copied();
        xs.chain(ys).collect()
    }

    pub fn grid_size(&self) -> [usize; 2] {
        self.grid_size
    }

    pub fn grid_origin(&self) -> [f64; 2] {
        self.grid_origin
    }

    pub fn grid_spacing(&self) -> [f64; 2] {
        self.grid_spacing
    }

    pub fn coefficients(&self) -> Tensor<B, 2> {
        self.coefficients.val()
    }

    /// Cubic B-Spline basis weights for `u` in `[0, 1)`.
    fn bspline_basis(u: Tensor<B, 1>) -> [Tensor<B, 1>; 4] {
        let one_minus_u = u.clone().neg().add_scalar(1.0);
        let u2 = u.clone().powf_scalar(2.0);
        let u3 = u.clone().powf_scalar(3.0);

        let b0 = one_minus_u.powf_scalar(3.0) / 6.0;
        let b1 = (u3.clone().mul_scalar(3.0) - u2.clone().mul_scalar(6.0)).add_scalar(4.0) / 6.0;
        let b2 = (u3.clone().mul_scalar(-3.0) + u2.mul_scalar(3.0) + u.mul_scalar(3.0)).add_scalar(1.0) / 6.0;
        let b3 = u3 / 6.0;

        [b0, b1, b2, b3]
    }

    /// Basis weights stacked to `[Batch, 4]`.
    fn basis_tensor(u: Tensor<B, 1>) -> Tensor<B, 2> {
        let [b0, b1, b2, b3] = Self::bspline_basis(u);
        Tensor::cat(
            vec![
                b0.unsqueeze_dim::<2>(1),
                b1.unsqueeze_dim::<2>(1),
                b2.unsqueeze_dim::<2>(1),
                b3.unsqueeze_dim::<2>(1),
            ],
            1,
        )
    }
}

impl<B: Backend> Transform<B> for BSplineTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = points.device();
        let [batch_size, _] = points.dims();
        if batch_size == 0 {
            return points;
        }

        let origin = Tensor::<B, 1>::from_floats(
            [self.grid_origin[0] as f32, self.grid_origin[1] as f32],
            &device,
        )
        .reshape([1, 2]);
        let spacing = Tensor::<B, 1>::from_floats(
            [self.grid_spacing[0] as f32, self.grid_spacing[1] as f32],
            &device,
        )
        .reshape([1, 2]);

        // Continuous grid coordinates; the knot below sits at floor(g) and the
        // four supporting control points start one before it.
        let grid_coords = (points.clone() - origin) / spacing;
        let grid_floor = grid_coords.clone().floor();
        let u = grid_coords - grid_floor.clone();
        let base_index = grid_floor.int() - 1;

        let ux = u.clone().slice([0..batch_size, 0..1]).squeeze::<1>(1);
        let uy = u.slice([0..batch_size, 1..2]).squeeze::<1>(1);

        // W[b, i, j] = Bx[b, i] * By[b, j]
        let weights = Self::basis_tensor(ux).unsqueeze_dim::<3>(2) * Self::basis_tensor(uy).unsqueeze_dim::<3>(1);
        let weights = weights.reshape([batch_size, 16, 1]);

        let nx = self.grid_size[0] as i32;
        let ny = self.grid_size[1] as i32;

        let range = Tensor::<B, 1, Int>::from_ints([0, 1, 2, 3], &device);
        let base_x = base_index.clone().slice([0..batch_size, 0..1]).unsqueeze_dim::<3>(2);
        let base_y = base_index.slice([0..batch_size, 1..2]).unsqueeze_dim::<3>(2);

        let zeros = Tensor::<B, 3, Int>::zeros([1, 4, 4], &device);
        let idx_x = (base_x + range.clone().reshape([1, 4, 1]) + zeros.clone()).reshape([batch_size, 16]);
        let idx_y = (base_y + range.reshape([1, 1, 4]) + zeros).reshape([batch_size, 16]);

        let flat_indices = idx_y.clamp(0, ny - 1) * nx + idx_x.clamp(0, nx - 1);

        let coeffs = self
            .coefficients
            .val()
            .select(0, flat_indices.reshape([batch_size * 16]))
            .reshape([batch_size, 16, 2]);

        let displacement = (coeffs * weights).sum_dim(1).squeeze::<2>(1);
        points + displacement
    }
}

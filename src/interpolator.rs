use crate::enums::Interpolation;

use nalgebra::Vector3;
use ndarray::ArrayView3;

/// Slack allowed at the grid border before a sample counts as outside.
const EDGE_TOLERANCE: f64 = 1e-6;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Sample `data` (z, y, x) at continuous index `index` (x, y, z).
    ///
    /// Returns `None` outside the sampled region. Linear sampling covers
    /// `[0, n - 1]` per axis; nearest covers `[-0.5, n - 0.5)`.
    pub(crate) fn sample(
        data: &ArrayView3<f32>,
        index: &Vector3<f64>,
        interpolation: Interpolation,
    ) -> Option<f32> {
        let (depth, height, width) = data.dim();
        if depth == 0 || height == 0 || width == 0 {
            return None;
        }
        match interpolation {
            Interpolation::Linear => {
                let x = Self::clamp_linear(index.x, width)?;
                let y = Self::clamp_linear(index.y, height)?;
                let z = Self::clamp_linear(index.z, depth)?;
                Some(Self::trilinear_interpolate(data, z, y, x))
            }
            Interpolation::NearestNeighbor => {
                let x = Self::nearest_index(index.x, width)?;
                let y = Self::nearest_index(index.y, height)?;
                let z = Self::nearest_index(index.z, depth)?;
                Some(data[[z, y, x]])
            }
        }
    }

    fn clamp_linear(value: f64, len: usize) -> Option<f64> {
        let max = (len - 1) as f64;
        if !value.is_finite() || value < -EDGE_TOLERANCE || value > max + EDGE_TOLERANCE {
            return None;
        }
        Some(value.clamp(0.0, max))
    }

    fn nearest_index(value: f64, len: usize) -> Option<usize> {
        if !value.is_finite() || value < -0.5 || value >= len as f64 - 0.5 {
            return None;
        }
        Some((value.round().max(0.0) as usize).min(len - 1))
    }

    #[inline]
    pub(crate) fn trilinear_interpolate(data: &ArrayView3<f32>, z: f64, y: f64, x: f64) -> f32 {
        let (depth, height, width) = data.dim();

        let z0 = z.floor() as usize;
        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let z1 = (z0 + 1).min(depth - 1);
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dz = (z - z0 as f64) as f32;
        let dy = (y - y0 as f64) as f32;
        let dx = (x - x0 as f64) as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;
        let one_minus_dz = 1.0 - dz;

        let lerp_row = |zi: usize, yi: usize| {
            data[[zi, yi, x0]].mul_add(one_minus_dx, data[[zi, yi, x1]] * dx)
        };
        let v0 = lerp_row(z0, y0).mul_add(one_minus_dy, lerp_row(z0, y1) * dy);
        let v1 = lerp_row(z1, y0).mul_add(one_minus_dy, lerp_row(z1, y1) * dy);

        v0.mul_add(one_minus_dz, v1 * dz)
    }
}

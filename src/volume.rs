use crate::enums::Interpolation;
use crate::frame::SpatialFrame;
use crate::interpolator::Interpolator;
use crate::volume_loader::VolumeLoaderError;

use nalgebra::{Point3, Vector3};
use ndarray::{Array3, ArrayView2, s};
use rayon::prelude::*;

/// Voxel buffer plus the physical frame it lives in.
///
/// `data` is indexed (depth, height, width), i.e. (z, y, x); the frame's
/// `size` is reported in (x, y, z) order.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    frame: SpatialFrame,
}

impl Volume {
    pub fn new(data: Array3<f32>, frame: SpatialFrame) -> Result<Self, VolumeLoaderError> {
        let (depth, height, width) = data.dim();
        if frame.size() != (width, height, depth) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(Self { data, frame })
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn frame(&self) -> &SpatialFrame {
        &self.frame
    }

    /// Axial slice `index` as (height, width).
    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        (index < self.data.dim().0).then(|| self.data.slice(s![index, .., ..]))
    }

    /// (min, max) over all voxels, `None` for an empty volume.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        let (lo, hi) = self
            .data
            .par_iter()
            .fold(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            );
        (lo <= hi).then_some((lo, hi))
    }

    /// Sample at a physical point, `None` outside the volume.
    pub fn sample_physical(&self, point: &Point3<f64>, interpolation: Interpolation) -> Option<f32> {
        let index: Vector3<f64> = self.frame.physical_to_index(point)?;
        Interpolator::sample(&self.data.view(), &index, interpolation)
    }
}

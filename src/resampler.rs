//! Resampling of a volume into another grid through a rigid transform.
//!
//! The transform maps moving-space points onto fixed space, so an output voxel
//! at physical point `q` reads the source at `T^-1(q)`.

use crate::enums::Interpolation;
use crate::error::{Error, Result};
use crate::frame::SpatialFrame;
use crate::interpolator::Interpolator;
use crate::transform::RigidTransform;
use crate::volume::Volume;

use nalgebra::Vector3;
use ndarray::{Array3, Zip};
use tracing::debug;

/// Value written where the source has no data.
pub const DEFAULT_PIXEL_VALUE: f32 = 0.0;

pub trait VolumeResampler: Send + Sync {
    fn resample(
        &self,
        source: &Volume,
        target: &SpatialFrame,
        transform: &RigidTransform,
        interpolation: Interpolation,
        default_value: f32,
    ) -> Result<Volume>;

    /// Intensity images: linear interpolation.
    fn resample_image(
        &self,
        source: &Volume,
        target: &SpatialFrame,
        transform: &RigidTransform,
    ) -> Result<Volume> {
        self.resample(source, target, transform, Interpolation::Linear, DEFAULT_PIXEL_VALUE)
    }

    /// Label maps and masks: nearest neighbour, so no new label values appear.
    fn resample_mask(
        &self,
        source: &Volume,
        target: &SpatialFrame,
        transform: &RigidTransform,
    ) -> Result<Volume> {
        self.resample(
            source,
            target,
            transform,
            Interpolation::NearestNeighbor,
            DEFAULT_PIXEL_VALUE,
        )
    }
}

/// CPU resampler running one rayon task per voxel chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct GridResampler;

impl VolumeResampler for GridResampler {
    fn resample(
        &self,
        source: &Volume,
        target: &SpatialFrame,
        transform: &RigidTransform,
        interpolation: Interpolation,
        default_value: f32,
    ) -> Result<Volume> {
        let (nx, ny, nz) = target.size();
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(Error::ResamplingFailure("target grid is empty".to_string()));
        }
        let to_index = source.frame().physical_to_index_map().ok_or_else(|| {
            Error::ResamplingFailure("source direction matrix is singular".to_string())
        })?;
        let source_origin = *source.frame().origin();
        let inverse = transform.inverse();
        let view = source.data().view();

        debug!(
            "Resampling {:?} -> {:?} ({:?})",
            source.frame().size(),
            target.size(),
            interpolation
        );

        let mut data = Array3::<f32>::from_elem((nz, ny, nx), default_value);
        Zip::indexed(&mut data).par_for_each(|(k, j, i), value| {
            let q = target.index_to_physical(Vector3::new(i as f64, j as f64, k as f64));
            let p = inverse.apply_to_point(&q);
            let index = to_index * (p - source_origin);
            if let Some(sampled) = Interpolator::sample(&view, &index, interpolation) {
                *value = sampled;
            }
        });

        Volume::new(data, target.clone()).map_err(|err| Error::ResamplingFailure(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::RigidTransformParams;
    use nalgebra::Point3;

    fn unit_frame(size: (usize, usize, usize), origin: Point3<f64>) -> SpatialFrame {
        SpatialFrame::axis_aligned(size, Vector3::repeat(1.0), origin).unwrap()
    }

    fn cube_with_bright_voxel(x: usize) -> Volume {
        let mut data = Array3::<f32>::zeros((3, 4, 20));
        data[[1, 2, x]] = 100.0;
        Volume::new(data, unit_frame((20, 4, 3), Point3::origin())).unwrap()
    }

    #[test]
    fn translation_moves_content_by_t() {
        let source = cube_with_bright_voxel(15);
        let t = RigidTransform::build(&RigidTransformParams::translation(-5.0, 0.0, 0.0));
        let out = GridResampler
            .resample_image(&source, source.frame(), &t)
            .unwrap();
        assert_eq!(out.data()[[1, 2, 10]], 100.0);
        assert_eq!(out.data()[[1, 2, 15]], 0.0);
    }

    #[test]
    fn identity_into_same_grid_is_lossless() {
        let source = cube_with_bright_voxel(3);
        let out = GridResampler
            .resample_image(&source, source.frame(), &RigidTransform::identity())
            .unwrap();
        assert_eq!(out.data(), source.data());
    }

    #[test]
    fn outside_source_gets_default_value() {
        let source = cube_with_bright_voxel(3);
        let target = unit_frame((4, 4, 3), Point3::new(100.0, 0.0, 0.0));
        let out = GridResampler
            .resample(&source, &target, &RigidTransform::identity(), Interpolation::Linear, -1.0)
            .unwrap();
        assert!(out.data().iter().all(|v| *v == -1.0));
    }

    #[test]
    fn mask_stays_binary_under_subvoxel_shift() {
        let mut data = Array3::<f32>::zeros((3, 4, 20));
        data.slice_mut(ndarray::s![.., .., 5..10]).fill(1.0);
        let source = Volume::new(data, unit_frame((20, 4, 3), Point3::origin())).unwrap();
        let t = RigidTransform::build(&RigidTransformParams::translation(0.3, 0.0, 0.0));

        let mask = GridResampler.resample_mask(&source, source.frame(), &t).unwrap();
        assert!(mask.data().iter().all(|v| *v == 0.0 || *v == 1.0));

        let image = GridResampler.resample_image(&source, source.frame(), &t).unwrap();
        assert!(image.data().iter().any(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn empty_target_is_a_resampling_failure() {
        let source = cube_with_bright_voxel(0);
        let target = unit_frame((0, 4, 3), Point3::origin());
        let result = GridResampler.resample_image(&source, &target, &RigidTransform::identity());
        assert!(matches!(result, Err(Error::ResamplingFailure(_))));
    }
}

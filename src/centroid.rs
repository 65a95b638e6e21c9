//! Centroid-based translation estimate.
//!
//! The translation that brings the moving structures onto the fixed ones is
//! `(fixed_centroid - moving_centroid) + (fixed_origin - moving_origin)`,
//! rotation zero.

use crate::enums::CentroidStrategy;
use crate::error::{Error, Result};
use crate::structure_set::{Contour, StructureSet};
use crate::transform::RigidTransformParams;
use crate::volume_loader::LoadedDataset;

use nalgebra::{Point3, Vector3};
use tracing::{info, warn};

/// Default sanity threshold for the Z component of the origin offset, in mm.
pub const DEFAULT_Z_OFFSET_WARNING_MM: f64 = 500.0;

/// Centroid of all contour points of `ss`, `None` when there are no points.
pub fn centroid_of(ss: &StructureSet, strategy: CentroidStrategy) -> Option<Point3<f64>> {
    match strategy {
        CentroidStrategy::PointAverage => point_average(ss),
        CentroidStrategy::AreaWeighted => area_weighted(ss).or_else(|| point_average(ss)),
    }
}

fn point_average(ss: &StructureSet) -> Option<Point3<f64>> {
    let (sum, count) = ss
        .points()
        .fold((Vector3::zeros(), 0usize), |(sum, n), p| (sum + p.coords, n + 1));
    (count > 0).then(|| Point3::from(sum / count as f64))
}

/// Polygon centroids weighted by polygon area. `None` if every contour is
/// degenerate (fewer than three points or zero area).
fn area_weighted(ss: &StructureSet) -> Option<Point3<f64>> {
    let mut weighted = Vector3::zeros();
    let mut total = 0.0;
    for contour in ss.rois.iter().flat_map(|roi| roi.contours.iter()) {
        if let Some((area, centroid)) = polygon_area_centroid(contour) {
            weighted += centroid.coords * area;
            total += area;
        }
    }
    (total > f64::EPSILON).then(|| Point3::from(weighted / total))
}

/// Area and centroid of a planar polygon through fan triangulation.
///
/// Triangle areas are signed against the polygon normal (Newell's method) so
/// concave outlines come out right.
fn polygon_area_centroid(contour: &Contour) -> Option<(f64, Point3<f64>)> {
    let points = &contour.points;
    if points.len() < 3 {
        return None;
    }
    let normal = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .fold(Vector3::zeros(), |acc, (a, b)| acc + a.coords.cross(&b.coords));
    let normal = normal.try_normalize(f64::EPSILON)?;

    let anchor = points[0];
    let mut area = 0.0;
    let mut moment = Vector3::zeros();
    for pair in points[1..].windows(2) {
        let (b, c) = (pair[0], pair[1]);
        let signed = 0.5 * (b - anchor).cross(&(c - anchor)).dot(&normal);
        moment += (anchor.coords + b.coords + c.coords) / 3.0 * signed;
        area += signed;
    }
    (area.abs() > f64::EPSILON).then(|| (area.abs(), Point3::from(moment / area)))
}

#[derive(Debug, Clone, Copy)]
pub struct CentroidEstimator {
    strategy: CentroidStrategy,
    z_offset_warning_mm: f64,
}

impl Default for CentroidEstimator {
    fn default() -> Self {
        Self::new(CentroidStrategy::default())
    }
}

impl CentroidEstimator {
    pub fn new(strategy: CentroidStrategy) -> Self {
        Self {
            strategy,
            z_offset_warning_mm: DEFAULT_Z_OFFSET_WARNING_MM,
        }
    }

    pub fn with_z_offset_warning(mut self, mm: f64) -> Self {
        self.z_offset_warning_mm = mm;
        self
    }

    pub fn centroid_of(&self, ss: &StructureSet) -> Option<Point3<f64>> {
        centroid_of(ss, self.strategy)
    }

    /// Whether the Z component of an origin offset is beyond the sanity threshold.
    pub fn z_offset_exceeds_warning(&self, origin_diff: &Vector3<f64>) -> bool {
        origin_diff.z.abs() > self.z_offset_warning_mm
    }

    /// Translation that maps the moving structures onto the fixed ones.
    pub fn estimate_translation(
        &self,
        fixed: &LoadedDataset,
        moving: &LoadedDataset,
    ) -> Result<RigidTransformParams> {
        let fixed_ss = fixed.structure_set.as_ref().ok_or(Error::MissingStructureSet)?;
        let moving_ss = moving.structure_set.as_ref().ok_or(Error::MissingStructureSet)?;

        let fixed_centroid = self.centroid_of(fixed_ss).ok_or(Error::EmptyContours)?;
        let moving_centroid = self.centroid_of(moving_ss).ok_or(Error::EmptyContours)?;

        let centroid_diff = fixed_centroid - moving_centroid;
        let origin_diff = *fixed.volume.frame().origin() - *moving.volume.frame().origin();

        if self.z_offset_exceeds_warning(&origin_diff) {
            warn!(
                "Origin Z offset {:.1} mm exceeds {:.1} mm; check the datasets before executing",
                origin_diff.z, self.z_offset_warning_mm
            );
        }

        let t = centroid_diff + origin_diff;
        info!(
            "Centroids fixed=({:.3}, {:.3}, {:.3}) moving=({:.3}, {:.3}, {:.3}); translation=({:.3}, {:.3}, {:.3})",
            fixed_centroid.x,
            fixed_centroid.y,
            fixed_centroid.z,
            moving_centroid.x,
            moving_centroid.y,
            moving_centroid.z,
            t.x,
            t.y,
            t.z
        );
        Ok(RigidTransformParams::translation(t.x, t.y, t.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SpatialFrame;
    use crate::structure_set::{Roi, box_contour};
    use crate::volume::Volume;
    use ndarray::Array3;

    fn assert_close(a: Point3<f64>, b: Point3<f64>) {
        assert!((a - b).norm() < 1e-9, "{a:?} != {b:?}");
    }

    fn dataset(origin: Point3<f64>, box_center: Point3<f64>) -> LoadedDataset {
        let frame = SpatialFrame::axis_aligned((8, 8, 2), Vector3::repeat(1.0), origin).unwrap();
        let volume = Volume::new(Array3::zeros((2, 8, 8)), frame).unwrap();
        let ss = StructureSet::new("ss").with_roi(Roi::new(1, "box").with_contour(box_contour(
            box_center.x,
            box_center.y,
            box_center.z,
            2.0,
        )));
        LoadedDataset::new(volume, Some(ss))
    }

    #[test]
    fn origin_offset_is_added_to_centroid_offset() {
        let fixed = dataset(Point3::new(-10.0, 5.0, 0.0), Point3::new(10.0, 10.0, 1.0));
        let moving = dataset(Point3::new(-12.0, 2.0, 600.0), Point3::new(15.0, 10.0, 601.0));

        let params = CentroidEstimator::default()
            .estimate_translation(&fixed, &moving)
            .unwrap();
        // centroid diff (-5, 0, -600) + origin diff (2, 3, -600)
        assert!((params.tx + 3.0).abs() < 1e-9, "{params:?}");
        assert!((params.ty - 3.0).abs() < 1e-9, "{params:?}");
        assert!((params.tz + 1200.0).abs() < 1e-9, "{params:?}");
        assert_eq!((params.rx, params.ry, params.rz), (0.0, 0.0, 0.0));
    }

    #[test]
    fn z_offset_warning_threshold_is_configurable() {
        let far = Vector3::new(0.0, 0.0, -600.0);
        let near = Vector3::new(0.0, 0.0, 30.0);
        let default = CentroidEstimator::default();
        let strict = CentroidEstimator::default().with_z_offset_warning(10.0);
        let lenient = CentroidEstimator::default().with_z_offset_warning(1000.0);

        assert!(default.z_offset_exceeds_warning(&far));
        assert!(!default.z_offset_exceeds_warning(&near));
        assert!(strict.z_offset_exceeds_warning(&near));
        assert!(!lenient.z_offset_exceeds_warning(&far));
    }

    #[test]
    fn point_average_counts_every_point() {
        // The dense contour pulls the plain mean towards itself.
        let dense = Contour::closed_planar(
            (0..8)
                .map(|i| Point3::new(10.0 + (i % 2) as f64, 0.0 + (i / 4) as f64, 0.0))
                .collect(),
        );
        let ss = StructureSet::new("s").with_roi(
            Roi::new(1, "a")
                .with_contour(box_contour(0.0, 0.0, 0.0, 1.0))
                .with_contour(dense),
        );
        let mean = centroid_of(&ss, CentroidStrategy::PointAverage).unwrap();
        assert!(mean.x > 5.0);
    }

    #[test]
    fn area_weighting_favours_large_contours() {
        let ss = StructureSet::new("s").with_roi(
            Roi::new(1, "a")
                .with_contour(box_contour(0.0, 0.0, 0.0, 3.0))
                .with_contour(box_contour(12.0, 0.0, 0.0, 1.0)),
        );
        // Areas 36 and 4: centroid x = (0 * 36 + 12 * 4) / 40.
        let c = centroid_of(&ss, CentroidStrategy::AreaWeighted).unwrap();
        assert_close(c, Point3::new(1.2, 0.0, 0.0));
    }

    #[test]
    fn area_weighting_handles_concave_outline() {
        // L-shape: 2x2 square with the top-right 1x1 square removed.
        let l = Contour::closed_planar(vec![
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(2.0, 0.0, 5.0),
            Point3::new(2.0, 1.0, 5.0),
            Point3::new(1.0, 1.0, 5.0),
            Point3::new(1.0, 2.0, 5.0),
            Point3::new(0.0, 2.0, 5.0),
        ]);
        let ss = StructureSet::new("s").with_roi(Roi::new(1, "l").with_contour(l));
        let c = centroid_of(&ss, CentroidStrategy::AreaWeighted).unwrap();
        assert_close(c, Point3::new(5.0 / 6.0, 5.0 / 6.0, 5.0));
    }

    #[test]
    fn degenerate_contours_fall_back_to_point_average() {
        let line = Contour::closed_planar(vec![Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 0.0, 0.0)]);
        let ss = StructureSet::new("s").with_roi(Roi::new(1, "l").with_contour(line));
        let c = centroid_of(&ss, CentroidStrategy::AreaWeighted).unwrap();
        assert_close(c, Point3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn empty_set_has_no_centroid() {
        let ss = StructureSet::new("s").with_roi(Roi::new(1, "empty"));
        assert_eq!(centroid_of(&ss, CentroidStrategy::PointAverage), None);
        assert_eq!(centroid_of(&ss, CentroidStrategy::AreaWeighted), None);
    }
}

//! Analytic transformation of structure-set geometry.
//!
//! Contours are never resampled: every point goes through the rigid transform
//! on its own and the ROI/contour/point layout is left untouched.

use crate::structure_set::{Contour, StructureSet};
use crate::transform::RigidTransform;

use tracing::debug;

/// Apply `transform` to every point of every contour of `ss`.
///
/// Returns a new structure set with the same ROIs, contour counts, point
/// counts and point ordering. `ss` is not modified.
pub fn transform_structure_set(ss: &StructureSet, transform: &RigidTransform) -> StructureSet {
    let mut out = ss.clone();
    for roi in &mut out.rois {
        for contour in &mut roi.contours {
            transform_contour_in_place(contour, transform);
        }
    }
    debug!(
        "Transformed {} point(s) in {} contour(s)",
        out.point_count(),
        out.contour_count()
    );
    out
}

/// Transformed copy of one contour.
pub fn transform_contour(contour: &Contour, transform: &RigidTransform) -> Contour {
    let mut out = contour.clone();
    transform_contour_in_place(&mut out, transform);
    out
}

fn transform_contour_in_place(contour: &mut Contour, transform: &RigidTransform) {
    for point in &mut contour.points {
        *point = transform.apply_to_point(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure_set::{Roi, box_contour};
    use crate::transform::RigidTransformParams;
    use nalgebra::Point3;

    fn sample_set() -> StructureSet {
        StructureSet::new("test")
            .with_roi(
                Roi::new(1, "GTV")
                    .with_color([255, 0, 0])
                    .with_contour(box_contour(0.0, 0.0, 0.0, 2.0))
                    .with_contour(box_contour(0.0, 0.0, 1.0, 3.0)),
            )
            .with_roi(Roi::new(2, "Cord").with_contour(Contour::closed_planar(vec![
                Point3::new(1.0, 2.0, 3.0),
                Point3::new(4.0, 5.0, 6.0),
                Point3::new(7.0, 8.0, 9.0),
            ])))
    }

    #[test]
    fn preserves_layout_and_order() {
        let ss = sample_set();
        let t = RigidTransform::build(
            &RigidTransformParams::translation(1.0, 2.0, 3.0).with_rotation(0.0, 0.0, 45.0),
        );
        let moved = transform_structure_set(&ss, &t);

        assert_eq!(moved.roi_count(), ss.roi_count());
        for (a, b) in ss.rois.iter().zip(&moved.rois) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.color, b.color);
            assert_eq!(a.contours.len(), b.contours.len());
            for (ca, cb) in a.contours.iter().zip(&b.contours) {
                assert_eq!(ca.points.len(), cb.points.len());
                for (pa, pb) in ca.points.iter().zip(&cb.points) {
                    assert_eq!(t.apply_to_point(pa), *pb);
                }
            }
        }
    }

    #[test]
    fn input_is_untouched() {
        let ss = sample_set();
        let before = ss.clone();
        let _ = transform_structure_set(&ss, &RigidTransform::build(&RigidTransformParams::translation(5.0, 0.0, 0.0)));
        assert_eq!(ss, before);
    }

    #[test]
    fn pure_translation_shifts_points_exactly() {
        let contour = box_contour(15.0, 10.0, 1.0, 2.0);
        let moved = transform_contour(
            &contour,
            &RigidTransform::build(&RigidTransformParams::translation(-5.0, 0.0, 0.0)),
        );
        assert_eq!(moved.mean_point(), Some(Point3::new(10.0, 10.0, 1.0)));
    }
}

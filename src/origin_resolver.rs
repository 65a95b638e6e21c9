//! True origin of a slice stack.
//!
//! Slice files come in arbitrary order and a series reader may report the
//! position of whichever file it met first. The origin is therefore
//! re-derived from per-slice metadata: every ImagePositionPatient is projected
//! onto the stack normal (`row x column`) and the slice with the smallest
//! projection is the origin.

use crate::enums::StackOrder;
use crate::error::{Error, Result};

use nalgebra::{Point3, Vector3};
use std::{cmp::Ordering, path::PathBuf};
use tracing::{debug, warn};

/// Orientations closer than this are treated as parallel.
const ORIENTATION_TOLERANCE: f64 = 1e-3;

/// Spatial metadata of one slice file.
#[derive(Debug, Clone)]
pub struct SliceRecord {
    pub file: PathBuf,
    pub position: Option<Point3<f64>>,
    pub orientation: Option<[f64; 6]>,
    pub instance_number: Option<i32>,
}

impl SliceRecord {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            position: None,
            orientation: None,
            instance_number: None,
        }
    }

    pub fn with_position(mut self, position: Point3<f64>) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_orientation(mut self, orientation: [f64; 6]) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn with_instance_number(mut self, instance_number: i32) -> Self {
        self.instance_number = Some(instance_number);
        self
    }
}

/// Slices ordered along the stack normal.
#[derive(Debug, Clone)]
pub struct SortedStack {
    /// Indices into the input records, ascending projection first.
    pub order: Vec<usize>,
    /// Projection of each ordered slice onto `normal`.
    pub projections: Vec<f64>,
    pub row: Vector3<f64>,
    pub column: Vector3<f64>,
    pub normal: Vector3<f64>,
    pub origin: Point3<f64>,
    /// False when some slice orientation disagreed with the reference one.
    pub orientation_consistent: bool,
    /// Records skipped for missing ImagePositionPatient.
    pub skipped: Vec<usize>,
}

impl SortedStack {
    /// Ordered indices for the requested output direction.
    pub fn ordered(&self, order: StackOrder) -> Vec<usize> {
        match order {
            StackOrder::Ascending => self.order.clone(),
            StackOrder::Descending => self.order.iter().rev().copied().collect(),
        }
    }

    /// Mean projected distance between neighbouring slices.
    pub fn mean_spacing(&self) -> Option<f64> {
        if self.projections.len() < 2 {
            return None;
        }
        let span = self.projections[self.projections.len() - 1] - self.projections[0];
        Some(span / (self.projections.len() - 1) as f64)
    }

    /// (min, max) projected distance between neighbouring slices.
    pub fn spacing_range(&self) -> Option<(f64, f64)> {
        self.projections
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(None, |acc, gap| match acc {
                None => Some((gap, gap)),
                Some((lo, hi)) => Some((lo.min(gap), hi.max(gap))),
            })
    }
}

/// Stack normal from ImageOrientationPatient, `None` if degenerate.
pub fn stack_normal(orientation: &[f64; 6]) -> Option<(Vector3<f64>, Vector3<f64>, Vector3<f64>)> {
    let row = Vector3::new(orientation[0], orientation[1], orientation[2]);
    let column = Vector3::new(orientation[3], orientation[4], orientation[5]);
    let row = row.try_normalize(f64::EPSILON)?;
    let column = column.try_normalize(f64::EPSILON)?;
    let normal = row.cross(&column).try_normalize(f64::EPSILON)?;
    Some((row, column, normal))
}

/// Sort slices by their projection onto the stack normal.
///
/// The normal is taken from the first slice carrying an orientation. Slices
/// whose orientation disagrees are kept and reported through
/// [`SortedStack::orientation_consistent`]; slices without a position are
/// skipped. Fails with [`Error::NoSpatialInfo`] when no slice has both.
pub fn sort_stack(records: &[SliceRecord]) -> Result<SortedStack> {
    let reference = records
        .iter()
        .filter(|r| r.position.is_some())
        .find_map(|r| r.orientation.as_ref().and_then(stack_normal))
        .ok_or(Error::NoSpatialInfo)?;
    let (row, column, normal) = reference;

    let mut orientation_consistent = true;
    let mut skipped = Vec::new();
    let mut keyed: Vec<(usize, f64)> = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let Some(position) = record.position else {
            skipped.push(index);
            continue;
        };
        if let Some(orientation) = &record.orientation {
            if let Some((r, c, _)) = stack_normal(orientation) {
                if (r - row).norm() > ORIENTATION_TOLERANCE
                    || (c - column).norm() > ORIENTATION_TOLERANCE
                {
                    orientation_consistent = false;
                }
            }
        }
        keyed.push((index, position.coords.dot(&normal)));
    }

    if !orientation_consistent {
        warn!("Slice orientations disagree across the stack; using the first slice's orientation");
    }
    if !skipped.is_empty() {
        warn!("{} slice(s) without ImagePositionPatient skipped", skipped.len());
    }

    // Ties broken by input index keep the result independent of the sort algorithm.
    keyed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));

    let first = keyed[0].0;
    let origin = records[first].position.ok_or(Error::NoSpatialInfo)?;
    debug!(
        "Resolved stack origin ({:.3}, {:.3}, {:.3}) from {} slice(s)",
        origin.x,
        origin.y,
        origin.z,
        keyed.len()
    );

    Ok(SortedStack {
        order: keyed.iter().map(|(i, _)| *i).collect(),
        projections: keyed.iter().map(|(_, p)| *p).collect(),
        row,
        column,
        normal,
        origin,
        orientation_consistent,
        skipped,
    })
}

/// Position of the slice with the smallest projection along the stack normal.
pub fn resolve(records: &[SliceRecord]) -> Result<Point3<f64>> {
    sort_stack(records).map(|stack| stack.origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AXIAL: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    fn record(z: f64) -> SliceRecord {
        SliceRecord::new(format!("slice_{z}.dcm"))
            .with_position(Point3::new(-100.0, -120.0, z))
            .with_orientation(AXIAL)
    }

    #[test]
    fn picks_smallest_projection() {
        let records = vec![record(5.0), record(-5.0), record(0.0)];
        let origin = resolve(&records).unwrap();
        assert_eq!(origin, Point3::new(-100.0, -120.0, -5.0));
    }

    #[test]
    fn honours_flipped_normal() {
        // Column along -y flips the normal to -z, so the highest z comes first.
        let flipped = [1.0, 0.0, 0.0, 0.0, -1.0, 0.0];
        let records: Vec<_> = [0.0, 2.0, 4.0]
            .into_iter()
            .map(|z| {
                SliceRecord::new("s")
                    .with_position(Point3::new(0.0, 0.0, z))
                    .with_orientation(flipped)
            })
            .collect();
        let stack = sort_stack(&records).unwrap();
        assert_eq!(stack.origin.z, 4.0);
        assert_eq!(stack.order, vec![2, 1, 0]);
    }

    #[test]
    fn no_spatial_info_is_an_error() {
        let records = vec![SliceRecord::new("a"), SliceRecord::new("b").with_orientation(AXIAL)];
        assert!(matches!(resolve(&records), Err(Error::NoSpatialInfo)));
        assert!(matches!(resolve(&[]), Err(Error::NoSpatialInfo)));
    }

    #[test]
    fn disagreeing_orientation_is_a_warning() {
        let tilted = [1.0, 0.0, 0.0, 0.0, 0.9, 0.1];
        let records = vec![
            record(0.0),
            SliceRecord::new("t")
                .with_position(Point3::new(-100.0, -120.0, 2.0))
                .with_orientation(tilted),
        ];
        let stack = sort_stack(&records).unwrap();
        assert!(!stack.orientation_consistent);
        assert_eq!(stack.order.len(), 2);
    }

    #[test]
    fn spacing_statistics() {
        let records = vec![record(0.0), record(2.5), record(5.0), record(7.5)];
        let stack = sort_stack(&records).unwrap();
        assert!((stack.mean_spacing().unwrap() - 2.5).abs() < 1e-12);
        let (lo, hi) = stack.spacing_range().unwrap();
        assert!((hi - lo).abs() < 1e-12);
        assert_eq!(stack.ordered(StackOrder::Descending), vec![3, 2, 1, 0]);
    }
}

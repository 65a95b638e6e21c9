//! Physical coordinate system of a volume.
//!
//! A [`SpatialFrame`] maps a voxel index `(i, j, k)` (column, row, slice) to a
//! physical point in millimeters:
//!
//! ```text
//! p = origin + direction * diag(spacing) * (i, j, k)
//! ```
//!
//! Frames are derived once from slice metadata and never mutated afterwards.

use nalgebra::{Matrix3, Point3, Vector3};

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFrame {
    size: (usize, usize, usize),
    spacing: Vector3<f64>,
    origin: Point3<f64>,
    direction: Matrix3<f64>,
}

impl SpatialFrame {
    /// Create a frame. Direction columns are normalized and spacing must be
    /// strictly positive; `None` is returned otherwise.
    pub fn new(
        size: (usize, usize, usize),
        spacing: Vector3<f64>,
        origin: Point3<f64>,
        direction: Matrix3<f64>,
    ) -> Option<Self> {
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return None;
        }
        let mut columns = [Vector3::zeros(); 3];
        for (c, column) in columns.iter_mut().enumerate() {
            let raw = direction.column(c).into_owned();
            let norm = raw.norm();
            if norm <= f64::EPSILON || !norm.is_finite() {
                return None;
            }
            *column = raw / norm;
        }
        Some(Self {
            size,
            spacing,
            origin,
            direction: Matrix3::from_columns(&columns),
        })
    }

    /// Axis-aligned frame with identity direction.
    pub fn axis_aligned(
        size: (usize, usize, usize),
        spacing: Vector3<f64>,
        origin: Point3<f64>,
    ) -> Option<Self> {
        Self::new(size, spacing, origin, Matrix3::identity())
    }

    /// Voxel counts in (x, y, z) order.
    pub fn size(&self) -> (usize, usize, usize) {
        self.size
    }

    pub fn spacing(&self) -> &Vector3<f64> {
        &self.spacing
    }

    pub fn origin(&self) -> &Point3<f64> {
        &self.origin
    }

    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    /// Row direction cosines (first column of the direction matrix).
    pub fn row_direction(&self) -> Vector3<f64> {
        self.direction.column(0).into_owned()
    }

    pub fn column_direction(&self) -> Vector3<f64> {
        self.direction.column(1).into_owned()
    }

    /// `row x column`, the normal used to order slices.
    pub fn stack_normal(&self) -> Vector3<f64> {
        self.row_direction()
            .cross(&self.column_direction())
            .normalize()
    }

    /// The six ImageOrientationPatient values.
    pub fn orientation_cosines(&self) -> [f64; 6] {
        let r = self.row_direction();
        let c = self.column_direction();
        [r.x, r.y, r.z, c.x, c.y, c.z]
    }

    pub fn index_to_physical(&self, index: Vector3<f64>) -> Point3<f64> {
        self.origin + self.direction * index.component_mul(&self.spacing)
    }

    /// Physical position of the first voxel of slice `k`.
    pub fn slice_position(&self, k: usize) -> Point3<f64> {
        self.index_to_physical(Vector3::new(0.0, 0.0, k as f64))
    }

    /// Inverse of the index-to-physical mapping, precomputed once per frame.
    pub fn physical_to_index_map(&self) -> Option<Matrix3<f64>> {
        let scaled = self.direction * Matrix3::from_diagonal(&self.spacing);
        scaled.try_inverse()
    }

    /// Continuous index of a physical point, `None` for a degenerate direction matrix.
    pub fn physical_to_index(&self, point: &Point3<f64>) -> Option<Vector3<f64>> {
        self.physical_to_index_map()
            .map(|inverse| inverse * (*point - self.origin))
    }
}

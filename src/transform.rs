//! Rigid transform (rotation about a center + translation).
//!
//! `T(p) = R (p - c) + c + t`, with `R = Rx * Ry * Rz` built from Euler
//! angles given in degrees. With all angles zero the rotation is the exact
//! identity matrix, so `T` is a pure translation with no trigonometric
//! round-off.

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransformParams {
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    /// Degrees.
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
    pub center: Point3<f64>,
}

impl Default for RigidTransformParams {
    fn default() -> Self {
        Self {
            tx: 0.0,
            ty: 0.0,
            tz: 0.0,
            rx: 0.0,
            ry: 0.0,
            rz: 0.0,
            center: Point3::origin(),
        }
    }
}

impl RigidTransformParams {
    pub fn translation(tx: f64, ty: f64, tz: f64) -> Self {
        Self {
            tx,
            ty,
            tz,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rx: f64, ry: f64, rz: f64) -> Self {
        self.rx = rx;
        self.ry = ry;
        self.rz = rz;
        self
    }

    pub fn with_center(mut self, center: Point3<f64>) -> Self {
        self.center = center;
        self
    }

    pub fn translation_vector(&self) -> Vector3<f64> {
        Vector3::new(self.tx, self.ty, self.tz)
    }

    pub fn is_pure_translation(&self) -> bool {
        self.rx == 0.0 && self.ry == 0.0 && self.rz == 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidTransform {
    rotation: Matrix3<f64>,
    center: Point3<f64>,
    translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn build(params: &RigidTransformParams) -> Self {
        let rotation = if params.is_pure_translation() {
            Matrix3::identity()
        } else {
            euler_matrix(
                params.rx.to_radians(),
                params.ry.to_radians(),
                params.rz.to_radians(),
            )
        };
        Self {
            rotation,
            center: params.center,
            translation: params.translation_vector(),
        }
    }

    pub fn identity() -> Self {
        Self::build(&RigidTransformParams::default())
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn center(&self) -> &Point3<f64> {
        &self.center
    }

    pub fn apply_to_point(&self, p: &Point3<f64>) -> Point3<f64> {
        if self.rotation == Matrix3::identity() {
            return *p + self.translation;
        }
        self.center + self.rotation * (*p - self.center) + self.translation
    }

    /// `T^-1(q) = R^T (q - c - t) + c`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        // Keep the same center: T^-1(q) = R^T (q - c) + c - R^T t
        let translation = -(rotation * self.translation);
        Self {
            rotation,
            center: self.center,
            translation,
        }
    }
}

/// `Rx(alpha) * Ry(beta) * Rz(gamma)`, angles in radians.
fn euler_matrix(alpha: f64, beta: f64, gamma: f64) -> Matrix3<f64> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), alpha);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), beta);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), gamma);
    (rx * ry * rz).into_inner()
}

//! Particle orientation as a view vector plus in-plane rotation.
//!
//! A `View` stores the direction the particle's z-axis points in the map
//! frame (a unit vector) together with the rotation angle around that
//! direction. This is equivalent to a 3×3 rotation matrix but remains
//! numerically stable to perturb component-wise, which is what both the
//! grid and Monte Carlo refiners do.
//!
//! The module also provides the refinement-neighborhood generator: a 3×3×3
//! grid of views around a center view, built by tilting the view vector
//! along two axes perpendicular to it and stepping the in-plane angle.
use nalgebra::{Matrix3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

const EPS: f32 = 1e-6;

/// Orientation of a particle: unit view vector plus in-plane rotation angle
/// (radians). The identity view looks down +z with zero rotation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct View {
    /// Direction of the particle z-axis in the map frame (unit length).
    pub axis: Vector3<f32>,
    /// Rotation around `axis` (radians).
    pub angle: f32,
}

impl Default for View {
    fn default() -> Self {
        Self {
            axis: Vector3::z(),
            angle: 0.0,
        }
    }
}

impl View {
    pub fn new(x: f32, y: f32, z: f32, angle: f32) -> Self {
        let mut v = Self {
            axis: Vector3::new(x, y, z),
            angle,
        };
        v.normalize();
        v
    }

    /// Renormalizes the view vector; a degenerate vector falls back to +z.
    pub fn normalize(&mut self) {
        let n = self.axis.norm();
        if n <= EPS {
            self.axis = Vector3::z();
        } else {
            self.axis /= n;
        }
    }

    /// Rotation matrix taking the identity view onto this view: an in-plane
    /// rotation around z followed by the tilt that maps +z onto `axis`.
    pub fn matrix(&self) -> Matrix3<f32> {
        self.quaternion().to_rotation_matrix().into_inner()
    }

    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        let axis = Unit::new_normalize(if self.axis.norm() <= EPS {
            Vector3::z()
        } else {
            self.axis
        });
        let tilt = UnitQuaternion::rotation_between(&Vector3::z(), &axis)
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f32::consts::PI));
        let inplane = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.angle);
        tilt * inplane
    }

    /// Recovers a view from a rotation quaternion (inverse of
    /// [`View::quaternion`] up to angle wrapping).
    pub fn from_quaternion(q: &UnitQuaternion<f32>) -> Self {
        let axis = q * Vector3::z();
        let tilt = UnitQuaternion::rotation_between(&Vector3::z(), &axis)
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f32::consts::PI));
        let inplane = tilt.inverse() * q;
        // The residual rotation is about z by construction.
        let ang = inplane.vector()[2].atan2(inplane.scalar()) * 2.0;
        Self::new(axis[0], axis[1], axis[2], ang)
    }

    /// Angular distance (radians) between two view vectors.
    pub fn vector_angle(&self, other: &View) -> f32 {
        self.axis.dot(&other.axis).clamp(-1.0, 1.0).acos()
    }
}

/// Generates the grid-search neighborhood around `center`: tilts of
/// `-step, 0, +step` along two axes perpendicular to the view vector,
/// crossed with in-plane angles `angle - step, angle, angle + step`.
/// A non-positive step returns just the center view.
pub fn views_for_refinement(center: &View, step: f32) -> Vec<View> {
    if step <= 0.0 {
        return vec![*center];
    }
    let mut c = *center;
    c.normalize();

    let mut axis1 = c.axis.cross(&Vector3::z());
    if axis1.norm() < 1e-3 {
        axis1 = Vector3::x();
    }
    axis1.normalize_mut();
    let mut axis2 = c.axis.cross(&axis1);
    if axis2.norm() < 1e-3 {
        axis2 = Vector3::y();
    }
    axis2.normalize_mut();

    let steps = [-step, 0.0, step];
    let mut out = Vec::with_capacity(27);
    for &a1 in &steps {
        let q1 = UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis1), a1);
        for &a2 in &steps {
            let q2 = UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis2), a2);
            let v = (q2 * q1) * c.axis;
            for &a3 in &steps {
                out.push(View::new(v[0], v[1], v[2], c.angle + a3));
            }
        }
    }
    out
}

//! View frustum planes and the sphere/box culling tests.

use glam::{DMat4, DVec3, DVec4};
use serde::{Deserialize, Serialize};

use crate::bounds::DAabb3;

use super::falloff::MIN_DISTANCE;

/// Camera projection as reported by the viewer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Projection {
  Perspective {
    /// Vertical field of view in radians.
    fov_y: f64,
    aspect: f64,
    near: f64,
    far: f64,
  },
  Orthographic {
    half_width: f64,
    half_height: f64,
    near: f64,
    far: f64,
  },
}

/// Six inward-facing planes `(n, d)` with `n·p + d >= 0` inside.
///
/// Order: left, right, bottom, top, near, far.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
  pub planes: [DVec4; 6],
}

impl Frustum {
  /// Extract planes from a clip-from-world matrix (OpenGL depth range).
  pub fn from_matrix(m: &DMat4) -> Self {
    let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
    let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2].map(normalize_plane);
    Self { planes }
  }

  /// Frustum of a perspective camera at `eye` looking at `target`, cut at `far`.
  ///
  /// Render space is Y-up; a view straight along Y falls back to Z as up.
  pub fn perspective(eye: DVec3, target: DVec3, fov_y: f64, aspect: f64, near: f64, far: f64) -> Self {
    let near = near.max(MIN_DISTANCE);
    let far = far.max(near + MIN_DISTANCE);
    let proj = DMat4::perspective_rh_gl(fov_y.max(MIN_DISTANCE), aspect.max(MIN_DISTANCE), near, far);
    Self::from_matrix(&(proj * look_at(eye, target)))
  }

  /// True if every plane is finite.
  pub fn is_finite(&self) -> bool {
    self.planes.iter().all(|p| p.is_finite())
  }

  /// Sphere overlaps (or touches) the frustum.
  pub fn intersects_sphere(&self, center: DVec3, radius: f64) -> bool {
    if !center.is_finite() || !radius.is_finite() {
      return false;
    }
    self
      .planes
      .iter()
      .all(|p| p.truncate().dot(center) + p.w >= -radius)
  }

  /// Conservative box test: false only when the box lies fully outside one plane.
  pub fn intersects_box(&self, aabb: &DAabb3) -> bool {
    if !aabb.min.is_finite() || !aabb.max.is_finite() {
      return false;
    }
    self.planes.iter().all(|p| {
      let n = p.truncate();
      // Corner farthest along the plane normal
      let positive = DVec3::select(n.cmpge(DVec3::ZERO), aabb.max, aabb.min);
      n.dot(positive) + p.w >= 0.0
    })
  }
}

/// World-to-view matrix with a Y-up convention.
pub fn look_at(eye: DVec3, target: DVec3) -> DMat4 {
  let mut dir = target - eye;
  if dir.length_squared() < MIN_DISTANCE {
    dir = DVec3::NEG_Z;
  }
  let up = if dir.normalize().cross(DVec3::Y).length_squared() < 1e-12 {
    DVec3::Z
  } else {
    DVec3::Y
  };
  DMat4::look_at_rh(eye, eye + dir, up)
}

fn normalize_plane(p: DVec4) -> DVec4 {
  let len = p.truncate().length().max(MIN_DISTANCE);
  p / len
}

#[cfg(test)]
#[path = "frustum_test.rs"]
mod frustum_test;

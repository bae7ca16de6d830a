//! Axis-aligned bounding box with double precision for geo-referenced data.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Double-precision axis-aligned bounding box.
///
/// Used for full resource bounds, per-node query volumes and frustum tests.
/// The flat `[min_x, min_y, min_z, max_x, max_y, max_z]` layout is what
/// loaders and the coordinate transform exchange.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DAabb3 {
  /// Minimum corner (inclusive).
  pub min: DVec3,
  /// Maximum corner (inclusive).
  pub max: DVec3,
}

impl DAabb3 {
  /// Create a new AABB from min and max corners.
  ///
  /// # Panics
  /// Debug-asserts that min <= max on all axes.
  pub fn new(min: DVec3, max: DVec3) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "AABB min must be <= max on all axes"
    );
    Self { min, max }
  }

  /// Build from two arbitrary corners, sorting each axis.
  pub fn from_corners(a: DVec3, b: DVec3) -> Self {
    Self {
      min: a.min(b),
      max: a.max(b),
    }
  }

  /// Build from the flat 6-component layout, sorting each axis.
  pub fn from_array6(v: [f64; 6]) -> Self {
    Self::from_corners(DVec3::new(v[0], v[1], v[2]), DVec3::new(v[3], v[4], v[5]))
  }

  /// Flat `[min.xyz, max.xyz]` layout.
  pub fn to_array6(&self) -> [f64; 6] {
    [
      self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z,
    ]
  }

  /// Get the size of the AABB (max - min).
  #[inline]
  pub fn size(&self) -> DVec3 {
    self.max - self.min
  }

  /// Get the center of the AABB.
  #[inline]
  pub fn center(&self) -> DVec3 {
    (self.min + self.max) * 0.5
  }

  /// Radius of the sphere enclosing the box.
  #[inline]
  pub fn bounding_radius(&self) -> f64 {
    self.size().length() * 0.5
  }

  /// Child box for an octant (bit 0: +X half, bit 1: +Y half, bit 2: +Z half).
  pub fn octant(&self, octant: u8) -> Self {
    let c = self.center();
    let pick = |bit: u8, lo: f64, mid: f64, hi: f64| {
      if octant & bit == 0 {
        (lo, mid)
      } else {
        (mid, hi)
      }
    };
    let (x0, x1) = pick(1, self.min.x, c.x, self.max.x);
    let (y0, y1) = pick(2, self.min.y, c.y, self.max.y);
    let (z0, z1) = pick(4, self.min.z, c.z, self.max.z);
    Self {
      min: DVec3::new(x0, y0, z0),
      max: DVec3::new(x1, y1, z1),
    }
  }

  /// Child box for a quadrant: splits X and Y, keeps the full Z extent.
  pub fn quadrant(&self, quadrant: u8) -> Self {
    let mut child = self.octant(quadrant & 0b11);
    child.min.z = self.min.z;
    child.max.z = self.max.z;
    child
  }
}

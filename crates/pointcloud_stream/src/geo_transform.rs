//! GeoTransform - conversion between the three coordinate spaces.
//!
//! ```text
//!   geo    : source CRS units, as stored by the resource
//!   tree   : (geo - offset) / scale, the space tree paths subdivide
//!   render : Y-up, render = (-tree.x * sx, tree.z * sz, tree.y * sy)
//! ```
//!
//! Every conversion goes through tree space: the source is normalized first,
//! then denormalized into the destination.

use std::fmt;
use std::str::FromStr;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::bounds::DAabb3;
use crate::error::GeoTransformError;

/// One of the three coordinate spaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
  Geo,
  Tree,
  Render,
}

impl FromStr for CoordinateSpace {
  type Err = GeoTransformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "geo" => Ok(Self::Geo),
      "tree" => Ok(Self::Tree),
      "render" => Ok(Self::Render),
      other => Err(GeoTransformError::UnknownSpace(other.to_string())),
    }
  }
}

impl fmt::Display for CoordinateSpace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Geo => "geo",
      Self::Tree => "tree",
      Self::Render => "render",
    })
  }
}

/// Transformed 3- or 6-vector.
pub type SpaceVec = SmallVec<[f64; 6]>;

/// Immutable per-resource coordinate transform.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
  full_geo_bounds: [f64; 6],
  scale: [f64; 3],
  offset: [f64; 3],
}

impl GeoTransform {
  /// Create a transform; every scale component must be non-zero.
  pub fn new(
    full_geo_bounds: [f64; 6],
    scale: [f64; 3],
    offset: [f64; 3],
  ) -> Result<Self, GeoTransformError> {
    if let Some(axis) = scale.iter().position(|s| *s == 0.0) {
      return Err(GeoTransformError::ZeroScale { axis });
    }
    Ok(Self {
      full_geo_bounds,
      scale,
      offset,
    })
  }

  pub fn full_geo_bounds(&self) -> [f64; 6] {
    self.full_geo_bounds
  }

  pub fn scale(&self) -> [f64; 3] {
    self.scale
  }

  pub fn offset(&self) -> [f64; 3] {
    self.offset
  }

  /// Transform a 3-vector (point) or 6-vector (bounds) between spaces.
  pub fn transform(
    &self,
    vec: &[f64],
    source: CoordinateSpace,
    dest: CoordinateSpace,
  ) -> Result<SpaceVec, GeoTransformError> {
    if vec.len() != 3 && vec.len() != 6 {
      return Err(GeoTransformError::InvalidArity(vec.len()));
    }
    let mut out = SpaceVec::new();
    for chunk in vec.chunks_exact(3) {
      let p = DVec3::new(chunk[0], chunk[1], chunk[2]);
      let q = self.transform_point(p, source, dest);
      out.extend_from_slice(&[q.x, q.y, q.z]);
    }
    Ok(out)
  }

  /// String-named entry point, validating both space names.
  pub fn transform_named(
    &self,
    vec: &[f64],
    source: &str,
    dest: &str,
  ) -> Result<SpaceVec, GeoTransformError> {
    let source = source.parse()?;
    let dest = dest.parse()?;
    self.transform(vec, source, dest)
  }

  /// Infallible single-point transform.
  #[inline]
  pub fn transform_point(
    &self,
    p: DVec3,
    source: CoordinateSpace,
    dest: CoordinateSpace,
  ) -> DVec3 {
    if source == dest {
      return p;
    }
    let tree = self.to_tree(p, source);
    self.from_tree(tree, dest)
  }

  /// Transform a box and re-sort min/max per axis.
  pub fn transform_bounds(
    &self,
    bounds: &DAabb3,
    source: CoordinateSpace,
    dest: CoordinateSpace,
  ) -> DAabb3 {
    DAabb3::from_corners(
      self.transform_point(bounds.min, source, dest),
      self.transform_point(bounds.max, source, dest),
    )
  }

  /// Full resource bounds expressed in `space`.
  pub fn coordinate_space_bounds(&self, space: CoordinateSpace) -> DAabb3 {
    let geo = DAabb3::from_array6(self.full_geo_bounds);
    self.transform_bounds(&geo, CoordinateSpace::Geo, space)
  }

  /// Per-axis extent of the full bounds in `space`.
  pub fn coordinate_space_range(&self, space: CoordinateSpace) -> DVec3 {
    self.coordinate_space_bounds(space).size()
  }

  /// Center of the full bounds in `space`.
  pub fn coordinate_space_center(&self, space: CoordinateSpace) -> DVec3 {
    self.coordinate_space_bounds(space).center()
  }

  fn to_tree(&self, p: DVec3, source: CoordinateSpace) -> DVec3 {
    let [sx, sy, sz] = self.scale;
    match source {
      CoordinateSpace::Tree => p,
      CoordinateSpace::Geo => (p - DVec3::from(self.offset)) / DVec3::from(self.scale),
      CoordinateSpace::Render => {
        let r = p / DVec3::new(sx, sz, sy);
        DVec3::new(-r.x, r.z, r.y)
      }
    }
  }

  fn from_tree(&self, t: DVec3, dest: CoordinateSpace) -> DVec3 {
    let [sx, sy, sz] = self.scale;
    match dest {
      CoordinateSpace::Tree => t,
      CoordinateSpace::Geo => t * DVec3::from(self.scale) + DVec3::from(self.offset),
      CoordinateSpace::Render => DVec3::new(-t.x * sx, t.z * sz, t.y * sy),
    }
  }
}

#[cfg(test)]
#[path = "geo_transform_test.rs"]
mod geo_transform_test;

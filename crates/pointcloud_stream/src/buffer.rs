//! Point buffer model shared by loaders, brushes and the cache.
//!
//! Decoded buffers store every schema field as one `f32` per point, so the
//! point stride always equals the field count.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bounds::DAabb3;
use crate::error::CacheError;
use crate::geo_transform::GeoTransform;
use crate::tree_path::TreePath;

// =============================================================================
// Schema
// =============================================================================

/// Storage class of a field in the source encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
  Floating,
  Signed,
  Unsigned,
}

/// One named field of a point record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
  pub name: String,
  #[serde(rename = "type")]
  pub kind: FieldKind,
  /// Size in bytes in the source encoding.
  pub size: u8,
}

impl SchemaField {
  pub fn new(name: impl Into<String>, kind: FieldKind, size: u8) -> Self {
    Self {
      name: name.into(),
      kind,
      size,
    }
  }

  pub fn floating(name: impl Into<String>) -> Self {
    Self::new(name, FieldKind::Floating, 4)
  }
}

/// Ordered field layout of a decoded buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
  fields: Vec<SchemaField>,
}

impl Schema {
  pub fn new(fields: Vec<SchemaField>) -> Self {
    Self { fields }
  }

  /// Schema of plain float fields in the given order.
  pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
    Self::new(names.into_iter().map(SchemaField::floating).collect())
  }

  pub fn fields(&self) -> &[SchemaField] {
    &self.fields
  }

  /// Number of `f32` values per point.
  pub fn stride(&self) -> usize {
    self.fields.len()
  }

  /// Position of a field, compared case-insensitively.
  pub fn index_of(&self, name: &str) -> Option<usize> {
    self
      .fields
      .iter()
      .position(|f| f.name.eq_ignore_ascii_case(name))
  }

  pub fn has_field(&self, name: &str) -> bool {
    self.index_of(name).is_some()
  }
}

/// Borrowed view of one decoded point record.
#[derive(Clone, Copy, Debug)]
pub struct Point<'a> {
  schema: &'a Schema,
  values: &'a [f32],
}

impl<'a> Point<'a> {
  pub fn new(schema: &'a Schema, values: &'a [f32]) -> Self {
    Self { schema, values }
  }

  /// Value of a named field, if the schema carries it.
  #[inline]
  pub fn field(&self, name: &str) -> Option<f32> {
    self.schema.index_of(name).and_then(|i| self.values.get(i).copied())
  }

  /// Value at a field index resolved ahead of time with [`Schema::index_of`].
  #[inline]
  pub fn at(&self, index: usize) -> Option<f32> {
    self.values.get(index).copied()
  }

  pub fn values(&self) -> &'a [f32] {
    self.values
  }
}

// =============================================================================
// Statistics
// =============================================================================

/// Observed value range of one field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
  pub min: f64,
  pub max: f64,
  pub count: u64,
}

impl FieldRange {
  pub fn new(min: f64, max: f64, count: u64) -> Self {
    Self { min, max, count }
  }

  /// Union of two ranges.
  pub fn merge(&self, other: &FieldRange) -> FieldRange {
    FieldRange {
      min: self.min.min(other.min),
      max: self.max.max(other.max),
      count: self.count + other.count,
    }
  }

  pub fn extent(&self) -> f64 {
    self.max - self.min
  }
}

/// Per-field statistics for one buffer or for the whole resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointStats {
  fields: BTreeMap<String, FieldRange>,
}

impl PointStats {
  pub fn new() -> Self {
    Self::default()
  }

  /// Compute statistics for every field of a decoded buffer.
  pub fn from_buffer(schema: &Schema, data: &[f32]) -> Self {
    let mut stats = Self::new();
    let stride = schema.stride();
    if stride == 0 {
      return stats;
    }
    for (i, field) in schema.fields().iter().enumerate() {
      let mut range: Option<FieldRange> = None;
      for v in data.chunks_exact(stride).map(|p| f64::from(p[i])) {
        range = Some(match range {
          Some(r) => FieldRange::new(r.min.min(v), r.max.max(v), r.count + 1),
          None => FieldRange::new(v, v, 1),
        });
      }
      if let Some(r) = range {
        stats.fields.insert(field.name.to_ascii_lowercase(), r);
      }
    }
    stats
  }

  pub fn insert(&mut self, field: &str, range: FieldRange) {
    self.fields.insert(field.to_ascii_lowercase(), range);
  }

  /// Range for a field, looked up case-insensitively.
  pub fn range(&self, field: &str) -> Option<FieldRange> {
    self.fields.get(&field.to_ascii_lowercase()).copied()
  }

  /// Fold another set of statistics into this one.
  pub fn merge(&mut self, other: &PointStats) {
    for (name, range) in &other.fields {
      self
        .fields
        .entry(name.clone())
        .and_modify(|r| *r = r.merge(range))
        .or_insert(*range);
    }
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }
}

// =============================================================================
// Buffer parameters
// =============================================================================

/// Everything the cache needs to color one node's buffer.
///
/// All fields are required; build through [`BufferParamsBuilder`] to get the
/// missing-field check.
#[derive(Clone, Debug)]
pub struct BufferParams {
  /// Decoded point records, `schema.stride()` floats per point.
  pub data: Arc<[f32]>,
  pub schema: Arc<Schema>,
  pub tree_path: TreePath,
  pub total_points: usize,
  pub geo_transform: GeoTransform,
  pub render_space_bounds: DAabb3,
  /// Statistics of this buffer alone.
  pub buffer_stats: Arc<PointStats>,
  /// Statistics accumulated over every buffer of the resource seen so far.
  pub point_cloud_buffer_stats: Arc<PointStats>,
}

impl BufferParams {
  pub fn builder() -> BufferParamsBuilder {
    BufferParamsBuilder::default()
  }

  /// Number of points actually present in `data`.
  pub fn point_count(&self) -> usize {
    let stride = self.schema.stride();
    if stride == 0 {
      0
    } else {
      (self.data.len() / stride).min(self.total_points)
    }
  }

  /// Geo-space bounds of this buffer, derived from its render-space bounds.
  pub fn geo_bounds(&self) -> DAabb3 {
    use crate::geo_transform::CoordinateSpace;
    self.geo_transform.transform_bounds(
      &self.render_space_bounds,
      CoordinateSpace::Render,
      CoordinateSpace::Geo,
    )
  }
}

/// Builder enforcing the "every field is required" rule.
#[derive(Default)]
pub struct BufferParamsBuilder {
  data: Option<Arc<[f32]>>,
  schema: Option<Arc<Schema>>,
  tree_path: Option<TreePath>,
  total_points: Option<usize>,
  geo_transform: Option<GeoTransform>,
  render_space_bounds: Option<DAabb3>,
  buffer_stats: Option<Arc<PointStats>>,
  point_cloud_buffer_stats: Option<Arc<PointStats>>,
}

impl BufferParamsBuilder {
  pub fn data(mut self, data: impl Into<Arc<[f32]>>) -> Self {
    self.data = Some(data.into());
    self
  }

  pub fn schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
    self.schema = Some(schema.into());
    self
  }

  pub fn tree_path(mut self, tree_path: impl Into<TreePath>) -> Self {
    self.tree_path = Some(tree_path.into());
    self
  }

  pub fn total_points(mut self, total_points: usize) -> Self {
    self.total_points = Some(total_points);
    self
  }

  pub fn geo_transform(mut self, geo_transform: GeoTransform) -> Self {
    self.geo_transform = Some(geo_transform);
    self
  }

  pub fn render_space_bounds(mut self, bounds: DAabb3) -> Self {
    self.render_space_bounds = Some(bounds);
    self
  }

  pub fn buffer_stats(mut self, stats: impl Into<Arc<PointStats>>) -> Self {
    self.buffer_stats = Some(stats.into());
    self
  }

  pub fn point_cloud_buffer_stats(mut self, stats: impl Into<Arc<PointStats>>) -> Self {
    self.point_cloud_buffer_stats = Some(stats.into());
    self
  }

  /// Finish, naming the first missing field on failure.
  pub fn build(self) -> Result<BufferParams, CacheError> {
    Ok(BufferParams {
      data: self.data.ok_or(CacheError::MissingParameter("data"))?,
      schema: self.schema.ok_or(CacheError::MissingParameter("schema"))?,
      tree_path: self
        .tree_path
        .ok_or(CacheError::MissingParameter("tree_path"))?,
      total_points: self
        .total_points
        .ok_or(CacheError::MissingParameter("total_points"))?,
      geo_transform: self
        .geo_transform
        .ok_or(CacheError::MissingParameter("geo_transform"))?,
      render_space_bounds: self
        .render_space_bounds
        .ok_or(CacheError::MissingParameter("render_space_bounds"))?,
      buffer_stats: self
        .buffer_stats
        .ok_or(CacheError::MissingParameter("buffer_stats"))?,
      point_cloud_buffer_stats: self
        .point_cloud_buffer_stats
        .ok_or(CacheError::MissingParameter("point_cloud_buffer_stats"))?,
    })
  }
}

// =============================================================================
// Colored output
// =============================================================================

/// Render-ready buffer: `x, y, z` followed by one packed color per brush slot.
#[derive(Clone, PartialEq)]
pub struct ColoredBuffer {
  pub data: Arc<[f32]>,
  /// Floats per point (3 + brush slots).
  pub stride: usize,
  pub point_count: usize,
}

impl ColoredBuffer {
  /// Values of point `index`, or None when out of range.
  pub fn point(&self, index: usize) -> Option<&[f32]> {
    let start = index.checked_mul(self.stride)?;
    self.data.get(start..start + self.stride)
  }

  /// Number of color slots per point.
  pub fn channel_count(&self) -> usize {
    self.stride.saturating_sub(3)
  }
}

impl std::fmt::Debug for ColoredBuffer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ColoredBuffer")
      .field("stride", &self.stride)
      .field("point_count", &self.point_count)
      .finish()
  }
}

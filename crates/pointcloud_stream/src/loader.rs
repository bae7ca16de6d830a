//! Contracts of the external collaborators: loaders and the render host.
//!
//! Network transport, binary decoding and rendering live outside this crate.
//! The policy and session talk to them only through these traits.

use std::fmt;
use std::sync::Arc;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bounds::DAabb3;
use crate::buffer::{ColoredBuffer, PointStats, Schema};
use crate::error::LoaderError;
use crate::tree_path::TreePath;

/// Opaque, loader-defined request description.
///
/// Two queries are the same request when their [`LoaderQuery::key`] matches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoaderQuery(pub Value);

impl LoaderQuery {
  pub fn new(value: Value) -> Self {
    Self(value)
  }

  /// Normalized identity string (compact JSON, keys sorted).
  pub fn key(&self) -> String {
    self.0.to_string()
  }
}

/// A decoded point buffer as returned by a [`PointBufferLoader`].
#[derive(Clone, Debug)]
pub struct LoadedBuffer {
  pub data: Arc<[f32]>,
  pub total_points: usize,
  pub point_stride: usize,
  pub schema: Schema,
  pub stats: PointStats,
}

/// Fetches and decodes point buffers for a box and depth range.
pub trait PointBufferLoader: Send + Sync {
  fn query_for(&self, geo_bounds: &DAabb3, depth_begin: u32, depth_end: u32) -> LoaderQuery;

  /// Blocking fetch + decode. Called from decode pool workers.
  fn load(&self, query: &LoaderQuery) -> Result<LoadedBuffer, LoaderError>;
}

/// Placement of one region inside the world, as the renderer consumes it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformQuery {
  pub position: DVec3,
  pub offset: DVec3,
  pub mins: DVec3,
  pub maxs: DVec3,
}

pub trait TransformLoader: Send + Sync {
  fn query_for(&self, world_bbox: &DAabb3, region_bbox: &DAabb3) -> TransformQuery;
}

/// Passthrough transform: region placed relative to the world center.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegionTransformLoader;

impl TransformLoader for RegionTransformLoader {
  fn query_for(&self, world_bbox: &DAabb3, region_bbox: &DAabb3) -> TransformQuery {
    let center = world_bbox.center();
    TransformQuery {
      position: region_bbox.min - center,
      offset: center,
      mins: region_bbox.min,
      maxs: region_bbox.max,
    }
  }
}

/// RGBA pixel block covering a geo box.
#[derive(Clone, PartialEq)]
pub struct ImageTile {
  pub width: u32,
  pub height: u32,
  /// Row-major RGBA8, `width * height * 4` bytes.
  pub rgba: Arc<[u8]>,
  /// True when row 0 is the southern edge of the box.
  pub needs_flip: bool,
}

impl ImageTile {
  /// RGBA at a pixel, or None outside the tile.
  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
    let px = self.rgba.get(i..i + 4)?;
    Some([px[0], px[1], px[2], px[3]])
  }
}

impl fmt::Debug for ImageTile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ImageTile")
      .field("width", &self.width)
      .field("height", &self.height)
      .field("needs_flip", &self.needs_flip)
      .finish()
  }
}

/// Fetches imagery for a geo box from a named source.
pub trait ImageryLoader: Send + Sync {
  fn query_for(&self, geo_bbox: &DAabb3, source: &str) -> LoaderQuery;

  fn load(&self, query: &LoaderQuery) -> Result<ImageTile, LoaderError>;
}

/// Everything needed to load and place one LOD node.
///
/// Composes the point-buffer, transform and (optional) imagery queries for the
/// node's box. Identity is [`BufferKey::id`].
#[derive(Clone, Debug, PartialEq)]
pub struct BufferKey {
  pub tree_path: TreePath,
  pub depth_begin: u32,
  pub depth_end: u32,
  pub geo_bounds: DAabb3,
  pub render_bounds: DAabb3,
  pub point: LoaderQuery,
  pub transform: TransformQuery,
  pub imagery: Option<LoaderQuery>,
}

impl BufferKey {
  /// Stable identity composed of every sub-query.
  pub fn id(&self) -> String {
    let imagery = self.imagery.as_ref().map(LoaderQuery::key);
    format!(
      "{}|{}-{}|{}|{}",
      self.tree_path,
      self.depth_begin,
      self.depth_end,
      self.point.key(),
      imagery.as_deref().unwrap_or("-"),
    )
  }
}

/// Renderer-side sink for buffer lifecycle calls.
pub trait RenderHost {
  fn add_point_buffer(&mut self, key: &BufferKey);

  fn remove_point_buffer(&mut self, key: &BufferKey);

  /// A colored buffer for `path` is ready (first color or recolor).
  fn update_point_buffer(&mut self, path: &TreePath, buffer: &ColoredBuffer);

  fn set_render_options(&mut self, _options: &Value) {}

  fn force_update(&mut self) {}
}

/// Host that records every call, for tests and headless sessions.
#[derive(Debug, Default)]
pub struct RecordingHost {
  pub added: Vec<BufferKey>,
  pub removed: Vec<BufferKey>,
  pub updated: Vec<(TreePath, ColoredBuffer)>,
  pub force_updates: usize,
}

impl RenderHost for RecordingHost {
  fn add_point_buffer(&mut self, key: &BufferKey) {
    self.added.push(key.clone());
  }

  fn remove_point_buffer(&mut self, key: &BufferKey) {
    self.removed.push(key.clone());
  }

  fn update_point_buffer(&mut self, path: &TreePath, buffer: &ColoredBuffer) {
    self.updated.push((path.clone(), buffer.clone()));
  }

  fn force_update(&mut self) {
    self.force_updates += 1;
  }
}

//! Remote imagery brush and its tile LRU.
//!
//! `remote://imagery?source=S` drapes an image over each buffer. The tile for
//! a buffer's geo bounds is fetched in `prepare` through an [`ImageryLoader`]
//! and memoized in a [`TileCache`] shared by every imagery brush of a session.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use glam::DVec3;
use serde_json::{json, Value};
use smallvec::{smallvec, SmallVec};
use tracing::trace;

use super::{Brush, BrushSpec, NodeSelection, StagingAttributes, StagingContext};
use crate::bounds::DAabb3;
use crate::buffer::{BufferParams, Point};
use crate::config::TileCacheConfig;
use crate::error::BrushError;
use crate::geo_transform::{CoordinateSpace, GeoTransform};
use crate::loader::{ImageTile, ImageryLoader};

// =============================================================================
// TileCache
// =============================================================================

/// Least-recently-used tile store keyed by normalized loader query.
#[derive(Debug)]
pub struct TileCache {
  tiles: HashMap<String, Arc<ImageTile>>,
  /// Front = least recently used.
  lru: VecDeque<String>,
  capacity: usize,
  hits: u64,
  misses: u64,
}

impl TileCache {
  /// Cache holding at most `capacity` tiles (at least one).
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      tiles: HashMap::with_capacity(capacity),
      lru: VecDeque::with_capacity(capacity),
      capacity,
      hits: 0,
      misses: 0,
    }
  }

  pub fn from_config(config: &TileCacheConfig) -> Self {
    Self::new(config.capacity)
  }

  /// Look up a tile, marking it most recently used.
  pub fn get(&mut self, key: &str) -> Option<Arc<ImageTile>> {
    match self.tiles.get(key) {
      Some(tile) => {
        let tile = Arc::clone(tile);
        self.touch(key);
        self.hits += 1;
        Some(tile)
      }
      None => {
        self.misses += 1;
        None
      }
    }
  }

  /// Store a tile, evicting the least recently used one when full.
  pub fn insert(&mut self, key: String, tile: Arc<ImageTile>) {
    if self.tiles.insert(key.clone(), tile).is_some() {
      self.touch(&key);
      return;
    }
    self.lru.push_back(key);
    while self.tiles.len() > self.capacity {
      let Some(evicted) = self.lru.pop_front() else {
        break;
      };
      self.tiles.remove(&evicted);
      trace!(tile = %evicted, "tile evicted");
    }
  }

  pub fn contains(&self, key: &str) -> bool {
    self.tiles.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.tiles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tiles.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// (hits, misses) since creation.
  pub fn hit_stats(&self) -> (u64, u64) {
    (self.hits, self.misses)
  }

  pub fn clear(&mut self) {
    self.tiles.clear();
    self.lru.clear();
  }

  fn touch(&mut self, key: &str) {
    if let Some(pos) = self.lru.iter().position(|k| k == key) {
      if let Some(k) = self.lru.remove(pos) {
        self.lru.push_back(k);
      }
    }
  }
}

impl Default for TileCache {
  fn default() -> Self {
    Self::from_config(&TileCacheConfig::DEFAULT)
  }
}

// =============================================================================
// Brush
// =============================================================================

/// Per-buffer state between prepare and unprepare.
#[derive(Debug)]
struct PreparedTile {
  tile: Arc<ImageTile>,
  geo_bounds: DAabb3,
  transform: GeoTransform,
  xyz: [usize; 3],
}

/// Colors each point with the imagery pixel beneath it.
pub struct RemoteImageryBrush {
  spec: BrushSpec,
  source: String,
  loader: Arc<dyn ImageryLoader>,
  tiles: Arc<Mutex<TileCache>>,
  prepared: Option<PreparedTile>,
}

impl RemoteImageryBrush {
  pub fn new(
    spec: BrushSpec,
    loader: Arc<dyn ImageryLoader>,
    tiles: Arc<Mutex<TileCache>>,
  ) -> Result<Self, BrushError> {
    let source = spec
      .param("source")
      .filter(|s| !s.is_empty())
      .ok_or_else(|| BrushError::InvalidParameter {
        name: "source".into(),
        reason: "required".into(),
      })?
      .to_string();
    Ok(Self {
      spec,
      source,
      loader,
      tiles,
      prepared: None,
    })
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  fn fetch_tile(&self, geo_bounds: &DAabb3) -> Result<Arc<ImageTile>, BrushError> {
    let query = self.loader.query_for(geo_bounds, &self.source);
    let key = query.key();
    let poisoned = || BrushError::Imagery("tile cache lock poisoned".into());

    if let Some(tile) = self.tiles.lock().map_err(|_| poisoned())?.get(&key) {
      return Ok(tile);
    }
    // Fetch without holding the lock; a concurrent miss on the same key
    // just loads twice.
    let tile = Arc::new(
      self
        .loader
        .load(&query)
        .map_err(|e| BrushError::Imagery(e.to_string()))?,
    );
    if tile.width == 0 || tile.height == 0 {
      return Err(BrushError::Imagery(format!("empty tile for {key}")));
    }
    self
      .tiles
      .lock()
      .map_err(|_| poisoned())?
      .insert(key, Arc::clone(&tile));
    Ok(tile)
  }
}

/// Pixel under a geo position, honoring the tile's row order.
fn sample_tile(tile: &ImageTile, bounds: &DAabb3, geo: DVec3) -> [f32; 3] {
  let size = bounds.size();
  let axis = |v: f64, min: f64, extent: f64| {
    if extent > 0.0 {
      ((v - min) / extent).clamp(0.0, 1.0)
    } else {
      0.0
    }
  };
  let u = axis(geo.x, bounds.min.x, size.x);
  let v = axis(geo.y, bounds.min.y, size.y);
  // Row 0 is north unless the loader says otherwise
  let row_t = if tile.needs_flip { v } else { 1.0 - v };
  let col = (u * f64::from(tile.width - 1)).round() as u32;
  let row = (row_t * f64::from(tile.height - 1)).round() as u32;
  match tile.pixel(col, row) {
    Some([r, g, b, _]) => [f32::from(r), f32::from(g), f32::from(b)],
    None => [0.0; 3],
  }
}

impl Brush for RemoteImageryBrush {
  fn spec(&self) -> &BrushSpec {
    &self.spec
  }

  fn required_schema_fields(&self) -> SmallVec<[String; 4]> {
    smallvec!["X".into(), "Y".into(), "Z".into()]
  }

  fn prepare(&mut self, params: &BufferParams, _: &StagingContext<'_>) -> Result<(), BrushError> {
    let find = |name: &str| {
      params
        .schema
        .index_of(name)
        .ok_or_else(|| BrushError::Prepare(format!("schema has no `{name}` field")))
    };
    let xyz = [find("X")?, find("Y")?, find("Z")?];
    let geo_bounds = params.geo_bounds();
    let tile = self.fetch_tile(&geo_bounds)?;
    self.prepared = Some(PreparedTile {
      tile,
      geo_bounds,
      transform: params.geo_transform,
      xyz,
    });
    Ok(())
  }

  fn color_point(&self, color: &mut [f32; 3], point: &Point<'_>) -> Result<(), BrushError> {
    let prepared = self
      .prepared
      .as_ref()
      .ok_or_else(|| BrushError::Color("imagery brush used before prepare".into()))?;
    let [x, y, z] = prepared.xyz;
    let (Some(x), Some(y), Some(z)) = (point.at(x), point.at(y), point.at(z)) else {
      *color = [0.0; 3];
      return Ok(());
    };
    let render = DVec3::new(f64::from(x), f64::from(y), f64::from(z));
    let geo = prepared
      .transform
      .transform_point(render, CoordinateSpace::Render, CoordinateSpace::Geo);
    *color = sample_tile(&prepared.tile, &prepared.geo_bounds, geo);
    Ok(())
  }

  fn staging_attributes(&self, _: &BufferParams, _: &StagingContext<'_>) -> StagingAttributes {
    json!({ "source": self.source })
  }

  fn unprepare(&mut self, _: &BufferParams) -> Result<(), BrushError> {
    self.prepared = None;
    Ok(())
  }

  fn node_selection_strategy(&self, _: &BufferParams) -> NodeSelection {
    NodeSelection::all(json!({ "source": self.source }))
  }

  fn buffer_needs_recolor(&self, _: &BufferParams, current: &Value, other: &StagingAttributes) -> bool {
    current.get("source") != other.get("source")
  }
}

#[cfg(test)]
#[path = "imagery_test.rs"]
mod imagery_test;

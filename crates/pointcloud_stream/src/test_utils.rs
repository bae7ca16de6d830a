//! Shared test fixtures: buffer builders and an event-logging brush.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use glam::DVec3;
use serde_json::{json, Value};
use smallvec::SmallVec;

use crate::bounds::DAabb3;
use crate::brush::{
  Brush, BrushSlot, BrushSpec, NodeSelection, SelectionStrategy, StagingAttributes, StagingContext,
};
use crate::buffer::{BufferParams, Point, PointStats, Schema};
use crate::error::{BrushError, LoaderError};
use crate::geo_transform::GeoTransform;
use crate::loader::{ImageTile, ImageryLoader, LoadedBuffer, LoaderQuery, PointBufferLoader};

/// Unit-scale transform over a 100³ box at the origin.
pub fn unit_transform() -> GeoTransform {
  GeoTransform::new([0.0, 0.0, 0.0, 100.0, 100.0, 100.0], [1.0; 3], [0.0; 3]).unwrap()
}

pub fn xyz_schema() -> Schema {
  Schema::from_names(["X", "Y", "Z"])
}

/// Params for a buffer whose global stats equal its own stats.
pub fn params_with(path: &str, schema: Schema, data: Vec<f32>) -> BufferParams {
  let stats = PointStats::from_buffer(&schema, &data);
  let total_points = data.len() / schema.stride().max(1);
  BufferParams::builder()
    .data(data)
    .schema(schema)
    .tree_path(path)
    .total_points(total_points)
    .geo_transform(unit_transform())
    .render_space_bounds(DAabb3::new(DVec3::new(-100.0, 0.0, 0.0), DVec3::new(0.0, 100.0, 100.0)))
    .buffer_stats(stats.clone())
    .point_cloud_buffer_stats(stats)
    .build()
    .unwrap()
}

/// X/Y/Z-only buffer from a list of positions.
pub fn xyz_params(path: &str, points: &[[f32; 3]]) -> BufferParams {
  let data = points.iter().flatten().copied().collect();
  params_with(path, xyz_schema(), data)
}

/// `n` points along a diagonal, enough to span several color chunks.
pub fn diagonal_params(path: &str, n: usize) -> BufferParams {
  let points: Vec<[f32; 3]> = (0..n)
    .map(|i| {
      let v = i as f32 * 0.01;
      [v, v * 2.0, v * 3.0]
    })
    .collect();
  xyz_params(path, &points)
}

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Lifecycle phase a [`RecordingBrush`] can be told to fail in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailIn {
  Prepare,
  Color,
  Unprepare,
}

/// Brush that records every lifecycle call as `"<event>:<path>"`.
///
/// Colors every point with a fixed RGB; staging carries the node path and the
/// brush generation so tests can make nodes look stale.
pub struct RecordingBrush {
  spec: BrushSpec,
  color: [f32; 3],
  strategy: SelectionStrategy,
  generation: u64,
  fail_in: Option<FailIn>,
  log: EventLog,
  current: Option<String>,
}

impl RecordingBrush {
  pub fn new(id: &str, log: &EventLog) -> Self {
    Self {
      spec: format!("test://record?id={id}").parse().unwrap(),
      color: [10.0, 20.0, 30.0],
      strategy: SelectionStrategy::None,
      generation: 0,
      fail_in: None,
      log: Arc::clone(log),
      current: None,
    }
  }

  pub fn with_color(mut self, color: [f32; 3]) -> Self {
    self.color = color;
    self
  }

  pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
    self.strategy = strategy;
    self
  }

  /// Staging from a different generation counts as stale.
  pub fn with_generation(mut self, generation: u64) -> Self {
    self.generation = generation;
    self
  }

  pub fn failing_in(mut self, phase: FailIn) -> Self {
    self.fail_in = Some(phase);
    self
  }

  pub fn slot(self) -> BrushSlot {
    Some(Box::new(self))
  }

  fn record(&self, event: &str, path: &str) {
    self.log.lock().unwrap().push(format!("{event}:{path}"));
  }
}

impl Brush for RecordingBrush {
  fn spec(&self) -> &BrushSpec {
    &self.spec
  }

  fn required_schema_fields(&self) -> SmallVec<[String; 4]> {
    SmallVec::new()
  }

  fn prepare(&mut self, params: &BufferParams, staging: &StagingContext<'_>) -> Result<(), BrushError> {
    let path = params.tree_path.to_string();
    self.record("prepare", &path);
    let seen = format!("{path}:{}:{}", staging.parent.is_some(), staging.children.len());
    self.record("ctx", &seen);
    if self.fail_in == Some(FailIn::Prepare) {
      return Err(BrushError::Prepare(format!("refused {path}")));
    }
    self.current = Some(path);
    Ok(())
  }

  fn color_point(&self, color: &mut [f32; 3], _: &Point<'_>) -> Result<(), BrushError> {
    let path = self.current.as_deref().unwrap_or("?");
    self.record("color", path);
    if self.fail_in == Some(FailIn::Color) {
      return Err(BrushError::Color(format!("refused {path}")));
    }
    *color = self.color;
    Ok(())
  }

  fn staging_attributes(&self, params: &BufferParams, _: &StagingContext<'_>) -> StagingAttributes {
    self.record("staging", params.tree_path.as_str());
    json!({ "path": params.tree_path.as_str(), "generation": self.generation })
  }

  fn unprepare(&mut self, params: &BufferParams) -> Result<(), BrushError> {
    self.record("unprepare", params.tree_path.as_str());
    self.current = None;
    if self.fail_in == Some(FailIn::Unprepare) {
      return Err(BrushError::Prepare(format!("unprepare refused {}", params.tree_path)));
    }
    Ok(())
  }

  fn node_selection_strategy(&self, _: &BufferParams) -> NodeSelection {
    NodeSelection {
      strategy: self.strategy,
      params: json!({ "generation": self.generation }),
    }
  }

  fn buffer_needs_recolor(&self, _: &BufferParams, current: &Value, other: &StagingAttributes) -> bool {
    let path = other.get("path").and_then(Value::as_str).unwrap_or("?");
    self.record("needs_recolor", path);
    current.get("generation") != other.get("generation")
  }
}

/// Events of one kind, in order, with the prefix stripped.
pub fn events_of(log: &EventLog, event: &str) -> Vec<String> {
  let prefix = format!("{event}:");
  log
    .lock()
    .unwrap()
    .iter()
    .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
    .collect()
}

/// Log with consecutive `color:` entries collapsed into one and `ctx:` dropped.
pub fn collapsed_events(log: &EventLog) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for e in log.lock().unwrap().iter() {
    if e.starts_with("ctx:") || (e.starts_with("color:") && out.last() == Some(e)) {
      continue;
    }
    out.push(e.clone());
  }
  out
}

/// Point loader whose queries echo their inputs.
///
/// Every load returns the same three X/Y/Z points; queries whose bounds
/// start at `fail_min_x` fail.
#[derive(Default)]
pub struct StubPointLoader {
  pub loads: AtomicUsize,
  pub fail_min_x: Option<f64>,
}

impl StubPointLoader {
  pub fn load_count(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}

impl PointBufferLoader for StubPointLoader {
  fn query_for(&self, geo_bounds: &DAabb3, depth_begin: u32, depth_end: u32) -> LoaderQuery {
    LoaderQuery::new(json!({ "bounds": geo_bounds.to_array6(), "depth": [depth_begin, depth_end] }))
  }

  fn load(&self, query: &LoaderQuery) -> Result<LoadedBuffer, LoaderError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    let min_x = query.0["bounds"][0].as_f64();
    if self.fail_min_x.is_some() && min_x == self.fail_min_x {
      return Err(LoaderError("stub refused".into()));
    }
    let schema = xyz_schema();
    let data: Vec<f32> = vec![-10.0, 5.0, 5.0, -20.0, 50.0, 60.0, -90.0, 95.0, 10.0];
    let stats = PointStats::from_buffer(&schema, &data);
    Ok(LoadedBuffer {
      data: data.into(),
      total_points: 3,
      point_stride: schema.stride(),
      schema,
      stats,
    })
  }
}

/// Imagery loader answering every query with one white pixel.
#[derive(Default)]
pub struct StubImageryLoader;

impl ImageryLoader for StubImageryLoader {
  fn query_for(&self, geo_bbox: &DAabb3, source: &str) -> LoaderQuery {
    LoaderQuery::new(json!({ "source": source, "bounds": geo_bbox.to_array6() }))
  }

  fn load(&self, _: &LoaderQuery) -> Result<ImageTile, LoaderError> {
    Ok(ImageTile {
      width: 1,
      height: 1,
      rgba: vec![255u8; 4].into(),
      needs_flip: false,
    })
  }
}

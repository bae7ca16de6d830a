//! FrustumLodPolicy - decides which nodes should be loaded for a view.
//!
//! # State machine
//!
//! ```text
//!            start()                 update_view()
//! Stopped ───────────► Idle ─────────────────────► Debouncing
//!    ▲                  ▲                              │ tick(now >= deadline)
//!    │ stop()           │                              ▼
//!    └──────────────────┴──── diff applied ◄──── compute shells
//! ```
//!
//! Only the latest view of a burst is evaluated. Time is passed in by the
//! caller so the policy never reads a clock for scheduling decisions.
//!
//! Removals are applied before additions, shedding load before adding detail.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use web_time::Instant;

use crate::bounds::DAabb3;
use crate::config::PolicyConfig;
use crate::error::PolicyError;
use crate::geo_transform::{CoordinateSpace, GeoTransform};
use crate::loader::{BufferKey, ImageryLoader, PointBufferLoader, RenderHost, TransformLoader};
use crate::metrics::StreamMetrics;
use crate::tree_path::TreePath;

use super::falloff::{distance_series, shell_depth};
use super::frustum::{Frustum, Projection};
use super::node::{LodNode, NodeKey, ShellTraversal};
use super::view::ViewState;

/// External loaders the policy composes queries from.
///
/// Point and transform loaders are required; imagery is optional.
#[derive(Clone, Default)]
pub struct LoaderSet {
  pub point: Option<Arc<dyn PointBufferLoader>>,
  pub transform: Option<Arc<dyn TransformLoader>>,
  pub imagery: Option<Arc<dyn ImageryLoader>>,
}

impl LoaderSet {
  pub fn new(point: Arc<dyn PointBufferLoader>, transform: Arc<dyn TransformLoader>) -> Self {
    Self {
      point: Some(point),
      transform: Some(transform),
      imagery: None,
    }
  }

  pub fn with_imagery(mut self, imagery: Arc<dyn ImageryLoader>) -> Self {
    self.imagery = Some(imagery);
    self
  }
}

/// Notifications for the viewer, drained with [`FrustumLodPolicy::drain_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyEvent {
  /// Render-space bounds of the whole resource, sent on start.
  Bbox(DAabb3),
  /// A view was evaluated.
  ViewChanged(ViewState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyState {
  Stopped,
  Idle,
  Debouncing { deadline: Instant },
}

/// Buffers requested and released by one evaluated tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolicyDiff {
  pub added: Vec<BufferKey>,
  pub removed: Vec<BufferKey>,
}

impl PolicyDiff {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty()
  }
}

pub struct FrustumLodPolicy {
  point_loader: Arc<dyn PointBufferLoader>,
  transform_loader: Arc<dyn TransformLoader>,
  imagery_loader: Option<Arc<dyn ImageryLoader>>,
  geo_transform: GeoTransform,
  config: PolicyConfig,
  distance_hint: f64,
  imagery_source: Option<String>,
  state: PolicyState,
  pending: Option<ViewState>,
  last_view: Option<ViewState>,
  /// Set when keys or distances changed and the last view must be re-run.
  recompute: bool,
  loaded: BTreeMap<NodeKey, BufferKey>,
  events: Vec<PolicyEvent>,
  metrics: StreamMetrics,
}

impl FrustumLodPolicy {
  pub fn new(loaders: LoaderSet, geo_transform: GeoTransform, config: PolicyConfig) -> Result<Self, PolicyError> {
    let point_loader = loaders.point.ok_or(PolicyError::MissingLoader("point"))?;
    let transform_loader = loaders.transform.ok_or(PolicyError::MissingLoader("transform"))?;
    Ok(Self {
      point_loader,
      transform_loader,
      imagery_loader: loaders.imagery,
      geo_transform,
      config,
      distance_hint: 1.0,
      imagery_source: None,
      state: PolicyState::Stopped,
      pending: None,
      last_view: None,
      recompute: false,
      loaded: BTreeMap::new(),
      events: Vec::new(),
      metrics: StreamMetrics::new(),
    })
  }

  /// Begin accepting views and announce the resource bounds.
  pub fn start(&mut self) {
    if self.state == PolicyState::Stopped {
      self.state = PolicyState::Idle;
    }
    let bounds = self.geo_transform.coordinate_space_bounds(CoordinateSpace::Render);
    self.events.push(PolicyEvent::Bbox(bounds));
    info!(?bounds, "lod policy started");
  }

  /// Unload everything and stop evaluating views.
  pub fn stop(&mut self, host: &mut dyn RenderHost) {
    let unloaded = self.unload_all(host);
    self.state = PolicyState::Stopped;
    self.pending = None;
    self.last_view = None;
    self.recompute = false;
    info!(unloaded, "lod policy stopped");
  }

  /// Record a new view; it is evaluated once no newer view arrives for the
  /// debounce window.
  pub fn update_view(&mut self, view: ViewState, now: Instant) {
    if self.state == PolicyState::Stopped {
      debug!("view update ignored, policy stopped");
      return;
    }
    let deadline = now + Duration::from_millis(self.config.debounce_ms);
    self.pending = Some(view);
    self.state = PolicyState::Debouncing { deadline };
  }

  /// Evaluate the pending view if its debounce window has elapsed.
  ///
  /// Returns the applied diff, or None when nothing was evaluated. A view
  /// that cannot be evaluated keeps the previous visible set.
  pub fn tick(&mut self, now: Instant, host: &mut dyn RenderHost) -> Option<PolicyDiff> {
    let view = match self.state {
      PolicyState::Stopped => return None,
      PolicyState::Debouncing { deadline } if now >= deadline => {
        self.state = PolicyState::Idle;
        self.pending.take()
      }
      _ if self.recompute => self.last_view.clone(),
      _ => return None,
    };

    let start = Instant::now();
    let evaluated = view
      .and_then(|view| self.visible_nodes(&view).map(|nodes| (view, nodes)))
      .or_else(|| {
        // A pending recompute falls back to the last evaluated view
        if !self.recompute {
          return None;
        }
        let view = self.last_view.clone()?;
        self.visible_nodes(&view).map(|nodes| (view, nodes))
      });
    let (view, nodes) = evaluated?;
    self.recompute = false;
    let diff = self.apply(nodes, host);
    self
      .metrics
      .record_tick(diff.added.len(), diff.removed.len(), start.elapsed().as_micros() as u64);
    debug!(
      added = diff.added.len(),
      removed = diff.removed.len(),
      loaded = self.loaded.len(),
      "lod diff applied"
    );

    self.last_view = Some(view.clone());
    self.events.push(PolicyEvent::ViewChanged(view));
    Some(diff)
  }

  /// Scale the closest shell distance; larger hints keep detail farther out.
  pub fn set_distance_hint(&mut self, hint: f64) {
    if !hint.is_finite() || hint <= 0.0 {
      warn!(hint, "ignoring invalid distance hint");
      return;
    }
    self.distance_hint = hint;
    self.recompute = true;
  }

  /// Switch imagery; every loaded key is released and recomposed on the next tick.
  pub fn set_imagery_source(&mut self, source: Option<String>, host: &mut dyn RenderHost) {
    if source.is_some() && self.imagery_loader.is_none() {
      warn!("imagery source set without an imagery loader");
    }
    let unloaded = self.unload_all(host);
    debug!(?source, unloaded, "imagery source changed");
    self.imagery_source = source;
    self.recompute = true;
  }

  /// Forget the loaded key for `path` so the next tick requests it again.
  ///
  /// Used when a load failed; the host is told the buffer is gone.
  pub fn release(&mut self, path: &TreePath, host: &mut dyn RenderHost) -> Option<BufferKey> {
    let key = self.loaded.keys().find(|(id, _)| id == path).cloned()?;
    let buffer_key = self.loaded.remove(&key)?;
    host.remove_point_buffer(&buffer_key);
    self.recompute = true;
    debug!(path = %path, "loaded key released");
    Some(buffer_key)
  }

  pub fn drain_events(&mut self) -> Vec<PolicyEvent> {
    std::mem::take(&mut self.events)
  }

  /// Visible node set for a view, or None when the view cannot be evaluated.
  #[cfg_attr(feature = "tracing-spans", tracing::instrument(skip_all, name = "lod::visible_nodes"))]
  pub fn visible_nodes(&self, view: &ViewState) -> Option<BTreeMap<NodeKey, LodNode>> {
    let Some(camera) = view.active_camera() else {
      debug!("no active camera, keeping visible set");
      return None;
    };
    let (Some(eye), Some(target)) = (view.eye, view.target) else {
      debug!("view lacks eye or target, keeping visible set");
      return None;
    };
    let Projection::Perspective {
      fov_y,
      aspect,
      near,
      far,
    } = camera.projection
    else {
      info!("only perspective cameras drive LOD selection");
      return None;
    };

    let distances = distance_series(
      self.config.closest_plane_distance,
      self.distance_hint,
      far,
      self.config.shell_count,
    );
    let root = self.geo_transform.coordinate_space_bounds(CoordinateSpace::Tree);
    let mut nodes = BTreeMap::new();

    for (shell, shell_far) in distances.iter().enumerate() {
      let frustum = Frustum::perspective(eye, target, fov_y, aspect, near, *shell_far);
      if !frustum.is_finite() {
        warn!(shell, "degenerate frustum skipped");
        continue;
      }
      ShellTraversal {
        frustum: &frustum,
        transform: &self.geo_transform,
        branching: self.config.branching,
        target_depth: shell_depth(self.config.max_depth, shell),
        base_depth: self.config.base_depth,
        use_sphere_test: self.config.use_sphere_test,
      }
      .collect(root, &mut nodes);
    }
    Some(nodes)
  }

  /// Compose the load key for a node from every loader's query.
  pub fn buffer_key(&self, node: &LodNode) -> BufferKey {
    let geo_bounds = self
      .geo_transform
      .transform_bounds(&node.tree_bounds, CoordinateSpace::Tree, CoordinateSpace::Geo);
    let render_bounds = self
      .geo_transform
      .transform_bounds(&node.tree_bounds, CoordinateSpace::Tree, CoordinateSpace::Render);
    let world = self.geo_transform.coordinate_space_bounds(CoordinateSpace::Render);
    let imagery = match (&self.imagery_loader, &self.imagery_source) {
      (Some(loader), Some(source)) => Some(loader.query_for(&geo_bounds, source)),
      _ => None,
    };
    BufferKey {
      tree_path: node.id.clone(),
      depth_begin: node.depth_begin,
      depth_end: node.depth_end,
      geo_bounds,
      render_bounds,
      point: self
        .point_loader
        .query_for(&geo_bounds, node.depth_begin, node.depth_end),
      transform: self.transform_loader.query_for(&world, &render_bounds),
      imagery,
    }
  }

  pub fn state(&self) -> PolicyState {
    self.state
  }

  pub fn config(&self) -> &PolicyConfig {
    &self.config
  }

  pub fn geo_transform(&self) -> &GeoTransform {
    &self.geo_transform
  }

  pub fn distance_hint(&self) -> f64 {
    self.distance_hint
  }

  pub fn imagery_source(&self) -> Option<&str> {
    self.imagery_source.as_deref()
  }

  /// Keys currently loaded, in `(path, depth)` order.
  pub fn loaded(&self) -> impl Iterator<Item = &BufferKey> {
    self.loaded.values()
  }

  pub fn loaded_len(&self) -> usize {
    self.loaded.len()
  }

  pub fn metrics(&self) -> &StreamMetrics {
    &self.metrics
  }

  fn apply(&mut self, nodes: BTreeMap<NodeKey, LodNode>, host: &mut dyn RenderHost) -> PolicyDiff {
    let mut diff = PolicyDiff::default();

    let stale: Vec<NodeKey> = self
      .loaded
      .keys()
      .filter(|key| !nodes.contains_key(*key))
      .cloned()
      .collect();
    for key in stale {
      if let Some(buffer_key) = self.loaded.remove(&key) {
        host.remove_point_buffer(&buffer_key);
        diff.removed.push(buffer_key);
      }
    }

    for (key, node) in nodes {
      if self.loaded.contains_key(&key) {
        continue;
      }
      let buffer_key = self.buffer_key(&node);
      host.add_point_buffer(&buffer_key);
      diff.added.push(buffer_key.clone());
      self.loaded.insert(key, buffer_key);
    }
    diff
  }

  fn unload_all(&mut self, host: &mut dyn RenderHost) -> usize {
    let loaded = std::mem::take(&mut self.loaded);
    for key in loaded.values() {
      host.remove_point_buffer(key);
    }
    loaded.len()
  }
}

#[cfg(test)]
#[path = "policy_test.rs"]
mod policy_test;

//! StreamSession - composition root for one streamed resource.
//!
//! ```text
//! update_view ──► FrustumLodPolicy ──tick──► PolicyDiff
//!                        │                      │ added        │ removed
//!                        ▼                      ▼              ▼
//!                   RenderHost            DecodePool     cache.remove
//!                        ▲                      │ poll
//!                        │                      ▼
//!                        └── on_colored ── PointBufferCache::push
//! ```
//!
//! The session owns the imagery tile cache and hands it to the brush factory,
//! so every imagery brush of the session shares one LRU.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::brush::{BrushFactory, BrushSlot, TileCache};
use crate::buffer::{BufferParams, PointStats};
use crate::cache::{IntoBufferParams, PointBufferCache, PushReport};
use crate::config::StreamConfig;
use crate::decode_pool::{DecodeCompletion, DecodePool};
use crate::error::{Error, PolicyError};
use crate::geo_transform::GeoTransform;
use crate::lod::{FrustumLodPolicy, LoaderSet, PolicyDiff, PolicyEvent, ViewState};
use crate::loader::RenderHost;
use crate::tree_path::TreePath;

/// Outcome of one [`StreamSession::poll`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollReport {
  /// Buffers colored and handed to the host.
  pub pushed: Vec<TreePath>,
  /// Recolors triggered by those pushes.
  pub recolored: usize,
  /// Loads or pushes that failed.
  pub failed: Vec<TreePath>,
  /// Results for nodes unloaded while their load was in flight.
  pub discarded: usize,
}

pub struct StreamSession<H: RenderHost> {
  policy: FrustumLodPolicy,
  pool: DecodePool,
  cache: PointBufferCache,
  factory: BrushFactory,
  tiles: Arc<Mutex<TileCache>>,
  brushes: Vec<BrushSlot>,
  /// Statistics over every buffer received so far.
  global_stats: Arc<PointStats>,
  /// Path → key id of the load the policy currently wants.
  wanted: HashMap<TreePath, String>,
  host: H,
}

impl<H: RenderHost> StreamSession<H> {
  pub fn new(loaders: LoaderSet, geo_transform: GeoTransform, config: StreamConfig, host: H) -> Result<Self, Error> {
    let point_loader = loaders.point.clone().ok_or(PolicyError::MissingLoader("point"))?;
    let tiles = Arc::new(Mutex::new(TileCache::from_config(&config.tiles)));
    let mut factory = BrushFactory::with_stock_brushes();
    if let Some(imagery) = loaders.imagery.clone() {
      factory.register_imagery(imagery, Arc::clone(&tiles));
    }

    let policy = FrustumLodPolicy::new(loaders, geo_transform, config.policy)?;
    let pool = DecodePool::new(point_loader, config.pool)?;

    Ok(Self {
      policy,
      pool,
      cache: PointBufferCache::with_config(config.cache),
      factory,
      tiles,
      brushes: Vec::new(),
      global_stats: Arc::new(PointStats::new()),
      wanted: HashMap::new(),
      host,
    })
  }

  pub fn start(&mut self) {
    self.policy.start();
  }

  /// Unload everything; cached buffers and statistics are dropped.
  pub fn stop(&mut self) {
    self.policy.stop(&mut self.host);
    self.forget_loaded();
    self.global_stats = Arc::new(PointStats::new());
  }

  pub fn update_view(&mut self, view: ViewState, now: Instant) {
    self.policy.update_view(view, now);
  }

  pub fn set_distance_hint(&mut self, hint: f64) {
    self.policy.set_distance_hint(hint);
  }

  /// Switch imagery; every node reloads with the new imagery query.
  pub fn set_imagery_source(&mut self, source: Option<String>) {
    self.policy.set_imagery_source(source, &mut self.host);
    self.forget_loaded();
  }

  /// Replace the brush slots and recolor every cached node with them.
  pub fn set_brushes(&mut self, specs: &[Option<&str>]) -> Result<usize, Error> {
    self.brushes = self.factory.create_slots(specs)?;
    Ok(self.recolor_all())
  }

  /// Restore brush slots saved with [`StreamSession::serialize_brushes`].
  pub fn restore_brushes(&mut self, entries: &[Value]) -> Result<usize, Error> {
    self.brushes = self.factory.deserialize_brushes(entries)?;
    Ok(self.recolor_all())
  }

  pub fn serialize_brushes(&self) -> Vec<Value> {
    BrushFactory::serialize_brushes(&self.brushes)
  }

  /// Run the policy; new nodes are queued for loading, dropped nodes evicted.
  pub fn tick(&mut self, now: Instant) -> Result<Option<PolicyDiff>, Error> {
    let Some(diff) = self.policy.tick(now, &mut self.host) else {
      return Ok(None);
    };
    for key in &diff.removed {
      self.wanted.remove(&key.tree_path);
      self.cache.remove(key.tree_path.as_str());
    }
    for key in &diff.added {
      self.wanted.insert(key.tree_path.clone(), key.id());
      self.pool.submit(key.clone())?;
    }
    Ok(Some(diff))
  }

  /// Push every finished load into the cache without blocking.
  pub fn poll(&mut self) -> PollReport {
    let completions = self.pool.poll();
    self.accept_all(completions)
  }

  /// Like [`StreamSession::poll`], waiting up to `timeout` for the first load.
  pub fn poll_timeout(&mut self, timeout: Duration) -> PollReport {
    let completions = self.pool.poll_timeout(timeout);
    self.accept_all(completions)
  }

  pub fn drain_events(&mut self) -> Vec<PolicyEvent> {
    self.policy.drain_events()
  }

  pub fn host(&self) -> &H {
    &self.host
  }

  pub fn host_mut(&mut self) -> &mut H {
    &mut self.host
  }

  pub fn cache(&self) -> &PointBufferCache {
    &self.cache
  }

  pub fn policy(&self) -> &FrustumLodPolicy {
    &self.policy
  }

  pub fn pool(&self) -> &DecodePool {
    &self.pool
  }

  /// Register custom brushes before calling [`StreamSession::set_brushes`].
  pub fn factory_mut(&mut self) -> &mut BrushFactory {
    &mut self.factory
  }

  pub fn tile_cache(&self) -> Arc<Mutex<TileCache>> {
    Arc::clone(&self.tiles)
  }

  pub fn global_stats(&self) -> &PointStats {
    &self.global_stats
  }

  /// Loads submitted and not yet accepted.
  pub fn pending_loads(&self) -> usize {
    self.pool.in_flight()
  }

  fn accept_all(&mut self, completions: Vec<DecodeCompletion>) -> PollReport {
    let mut report = PollReport::default();
    for completion in completions {
      self.accept(completion, &mut report);
    }
    if !report.pushed.is_empty() || !report.failed.is_empty() {
      debug!(
        pushed = report.pushed.len(),
        recolored = report.recolored,
        failed = report.failed.len(),
        "loads accepted"
      );
    }
    report
  }

  fn accept(&mut self, completion: DecodeCompletion, report: &mut PollReport) {
    let DecodeCompletion { key, result, .. } = completion;
    let path = key.tree_path.clone();
    if self.wanted.get(&path) != Some(&key.id()) {
      report.discarded += 1;
      return;
    }
    let buffer = match result {
      Ok(buffer) => buffer,
      Err(e) => {
        // Released so the next tick requests it again
        warn!(path = %path, error = %e, "load failed");
        self.wanted.remove(&path);
        self.policy.release(&path, &mut self.host);
        report.failed.push(path);
        return;
      }
    };

    Arc::make_mut(&mut self.global_stats).merge(&buffer.stats);
    let params = BufferParams::builder()
      .data(buffer.data)
      .schema(buffer.schema)
      .tree_path(path.clone())
      .total_points(buffer.total_points)
      .geo_transform(*self.policy.geo_transform())
      .render_space_bounds(key.render_bounds)
      .buffer_stats(buffer.stats)
      .point_cloud_buffer_stats(Arc::clone(&self.global_stats));

    match self.push(params) {
      Ok(pushed) => {
        report.recolored += pushed.recolored.len();
        report.pushed.push(path);
      }
      Err(e) => {
        warn!(path = %path, error = %e, "push failed");
        report.failed.push(path);
      }
    }
  }

  fn push(&mut self, params: impl IntoBufferParams) -> Result<PushReport, Error> {
    let host = &mut self.host;
    let report = self
      .cache
      .push(params, &mut self.brushes, &mut |path, buffer| host.update_point_buffer(path, buffer))?;
    Ok(report)
  }

  /// Recolor every cached node with the current brushes and global stats.
  fn recolor_all(&mut self) -> usize {
    let host = &mut self.host;
    let report = self.cache.recolor_all(&self.global_stats, &mut self.brushes, &mut |path, buffer| {
      host.update_point_buffer(path, buffer)
    });
    let recolored = report.recolored.len();
    info!(
      recolored,
      failed = report.recolor_failures.len(),
      slots = self.brushes.len(),
      "brushes replaced"
    );
    self.host.force_update();
    recolored
  }

  fn forget_loaded(&mut self) {
    self.wanted.clear();
    self.cache.clear();
  }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

//! PointBufferCache - tree-indexed store of colored buffers.
//!
//! # Push protocol
//!
//! ```text
//! push(params, brushes)
//!   │ validate (all params present, X/Y/Z in schema)
//!   ▼
//! gather parent/children staging per brush spec
//!   │
//!   ▼
//! prepare ║ color (chunked) ║ staging ║ unprepare      ── failure: nothing committed
//!   │
//!   ▼
//! commit node + raw params ──► on_colored(path, buffer)
//!   │
//!   ▼
//! impact scan ──► FIFO recolor queue ──► same pipeline per node, then its own scan
//! ```
//!
//! Raw params are kept per path so impacted nodes can be recolored without
//! refetching. A recolor uses the node's own params with the resource-wide
//! statistics of the triggering push. Every node is visited at most once per
//! top-level push.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};
use web_time::Instant;

use crate::brush::{missing_fields, Brush, BrushSlot, NodeSelection, SelectionStrategy, StagingAttributes, StagingContext};
use crate::buffer::{BufferParams, BufferParamsBuilder, ColoredBuffer, PointStats};
use crate::config::CacheConfig;
use crate::error::{BrushError, CacheError};
use crate::metrics::StreamMetrics;
use crate::tree_path::{TreePath, MAX_CHILDREN};

pub mod coloring;

pub use coloring::{PositionIndices, POSITION_FLOATS};

/// One colored node.
#[derive(Clone, Debug)]
pub struct CachedNode {
  /// Brush spec string → staging snapshot from the last coloring.
  ///
  /// A missing entry means the node was never colored by that brush.
  pub staging_attributes: HashMap<String, StagingAttributes>,
  pub data: ColoredBuffer,
}

/// Anything `push` can turn into complete buffer parameters.
pub trait IntoBufferParams {
  fn into_buffer_params(self) -> Result<BufferParams, CacheError>;
}

impl IntoBufferParams for BufferParams {
  fn into_buffer_params(self) -> Result<BufferParams, CacheError> {
    Ok(self)
  }
}

impl IntoBufferParams for BufferParamsBuilder {
  fn into_buffer_params(self) -> Result<BufferParams, CacheError> {
    self.build()
  }
}

/// Outcome of a successful push.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PushReport {
  pub point_count: usize,
  /// Nodes recolored because of this push, in recolor order.
  pub recolored: Vec<TreePath>,
  /// Impacted nodes whose recolor failed; their previous colors remain.
  pub recolor_failures: Vec<TreePath>,
}

/// Colored buffers keyed by tree path.
#[derive(Debug, Default)]
pub struct PointBufferCache {
  nodes: HashMap<TreePath, CachedNode>,
  /// Last raw params per path, replayed on recolor.
  sources: HashMap<TreePath, BufferParams>,
  config: CacheConfig,
  metrics: StreamMetrics,
}

impl PointBufferCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_config(config: CacheConfig) -> Self {
    Self {
      config,
      ..Self::default()
    }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  /// Color and cache one buffer, then recolor whatever it made stale.
  ///
  /// `brushes[i]` colors channel `i`; empty slots keep their position and
  /// are written as zero. `on_colored` is called for the pushed node and
  /// for every recolored node, right after each is committed.
  ///
  /// Fails without touching the cache when a parameter or position field is
  /// missing, or when a brush fails while coloring the pushed buffer.
  #[cfg_attr(feature = "tracing-spans", tracing::instrument(skip_all, name = "cache::push"))]
  pub fn push<P: IntoBufferParams>(
    &mut self,
    params: P,
    brushes: &mut [BrushSlot],
    on_colored: &mut dyn FnMut(&TreePath, &ColoredBuffer),
  ) -> Result<PushReport, CacheError> {
    let start = Instant::now();
    let params = params.into_buffer_params()?;
    let position = position_indices(&params)?;

    let point_count = match self.color_and_commit(&params, position, brushes, on_colored) {
      Ok(count) => count,
      Err(e) => {
        self.metrics.record_failed_push();
        return Err(e);
      }
    };
    debug!(path = %params.tree_path, points = point_count, "buffer cached");

    let mut report = PushReport {
      point_count,
      ..PushReport::default()
    };
    self.recolor_impacted(&params, brushes, on_colored, &mut report);

    self
      .metrics
      .record_push(start.elapsed().as_micros() as u64, report.recolored.len());
    Ok(report)
  }

  /// Recolor every cached node with `brushes`, each exactly once.
  ///
  /// For a changed brush set. No impact scan runs since every node is
  /// visited anyway; `stats` replaces each node's global statistics. Nodes
  /// that fail keep their previous colors.
  #[cfg_attr(feature = "tracing-spans", tracing::instrument(skip_all, name = "cache::recolor_all"))]
  pub fn recolor_all(
    &mut self,
    stats: &Arc<PointStats>,
    brushes: &mut [BrushSlot],
    on_colored: &mut dyn FnMut(&TreePath, &ColoredBuffer),
  ) -> PushReport {
    let mut report = PushReport::default();
    for path in self.paths() {
      let Some(source) = self.sources.get(&path) else {
        continue;
      };
      let mut params = source.clone();
      params.point_cloud_buffer_stats = Arc::clone(stats);

      let result = position_indices(&params)
        .and_then(|position| self.color_and_commit(&params, position, brushes, on_colored));
      match result {
        Ok(count) => {
          report.point_count += count;
          report.recolored.push(path);
        }
        Err(e) => {
          warn!(path = %path, error = %e, "recolor failed, keeping previous colors");
          report.recolor_failures.push(path);
        }
      }
    }
    report
  }

  /// Drop a node and its raw params (called when the node is unloaded).
  pub fn remove(&mut self, path: &str) -> Option<CachedNode> {
    self.sources.remove(path);
    let node = self.nodes.remove(path)?;
    self
      .metrics
      .remove_node(depth_of(path), node.data.point_count);
    Some(node)
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.sources.clear();
    self.metrics.reset();
  }

  pub fn node(&self, path: &str) -> Option<&CachedNode> {
    self.nodes.get(path)
  }

  pub fn contains(&self, path: &str) -> bool {
    self.nodes.contains_key(path)
  }

  /// Raw params last pushed for `path`.
  pub fn source(&self, path: &str) -> Option<&BufferParams> {
    self.sources.get(path)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Cached paths in sorted order.
  pub fn paths(&self) -> Vec<TreePath> {
    let mut paths: Vec<TreePath> = self.nodes.keys().cloned().collect();
    paths.sort();
    paths
  }

  pub fn metrics(&self) -> &StreamMetrics {
    &self.metrics
  }

  // ---------------------------------------------------------------------------
  // Pipeline
  // ---------------------------------------------------------------------------

  fn color_and_commit(
    &mut self,
    params: &BufferParams,
    position: PositionIndices,
    brushes: &mut [BrushSlot],
    on_colored: &mut dyn FnMut(&TreePath, &ColoredBuffer),
  ) -> Result<usize, CacheError> {
    let node = self.color_node(params, position, brushes)?;
    let path = params.tree_path.clone();
    let point_count = node.data.point_count;

    if let Some(old) = self.nodes.insert(path.clone(), node) {
      self.metrics.remove_node(path.depth(), old.data.point_count);
    }
    self.metrics.record_node(path.depth(), point_count);
    self.sources.insert(path.clone(), params.clone());

    if let Some(node) = self.nodes.get(&path) {
      on_colored(&path, &node.data);
    }
    Ok(point_count)
  }

  /// Run the full brush lifecycle for one buffer without committing.
  fn color_node(
    &self,
    params: &BufferParams,
    position: PositionIndices,
    brushes: &mut [BrushSlot],
  ) -> Result<CachedNode, CacheError> {
    let path = &params.tree_path;
    let parent = path.parent().and_then(|p| self.nodes.get(&p));
    let children: SmallVec<[&CachedNode; 8]> = (0..MAX_CHILDREN)
      .filter_map(|i| path.child(i))
      .filter_map(|c| self.nodes.get(&c))
      .collect();

    // Each brush only sees staging written under its own spec
    let contexts: SmallVec<[StagingContext<'_>; 4]> = brushes
      .iter()
      .map(|slot| match slot {
        Some(brush) => {
          let key = brush.spec().as_str();
          StagingContext {
            parent: parent.and_then(|n| n.staging_attributes.get(key)),
            children: children
              .iter()
              .filter_map(|n| n.staging_attributes.get(key))
              .collect(),
          }
        }
        None => StagingContext::default(),
      })
      .collect();

    let fail = |brushes: &[BrushSlot], (slot, source): (usize, BrushError)| {
      brush_failure(brushes, slot, path, source)
    };

    for brush in brushes.iter().flatten() {
      let missing = missing_fields(&**brush, &params.schema);
      if !missing.is_empty() {
        debug!(path = %path, brush = %brush.spec(), ?missing, "brush fields absent from schema");
      }
    }

    coloring::prepare_brushes(brushes, params, &contexts).map_err(|e| fail(brushes, e))?;

    let data = match coloring::color_buffer(params, brushes, position, self.config.color_chunk_points) {
      Ok(data) => data,
      Err(e) => {
        let err = fail(brushes, e);
        if let Err((slot, e)) = coloring::unprepare_brushes(brushes, params) {
          warn!(slot, path = %path, error = %e, "unprepare after failed coloring");
        }
        return Err(err);
      }
    };

    let staging_attributes = brushes
      .iter()
      .zip(&contexts)
      .filter_map(|(slot, ctx)| {
        let brush = slot.as_ref()?;
        Some((
          brush.spec().as_str().to_string(),
          brush.staging_attributes(params, ctx),
        ))
      })
      .collect();

    coloring::unprepare_brushes(brushes, params).map_err(|e| fail(brushes, e))?;

    Ok(CachedNode {
      staging_attributes,
      data,
    })
  }

  // ---------------------------------------------------------------------------
  // Recolor
  // ---------------------------------------------------------------------------

  /// Drain the recolor queue seeded by the pushed buffer.
  fn recolor_impacted(
    &mut self,
    trigger: &BufferParams,
    brushes: &mut [BrushSlot],
    on_colored: &mut dyn FnMut(&TreePath, &ColoredBuffer),
    report: &mut PushReport,
  ) {
    let mut seen: HashSet<TreePath> = HashSet::from([trigger.tree_path.clone()]);
    let mut queue: VecDeque<TreePath> = VecDeque::new();
    self.scan_impact(trigger, brushes, &mut seen, &mut queue);

    while let Some(target) = queue.pop_front() {
      let Some(source) = self.sources.get(&target) else {
        continue;
      };
      let mut params = source.clone();
      params.point_cloud_buffer_stats = Arc::clone(&trigger.point_cloud_buffer_stats);

      let result = position_indices(&params)
        .and_then(|position| self.color_and_commit(&params, position, brushes, on_colored));
      match result {
        Ok(_) => {
          debug!(path = %target, trigger = %trigger.tree_path, "node recolored");
          report.recolored.push(target);
          self.scan_impact(&params, brushes, &mut seen, &mut queue);
        }
        Err(e) => {
          warn!(path = %target, error = %e, "recolor failed, keeping previous colors");
          report.recolor_failures.push(target);
        }
      }
    }
  }

  /// Enqueue every unseen cached node that a brush marks as stale.
  fn scan_impact(
    &self,
    params: &BufferParams,
    brushes: &[BrushSlot],
    seen: &mut HashSet<TreePath>,
    queue: &mut VecDeque<TreePath>,
  ) {
    let selections: SmallVec<[(&dyn Brush, NodeSelection); 4]> = brushes
      .iter()
      .flatten()
      .map(|brush| (&**brush, brush.node_selection_strategy(params)))
      .filter(|(_, sel)| sel.strategy != SelectionStrategy::None)
      .collect();
    if selections.is_empty() {
      return;
    }

    for candidate in self.candidates(&params.tree_path, &selections) {
      if seen.contains(&candidate) {
        continue;
      }
      let Some(node) = self.nodes.get(&candidate) else {
        continue;
      };
      let impacted = selections.iter().any(|(brush, selection)| {
        in_scope(selection.strategy, &candidate, &params.tree_path)
          && match node.staging_attributes.get(brush.spec().as_str()) {
            None => true,
            Some(staged) => brush.buffer_needs_recolor(params, &selection.params, staged),
          }
      });
      seen.insert(candidate.clone());
      if impacted {
        debug!(path = %candidate, trigger = %params.tree_path, "recolor enqueued");
        queue.push_back(candidate);
      }
    }
  }

  /// Union of every selection's scope: ancestors nearest first, then all
  /// other nodes in path order.
  fn candidates(&self, path: &TreePath, selections: &[(&dyn Brush, NodeSelection)]) -> Vec<TreePath> {
    let wants = |s: SelectionStrategy| selections.iter().any(|(_, sel)| sel.strategy == s);
    let mut out: Vec<TreePath> = Vec::new();
    if wants(SelectionStrategy::Ancestors) {
      out.extend(path.ancestors().filter(|a| self.nodes.contains_key(a)));
    }
    if wants(SelectionStrategy::All) {
      let ancestors: HashSet<&TreePath> = out.iter().collect();
      let mut rest: Vec<TreePath> = self
        .nodes
        .keys()
        .filter(|p| *p != path && !ancestors.contains(p))
        .cloned()
        .collect();
      rest.sort();
      out.extend(rest);
    }
    out
  }
}

/// Whether `candidate` falls in a strategy's scope relative to `path`.
fn in_scope(strategy: SelectionStrategy, candidate: &TreePath, path: &TreePath) -> bool {
  match strategy {
    SelectionStrategy::None => false,
    SelectionStrategy::All => candidate != path,
    SelectionStrategy::Ancestors => {
      candidate.len() < path.len() && path.as_str().starts_with(candidate.as_str())
    }
  }
}

fn depth_of(path: &str) -> usize {
  path.len().saturating_sub(1)
}

/// Resolve X/Y/Z or name the first missing one.
fn position_indices(params: &BufferParams) -> Result<PositionIndices, CacheError> {
  let find = |field: &'static str| {
    params
      .schema
      .index_of(field)
      .ok_or_else(|| CacheError::MissingSchemaField {
        tree_path: params.tree_path.to_string(),
        field,
      })
  };
  Ok(PositionIndices {
    x: find("X")?,
    y: find("Y")?,
    z: find("Z")?,
  })
}

fn brush_failure(brushes: &[BrushSlot], slot: usize, path: &TreePath, source: BrushError) -> CacheError {
  let spec = brushes
    .get(slot)
    .and_then(|b| b.as_ref())
    .map(|b| b.spec().to_string())
    .unwrap_or_default();
  CacheError::Brush {
    spec,
    tree_path: path.to_string(),
    source,
  }
}

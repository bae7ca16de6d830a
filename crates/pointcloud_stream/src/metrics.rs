//! Engine-agnostic metrics collection for streaming statistics.
//!
//! Feature-gated and runtime-toggled to ensure zero overhead when disabled.
//!
//! # Usage
//!
//! ```ignore
//! use pointcloud_stream::metrics::{StreamMetrics, COLLECT_METRICS};
//!
//! // Compile with --features metrics
//! // Runtime toggle:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! metrics.record_push(elapsed_us, recolors);
//! metrics.record_tick(added, removed, elapsed_us);
//! ```

use std::collections::VecDeque;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::sync::atomic::AtomicBool;

/// Runtime toggle for metrics collection.
/// Set to false to disable metrics gathering at runtime.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Check if metrics collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
    #[cfg(feature = "metrics")]
    {
        COLLECT_METRICS.load(Ordering::Relaxed)
    }
    #[cfg(not(feature = "metrics"))]
    {
        false
    }
}

/// Rolling window for storing recent values (e.g., timing history).
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    /// Create a new rolling window with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new value, evicting the oldest if at capacity.
    pub fn push(&mut self, value: T) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Iterate over values (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    /// Get the most recent value.
    pub fn last(&self) -> Option<&T> {
        self.buffer.back()
    }
}

impl RollingWindow<u64> {
    pub fn sum(&self) -> u64 {
        self.buffer.iter().sum()
    }

    /// Compute the average of all values.
    pub fn average(&self) -> f64 {
        if self.buffer.is_empty() {
            0.0
        } else {
            self.sum() as f64 / self.buffer.len() as f64
        }
    }

    /// Get min and max values.
    pub fn min_max(&self) -> Option<(u64, u64)> {
        let min = self.buffer.iter().min()?;
        let max = self.buffer.iter().max()?;
        Some((*min, *max))
    }
}

impl Default for RollingWindow<u64> {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Number of tree depths tracked individually; deeper nodes share the last slot.
pub const TRACKED_DEPTHS: usize = 16;

/// Cache and policy statistics.
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    /// Colored nodes per tree depth (index = depth).
    pub nodes_per_depth: [u32; TRACKED_DEPTHS],
    /// Points held by colored buffers.
    pub cached_points: u64,

    /// Rolling window of full push times (color + recolor) in microseconds.
    pub push_timings: RollingWindow<u64>,
    /// Rolling window of LOD tick times in microseconds.
    pub tick_timings: RollingWindow<u64>,

    /// Total recolor passes this session.
    pub total_recolors: u64,
    /// Total pushes that failed in a brush.
    pub failed_pushes: u64,
    /// Total buffers requested by the LOD policy.
    pub total_loads_requested: u64,
    /// Total buffers released by the LOD policy.
    pub total_unloads_requested: u64,
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self {
            nodes_per_depth: [0; TRACKED_DEPTHS],
            cached_points: 0,
            push_timings: RollingWindow::new(128),
            tick_timings: RollingWindow::new(128),
            total_recolors: 0,
            failed_pushes: 0,
            total_loads_requested: 0,
            total_unloads_requested: 0,
        }
    }
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset gauges and timings; cumulative counters are kept.
    pub fn reset(&mut self) {
        self.nodes_per_depth.fill(0);
        self.cached_points = 0;
        self.push_timings.clear();
        self.tick_timings.clear();
    }

    /// Record a newly cached node.
    pub fn record_node(&mut self, depth: usize, point_count: usize) {
        if !is_enabled() {
            return;
        }
        self.nodes_per_depth[depth.min(TRACKED_DEPTHS - 1)] += 1;
        self.cached_points += point_count as u64;
    }

    /// Remove node statistics (when a node is evicted).
    pub fn remove_node(&mut self, depth: usize, point_count: usize) {
        if !is_enabled() {
            return;
        }
        let slot = &mut self.nodes_per_depth[depth.min(TRACKED_DEPTHS - 1)];
        *slot = slot.saturating_sub(1);
        self.cached_points = self.cached_points.saturating_sub(point_count as u64);
    }

    pub fn record_push(&mut self, elapsed_us: u64, recolors: usize) {
        if is_enabled() {
            self.push_timings.push(elapsed_us);
            self.total_recolors += recolors as u64;
        }
    }

    pub fn record_failed_push(&mut self) {
        if is_enabled() {
            self.failed_pushes += 1;
        }
    }

    pub fn record_tick(&mut self, added: usize, removed: usize, elapsed_us: u64) {
        if is_enabled() {
            self.tick_timings.push(elapsed_us);
            self.total_loads_requested += added as u64;
            self.total_unloads_requested += removed as u64;
        }
    }

    pub fn total_nodes(&self) -> u32 {
        self.nodes_per_depth.iter().sum()
    }

    pub fn avg_push_timing_us(&self) -> f64 {
        self.push_timings.average()
    }

    pub fn avg_tick_timing_us(&self) -> f64 {
        self.tick_timings.average()
    }
}

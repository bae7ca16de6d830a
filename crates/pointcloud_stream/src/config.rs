//! Tunables for the cache, LOD policy, decode pool and tile cache.
//!
//! Every struct has a `const DEFAULT` preset and derives serde so a viewer can
//! read overrides from JSON.

use serde::{Deserialize, Serialize};

/// Points colored per parallel chunk.
pub const COLOR_CHUNK_POINTS: usize = 1_000;

/// Point buffer cache settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	/// Points per coloring chunk. Results do not depend on this value.
	pub color_chunk_points: usize,
}

impl CacheConfig {
	pub const DEFAULT: Self = Self {
		color_chunk_points: COLOR_CHUNK_POINTS,
	};
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self::DEFAULT
	}
}

/// Spatial subdivision used by the LOD policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branching {
	/// 4 children, X/Y split, full Z kept.
	Quad,
	/// 8 children.
	Oct,
}

impl Branching {
	#[inline]
	pub fn child_count(self) -> u8 {
		match self {
			Self::Quad => 4,
			Self::Oct => 8,
		}
	}
}

/// LOD node-selection settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
	pub branching: Branching,
	/// Quiet period after the last view update before a recompute.
	pub debounce_ms: u64,
	/// Far distance of the nearest shell, in render units.
	pub closest_plane_distance: f64,
	/// Tree depth targeted by the nearest shell.
	pub max_depth: u32,
	/// Loader depth that tree depth 0 maps to.
	pub base_depth: u32,
	/// Number of distance shells evaluated per tick; `max_depth + 1` lets the
	/// farthest shell reach the root.
	pub shell_count: usize,
	/// Reject boxes whose bounding sphere misses the frustum before the box test.
	pub use_sphere_test: bool,
}

impl PolicyConfig {
	/// Quadtree traversal for mostly flat, wide resources.
	pub const DEFAULT: Self = Self {
		branching: Branching::Quad,
		debounce_ms: 500,
		closest_plane_distance: 100.0,
		max_depth: 5,
		base_depth: 8,
		shell_count: 6,
		use_sphere_test: true,
	};

	/// Octree traversal for volumetric resources.
	pub const OCTREE: Self = Self {
		branching: Branching::Oct,
		debounce_ms: 500,
		closest_plane_distance: 100.0,
		max_depth: 4,
		base_depth: 8,
		shell_count: 5,
		use_sphere_test: true,
	};
}

impl Default for PolicyConfig {
	fn default() -> Self {
		Self::DEFAULT
	}
}

/// Decode pool settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
	/// Fixed worker count; at least one worker always runs.
	pub workers: usize,
}

impl PoolConfig {
	pub const DEFAULT: Self = Self { workers: 4 };
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self::DEFAULT
	}
}

/// Imagery tile LRU settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileCacheConfig {
	/// Tiles kept before the least recently used one is evicted.
	pub capacity: usize,
}

impl TileCacheConfig {
	pub const DEFAULT: Self = Self { capacity: 64 };
}

impl Default for TileCacheConfig {
	fn default() -> Self {
		Self::DEFAULT
	}
}

/// All session settings in one document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
	pub cache: CacheConfig,
	pub policy: PolicyConfig,
	pub pool: PoolConfig,
	pub tiles: TileCacheConfig,
}

impl StreamConfig {
	/// Parse a JSON document; absent keys keep their defaults.
	pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}
}

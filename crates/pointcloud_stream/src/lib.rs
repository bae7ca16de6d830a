//! pointcloud_stream - engine independent core of a streaming point-cloud viewer
//!
//! Decides which parts of a very large point cloud to fetch for the current
//! camera view, colors each fetched buffer through pluggable brushes, and
//! keeps already-colored buffers consistent when new data changes global
//! statistics.
//!
//! # Features
//!
//! - **GeoTransform**: conversion between geo, tree and render coordinates
//! - **Brushes**: per-point coloring (solid, ramp, elevation, classification,
//!   imagery) behind a string-keyed registry
//! - **PointBufferCache**: colored buffers by tree path, with the recolor
//!   protocol for nodes made stale by a newer push
//! - **FrustumLodPolicy**: debounced, frustum and distance driven node
//!   selection with load/unload diffs
//! - **DecodePool** and **StreamSession**: worker threads for loads and the
//!   composition root wiring everything to a render host
//!
//! # Example
//!
//! ```ignore
//! use pointcloud_stream::{BrushFactory, PointBufferCache, BufferParams};
//!
//! let factory = BrushFactory::with_stock_brushes();
//! let mut brushes = factory.create_slots(&[Some("local://elevation")])?;
//! let mut cache = PointBufferCache::new();
//!
//! let params = BufferParams::builder()
//!     .data(points)
//!     .schema(schema)
//!     .tree_path("R")
//!     .total_points(n)
//!     .geo_transform(transform)
//!     .render_space_bounds(bounds)
//!     .buffer_stats(stats.clone())
//!     .point_cloud_buffer_stats(stats);
//!
//! cache.push(params, &mut brushes, &mut |path, colored| upload(path, colored))?;
//! ```

pub mod bounds;
pub mod buffer;
pub mod config;
pub mod error;
pub mod geo_transform;
pub mod tree_path;

// Re-export commonly used items
pub use bounds::DAabb3;
pub use buffer::{BufferParams, BufferParamsBuilder, ColoredBuffer, FieldRange, Point, PointStats, Schema};
pub use config::{Branching, CacheConfig, PolicyConfig, PoolConfig, StreamConfig, TileCacheConfig};
pub use error::{BrushError, CacheError, Error, GeoTransformError, LoaderError, PolicyError, PoolError, Result};
pub use geo_transform::{CoordinateSpace, GeoTransform};
pub use tree_path::TreePath;

// Brushes and their registry
pub mod brush;
pub use brush::{Brush, BrushFactory, BrushSlot, BrushSpec, NodeSelection, SelectionStrategy, TileCache};

// Colored buffer cache and recolor protocol
pub mod cache;
pub use cache::{CachedNode, PointBufferCache, PushReport};

// External loader and renderer contracts
pub mod loader;
pub use loader::{BufferKey, ImageryLoader, PointBufferLoader, RenderHost, TransformLoader};

// LOD node selection
pub mod lod;
pub use lod::{Camera, FrustumLodPolicy, LoaderSet, PolicyEvent, ViewState};

// Worker threads for buffer loads
pub mod decode_pool;
pub use decode_pool::DecodePool;

// Composition root
pub mod session;
pub use session::StreamSession;

// Metrics collection (feature-gated)
pub mod metrics;
pub use metrics::StreamMetrics;

#[cfg(test)]
pub(crate) mod test_utils;

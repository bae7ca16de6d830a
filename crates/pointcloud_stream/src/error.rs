//! Error types for the streaming core.
//!
//! One enum per concern, wrapped by the crate-level [`Error`].

use thiserror::Error;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Any failure surfaced by this crate.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  GeoTransform(#[from] GeoTransformError),
  #[error(transparent)]
  Cache(#[from] CacheError),
  #[error(transparent)]
  Brush(#[from] BrushError),
  #[error(transparent)]
  Policy(#[from] PolicyError),
  #[error(transparent)]
  Loader(#[from] LoaderError),
  #[error(transparent)]
  Pool(#[from] PoolError),
}

/// Coordinate-space conversion errors (bad input, never retried).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoTransformError {
  #[error("unknown coordinate space `{0}` (expected geo, tree or render)")]
  UnknownSpace(String),
  #[error("transform expects a 3- or 6-component vector, got {0}")]
  InvalidArity(usize),
  #[error("scale component {axis} is zero")]
  ZeroScale { axis: usize },
}

/// Failures of a single `PointBufferCache::push`.
#[derive(Debug, Error)]
pub enum CacheError {
  /// A required buffer parameter was not supplied.
  #[error("missing required buffer parameter `{0}`")]
  MissingParameter(&'static str),
  /// The buffer does not carry the fields needed to position points.
  #[error("schema for {tree_path} lacks required field `{field}`")]
  MissingSchemaField { tree_path: String, field: &'static str },
  /// A brush failed somewhere in its lifecycle; nothing was committed.
  #[error("brush `{spec}` failed while coloring {tree_path}: {source}")]
  Brush {
    spec: String,
    tree_path: String,
    #[source]
    source: BrushError,
  },
}

/// Brush construction, registry and lifecycle errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrushError {
  #[error("no brush registered for `{0}`")]
  UnrecognizedBrush(String),
  #[error("malformed brush spec `{0}`")]
  InvalidBrushSpec(String),
  #[error("serialized brush entry {index} has no spec string")]
  InvalidSerializedBrush { index: usize },
  #[error("brush parameter `{name}` is invalid: {reason}")]
  InvalidParameter { name: String, reason: String },
  #[error("prepare failed: {0}")]
  Prepare(String),
  #[error("color failed: {0}")]
  Color(String),
  #[error("imagery unavailable: {0}")]
  Imagery(String),
}

/// LOD policy construction errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
  #[error("the `{0}` loader is required")]
  MissingLoader(&'static str),
}

/// Opaque failure reported by an external loader.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("loader failed: {0}")]
pub struct LoaderError(pub String);

/// Decode pool failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
  #[error("worker {slot} crashed while running job {job}")]
  WorkerCrashed { slot: usize, job: u64 },
  #[error("decode pool is shut down")]
  Disconnected,
  #[error("could not start decode worker {slot}: {reason}")]
  Spawn { slot: usize, reason: String },
}

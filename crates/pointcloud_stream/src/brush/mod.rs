//! Brushes - pluggable per-point coloring strategies.
//!
//! A brush colors one buffer at a time through a strict lifecycle:
//!
//! ```text
//! prepare ──► color_point × N ──► staging_attributes ──► unprepare
//!  (I/O)        (pure, &self)        (snapshot)           (release)
//! ```
//!
//! After a buffer is cached, [`Brush::node_selection_strategy`] tells the
//! cache which other cached nodes may have gone stale, and
//! [`Brush::buffer_needs_recolor`] decides for each candidate.
//!
//! Brushes are identified by a [`BrushSpec`] string of the form
//! `scheme://name?key=value&...` and created through [`BrushFactory`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::buffer::{BufferParams, Point, Schema};
use crate::error::BrushError;

pub mod factory;
pub mod imagery;
pub mod local;

pub use factory::{BrushConstructor, BrushFactory};
pub use imagery::{RemoteImageryBrush, TileCache};
pub use local::{ElevationBrush, FieldColorBrush, FieldRampBrush, SolidColorBrush};

/// Opaque per-(node, brush) snapshot used to decide whether a node is stale.
pub type StagingAttributes = Value;

/// One brush per color channel; `None` leaves the channel empty.
pub type BrushSlot = Option<Box<dyn Brush>>;

// =============================================================================
// Spec
// =============================================================================

/// Parsed `scheme://name?params` brush identity.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BrushSpec {
  raw: String,
  scheme: String,
  name: String,
  params: BTreeMap<String, String>,
}

impl BrushSpec {
  /// The original spec string; staging attributes are keyed by it.
  pub fn as_str(&self) -> &str {
    &self.raw
  }

  pub fn scheme(&self) -> &str {
    &self.scheme
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn params(&self) -> &BTreeMap<String, String> {
    &self.params
  }

  pub fn param(&self, key: &str) -> Option<&str> {
    self.params.get(key).map(String::as_str)
  }

  /// Registry key, `scheme://name`.
  pub fn key(&self) -> String {
    registry_key(&self.scheme, &self.name)
  }
}

/// Registry key for a scheme/name pair.
pub fn registry_key(scheme: &str, name: &str) -> String {
  format!("{scheme}://{name}")
}

impl FromStr for BrushSpec {
  type Err = BrushError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || BrushError::InvalidBrushSpec(s.to_string());
    let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
    let (name, query) = match rest.split_once('?') {
      Some((name, query)) => (name, query),
      None => (rest, ""),
    };
    let valid_ident = |v: &str| {
      !v.is_empty()
        && v
          .chars()
          .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    };
    if !valid_ident(scheme) || !valid_ident(name) {
      return Err(invalid());
    }

    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
      let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
      let k = percent_decode(k).ok_or_else(invalid)?;
      let v = percent_decode(v).ok_or_else(invalid)?;
      params.insert(k, v);
    }

    Ok(Self {
      raw: s.to_string(),
      scheme: scheme.to_string(),
      name: name.to_string(),
      params,
    })
  }
}

impl fmt::Display for BrushSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

impl fmt::Debug for BrushSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "BrushSpec({})", self.raw)
  }
}

/// Decode `%XX` escapes and `+` in a query component.
fn percent_decode(s: &str) -> Option<String> {
  let bytes = s.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'%' => {
        let hex = s.get(i + 1..i + 3)?;
        out.push(u8::from_str_radix(hex, 16).ok()?);
        i += 3;
      }
      b'+' => {
        out.push(b' ');
        i += 1;
      }
      b => {
        out.push(b);
        i += 1;
      }
    }
  }
  String::from_utf8(out).ok()
}

// =============================================================================
// Node selection
// =============================================================================

/// Which other cached nodes a freshly cached buffer may have made stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionStrategy {
  /// Nothing else is affected.
  None,
  /// Every other cached node is a candidate.
  All,
  /// Cached ancestors (by path prefix) are candidates.
  Ancestors,
}

/// Strategy plus brush-defined parameters handed to `buffer_needs_recolor`.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSelection {
  pub strategy: SelectionStrategy,
  pub params: Value,
}

impl NodeSelection {
  pub fn none() -> Self {
    Self {
      strategy: SelectionStrategy::None,
      params: Value::Null,
    }
  }

  pub fn all(params: Value) -> Self {
    Self {
      strategy: SelectionStrategy::All,
      params,
    }
  }

  pub fn ancestors(params: Value) -> Self {
    Self {
      strategy: SelectionStrategy::Ancestors,
      params,
    }
  }
}

/// Shader-side ramp metadata declared by a brush.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "selector", rename_all = "lowercase")]
pub enum RampConfiguration {
  /// Colors are final; no ramp adjustment.
  None,
  /// Clamp the ramp input to `[min, max]`.
  Clamp { min: f64, max: f64 },
  /// Rescale the ramp input from `[min, max]` to the full ramp.
  Scale { min: f64, max: f64 },
}

/// Staging snapshots a brush sees when coloring one node.
///
/// Only entries produced earlier by the same brush spec are included.
#[derive(Clone, Debug, Default)]
pub struct StagingContext<'a> {
  pub parent: Option<&'a StagingAttributes>,
  pub children: SmallVec<[&'a StagingAttributes; 8]>,
}

// =============================================================================
// Brush trait
// =============================================================================

/// Per-point coloring strategy.
///
/// `prepare`/`unprepare` may block on I/O and run concurrently across the
/// brushes of one push. `color_point` is called from several worker threads
/// at once and therefore takes `&self`.
pub trait Brush: Send + Sync {
  fn spec(&self) -> &BrushSpec;

  /// Serializable brush state beyond its spec.
  fn serialize(&self) -> Value {
    Value::Null
  }

  /// Restore state produced by [`Brush::serialize`].
  fn deserialize(&mut self, _payload: &Value) -> Result<(), BrushError> {
    Ok(())
  }

  /// Point fields this brush reads.
  fn required_schema_fields(&self) -> SmallVec<[String; 4]>;

  fn ramp_configuration(&self) -> RampConfiguration {
    RampConfiguration::None
  }

  /// Acquire whatever coloring this buffer needs.
  fn prepare(
    &mut self,
    params: &BufferParams,
    staging: &StagingContext<'_>,
  ) -> Result<(), BrushError>;

  /// Write exactly three channel values (0-255 scale) for one point.
  fn color_point(&self, color: &mut [f32; 3], point: &Point<'_>) -> Result<(), BrushError>;

  /// Snapshot of what this coloring depended on.
  fn staging_attributes(
    &self,
    params: &BufferParams,
    staging: &StagingContext<'_>,
  ) -> StagingAttributes;

  /// Release resources acquired in `prepare`.
  fn unprepare(&mut self, params: &BufferParams) -> Result<(), BrushError>;

  /// Which cached nodes this buffer's arrival may have made stale.
  fn node_selection_strategy(&self, _params: &BufferParams) -> NodeSelection {
    NodeSelection::none()
  }

  /// Whether a candidate node colored with `other` must be recolored.
  fn buffer_needs_recolor(
    &self,
    _params: &BufferParams,
    _strategy_params: &Value,
    _other: &StagingAttributes,
  ) -> bool {
    false
  }
}

/// Fields `brush` reads that `schema` does not carry.
///
/// Such a brush still colors the buffer, falling back to its default color
/// for the absent fields.
pub fn missing_fields(brush: &dyn Brush, schema: &Schema) -> SmallVec<[String; 4]> {
  brush
    .required_schema_fields()
    .into_iter()
    .filter(|field| !schema.has_field(field))
    .collect()
}

impl fmt::Debug for dyn Brush {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Brush({})", self.spec())
  }
}

// =============================================================================
// Color packing
// =============================================================================

/// Pack an RGB triple into one float: `r * 65536 + g * 256 + b`.
///
/// Each channel is clamped to `[0, 255]` and truncated toward zero; the
/// result is below 2^24 and therefore exact in `f32`.
#[inline]
pub fn compress_color(color: [f32; 3]) -> f32 {
  let channel = |c: f32| {
    if c.is_nan() {
      0u32
    } else {
      c.clamp(0.0, 255.0) as u32
    }
  };
  let packed = channel(color[0]) * 65_536 + channel(color[1]) * 256 + channel(color[2]);
  packed as f32
}

/// Inverse of [`compress_color`].
#[inline]
pub fn decompress_color(packed: f32) -> [u8; 3] {
  let v = packed.max(0.0) as u32;
  [
    ((v >> 16) & 0xff) as u8,
    ((v >> 8) & 0xff) as u8,
    (v & 0xff) as u8,
  ]
}

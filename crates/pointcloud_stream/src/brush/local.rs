//! Brushes that color from the buffer alone (`local://` scheme).

use glam::DVec3;
use serde_json::{json, Value};
use smallvec::{smallvec, SmallVec};

use super::{Brush, BrushSpec, NodeSelection, RampConfiguration, StagingAttributes, StagingContext};
use crate::buffer::{BufferParams, FieldRange, Point, Schema};
use crate::error::BrushError;
use crate::geo_transform::{CoordinateSpace, GeoTransform};

// =============================================================================
// Parameter helpers
// =============================================================================

fn invalid(name: &str, reason: impl Into<String>) -> BrushError {
  BrushError::InvalidParameter {
    name: name.to_string(),
    reason: reason.into(),
  }
}

/// Numeric channel parameter, defaulting when absent.
fn channel_param(spec: &BrushSpec, name: &str, default: f32) -> Result<f32, BrushError> {
  match spec.param(name) {
    None => Ok(default),
    Some(raw) => raw
      .parse::<f32>()
      .ok()
      .filter(|v| v.is_finite())
      .ok_or_else(|| invalid(name, format!("`{raw}` is not a number"))),
  }
}

/// `#rrggbb` (or `rrggbb`) parameter, defaulting when absent.
fn hex_color_param(spec: &BrushSpec, name: &str, default: [f32; 3]) -> Result<[f32; 3], BrushError> {
  let Some(raw) = spec.param(name) else {
    return Ok(default);
  };
  let hex = raw.trim_start_matches('#');
  if hex.len() != 6 || !hex.is_ascii() {
    return Err(invalid(name, format!("`{raw}` is not #rrggbb")));
  }
  let mut out = [0.0; 3];
  for (i, c) in out.iter_mut().enumerate() {
    let byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
      .map_err(|_| invalid(name, format!("`{raw}` is not #rrggbb")))?;
    *c = f32::from(byte);
  }
  Ok(out)
}

#[inline]
fn lerp_color(start: [f32; 3], end: [f32; 3], t: f32) -> [f32; 3] {
  [
    start[0] + (end[0] - start[0]) * t,
    start[1] + (end[1] - start[1]) * t,
    start[2] + (end[2] - start[2]) * t,
  ]
}

/// Normalized position of `v` in `[min, max]`, clamped; degenerate ranges map to 0.
#[inline]
fn ramp_t(v: f64, min: f64, max: f64) -> f32 {
  let extent = max - min;
  if extent <= 0.0 || !extent.is_finite() {
    return 0.0;
  }
  ((v - min) / extent).clamp(0.0, 1.0) as f32
}

/// Resolved X/Y/Z field indices.
#[derive(Clone, Copy, Debug)]
struct PositionFields {
  x: usize,
  y: usize,
  z: usize,
}

impl PositionFields {
  fn resolve(schema: &Schema) -> Result<Self, BrushError> {
    let find = |name: &str| {
      schema
        .index_of(name)
        .ok_or_else(|| BrushError::Prepare(format!("schema has no `{name}` field")))
    };
    Ok(Self {
      x: find("X")?,
      y: find("Y")?,
      z: find("Z")?,
    })
  }

  fn read(&self, point: &Point<'_>) -> Option<DVec3> {
    Some(DVec3::new(
      f64::from(point.at(self.x)?),
      f64::from(point.at(self.y)?),
      f64::from(point.at(self.z)?),
    ))
  }
}

fn range_staging(field: &str, range: Option<FieldRange>) -> StagingAttributes {
  match range {
    Some(r) => json!({ "field": field, "min": r.min, "max": r.max }),
    None => json!({ "field": field, "min": Value::Null, "max": Value::Null }),
  }
}

// =============================================================================
// local://color
// =============================================================================

/// Constant color: `local://color?r=..&g=..&b=..` (0-255, default white).
#[derive(Debug)]
pub struct SolidColorBrush {
  spec: BrushSpec,
  color: [f32; 3],
}

impl SolidColorBrush {
  pub fn new(spec: BrushSpec) -> Result<Self, BrushError> {
    let color = [
      channel_param(&spec, "r", 255.0)?,
      channel_param(&spec, "g", 255.0)?,
      channel_param(&spec, "b", 255.0)?,
    ];
    Ok(Self { spec, color })
  }

  pub fn color(&self) -> [f32; 3] {
    self.color
  }
}

impl Brush for SolidColorBrush {
  fn spec(&self) -> &BrushSpec {
    &self.spec
  }

  fn required_schema_fields(&self) -> SmallVec<[String; 4]> {
    SmallVec::new()
  }

  fn prepare(&mut self, _: &BufferParams, _: &StagingContext<'_>) -> Result<(), BrushError> {
    Ok(())
  }

  #[inline]
  fn color_point(&self, color: &mut [f32; 3], _: &Point<'_>) -> Result<(), BrushError> {
    *color = self.color;
    Ok(())
  }

  fn staging_attributes(&self, _: &BufferParams, _: &StagingContext<'_>) -> StagingAttributes {
    json!({ "color": self.color })
  }

  fn unprepare(&mut self, _: &BufferParams) -> Result<(), BrushError> {
    Ok(())
  }
}

// =============================================================================
// local://ramp
// =============================================================================

/// Linear ramp of one field over its resource-wide range.
///
/// `local://ramp?field=Intensity&start=#000000&end=#ffffff`
///
/// The range comes from `point_cloud_buffer_stats`, which grows as buffers
/// arrive, so every push re-evaluates every cached node against the current
/// range and recolors those staged with an older one.
#[derive(Debug)]
pub struct FieldRampBrush {
  spec: BrushSpec,
  field: String,
  start: [f32; 3],
  end: [f32; 3],
  // Per-buffer state, set in prepare
  field_index: Option<usize>,
  range: Option<FieldRange>,
}

impl FieldRampBrush {
  pub fn new(spec: BrushSpec) -> Result<Self, BrushError> {
    let field = spec
      .param("field")
      .filter(|f| !f.is_empty())
      .ok_or_else(|| invalid("field", "required"))?
      .to_string();
    let start = hex_color_param(&spec, "start", [0.0; 3])?;
    let end = hex_color_param(&spec, "end", [255.0; 3])?;
    Ok(Self {
      spec,
      field,
      start,
      end,
      field_index: None,
      range: None,
    })
  }

  fn global_range(&self, params: &BufferParams) -> Option<FieldRange> {
    params
      .point_cloud_buffer_stats
      .range(&self.field)
      .or_else(|| params.buffer_stats.range(&self.field))
  }
}

impl Brush for FieldRampBrush {
  fn spec(&self) -> &BrushSpec {
    &self.spec
  }

  fn required_schema_fields(&self) -> SmallVec<[String; 4]> {
    smallvec![self.field.clone()]
  }

  fn ramp_configuration(&self) -> RampConfiguration {
    match self.range {
      Some(r) => RampConfiguration::Scale {
        min: r.min,
        max: r.max,
      },
      None => RampConfiguration::None,
    }
  }

  fn prepare(&mut self, params: &BufferParams, _: &StagingContext<'_>) -> Result<(), BrushError> {
    self.field_index = params.schema.index_of(&self.field);
    self.range = self.global_range(params);
    Ok(())
  }

  #[inline]
  fn color_point(&self, color: &mut [f32; 3], point: &Point<'_>) -> Result<(), BrushError> {
    let value = self.field_index.and_then(|i| point.at(i));
    *color = match (value, self.range) {
      (Some(v), Some(r)) => lerp_color(self.start, self.end, ramp_t(f64::from(v), r.min, r.max)),
      _ => [0.0; 3],
    };
    Ok(())
  }

  fn staging_attributes(&self, _: &BufferParams, _: &StagingContext<'_>) -> StagingAttributes {
    range_staging(&self.field, self.range)
  }

  fn unprepare(&mut self, _: &BufferParams) -> Result<(), BrushError> {
    self.field_index = None;
    self.range = None;
    Ok(())
  }

  fn node_selection_strategy(&self, params: &BufferParams) -> NodeSelection {
    match self.global_range(params) {
      Some(r) => NodeSelection::all(json!({ "min": r.min, "max": r.max })),
      None => NodeSelection::none(),
    }
  }

  fn buffer_needs_recolor(&self, _: &BufferParams, current: &Value, other: &StagingAttributes) -> bool {
    let differs = |key: &str| current.get(key).and_then(Value::as_f64) != other.get(key).and_then(Value::as_f64);
    differs("min") || differs("max")
  }
}

// =============================================================================
// local://elevation
// =============================================================================

/// Height ramp over the resource's full geo Z extent.
///
/// Points are converted from render space to geo space, so the ramp is the
/// same for every buffer and never needs a recolor.
#[derive(Debug)]
pub struct ElevationBrush {
  spec: BrushSpec,
  start: [f32; 3],
  end: [f32; 3],
  prepared: Option<(GeoTransform, PositionFields)>,
}

impl ElevationBrush {
  pub fn new(spec: BrushSpec) -> Result<Self, BrushError> {
    let start = hex_color_param(&spec, "start", [0.0, 0.0, 255.0])?;
    let end = hex_color_param(&spec, "end", [255.0, 0.0, 0.0])?;
    Ok(Self {
      spec,
      start,
      end,
      prepared: None,
    })
  }
}

impl Brush for ElevationBrush {
  fn spec(&self) -> &BrushSpec {
    &self.spec
  }

  fn required_schema_fields(&self) -> SmallVec<[String; 4]> {
    smallvec!["X".into(), "Y".into(), "Z".into()]
  }

  fn ramp_configuration(&self) -> RampConfiguration {
    match &self.prepared {
      Some((transform, _)) => {
        let b = transform.full_geo_bounds();
        RampConfiguration::Clamp {
          min: b[2].min(b[5]),
          max: b[2].max(b[5]),
        }
      }
      None => RampConfiguration::None,
    }
  }

  fn prepare(&mut self, params: &BufferParams, _: &StagingContext<'_>) -> Result<(), BrushError> {
    let fields = PositionFields::resolve(&params.schema)?;
    self.prepared = Some((params.geo_transform, fields));
    Ok(())
  }

  #[inline]
  fn color_point(&self, color: &mut [f32; 3], point: &Point<'_>) -> Result<(), BrushError> {
    let (transform, fields) = self
      .prepared
      .as_ref()
      .ok_or_else(|| BrushError::Color("elevation brush used before prepare".into()))?;
    let Some(render) = fields.read(point) else {
      *color = [0.0; 3];
      return Ok(());
    };
    let geo = transform.transform_point(render, CoordinateSpace::Render, CoordinateSpace::Geo);
    let b = transform.full_geo_bounds();
    *color = lerp_color(self.start, self.end, ramp_t(geo.z, b[2].min(b[5]), b[2].max(b[5])));
    Ok(())
  }

  fn staging_attributes(&self, params: &BufferParams, _: &StagingContext<'_>) -> StagingAttributes {
    let b = params.geo_transform.full_geo_bounds();
    json!({ "min": b[2].min(b[5]), "max": b[2].max(b[5]) })
  }

  fn unprepare(&mut self, _: &BufferParams) -> Result<(), BrushError> {
    self.prepared = None;
    Ok(())
  }
}

// =============================================================================
// local://field-color
// =============================================================================

/// ASPRS classification palette, indexed by class code.
const CLASSIFICATION_PALETTE: [[f32; 3]; 19] = [
  [161.0, 161.0, 161.0], // 0 created, never classified
  [200.0, 200.0, 200.0], // 1 unclassified
  [153.0, 102.0, 51.0],  // 2 ground
  [144.0, 238.0, 144.0], // 3 low vegetation
  [60.0, 179.0, 113.0],  // 4 medium vegetation
  [0.0, 128.0, 0.0],     // 5 high vegetation
  [230.0, 80.0, 50.0],   // 6 building
  [255.0, 0.0, 255.0],   // 7 low point
  [255.0, 255.0, 0.0],   // 8 reserved
  [30.0, 144.0, 255.0],  // 9 water
  [139.0, 69.0, 19.0],   // 10 rail
  [90.0, 90.0, 90.0],    // 11 road surface
  [255.0, 255.0, 255.0], // 12 reserved
  [255.0, 215.0, 0.0],   // 13 wire guard
  [255.0, 165.0, 0.0],   // 14 wire conductor
  [128.0, 0.0, 128.0],   // 15 transmission tower
  [0.0, 255.0, 255.0],   // 16 wire connector
  [220.0, 220.0, 220.0], // 17 bridge deck
  [255.0, 0.0, 0.0],     // 18 high noise
];

/// Fallback for class codes past the palette.
const UNKNOWN_CLASS_COLOR: [f32; 3] = [255.0, 255.0, 255.0];

#[derive(Clone, Debug)]
enum FieldColorMode {
  /// Integer class code mapped through the palette.
  Palette { field: String, index: Option<usize> },
  /// Red/Green/Blue fields read directly.
  Rgb { indices: Option<[usize; 3]> },
}

/// Color straight from point fields.
///
/// `local://field-color?field=Classification` looks up a palette;
/// `local://field-color?field=rgb` reads the Red/Green/Blue fields, rescaling
/// 16-bit color down to 8 bits when the data range calls for it.
#[derive(Debug)]
pub struct FieldColorBrush {
  spec: BrushSpec,
  mode: FieldColorMode,
  /// Divisor applied to RGB values; 256 for 16-bit color.
  rgb_scale: f32,
}

impl FieldColorBrush {
  pub fn new(spec: BrushSpec) -> Result<Self, BrushError> {
    let field = spec
      .param("field")
      .filter(|f| !f.is_empty())
      .ok_or_else(|| invalid("field", "required"))?;
    let mode = if field.eq_ignore_ascii_case("rgb") {
      FieldColorMode::Rgb { indices: None }
    } else {
      FieldColorMode::Palette {
        field: field.to_string(),
        index: None,
      }
    };
    Ok(Self {
      spec,
      mode,
      rgb_scale: 1.0,
    })
  }

  fn rgb_needs_scale(params: &BufferParams) -> bool {
    ["Red", "Green", "Blue"].iter().any(|name| {
      params
        .point_cloud_buffer_stats
        .range(name)
        .or_else(|| params.buffer_stats.range(name))
        .is_some_and(|r| r.max > 255.0)
    })
  }
}

impl Brush for FieldColorBrush {
  fn spec(&self) -> &BrushSpec {
    &self.spec
  }

  fn required_schema_fields(&self) -> SmallVec<[String; 4]> {
    match &self.mode {
      FieldColorMode::Palette { field, .. } => smallvec![field.clone()],
      FieldColorMode::Rgb { .. } => smallvec!["Red".into(), "Green".into(), "Blue".into()],
    }
  }

  fn prepare(&mut self, params: &BufferParams, _: &StagingContext<'_>) -> Result<(), BrushError> {
    let schema = &params.schema;
    match &mut self.mode {
      FieldColorMode::Palette { field, index } => *index = schema.index_of(field),
      FieldColorMode::Rgb { indices } => {
        *indices = match (schema.index_of("Red"), schema.index_of("Green"), schema.index_of("Blue")) {
          (Some(r), Some(g), Some(b)) => Some([r, g, b]),
          _ => None,
        };
        self.rgb_scale = if Self::rgb_needs_scale(params) { 256.0 } else { 1.0 };
      }
    }
    Ok(())
  }

  #[inline]
  fn color_point(&self, color: &mut [f32; 3], point: &Point<'_>) -> Result<(), BrushError> {
    *color = match &self.mode {
      FieldColorMode::Palette { index, .. } => match index.and_then(|i| point.at(i)) {
        Some(v) if v >= 0.0 => CLASSIFICATION_PALETTE
          .get(v as usize)
          .copied()
          .unwrap_or(UNKNOWN_CLASS_COLOR),
        _ => [0.0; 3],
      },
      FieldColorMode::Rgb { indices } => match indices {
        Some([r, g, b]) => [
          point.at(*r).unwrap_or(0.0) / self.rgb_scale,
          point.at(*g).unwrap_or(0.0) / self.rgb_scale,
          point.at(*b).unwrap_or(0.0) / self.rgb_scale,
        ],
        None => [0.0; 3],
      },
    };
    Ok(())
  }

  fn staging_attributes(&self, _: &BufferParams, _: &StagingContext<'_>) -> StagingAttributes {
    json!({ "field": self.spec.param("field"), "scale": self.rgb_scale })
  }

  fn unprepare(&mut self, _: &BufferParams) -> Result<(), BrushError> {
    match &mut self.mode {
      FieldColorMode::Palette { index, .. } => *index = None,
      FieldColorMode::Rgb { indices } => *indices = None,
    }
    self.rgb_scale = 1.0;
    Ok(())
  }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod local_test;

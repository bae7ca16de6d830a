//! Brush registry: spec string → constructor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::debug;

use super::imagery::{RemoteImageryBrush, TileCache};
use super::local::{ElevationBrush, FieldColorBrush, FieldRampBrush, SolidColorBrush};
use super::{registry_key, Brush, BrushSlot, BrushSpec};
use crate::error::BrushError;
use crate::loader::ImageryLoader;

/// Builds a brush from its parsed spec.
pub type BrushConstructor =
  Arc<dyn Fn(BrushSpec) -> Result<Box<dyn Brush>, BrushError> + Send + Sync>;

/// Registry of brush constructors keyed by `scheme://name`.
#[derive(Clone, Default)]
pub struct BrushFactory {
  registry: HashMap<String, BrushConstructor>,
}

impl BrushFactory {
  /// Empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the four local brushes.
  ///
  /// Imagery needs a loader and tile cache, see [`BrushFactory::register_imagery`].
  pub fn with_stock_brushes() -> Self {
    let mut factory = Self::new();
    factory.register_brush("local", "color", |spec| {
      Ok(Box::new(SolidColorBrush::new(spec)?) as Box<dyn Brush>)
    });
    factory.register_brush("local", "ramp", |spec| {
      Ok(Box::new(FieldRampBrush::new(spec)?) as Box<dyn Brush>)
    });
    factory.register_brush("local", "elevation", |spec| {
      Ok(Box::new(ElevationBrush::new(spec)?) as Box<dyn Brush>)
    });
    factory.register_brush("local", "field-color", |spec| {
      Ok(Box::new(FieldColorBrush::new(spec)?) as Box<dyn Brush>)
    });
    factory
  }

  /// Register `remote://imagery` backed by the given loader and shared tile cache.
  pub fn register_imagery(
    &mut self,
    loader: Arc<dyn ImageryLoader>,
    tiles: Arc<Mutex<TileCache>>,
  ) {
    self.register_brush("remote", "imagery", move |spec| {
      let brush = RemoteImageryBrush::new(spec, Arc::clone(&loader), Arc::clone(&tiles))?;
      Ok(Box::new(brush) as Box<dyn Brush>)
    });
  }

  /// Add or replace the constructor for `scheme://name`.
  pub fn register_brush<F>(&mut self, scheme: &str, name: &str, ctor: F)
  where
    F: Fn(BrushSpec) -> Result<Box<dyn Brush>, BrushError> + Send + Sync + 'static,
  {
    let key = registry_key(scheme, name);
    debug!(brush = %key, "brush registered");
    self.registry.insert(key, Arc::new(ctor));
  }

  /// Remove a constructor; unknown keys are ignored.
  pub fn deregister_brush(&mut self, scheme: &str, name: &str) {
    self.registry.remove(&registry_key(scheme, name));
  }

  /// Registered keys, sorted.
  pub fn available_brushes(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.registry.keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn is_registered(&self, scheme: &str, name: &str) -> bool {
    self.registry.contains_key(&registry_key(scheme, name))
  }

  /// Parse a spec string and build the matching brush.
  pub fn create_brush(&self, spec: &str) -> Result<Box<dyn Brush>, BrushError> {
    let spec: BrushSpec = spec.parse()?;
    let ctor = self
      .registry
      .get(&spec.key())
      .ok_or_else(|| BrushError::UnrecognizedBrush(spec.key()))?;
    ctor(spec)
  }

  /// Build one slot per entry; `None` entries stay empty slots.
  pub fn create_slots(&self, specs: &[Option<&str>]) -> Result<Vec<BrushSlot>, BrushError> {
    specs
      .iter()
      .map(|spec| spec.map(|s| self.create_brush(s)).transpose())
      .collect()
  }

  /// Encode brush slots as `{s, p}` objects, keeping empty slots as `null`.
  pub fn serialize_brushes(brushes: &[BrushSlot]) -> Vec<Value> {
    brushes
      .iter()
      .map(|slot| match slot {
        Some(brush) => json!({ "s": brush.spec().as_str(), "p": brush.serialize() }),
        None => Value::Null,
      })
      .collect()
  }

  /// Rebuild slots from [`BrushFactory::serialize_brushes`] output.
  pub fn deserialize_brushes(&self, entries: &[Value]) -> Result<Vec<BrushSlot>, BrushError> {
    entries
      .iter()
      .enumerate()
      .map(|(index, entry)| {
        if entry.is_null() {
          return Ok(None);
        }
        let spec = entry
          .get("s")
          .and_then(Value::as_str)
          .ok_or(BrushError::InvalidSerializedBrush { index })?;
        let mut brush = self.create_brush(spec)?;
        match entry.get("p") {
          Some(payload) if !payload.is_null() => brush.deserialize(payload)?,
          _ => {}
        }
        Ok(Some(brush))
      })
      .collect()
  }
}

impl std::fmt::Debug for BrushFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BrushFactory")
      .field("brushes", &self.available_brushes())
      .finish()
  }
}

#[cfg(test)]
#[path = "factory_test.rs"]
mod factory_test;

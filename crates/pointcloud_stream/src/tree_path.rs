//! TreePath - value type naming a position in the spatial tree.
//!
//! The root is `"R"`; every level appends one child digit. Octree children use
//! digits `0..8`, quadtree children `0..4`. Bits of the digit select the upper
//! half along X (bit 0), Y (bit 1) and Z (bit 2).

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Root path string.
pub const ROOT: &str = "R";

/// Maximum number of children per node.
pub const MAX_CHILDREN: u8 = 8;

/// Position in the spatial tree, e.g. `"R"`, `"R3"`, `"R30"`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(String);

impl TreePath {
  /// The root path.
  pub fn root() -> Self {
    Self(ROOT.to_string())
  }

  /// Wrap an arbitrary path string.
  ///
  /// No validation is performed: the cache treats paths as opaque keys and
  /// only relies on prefix structure.
  pub fn new(path: impl Into<String>) -> Self {
    Self(path.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Number of characters in the path.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Depth below the root (root = 0).
  pub fn depth(&self) -> usize {
    self.0.len().saturating_sub(1)
  }

  /// Child path for the given index.
  ///
  /// Returns None if the index is out of range.
  pub fn child(&self, index: u8) -> Option<Self> {
    if index >= MAX_CHILDREN {
      return None;
    }
    let mut path = String::with_capacity(self.0.len() + 1);
    path.push_str(&self.0);
    path.push(char::from(b'0' + index));
    Some(Self(path))
  }

  /// Parent path (this path minus its last character).
  ///
  /// Returns None for single-character paths.
  pub fn parent(&self) -> Option<Self> {
    if self.0.chars().count() <= 1 {
      return None;
    }
    let mut path = self.0.clone();
    path.pop();
    Some(Self(path))
  }

  /// Ancestors from nearest to farthest, walking strictly by prefix.
  pub fn ancestors(&self) -> impl Iterator<Item = TreePath> {
    std::iter::successors(self.parent(), |p| p.parent())
  }
}

impl fmt::Display for TreePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Debug for TreePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "TreePath({})", self.0)
  }
}

impl Borrow<str> for TreePath {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl From<&str> for TreePath {
  fn from(path: &str) -> Self {
    Self::new(path)
  }
}

impl From<String> for TreePath {
  fn from(path: String) -> Self {
    Self(path)
  }
}

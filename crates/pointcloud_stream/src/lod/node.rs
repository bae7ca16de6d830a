//! LodNode and the per-shell tree traversal.

use std::collections::BTreeMap;

use crate::bounds::DAabb3;
use crate::config::Branching;
use crate::geo_transform::{CoordinateSpace, GeoTransform};
use crate::tree_path::TreePath;

use super::frustum::Frustum;

/// A node the policy wants loaded.
///
/// Identity is `(id, depth)`; the same tree path selected at two depths is
/// two nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct LodNode {
  pub id: TreePath,
  pub depth: u32,
  /// Loader depth range `[depth_begin, depth_end)`.
  pub depth_begin: u32,
  pub depth_end: u32,
  pub tree_bounds: DAabb3,
}

impl LodNode {
  pub fn new(id: TreePath, tree_bounds: DAabb3, base_depth: u32) -> Self {
    let depth = id.depth() as u32;
    let (depth_begin, depth_end) = depth_range(depth, base_depth);
    Self {
      id,
      depth,
      depth_begin,
      depth_end,
      tree_bounds,
    }
  }

  pub fn key(&self) -> NodeKey {
    (self.id.clone(), self.depth)
  }
}

pub type NodeKey = (TreePath, u32);

/// Loader depth range for a tree depth.
///
/// The root pulls every coarse level up to `base_depth`; deeper nodes pull
/// exactly one level each.
#[inline]
pub fn depth_range(depth: u32, base_depth: u32) -> (u32, u32) {
  if depth == 0 {
    (0, base_depth + 1)
  } else {
    (base_depth + depth, base_depth + depth + 1)
  }
}

/// Culling inputs shared by every box of one shell.
pub struct ShellTraversal<'a> {
  pub frustum: &'a Frustum,
  pub transform: &'a GeoTransform,
  pub branching: Branching,
  pub target_depth: u32,
  pub base_depth: u32,
  pub use_sphere_test: bool,
}

impl ShellTraversal<'_> {
  /// Whether the tree-space box survives culling in render space.
  pub fn accepts(&self, tree_bounds: &DAabb3) -> bool {
    let render = self
      .transform
      .transform_bounds(tree_bounds, CoordinateSpace::Tree, CoordinateSpace::Render);
    if self.use_sphere_test && !self.frustum.intersects_sphere(render.center(), render.bounding_radius()) {
      return false;
    }
    self.frustum.intersects_box(&render)
  }

  /// Subdivide from the root and add every accepted box at the target depth.
  pub fn collect(&self, root_bounds: DAabb3, out: &mut BTreeMap<NodeKey, LodNode>) {
    let mut stack: Vec<(TreePath, DAabb3)> = vec![(TreePath::root(), root_bounds)];

    while let Some((path, bounds)) = stack.pop() {
      if !self.accepts(&bounds) {
        continue;
      }
      if path.depth() as u32 >= self.target_depth {
        let node = LodNode::new(path, bounds, self.base_depth);
        out.entry(node.key()).or_insert(node);
        continue;
      }
      for i in 0..self.branching.child_count() {
        let Some(child) = path.child(i) else {
          continue;
        };
        let child_bounds = match self.branching {
          Branching::Quad => bounds.quadrant(i),
          Branching::Oct => bounds.octant(i),
        };
        stack.push((child, child_bounds));
      }
    }
  }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;

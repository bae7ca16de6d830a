//! Camera view reported by the viewer.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::frustum::Projection;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
  pub active: bool,
  pub projection: Projection,
}

impl Camera {
  pub fn perspective(fov_y: f64, aspect: f64, near: f64, far: f64) -> Self {
    Self {
      active: true,
      projection: Projection::Perspective {
        fov_y,
        aspect,
        near,
        far,
      },
    }
  }
}

/// Render-space eye, look-at target and the viewer's cameras.
///
/// Eye and target are optional because viewers report them independently;
/// a view missing either is not evaluated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
  pub eye: Option<DVec3>,
  pub target: Option<DVec3>,
  pub cameras: Vec<Camera>,
}

impl ViewState {
  pub fn new(eye: DVec3, target: DVec3, camera: Camera) -> Self {
    Self {
      eye: Some(eye),
      target: Some(target),
      cameras: vec![camera],
    }
  }

  /// First camera flagged active.
  pub fn active_camera(&self) -> Option<&Camera> {
    self.cameras.iter().find(|c| c.active)
  }
}

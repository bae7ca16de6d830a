use glam::DVec3;

use super::*;
use crate::config::Branching;
use crate::lod::view::Camera;
use crate::loader::{RecordingHost, RegionTransformLoader};
use crate::test_utils::{unit_transform, StubImageryLoader, StubPointLoader};

/// Quadtree over the unit transform; three shells reach depths 2, 1 and 0.
const CONFIG: PolicyConfig = PolicyConfig {
  branching: Branching::Quad,
  debounce_ms: 500,
  closest_plane_distance: 50.0,
  max_depth: 2,
  base_depth: 8,
  shell_count: 3,
  use_sphere_test: true,
};

fn loaders() -> LoaderSet {
  LoaderSet::new(Arc::new(StubPointLoader::default()), Arc::new(RegionTransformLoader))
}

fn policy() -> FrustumLodPolicy {
  let mut policy = FrustumLodPolicy::new(loaders(), unit_transform(), CONFIG).unwrap();
  policy.start();
  policy
}

/// Whole resource in view, too far for the nearest shell.
fn overview() -> ViewState {
  ViewState::new(
    DVec3::new(-50.0, 50.0, 400.0),
    DVec3::new(-50.0, 50.0, 50.0),
    Camera::perspective(std::f64::consts::FRAC_PI_2, 1.0, 1.0, 10_000.0),
  )
}

/// Narrow downward view over the first quadrant only.
fn spot() -> ViewState {
  ViewState::new(
    DVec3::new(-25.0, 200.0, 25.0),
    DVec3::new(-25.0, 0.0, 25.0),
    Camera::perspective(0.2, 1.0, 1.0, 1_000.0),
  )
}

fn paths(keys: &[BufferKey]) -> Vec<&str> {
  keys.iter().map(|k| k.tree_path.as_str()).collect()
}

/// Push a view and tick past its debounce window.
fn evaluate(
  policy: &mut FrustumLodPolicy,
  view: ViewState,
  now: &mut Instant,
  host: &mut RecordingHost,
) -> Option<PolicyDiff> {
  policy.update_view(view, *now);
  *now += Duration::from_millis(CONFIG.debounce_ms);
  policy.tick(*now, host)
}

#[test]
fn test_missing_loaders_are_fatal() {
  let no_point = LoaderSet {
    transform: Some(Arc::new(RegionTransformLoader)),
    ..LoaderSet::default()
  };
  let err = FrustumLodPolicy::new(no_point, unit_transform(), CONFIG).err();
  assert_eq!(err, Some(PolicyError::MissingLoader("point")));

  let no_transform = LoaderSet {
    point: Some(Arc::new(StubPointLoader::default())),
    ..LoaderSet::default()
  };
  let err = FrustumLodPolicy::new(no_transform, unit_transform(), CONFIG).err();
  assert_eq!(err, Some(PolicyError::MissingLoader("transform")));
}

#[test]
fn test_start_emits_render_bounds() {
  let mut policy = policy();
  let events = policy.drain_events();
  assert_eq!(
    events,
    vec![PolicyEvent::Bbox(DAabb3::new(
      DVec3::new(-100.0, 0.0, 0.0),
      DVec3::new(0.0, 100.0, 100.0)
    ))]
  );
  assert!(policy.drain_events().is_empty());
}

#[test]
fn test_debounce_evaluates_only_latest_view() {
  let mut policy = policy();
  let mut host = RecordingHost::default();
  policy.drain_events();
  let t0 = Instant::now();

  policy.update_view(spot(), t0);
  policy.update_view(overview(), t0 + Duration::from_millis(100));
  assert!(matches!(policy.state(), PolicyState::Debouncing { .. }));

  // Window restarts on every update
  assert!(policy.tick(t0 + Duration::from_millis(550), &mut host).is_none());
  let diff = policy.tick(t0 + Duration::from_millis(600), &mut host).unwrap();
  assert_eq!(policy.state(), PolicyState::Idle);
  assert_eq!(paths(&diff.added), vec!["R", "R0", "R1", "R2", "R3"]);
  assert_eq!(policy.drain_events(), vec![PolicyEvent::ViewChanged(overview())]);

  // Nothing pending
  assert!(policy.tick(t0 + Duration::from_secs(5), &mut host).is_none());
  assert_eq!(host.added.len(), 5);
}

#[test]
fn test_diff_adds_and_removes() {
  let mut policy = policy();
  let mut host = RecordingHost::default();
  let mut now = Instant::now();

  evaluate(&mut policy, overview(), &mut now, &mut host).unwrap();
  let diff = evaluate(&mut policy, spot(), &mut now, &mut host).unwrap();

  assert!(diff.added.is_empty());
  assert_eq!(paths(&diff.removed), vec!["R1", "R2", "R3"]);
  assert_eq!(paths(&host.removed), vec!["R1", "R2", "R3"]);
  let loaded: Vec<&str> = policy.loaded().map(|k| k.tree_path.as_str()).collect();
  assert_eq!(loaded, vec!["R", "R0"]);

  // Same view again is a no-op diff
  let diff = evaluate(&mut policy, spot(), &mut now, &mut host).unwrap();
  assert!(diff.is_empty());
}

#[test]
fn test_buffer_key_composes_queries() {
  let mut policy = policy();
  let mut host = RecordingHost::default();
  let mut now = Instant::now();
  evaluate(&mut policy, overview(), &mut now, &mut host).unwrap();

  let root = &host.added[0];
  assert_eq!(root.tree_path.as_str(), "R");
  assert_eq!((root.depth_begin, root.depth_end), (0, 9));
  assert_eq!(root.point.0["depth"], serde_json::json!([0, 9]));
  assert_eq!(root.geo_bounds.to_array6(), [0.0, 0.0, 0.0, 100.0, 100.0, 100.0]);
  assert!(root.imagery.is_none());

  let child = &host.added[1];
  assert_eq!(child.tree_path.as_str(), "R0");
  assert_eq!((child.depth_begin, child.depth_end), (9, 10));
  assert_eq!(child.geo_bounds.to_array6(), [0.0, 0.0, 0.0, 50.0, 50.0, 100.0]);
  assert_eq!(child.transform.mins, child.render_bounds.min);
}

#[test]
fn test_unusable_views_keep_visible_set() {
  let mut policy = policy();
  let mut host = RecordingHost::default();
  let mut now = Instant::now();
  evaluate(&mut policy, overview(), &mut now, &mut host).unwrap();
  policy.drain_events();

  let mut ortho = overview();
  ortho.cameras = vec![Camera {
    active: true,
    projection: Projection::Orthographic {
      half_width: 10.0,
      half_height: 10.0,
      near: 1.0,
      far: 100.0,
    },
  }];
  let mut no_eye = overview();
  no_eye.eye = None;
  let mut inactive = overview();
  inactive.cameras[0].active = false;

  for view in [ortho, no_eye, inactive] {
    assert!(evaluate(&mut policy, view, &mut now, &mut host).is_none());
  }
  assert_eq!(policy.loaded_len(), 5);
  assert!(host.removed.is_empty());
  assert!(policy.drain_events().is_empty());

  // A forced recompute falls back to the last usable view
  policy.set_imagery_source(Some("satellite".into()), &mut host);
  assert_eq!(policy.loaded_len(), 0);
  let mut no_eye = overview();
  no_eye.eye = None;
  let diff = evaluate(&mut policy, no_eye, &mut now, &mut host).unwrap();
  assert_eq!(paths(&diff.added), vec!["R", "R0", "R1", "R2", "R3"]);
  assert_eq!(policy.loaded_len(), 5);
  assert!(policy.tick(now, &mut host).is_none());
}

#[test]
fn test_released_key_is_requested_again() {
  let mut policy = policy();
  let mut host = RecordingHost::default();
  let mut now = Instant::now();
  evaluate(&mut policy, overview(), &mut now, &mut host).unwrap();

  let released = policy.release(&TreePath::from("R1"), &mut host).unwrap();
  assert_eq!(released.tree_path.as_str(), "R1");
  assert_eq!(policy.loaded_len(), 4);
  assert_eq!(paths(&host.removed), vec!["R1"]);

  let diff = policy.tick(now, &mut host).unwrap();
  assert_eq!(paths(&diff.added), vec!["R1"]);
  assert!(diff.removed.is_empty());
  assert!(policy.release(&TreePath::from("R33"), &mut host).is_none());
}

#[test]
fn test_stop_unloads_everything() {
  let mut policy = policy();
  let mut host = RecordingHost::default();
  let mut now = Instant::now();
  evaluate(&mut policy, overview(), &mut now, &mut host).unwrap();

  policy.stop(&mut host);
  assert_eq!(policy.state(), PolicyState::Stopped);
  assert_eq!(policy.loaded_len(), 0);
  assert_eq!(paths(&host.removed), vec!["R", "R0", "R1", "R2", "R3"]);

  // Stopped policies ignore views
  assert!(evaluate(&mut policy, overview(), &mut now, &mut host).is_none());
  assert_eq!(host.added.len(), 5);
}

#[test]
fn test_imagery_source_change_recomposes_keys() {
  let loaders = loaders().with_imagery(Arc::new(StubImageryLoader));
  let mut policy = FrustumLodPolicy::new(loaders, unit_transform(), CONFIG).unwrap();
  policy.start();
  let mut host = RecordingHost::default();
  let mut now = Instant::now();
  evaluate(&mut policy, overview(), &mut now, &mut host).unwrap();
  assert!(host.added.iter().all(|k| k.imagery.is_none()));

  policy.set_imagery_source(Some("satellite".into()), &mut host);
  assert_eq!(host.removed.len(), 5);
  assert_eq!(policy.loaded_len(), 0);

  // Recomputed on the next tick without a new view
  let diff = policy.tick(now, &mut host).unwrap();
  assert_eq!(diff.added.len(), 5);
  for key in &diff.added {
    let imagery = key.imagery.as_ref().unwrap();
    assert_eq!(imagery.0["source"], "satellite");
  }
  assert_ne!(host.added[0].id(), diff.added[0].id());
  assert_eq!(policy.imagery_source(), Some("satellite"));
}

#[test]
fn test_distance_hint_pulls_detail_outward() {
  let mut policy = policy();
  let mut host = RecordingHost::default();
  let mut now = Instant::now();
  evaluate(&mut policy, overview(), &mut now, &mut host).unwrap();

  policy.set_distance_hint(100.0);
  let diff = policy.tick(now, &mut host).unwrap();
  assert_eq!(diff.added.len(), 16);
  assert!(diff.added.iter().all(|k| k.tree_path.depth() == 2));
  assert_eq!(policy.loaded_len(), 21);

  policy.set_distance_hint(f64::NAN);
  assert_eq!(policy.distance_hint(), 100.0);
  assert!(policy.tick(now, &mut host).is_none());
}

#[test]
fn test_octree_branching() {
  let config = PolicyConfig {
    branching: Branching::Oct,
    max_depth: 1,
    shell_count: 2,
    ..CONFIG
  };
  let mut policy = FrustumLodPolicy::new(loaders(), unit_transform(), config).unwrap();
  policy.start();
  let mut host = RecordingHost::default();
  let mut now = Instant::now();
  evaluate(&mut policy, overview(), &mut now, &mut host).unwrap();
  // Shell 0 (far 50) sees nothing; shell 1 targets the root
  assert_eq!(paths(&host.added), vec!["R"]);

  policy.set_distance_hint(100.0);
  let diff = policy.tick(now, &mut host).unwrap();
  assert_eq!(diff.added.len(), 8);
}

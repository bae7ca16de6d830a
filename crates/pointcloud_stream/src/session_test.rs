use glam::DVec3;

use super::*;
use crate::config::{Branching, PolicyConfig, PoolConfig};
use crate::lod::Camera;
use crate::loader::{RecordingHost, RegionTransformLoader};
use crate::test_utils::{unit_transform, StubImageryLoader, StubPointLoader};

fn config() -> StreamConfig {
  StreamConfig {
    policy: PolicyConfig {
      branching: Branching::Quad,
      debounce_ms: 0,
      closest_plane_distance: 50.0,
      max_depth: 2,
      base_depth: 8,
      shell_count: 3,
      use_sphere_test: true,
    },
    pool: PoolConfig { workers: 2 },
    ..StreamConfig::default()
  }
}

fn session_with(loader: Arc<StubPointLoader>) -> StreamSession<RecordingHost> {
  let loaders = LoaderSet::new(loader, Arc::new(RegionTransformLoader))
    .with_imagery(Arc::new(StubImageryLoader));
  let mut session = StreamSession::new(loaders, unit_transform(), config(), RecordingHost::default()).unwrap();
  session.start();
  session
}

fn session() -> StreamSession<RecordingHost> {
  session_with(Arc::default())
}

/// Loads R and its four children.
fn overview() -> ViewState {
  ViewState::new(
    DVec3::new(-50.0, 50.0, 400.0),
    DVec3::new(-50.0, 50.0, 50.0),
    Camera::perspective(std::f64::consts::FRAC_PI_2, 1.0, 1.0, 10_000.0),
  )
}

/// Keeps only R and R0.
fn spot() -> ViewState {
  ViewState::new(
    DVec3::new(-25.0, 200.0, 25.0),
    DVec3::new(-25.0, 0.0, 25.0),
    Camera::perspective(0.2, 1.0, 1.0, 1_000.0),
  )
}

fn view(session: &mut StreamSession<RecordingHost>, view: ViewState) -> PolicyDiff {
  let now = Instant::now();
  session.update_view(view, now);
  session.tick(now).unwrap().unwrap()
}

/// Poll until no load is in flight.
fn settle(session: &mut StreamSession<RecordingHost>) -> PollReport {
  let deadline = Instant::now() + Duration::from_secs(10);
  let mut total = PollReport::default();
  while session.pending_loads() > 0 && Instant::now() < deadline {
    let report = session.poll_timeout(Duration::from_millis(50));
    total.pushed.extend(report.pushed);
    total.failed.extend(report.failed);
    total.recolored += report.recolored;
    total.discarded += report.discarded;
  }
  total.pushed.sort();
  total.failed.sort();
  total
}

fn sorted(paths: Vec<TreePath>) -> Vec<String> {
  let mut out: Vec<String> = paths.iter().map(ToString::to_string).collect();
  out.sort();
  out
}

#[test]
fn test_missing_point_loader() {
  let loaders = LoaderSet {
    transform: Some(Arc::new(RegionTransformLoader)),
    ..LoaderSet::default()
  };
  let err = StreamSession::new(loaders, unit_transform(), config(), RecordingHost::default()).err();
  assert!(matches!(err, Some(Error::Policy(PolicyError::MissingLoader("point")))));
}

#[test]
fn test_visible_nodes_are_loaded_colored_and_handed_to_host() {
  let mut session = session();
  session.set_brushes(&[Some("local://color?r=1&g=2&b=3")]).unwrap();

  let diff = view(&mut session, overview());
  assert_eq!(diff.added.len(), 5);
  assert_eq!(session.host().added.len(), 5);

  let report = settle(&mut session);
  assert_eq!(sorted(report.pushed), vec!["R", "R0", "R1", "R2", "R3"]);
  assert!(report.failed.is_empty());
  assert_eq!(session.cache().len(), 5);

  const C: f32 = 66_051.0;
  for path in session.cache().paths() {
    let node = session.cache().node(path.as_str()).unwrap();
    assert_eq!(node.data.stride, 4);
    assert!(node.data.data.chunks_exact(4).all(|p| p[3] == C), "{path}");
  }
  assert_eq!(sorted(session.host().updated.iter().map(|(p, _)| p.clone()).collect()), vec![
    "R", "R0", "R1", "R2", "R3"
  ]);
}

#[test]
fn test_global_stats_accumulate() {
  let mut session = session();
  view(&mut session, overview());
  settle(&mut session);
  let x = session.global_stats().range("X").unwrap();
  assert_eq!(x.count, 15);
  assert_eq!((x.min, x.max), (-90.0, -10.0));
}

#[test]
fn test_dropped_nodes_are_evicted() {
  let mut session = session();
  view(&mut session, overview());
  settle(&mut session);

  let diff = view(&mut session, spot());
  assert_eq!(diff.removed.len(), 3);
  assert_eq!(sorted(session.cache().paths()), vec!["R", "R0"]);
  assert_eq!(session.host().removed.len(), 3);
}

#[test]
fn test_results_for_unloaded_nodes_are_discarded() {
  let mut session = session();
  view(&mut session, overview());
  // Dropped before any result is accepted
  view(&mut session, spot());

  let report = settle(&mut session);
  assert_eq!(sorted(report.pushed), vec!["R", "R0"]);
  assert_eq!(report.discarded, 3);
  assert_eq!(session.cache().len(), 2);
}

#[test]
fn test_failed_loads_are_reported_and_retried() {
  let loader = Arc::new(StubPointLoader {
    fail_min_x: Some(50.0),
    ..StubPointLoader::default()
  });
  let mut session = session_with(Arc::clone(&loader));
  view(&mut session, overview());
  let report = settle(&mut session);
  assert_eq!(sorted(report.failed), vec!["R1", "R3"]);
  assert_eq!(sorted(report.pushed), vec!["R", "R0", "R2"]);
  assert!(!session.cache().contains("R1"));
  assert_eq!(session.policy().loaded_len(), 3);
  assert_eq!(sorted(session.host().removed.iter().map(|k| k.tree_path.clone()).collect()), vec![
    "R1", "R3"
  ]);
  assert_eq!(loader.load_count(), 5);

  let retry = session.tick(Instant::now()).unwrap().unwrap();
  assert_eq!(sorted(retry.added.iter().map(|k| k.tree_path.clone()).collect()), vec!["R1", "R3"]);
  assert!(retry.removed.is_empty());
  settle(&mut session);
  assert_eq!(loader.load_count(), 7);
}

#[test]
fn test_replacing_brushes_updates_each_node_once() {
  let mut session = session();
  view(&mut session, overview());
  settle(&mut session);
  session.host_mut().updated.clear();

  let recolored = session.set_brushes(&[Some("local://ramp?field=Z")]).unwrap();
  assert_eq!(recolored, 5);
  assert_eq!(sorted(session.host().updated.iter().map(|(p, _)| p.clone()).collect()), vec![
    "R", "R0", "R1", "R2", "R3"
  ]);
}

#[test]
fn test_new_brushes_recolor_cached_nodes() {
  let mut session = session();
  session.set_brushes(&[Some("local://color?r=0&g=0&b=1")]).unwrap();
  view(&mut session, overview());
  settle(&mut session);

  let recolored = session.set_brushes(&[None, Some("local://color?r=0&g=1&b=0")]).unwrap();
  assert_eq!(recolored, 5);
  assert_eq!(session.host().force_updates, 2);
  let node = session.cache().node("R2").unwrap();
  assert_eq!(node.data.stride, 5);
  assert_eq!(&node.data.point(0).unwrap()[3..], &[0.0, 256.0]);
}

#[test]
fn test_brushes_round_trip_through_json() {
  let mut session = session();
  session
    .set_brushes(&[Some("local://ramp?field=Z"), None, Some("local://elevation")])
    .unwrap();
  let saved = session.serialize_brushes();
  assert_eq!(saved.len(), 3);
  assert!(saved[1].is_null());

  session.set_brushes(&[]).unwrap();
  session.restore_brushes(&saved).unwrap();
  assert_eq!(session.serialize_brushes(), saved);
}

#[test]
fn test_unknown_brush_is_rejected() {
  let mut session = session();
  let err = session.set_brushes(&[Some("local://sparkles")]).unwrap_err();
  assert!(matches!(err, Error::Brush(crate::error::BrushError::UnrecognizedBrush(_))));
}

#[test]
fn test_imagery_brush_shares_session_tile_cache() {
  let mut session = session();
  session.set_imagery_source(Some("satellite".into()));
  session
    .set_brushes(&[Some("remote://imagery?source=satellite")])
    .unwrap();
  let diff = view(&mut session, overview());
  assert!(diff.added.iter().all(|k| k.imagery.is_some()));

  let report = settle(&mut session);
  assert_eq!(report.pushed.len(), 5);
  let node = session.cache().node("R").unwrap();
  assert_eq!(node.data.point(0).unwrap()[3], 16_777_215.0);
  assert!(!session.tile_cache().lock().unwrap().is_empty());
}

#[test]
fn test_stop_clears_everything() {
  let mut session = session();
  view(&mut session, overview());
  settle(&mut session);

  session.stop();
  assert!(session.cache().is_empty());
  assert!(session.global_stats().is_empty());
  assert_eq!(session.policy().loaded_len(), 0);
  assert_eq!(session.host().removed.len(), 5);
}

#[test]
fn test_start_event_carries_bounds() {
  let mut session = session();
  let events = session.drain_events();
  assert!(matches!(events.as_slice(), [PolicyEvent::Bbox(_)]));
}

use std::sync::Mutex;

use glam::DVec3;
use serde_json::json;

use super::*;
use crate::bounds::DAabb3;
use crate::buffer::{PointStats, Schema};
use crate::error::LoaderError;
use crate::loader::{LoaderQuery, TransformQuery};
use crate::tree_path::TreePath;

/// Records the order loads start in; panics or fails on chosen paths.
#[derive(Default)]
struct ScriptedLoader {
  started: Mutex<Vec<String>>,
  panic_on: Option<&'static str>,
  fail_on: Option<&'static str>,
}

impl PointBufferLoader for ScriptedLoader {
  fn query_for(&self, _: &DAabb3, _: u32, _: u32) -> LoaderQuery {
    LoaderQuery::new(json!({}))
  }

  fn load(&self, query: &LoaderQuery) -> Result<LoadedBuffer, LoaderError> {
    let path = query.0["path"].as_str().unwrap_or_default().to_string();
    self.started.lock().unwrap().push(path.clone());
    if self.panic_on == Some(path.as_str()) {
      panic!("decoder blew up on {path}");
    }
    if self.fail_on == Some(path.as_str()) {
      return Err(LoaderError(format!("no data for {path}")));
    }
    let schema = Schema::from_names(["X", "Y", "Z"]);
    Ok(LoadedBuffer {
      data: vec![0.0; 3].into(),
      total_points: 1,
      point_stride: 3,
      schema,
      stats: PointStats::new(),
    })
  }
}

fn key(path: &str) -> BufferKey {
  let bounds = DAabb3::new(DVec3::ZERO, DVec3::ONE);
  BufferKey {
    tree_path: TreePath::from(path),
    depth_begin: 0,
    depth_end: 1,
    geo_bounds: bounds,
    render_bounds: bounds,
    point: LoaderQuery::new(json!({ "path": path })),
    transform: TransformQuery {
      position: DVec3::ZERO,
      offset: DVec3::ZERO,
      mins: bounds.min,
      maxs: bounds.max,
    },
    imagery: None,
  }
}

/// Poll until `count` completions arrive (or give up after a few seconds).
fn collect(pool: &mut DecodePool, count: usize) -> Vec<DecodeCompletion> {
  let deadline = Instant::now() + Duration::from_secs(10);
  let mut out = Vec::new();
  while out.len() < count && Instant::now() < deadline {
    out.extend(pool.poll_timeout(Duration::from_millis(50)));
  }
  out
}

#[test]
fn test_single_worker_runs_jobs_fifo() {
  let loader = Arc::new(ScriptedLoader::default());
  let mut pool = DecodePool::new(loader.clone(), PoolConfig { workers: 1 }).unwrap();

  let paths = ["R", "R0", "R1", "R2", "R3"];
  let ids: Vec<JobId> = paths.iter().map(|p| pool.submit(key(p)).unwrap()).collect();
  assert_eq!(ids, vec![0, 1, 2, 3, 4]);

  let done = collect(&mut pool, paths.len());
  assert_eq!(done.iter().map(|c| c.id).collect::<Vec<_>>(), ids);
  assert!(done.iter().all(|c| c.result.is_ok()));
  assert_eq!(*loader.started.lock().unwrap(), paths);
  assert_eq!(pool.in_flight(), 0);
}

#[test]
fn test_every_job_completes_across_workers() {
  let loader = Arc::new(ScriptedLoader::default());
  let mut pool = DecodePool::new(loader, PoolConfig { workers: 4 }).unwrap();
  assert_eq!(pool.worker_count(), 4);

  for i in 0..32 {
    pool.submit(key(&format!("R{i}"))).unwrap();
  }
  let mut ids: Vec<JobId> = collect(&mut pool, 32).iter().map(|c| c.id).collect();
  ids.sort_unstable();
  assert_eq!(ids, (0..32).collect::<Vec<_>>());
}

#[test]
fn test_crashed_worker_is_replaced_in_slot() {
  let loader = Arc::new(ScriptedLoader {
    panic_on: Some("R1"),
    ..ScriptedLoader::default()
  });
  let mut pool = DecodePool::new(loader.clone(), PoolConfig { workers: 1 }).unwrap();
  for path in ["R0", "R1", "R2"] {
    pool.submit(key(path)).unwrap();
  }

  let done = collect(&mut pool, 3);
  assert_eq!(done.len(), 3);
  assert!(done[0].result.is_ok());
  assert!(matches!(
    done[1].result,
    Err(Error::Pool(PoolError::WorkerCrashed { slot: 0, job: 1 }))
  ));
  // R2 ran on the replacement worker
  assert!(done[2].result.is_ok());
  assert_eq!(pool.crash_count(), 1);
  assert_eq!(pool.worker_count(), 1);
  assert_eq!(*loader.started.lock().unwrap(), ["R0", "R1", "R2"]);
}

#[test]
fn test_loader_error_is_reported_not_fatal() {
  let loader = Arc::new(ScriptedLoader {
    fail_on: Some("R"),
    ..ScriptedLoader::default()
  });
  let mut pool = DecodePool::new(loader, PoolConfig { workers: 2 }).unwrap();
  pool.submit(key("R")).unwrap();
  let done = collect(&mut pool, 1);
  assert!(matches!(done[0].result, Err(Error::Loader(_))));
  assert_eq!(pool.crash_count(), 0);
}

#[test]
fn test_zero_workers_still_starts_one() {
  let pool = DecodePool::new(Arc::new(ScriptedLoader::default()), PoolConfig { workers: 0 }).unwrap();
  assert_eq!(pool.worker_count(), 1);
}

#[test]
fn test_poll_without_jobs_returns_immediately() {
  let mut pool = DecodePool::new(Arc::new(ScriptedLoader::default()), PoolConfig::DEFAULT).unwrap();
  assert!(pool.poll().is_empty());
  assert!(pool.poll_timeout(Duration::from_secs(60)).is_empty());
}

//! DecodePool - fixed set of worker threads running point buffer loads.
//!
//! Following the stage pattern: Submit → Poll → Completions
//!
//! ```text
//! Main Thread                     Workers (N fixed slots)
//! ┌──────────────┐   FIFO jobs
//! │ submit(key)  │──────────────► slot 0 ─┐
//! └──────────────┘                slot 1 ─┤ loader.load(query)
//!                                 ...     │
//! ┌──────────────┐   results             │
//! │ poll()       │◄───────────────────────┘
//! │ - completions│
//! │ - respawn    │  crashed slot is replaced in place
//! └──────────────┘
//! ```
//!
//! A job that panics is reported as [`PoolError::WorkerCrashed`]; its worker
//! exits and the next poll starts a fresh thread in the same slot.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, warn};
use web_time::Instant;

use crate::config::PoolConfig;
use crate::error::{Error, PoolError};
use crate::loader::{BufferKey, LoadedBuffer, PointBufferLoader};

pub type JobId = u64;

/// One queued load.
pub struct DecodeRequest {
	pub id: JobId,
	pub key: BufferKey,
}

/// Finished (or failed) load.
pub struct DecodeCompletion {
	pub id: JobId,
	pub key: BufferKey,
	/// Loader failures arrive as `Error::Loader`, crashes as `Error::Pool`.
	pub result: Result<LoadedBuffer, Error>,
	/// Load time in microseconds (0 for crashed jobs).
	pub decode_us: u64,
}

enum WorkerMessage {
	Done(DecodeCompletion),
	Crashed { slot: usize, id: JobId, key: BufferKey },
}

pub struct DecodePool {
	loader: Arc<dyn PointBufferLoader>,
	/// Dropped on shutdown so idle workers see a closed queue.
	jobs_tx: Option<Sender<DecodeRequest>>,
	jobs_rx: Receiver<DecodeRequest>,
	results_tx: Sender<WorkerMessage>,
	results_rx: Receiver<WorkerMessage>,
	workers: Vec<Option<JoinHandle<()>>>,
	next_id: JobId,
	in_flight: usize,
	crashes: u64,
}

impl DecodePool {
	/// Start `config.workers` threads (at least one).
	pub fn new(loader: Arc<dyn PointBufferLoader>, config: PoolConfig) -> Result<Self, PoolError> {
		let (jobs_tx, jobs_rx) = channel::unbounded();
		let (results_tx, results_rx) = channel::unbounded();
		let mut pool = Self {
			loader,
			jobs_tx: Some(jobs_tx),
			jobs_rx,
			results_tx,
			results_rx,
			workers: Vec::new(),
			next_id: 0,
			in_flight: 0,
			crashes: 0,
		};
		for slot in 0..config.workers.max(1) {
			let handle = pool.spawn_worker(slot)?;
			pool.workers.push(Some(handle));
		}
		debug!(workers = pool.workers.len(), "decode pool started");
		Ok(pool)
	}

	/// Queue a load, returning its job id. Jobs start in submission order.
	pub fn submit(&mut self, key: BufferKey) -> Result<JobId, PoolError> {
		let jobs = self.jobs_tx.as_ref().ok_or(PoolError::Disconnected)?;
		let id = self.next_id;
		jobs
			.send(DecodeRequest { id, key })
			.map_err(|_| PoolError::Disconnected)?;
		self.next_id += 1;
		self.in_flight += 1;
		Ok(id)
	}

	/// Collect every finished job without blocking.
	pub fn poll(&mut self) -> Vec<DecodeCompletion> {
		let mut out = Vec::new();
		self.drain_into(&mut out);
		out
	}

	/// Wait up to `timeout` for at least one finished job, then drain.
	pub fn poll_timeout(&mut self, timeout: Duration) -> Vec<DecodeCompletion> {
		let mut out = Vec::new();
		if self.in_flight == 0 {
			return out;
		}
		match self.results_rx.recv_timeout(timeout) {
			Ok(message) => self.handle(message, &mut out),
			Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return out,
		}
		self.drain_into(&mut out);
		out
	}

	/// Jobs submitted and not yet reported.
	pub fn in_flight(&self) -> usize {
		self.in_flight
	}

	/// Jobs still parked in the queue.
	pub fn queued(&self) -> usize {
		self.jobs_rx.len()
	}

	pub fn worker_count(&self) -> usize {
		self.workers.iter().filter(|w| w.is_some()).count()
	}

	/// Workers replaced after a crash.
	pub fn crash_count(&self) -> u64 {
		self.crashes
	}

	fn drain_into(&mut self, out: &mut Vec<DecodeCompletion>) {
		loop {
			match self.results_rx.try_recv() {
				Ok(message) => self.handle(message, out),
				Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
			}
		}
	}

	fn handle(&mut self, message: WorkerMessage, out: &mut Vec<DecodeCompletion>) {
		self.in_flight = self.in_flight.saturating_sub(1);
		match message {
			WorkerMessage::Done(completion) => out.push(completion),
			WorkerMessage::Crashed { slot, id, key } => {
				self.crashes += 1;
				warn!(slot, job = id, path = %key.tree_path, "decode worker crashed, replacing");
				self.replace_worker(slot);
				out.push(DecodeCompletion {
					id,
					key,
					result: Err(PoolError::WorkerCrashed { slot, job: id }.into()),
					decode_us: 0,
				});
			}
		}
	}

	fn replace_worker(&mut self, slot: usize) {
		if let Some(dead) = self.workers.get_mut(slot).and_then(Option::take) {
			// The crashed worker returns right after reporting
			let _ = dead.join();
		}
		match self.spawn_worker(slot) {
			Ok(handle) => {
				if let Some(entry) = self.workers.get_mut(slot) {
					*entry = Some(handle);
				}
			}
			Err(e) => warn!(slot, error = %e, "decode worker not replaced"),
		}
	}

	fn spawn_worker(&self, slot: usize) -> Result<JoinHandle<()>, PoolError> {
		let loader = Arc::clone(&self.loader);
		let jobs = self.jobs_rx.clone();
		let results = self.results_tx.clone();
		thread::Builder::new()
			.name(format!("decode-{slot}"))
			.spawn(move || run_worker(slot, loader, jobs, results))
			.map_err(|e| PoolError::Spawn {
				slot,
				reason: e.to_string(),
			})
	}
}

impl Drop for DecodePool {
	fn drop(&mut self) {
		self.jobs_tx = None;
		for handle in self.workers.iter_mut().filter_map(Option::take) {
			let _ = handle.join();
		}
	}
}

/// Worker body: run jobs until the queue closes or a job panics.
fn run_worker(
	slot: usize,
	loader: Arc<dyn PointBufferLoader>,
	jobs: Receiver<DecodeRequest>,
	results: Sender<WorkerMessage>,
) {
	while let Ok(DecodeRequest { id, key }) = jobs.recv() {
		#[cfg(feature = "tracing-spans")]
		let _span = tracing::info_span!("decode_pool::load", slot, job = id).entered();

		let start = Instant::now();
		let outcome = panic::catch_unwind(AssertUnwindSafe(|| loader.load(&key.point)));
		let message = match outcome {
			Ok(result) => WorkerMessage::Done(DecodeCompletion {
				id,
				key,
				result: result.map_err(Error::from),
				decode_us: start.elapsed().as_micros() as u64,
			}),
			Err(_) => {
				let _ = results.send(WorkerMessage::Crashed { slot, id, key });
				return;
			}
		};
		if results.send(message).is_err() {
			return;
		}
	}
}

#[cfg(test)]
#[path = "decode_pool_test.rs"]
mod decode_pool_test;

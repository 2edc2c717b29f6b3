use crate::runtime::{Task, TaskSpawner};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fibre::mpmc;
use once_cell::sync::Lazy;

/// Width of the process-wide pool shared by caches that bring no spawner.
pub const DEFAULT_POOL_SIZE: usize = 8;

static SHARED_POOL: Lazy<Arc<WorkerPool>> =
  Lazy::new(|| Arc::new(WorkerPool::with_name(DEFAULT_POOL_SIZE, "fibre-refresh")));

/// Returns the process-wide refresh pool, starting it on first use.
///
/// The shared pool lives for the rest of the process. Caches whose loaders
/// reload very often should get a dedicated pool so they do not starve the
/// others.
pub fn shared() -> Arc<WorkerPool> {
  Arc::clone(&SHARED_POOL)
}

/// A fixed set of worker threads draining a shared task queue.
///
/// Submission never blocks. Dropping the last handle closes the queue; the
/// workers finish whatever was already queued and exit.
pub struct WorkerPool {
  sender: Option<mpmc::Sender<Task>>,
  workers: Vec<JoinHandle<()>>,
  size: usize,
}

impl WorkerPool {
  /// Starts a pool with `size` workers (at least one).
  pub fn new(size: usize) -> Self {
    Self::with_name(size, "refresh-worker")
  }

  /// Starts a pool whose threads are named `{name}-{n}`.
  pub fn with_name(size: usize, name: &str) -> Self {
    let size = size.max(1);
    let (tx, rx) = mpmc::unbounded::<Task>();

    let workers = (0..size)
      .filter_map(|n| {
        let rx = rx.clone();
        let spawned = thread::Builder::new()
          .name(format!("{name}-{n}"))
          .spawn(move || {
            // Ends once every sender is gone and the queue is drained.
            while let Ok(task) = rx.recv() {
              if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("refresh task panicked; worker continues");
              }
            }
          });
        match spawned {
          Ok(handle) => Some(handle),
          Err(error) => {
            tracing::error!(%error, worker = n, "failed to spawn refresh worker");
            None
          }
        }
      })
      .collect();

    Self {
      sender: Some(tx),
      workers,
      size,
    }
  }

  /// The number of worker threads.
  pub fn size(&self) -> usize {
    self.size
  }

  /// Queues a closure for execution on one of the workers.
  pub fn execute<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.submit(Box::new(f));
  }

  fn submit(&self, task: Task) {
    let Some(sender) = &self.sender else {
      return;
    };
    if sender.send(task).is_err() {
      tracing::error!("refresh pool queue is closed; task dropped");
    }
  }
}

impl TaskSpawner for WorkerPool {
  fn spawn(&self, task: Task) {
    self.submit(task);
  }
}

impl fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerPool")
      .field("size", &self.size)
      .finish_non_exhaustive()
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    // Disconnects the channel so idle workers wake up and exit.
    drop(self.sender.take());

    // The last handle can be dropped by a task running on this very pool.
    let current = thread::current().id();
    for handle in self.workers.drain(..) {
      if handle.thread().id() != current {
        let _ = handle.join();
      }
    }
  }
}

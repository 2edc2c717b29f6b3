/// A unit of background work: one reload of one key.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A capability for running tasks off the caller's thread.
///
/// The cache never waits on a spawned task and never shuts the spawner down.
/// Implementations must not run the task on the calling thread, since stale
/// reads are promised not to block.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Submits a task for execution.
  fn spawn(&self, task: Task);
}

/// Runs reloads on the blocking thread pool of a Tokio runtime.
///
/// Loaders are synchronous, so they go to `spawn_blocking` rather than onto
/// the async worker threads.
#[cfg(feature = "tokio")]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner bound to a specific runtime.
  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, task: Task) {
    // The JoinHandle is dropped; the task is detached.
    drop(self.0.spawn_blocking(task));
  }
}

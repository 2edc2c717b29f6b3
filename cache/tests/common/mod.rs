#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fibre_refresh::{
  CacheBuilder, CacheListener, ManualClock, RefreshingCache, ReloadError, RemovalCause, Task,
  TaskSpawner,
};

pub type TestCache = RefreshingCache<&'static str, i32>;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub &'static str);

/// What the scripted loader does on its next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
  Value(i32),
  Empty,
  Fail,
  Panic,
}

/// A loader whose answer the test changes between calls.
#[derive(Clone)]
pub struct Script {
  next: Arc<Mutex<Next>>,
  calls: Arc<AtomicUsize>,
}

impl Script {
  pub fn new(initial: Next) -> Self {
    Self {
      next: Arc::new(Mutex::new(initial)),
      calls: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn set(&self, next: Next) {
    *self.next.lock().unwrap() = next;
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn loader(
    &self,
  ) -> impl Fn(&&'static str) -> Result<Option<i32>, TestError> + Send + Sync + 'static {
    let script = self.clone();
    move |_key: &&'static str| {
      script.calls.fetch_add(1, Ordering::SeqCst);
      let next = *script.next.lock().unwrap();
      match next {
        Next::Value(value) => Ok(Some(value)),
        Next::Empty => Ok(None),
        Next::Fail => Err(TestError("backend unavailable")),
        Next::Panic => panic!("loader panicked"),
      }
    }
  }
}

/// A spawner that holds tasks until the test runs them.
#[derive(Default)]
pub struct QueueSpawner {
  tasks: Mutex<Vec<Task>>,
  submitted: AtomicUsize,
}

impl QueueSpawner {
  pub fn submitted(&self) -> usize {
    self.submitted.load(Ordering::SeqCst)
  }

  pub fn queued(&self) -> usize {
    self.tasks.lock().unwrap().len()
  }

  /// Runs every queued task on the current thread, returning how many ran.
  pub fn run_all(&self) -> usize {
    let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
    let count = tasks.len();
    for task in tasks {
      task();
    }
    count
  }
}

impl TaskSpawner for QueueSpawner {
  fn spawn(&self, task: Task) {
    self.submitted.fetch_add(1, Ordering::SeqCst);
    self.tasks.lock().unwrap().push(task);
  }
}

#[derive(Default)]
pub struct Recorded {
  pub failures: Mutex<Vec<String>>,
  pub successes: AtomicUsize,
  pub removals: Mutex<Vec<(&'static str, RemovalCause)>>,
}

/// Keeps everything the cache reports. Clones share the same record.
#[derive(Clone, Default)]
pub struct RecordingListener {
  pub recorded: Arc<Recorded>,
}

impl RecordingListener {
  pub fn failures(&self) -> Vec<String> {
    self.recorded.failures.lock().unwrap().clone()
  }

  pub fn successes(&self) -> usize {
    self.recorded.successes.load(Ordering::SeqCst)
  }

  pub fn removals(&self) -> Vec<(&'static str, RemovalCause)> {
    self.recorded.removals.lock().unwrap().clone()
  }
}

impl CacheListener<&'static str> for RecordingListener {
  fn on_reload_failure(&self, _key: &&'static str, error: &ReloadError) {
    self.recorded.failures.lock().unwrap().push(error.to_string());
  }

  fn on_reload_success(&self, _key: &&'static str) {
    self.recorded.successes.fetch_add(1, Ordering::SeqCst);
  }

  fn on_removal(&self, key: &&'static str, cause: RemovalCause) {
    self.recorded.removals.lock().unwrap().push((*key, cause));
  }
}

/// A cache on a manual clock whose reloads only run when the test says so.
pub struct Harness {
  pub cache: TestCache,
  pub clock: Arc<ManualClock>,
  pub spawner: Arc<QueueSpawner>,
  pub script: Script,
  pub listener: RecordingListener,
}

impl Harness {
  pub fn at(&self, secs: u64) {
    self.clock.set(Duration::from_secs(secs));
  }
}

pub fn harness(refresh_secs: u64, expire_secs: u64, initial: Next) -> Harness {
  harness_with(refresh_secs, expire_secs, initial, |builder| builder)
}

pub fn harness_with<F>(refresh_secs: u64, expire_secs: u64, initial: Next, configure: F) -> Harness
where
  F: FnOnce(CacheBuilder<&'static str, i32>) -> CacheBuilder<&'static str, i32>,
{
  let clock = Arc::new(ManualClock::new());
  let spawner = Arc::new(QueueSpawner::default());
  let script = Script::new(initial);
  let listener = RecordingListener::default();

  let builder = CacheBuilder::<&'static str, i32>::new()
    .shards(4)
    .loader(script.loader())
    .refresh_after_write(Duration::from_secs(refresh_secs))
    .expire_after_write(Duration::from_secs(expire_secs))
    .clock(clock.clone())
    .spawner(spawner.clone())
    .listener(listener.clone());

  Harness {
    cache: configure(builder).build().unwrap(),
    clock,
    spawner,
    script,
    listener,
  }
}

use crate::entry::{CacheEntry, Freshness};
use crate::error::{LoadError, ReloadError};
use crate::listener::{CacheListener, RemovalCause};
use crate::loader::{LoadFuture, Loader};
use crate::policy::LruList;
use crate::runtime::TaskSpawner;
use crate::store::{Shard, ShardedStore};
use crate::time::{self, Clock};

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

pub(crate) type EmptyPredicate<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// What a finished reload did to the store.
enum ReloadApply {
  /// Replaced the entry it was scheduled for (or an older one).
  Replaced,
  /// The key had been removed meanwhile; the result was inserted again.
  Repopulated,
  /// A newer value was established while the reload ran.
  Discarded,
}

/// The internal, thread-safe core of the cache.
///
/// Lock order is pending shard, then store shard, then the LRU list. No code
/// path takes them in the opposite direction.
pub(crate) struct CacheShared<K, V, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  /// Cold loads in flight, sharded like the store.
  pub(crate) pending_loads: Box<[Mutex<HashMap<K, Arc<LoadFuture<V>>, H>>]>,
  /// Recency order, present only when `max_entries` is set.
  ///
  /// One list for the whole cache keeps eviction exact. Reads only record
  /// their access when the list is uncontended (see `on_hit`); writes always
  /// update it while holding their shard lock, so the eviction re-check in
  /// `enforce_capacity` sees a consistent pair.
  pub(crate) lru: Option<Mutex<LruList<K>>>,
  pub(crate) max_entries: Option<usize>,
  pub(crate) refresh_after_write: Duration,
  pub(crate) expire_after_write: Duration,
  pub(crate) loader: Box<dyn Loader<K, V>>,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) listener: Option<Arc<dyn CacheListener<K>>>,
  pub(crate) empty_when: Option<EmptyPredicate<V>>,
}

impl<K, V, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("store", &self.store)
      .field("max_entries", &self.max_entries)
      .field("refresh_after_write", &self.refresh_after_write)
      .field("expire_after_write", &self.expire_after_write)
      .field("has_listener", &self.listener.is_some())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  #[inline]
  fn now(&self) -> u64 {
    time::now_nanos(self.clock.as_ref())
  }

  #[inline]
  fn freshness(&self, entry: &CacheEntry<V>, now: u64) -> Freshness {
    entry.freshness(
      now,
      time::as_nanos(self.refresh_after_write),
      time::as_nanos(self.expire_after_write),
    )
  }

  #[inline]
  fn pending_shard(&self, key: &K) -> &Mutex<HashMap<K, Arc<LoadFuture<V>>, H>> {
    &self.pending_loads[self.store.shard_index(key)]
  }

  fn is_empty_value(&self, value: &V) -> bool {
    self.empty_when.as_ref().is_some_and(|is_empty| is_empty(value))
  }

  /// Returns the value for `key`, loading it on the caller's thread when
  /// there is nothing usable in the store.
  pub(crate) fn get(self: &Arc<Self>, key: &K) -> Result<Arc<V>, LoadError> {
    if let Some(entry) = self.store.get(key) {
      match self.freshness(&entry, self.now()) {
        Freshness::Fresh => return Ok(self.on_hit(key, &entry)),
        Freshness::Stale => {
          self.schedule_reload(key, &entry);
          return Ok(self.on_hit(key, &entry));
        }
        Freshness::Expired => self.remove_entry(key, &entry, RemovalCause::Expired),
      }
    }

    self.load_blocking(key)
  }

  /// The miss path: one caller per key becomes the leader and runs the
  /// loader, everyone else waits for its outcome.
  fn load_blocking(self: &Arc<Self>, key: &K) -> Result<Arc<V>, LoadError> {
    let future = {
      let mut pending = self.pending_shard(key).lock();

      if let Some(existing) = pending.get(key).cloned() {
        drop(pending);
        return existing.wait();
      }

      // A leader may have finished between the caller's lookup and this lock.
      if let Some(entry) = self.store.get(key) {
        match self.freshness(&entry, self.now()) {
          Freshness::Fresh => {
            drop(pending);
            return Ok(self.on_hit(key, &entry));
          }
          Freshness::Stale => {
            drop(pending);
            self.schedule_reload(key, &entry);
            return Ok(self.on_hit(key, &entry));
          }
          // The leader's insert replaces it.
          Freshness::Expired => {}
        }
      }

      let future = Arc::new(LoadFuture::new());
      pending.insert(key.clone(), Arc::clone(&future));
      future
    };

    self.run_cold_load(key, &future)
  }

  fn run_cold_load(&self, key: &K, future: &LoadFuture<V>) -> Result<Arc<V>, LoadError> {
    let started = self.now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.loader.load(key)));

    let result = match outcome {
      Ok(Ok(Some(value))) => {
        let value = Arc::new(value);
        self.insert_entry(key, CacheEntry::new(Arc::clone(&value), started));
        Ok(value)
      }
      Ok(Ok(None)) => Err(LoadError::Empty),
      Ok(Err(error)) => Err(LoadError::failed(error)),
      Err(payload) => {
        // Waiters get an error; the panic itself stays with the leader.
        self.finish_load(key, future, Err(LoadError::Panicked));
        panic::resume_unwind(payload);
      }
    };

    if let Err(error) = &result {
      tracing::debug!(%error, "cold load failed");
    }
    self.finish_load(key, future, result.clone());
    result
  }

  fn finish_load(&self, key: &K, future: &LoadFuture<V>, result: Result<Arc<V>, LoadError>) {
    self.pending_shard(key).lock().remove(key);
    future.complete(result);
  }

  /// Submits a background reload for `entry` unless one is already running.
  pub(crate) fn schedule_reload(self: &Arc<Self>, key: &K, entry: &Arc<CacheEntry<V>>) -> bool {
    if !entry.try_begin_refresh() {
      return false;
    }

    tracing::trace!("scheduling background reload");
    let shared = Arc::clone(self);
    let key = key.clone();
    let entry = Arc::clone(entry);
    self
      .spawner
      .spawn(Box::new(move || shared.run_reload(key, entry)));
    true
  }

  /// Body of a reload task. Never reports to callers of `get`; failures keep
  /// the old value and its write time.
  fn run_reload(&self, key: K, entry: Arc<CacheEntry<V>>) {
    let started = self.now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.loader.load(&key)));

    let error = match outcome {
      Ok(Ok(Some(value))) if !self.is_empty_value(&value) => {
        self.apply_reload(&key, &entry, value, started);
        return;
      }
      Ok(Ok(_)) => ReloadError::Empty,
      Ok(Err(error)) => ReloadError::Failed(error),
      Err(_) => ReloadError::Panicked,
    };

    entry.end_refresh();
    tracing::warn!(%error, "background reload failed; keeping the cached value");
    if let Some(listener) = &self.listener {
      listener.on_reload_failure(&key, &error);
    }
  }

  fn apply_reload(&self, key: &K, scheduled_for: &Arc<CacheEntry<V>>, value: V, started: u64) {
    let (applied, expired) = {
      let mut map = self.store.shard(key).write();
      let expired = self.remove_expired_locked(&mut map, self.now());
      let decision = match map.get(key) {
        Some(current) if Arc::ptr_eq(current, scheduled_for) => ReloadApply::Replaced,
        Some(current) if current.written_at() < started => ReloadApply::Replaced,
        Some(_) => ReloadApply::Discarded,
        None => ReloadApply::Repopulated,
      };

      match decision {
        ReloadApply::Replaced => {
          map.insert(key.clone(), Arc::new(CacheEntry::new(Arc::new(value), started)));
        }
        ReloadApply::Repopulated => {
          map.insert(key.clone(), Arc::new(CacheEntry::new(Arc::new(value), started)));
          if let Some(lru) = &self.lru {
            lru.lock().push_front(key.clone());
          }
        }
        ReloadApply::Discarded => {}
      }
      (decision, expired)
    };
    scheduled_for.end_refresh();
    self.notify_expired(&expired);

    match applied {
      ReloadApply::Replaced => tracing::trace!("background reload applied"),
      ReloadApply::Repopulated => {
        tracing::trace!("background reload repopulated a removed key");
        self.enforce_capacity();
      }
      ReloadApply::Discarded => {
        tracing::trace!("background reload discarded; a newer value exists");
        return;
      }
    }
    if let Some(listener) = &self.listener {
      listener.on_reload_success(key);
    }
  }

  /// Records an access for the recency order and hands out the value.
  ///
  /// The access is dropped if another thread holds the list, so hot reads
  /// never queue behind each other. Recency is approximate under contention.
  fn on_hit(&self, key: &K, entry: &CacheEntry<V>) -> Arc<V> {
    if let Some(mut order) = self.lru.as_ref().and_then(|lru| lru.try_lock()) {
      order.touch(key);
    }
    entry.value()
  }

  fn insert_entry(&self, key: &K, entry: CacheEntry<V>) {
    let (previous, expired) = {
      let mut map = self.store.shard(key).write();
      let expired = self.remove_expired_locked(&mut map, self.now());
      let previous = map.insert(key.clone(), Arc::new(entry));
      if let Some(lru) = &self.lru {
        lru.lock().push_front(key.clone());
      }
      (previous, expired)
    };
    self.notify_expired(&expired);

    if previous.is_none() {
      self.enforce_capacity();
    }
  }

  /// Removes `key` only if it still maps to `expected`.
  fn remove_entry(&self, key: &K, expected: &Arc<CacheEntry<V>>, cause: RemovalCause) {
    let removed = {
      let mut map = self.store.shard(key).write();
      let is_expected = map
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, expected));
      if is_expected {
        map.remove(key);
        if let Some(lru) = &self.lru {
          lru.lock().remove(key);
        }
      }
      is_expected
    };

    if removed {
      self.notify_removal(key, cause);
    }
  }

  /// Drops the expired entries of a shard the caller has write-locked.
  /// Every write pays for the entries that expired in its shard, so keys
  /// that are never read again do not accumulate.
  fn remove_expired_locked(&self, shard: &mut Shard<K, V, H>, now: u64) -> Vec<K> {
    let expired = shard.remove_expired(now, time::as_nanos(self.expire_after_write));
    if !expired.is_empty() {
      if let Some(lru) = &self.lru {
        let mut order = lru.lock();
        for key in &expired {
          order.remove(key);
        }
      }
    }
    expired
  }

  fn notify_expired(&self, keys: &[K]) {
    for key in keys {
      self.notify_removal(key, RemovalCause::Expired);
    }
  }

  /// Drops every expired entry in the cache.
  pub(crate) fn cleanup(&self) {
    let now = self.now();
    for shard in self.store.iter_shards() {
      let expired = self.remove_expired_locked(&mut shard.write(), now);
      self.notify_expired(&expired);
    }
  }

  /// Evicts least recently used keys until the cache is back under
  /// `max_entries`.
  fn enforce_capacity(&self) {
    let (Some(lru), Some(max_entries)) = (&self.lru, self.max_entries) else {
      return;
    };

    loop {
      let victim = {
        let mut order = lru.lock();
        if order.len() <= max_entries {
          return;
        }
        match order.pop_back() {
          Some(victim) => victim,
          None => return,
        }
      };

      let removed = {
        let mut map = self.store.shard(&victim).write();
        // The victim may have been inserted again since it was popped.
        if lru.lock().contains(&victim) {
          false
        } else {
          map.remove(&victim).is_some()
        }
      };

      if removed {
        self.notify_removal(&victim, RemovalCause::Capacity);
      }
    }
  }

  pub(crate) fn invalidate(&self, key: &K) -> bool {
    let removed = {
      let mut map = self.store.shard(key).write();
      let removed = map.remove(key).is_some();
      if removed {
        if let Some(lru) = &self.lru {
          lru.lock().remove(key);
        }
      }
      removed
    };

    if removed {
      self.notify_removal(key, RemovalCause::Invalidated);
    }
    removed
  }

  pub(crate) fn invalidate_all(&self) {
    for shard in self.store.iter_shards() {
      let removed: Vec<K> = {
        let mut map = shard.write();
        if let Some(lru) = &self.lru {
          let mut order = lru.lock();
          for key in map.keys() {
            order.remove(key);
          }
        }
        map.drain_keys()
      };

      for key in &removed {
        self.notify_removal(key, RemovalCause::Invalidated);
      }
    }
  }

  /// Schedules a reload for a present key regardless of its age.
  pub(crate) fn refresh(self: &Arc<Self>, key: &K) -> bool {
    match self.store.get(key) {
      Some(entry) => self.schedule_reload(key, &entry),
      None => false,
    }
  }

  fn notify_removal(&self, key: &K, cause: RemovalCause) {
    tracing::trace!(%cause, "entry removed");
    if let Some(listener) = &self.listener {
      listener.on_removal(key, cause);
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::builder::CacheBuilder;
  use crate::handles::RefreshingCache;
  use crate::runtime::{Task, TaskSpawner};
  use crate::time::ManualClock;

  use parking_lot::Mutex;
  use std::convert::Infallible;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[derive(Default)]
  struct Queue(Mutex<Vec<Task>>);

  impl TaskSpawner for Queue {
    fn spawn(&self, task: Task) {
      self.0.lock().push(task);
    }
  }

  impl Queue {
    fn run_all(&self) {
      let tasks = std::mem::take(&mut *self.0.lock());
      for task in tasks {
        task();
      }
    }
  }

  struct Fixture {
    cache: RefreshingCache<u32, u32>,
    clock: Arc<ManualClock>,
    queue: Arc<Queue>,
    version: Arc<AtomicU32>,
  }

  fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new());
    let queue = Arc::new(Queue::default());
    let version = Arc::new(AtomicU32::new(1));
    let cache = CacheBuilder::<u32, u32>::new()
      .loader({
        let version = version.clone();
        move |_: &u32| Ok::<_, Infallible>(Some(version.load(Ordering::SeqCst)))
      })
      .refresh_after_write(Duration::from_secs(10))
      .expire_after_write(Duration::from_secs(20))
      .shards(2)
      .clock(clock.clone())
      .spawner(queue.clone())
      .build()
      .unwrap();
    Fixture {
      cache,
      clock,
      queue,
      version,
    }
  }

  #[test]
  fn reload_replaces_an_entry_written_before_it_started() {
    let f = fixture();
    f.cache.get(&1).unwrap();
    f.clock.set(Duration::from_secs(12));
    f.cache.get(&1).unwrap();

    // A cold load at t=13 replaces the entry the reload was scheduled for.
    f.cache.invalidate(&1);
    f.clock.set(Duration::from_secs(13));
    f.version.store(2, Ordering::SeqCst);
    assert_eq!(*f.cache.get(&1).unwrap(), 2);

    // The reload starts at t=15, after that write, so it wins.
    f.clock.set(Duration::from_secs(15));
    f.version.store(3, Ordering::SeqCst);
    f.queue.run_all();

    let entry = f.cache.shared.store.get(&1).unwrap();
    assert_eq!(*entry.value(), 3);
    assert_eq!(entry.written_at(), 15_000_000_000);
  }

  #[test]
  fn scheduled_entry_is_released_when_the_result_is_discarded() {
    let f = fixture();
    f.cache.get(&1).unwrap();
    let original = f.cache.shared.store.get(&1).unwrap();

    assert!(f.cache.refresh(&1));
    assert!(original.is_refreshing());

    // A newer entry lands before the reload runs at the same instant.
    f.cache.invalidate(&1);
    f.cache.get(&1).unwrap();
    f.queue.run_all();

    assert!(!original.is_refreshing());
    let current = f.cache.shared.store.get(&1).unwrap();
    assert!(!Arc::ptr_eq(&current, &original));
    assert!(!current.is_refreshing());
  }

  #[test]
  fn stale_hit_leaves_a_single_task_queued() {
    let f = fixture();
    f.cache.get(&7).unwrap();
    f.clock.set(Duration::from_secs(11));

    for _ in 0..5 {
      assert_eq!(*f.cache.get(&7).unwrap(), 1);
    }
    assert_eq!(f.queue.0.lock().len(), 1);
  }

  #[test]
  fn hit_skips_the_recency_update_when_the_list_is_busy() {
    let queue = Arc::new(Queue::default());
    let cache = CacheBuilder::<u32, u32>::new()
      .loader(|key: &u32| Ok::<_, Infallible>(Some(*key)))
      .refresh_after_write(Duration::from_secs(10))
      .expire_after_write(Duration::from_secs(20))
      .max_entries(2)
      .clock(Arc::new(ManualClock::new()))
      .spawner(queue)
      .build()
      .unwrap();
    cache.get(&1).unwrap();
    cache.get(&2).unwrap();

    // The read does not wait for the list, and its access is not recorded.
    {
      let _busy = cache.shared.lru.as_ref().unwrap().lock();
      assert_eq!(*cache.get(&1).unwrap(), 1);
    }

    // So 1 is still the least recently used key.
    cache.get(&3).unwrap();
    assert!(cache.shared.store.get(&1).is_none());
    assert!(cache.shared.store.get(&2).is_some());
  }
}

use crate::config::CacheConfig;
use crate::error::BuildError;
use crate::handles::RefreshingCache;
use crate::listener::CacheListener;
use crate::loader::Loader;
use crate::policy::LruList;
use crate::pool::{self, WorkerPool};
use crate::runtime::TaskSpawner;
use crate::shared::{CacheShared, EmptyPredicate};
use crate::store::ShardedStore;
use crate::time::{Clock, SystemClock};

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// A builder for [`RefreshingCache`] instances.
///
/// A loader and both intervals are required:
///
/// ```
/// use fibre_refresh::CacheBuilder;
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// let cache = CacheBuilder::<u32, String>::new()
///   .loader(|id: &u32| Ok::<_, Infallible>(Some(format!("user-{id}"))))
///   .refresh_after_write(Duration::from_secs(10))
///   .expire_after_write(Duration::from_secs(60))
///   .max_entries(10_000)
///   .build()
///   .unwrap();
///
/// assert_eq!(*cache.get(&7).unwrap(), "user-7");
/// ```
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  refresh_after_write: Option<Duration>,
  expire_after_write: Option<Duration>,
  max_entries: Option<usize>,
  shards: usize,
  hasher: H,
  loader: Option<Box<dyn Loader<K, V>>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
  clock: Option<Arc<dyn Clock>>,
  listener: Option<Arc<dyn CacheListener<K>>>,
  empty_when: Option<EmptyPredicate<V>>,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("refresh_after_write", &self.refresh_after_write)
      .field("expire_after_write", &self.expire_after_write)
      .field("max_entries", &self.max_entries)
      .field("shards", &self.shards)
      .field("has_loader", &self.loader.is_some())
      .field("has_spawner", &self.spawner.is_some())
      .field("has_listener", &self.listener.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<K, V, H> CacheBuilder<K, V, H> {
  /// Sets the function that computes values.
  pub fn loader<L>(mut self, loader: L) -> Self
  where
    L: Loader<K, V>,
  {
    self.loader = Some(Box::new(loader));
    self
  }

  /// Sets the age after which an access schedules a background reload.
  pub fn refresh_after_write(mut self, duration: Duration) -> Self {
    self.refresh_after_write = Some(duration);
    self
  }

  /// Sets the age after which an entry is no longer served and must be
  /// loaded again on the caller's thread.
  ///
  /// This should be longer than `refresh_after_write`. If it is not, entries
  /// expire before they ever become stale and every refresh turns into a
  /// blocking load.
  pub fn expire_after_write(mut self, duration: Duration) -> Self {
    self.expire_after_write = Some(duration);
    self
  }

  /// Caps the number of entries. The least recently read entry is evicted
  /// when an insertion goes over the cap.
  pub fn max_entries(mut self, max_entries: usize) -> Self {
    self.max_entries = Some(max_entries);
    self
  }

  /// Sets the number of lock shards.
  pub fn shards(mut self, shards: usize) -> Self {
    // Ensure shards is at least 1 and a power of two for fast bitwise ANDing.
    self.shards = shards.max(1).next_power_of_two();
    self
  }

  /// Runs background reloads on `spawner` instead of the shared pool.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Runs background reloads on a dedicated worker pool.
  pub fn worker_pool(self, pool: Arc<WorkerPool>) -> Self {
    self.spawner(pool)
  }

  /// Replaces the monotonic system clock, e.g. with a
  /// [`ManualClock`](crate::ManualClock) in tests.
  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = Some(clock);
    self
  }

  /// Registers a listener for reload failures, reload successes and removals.
  pub fn listener<Listener>(mut self, listener: Listener) -> Self
  where
    Listener: CacheListener<K> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Marks some reload results as empty, e.g. an empty list from a query
  /// that should never legitimately be empty. An empty reload result is
  /// discarded like `Ok(None)`.
  ///
  /// Only reloads are checked. A cold load has no older value to keep.
  pub fn empty_when<F>(mut self, is_empty: F) -> Self
  where
    F: Fn(&V) -> bool + Send + Sync + 'static,
  {
    self.empty_when = Some(Arc::new(is_empty));
    self
  }
}

// --- Constructors ---
impl<K, V> CacheBuilder<K, V, ahash::RandomState> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self::with_hasher(ahash::RandomState::new())
  }

  /// Creates a builder preloaded with the timing and sizing in `config`.
  pub fn from_config(config: &CacheConfig) -> Self {
    let mut builder = Self::new()
      .refresh_after_write(config.refresh_after_write)
      .expire_after_write(config.expire_after_write);
    builder.max_entries = config.max_entries;
    if let Some(shards) = config.shards {
      builder = builder.shards(shards);
    }
    builder
  }
}

impl<K, V> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V, H> CacheBuilder<K, V, H> {
  /// Creates a builder that hashes keys with `hasher`.
  pub fn with_hasher(hasher: H) -> Self {
    Self {
      refresh_after_write: None,
      expire_after_write: None,
      max_entries: None,
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher,
      loader: None,
      spawner: None,
      clock: None,
      listener: None,
      empty_when: None,
    }
  }

  /// Switches the hasher used for shard selection and the maps.
  pub fn hasher<H2>(self, hasher: H2) -> CacheBuilder<K, V, H2> {
    CacheBuilder {
      refresh_after_write: self.refresh_after_write,
      expire_after_write: self.expire_after_write,
      max_entries: self.max_entries,
      shards: self.shards,
      hasher,
      loader: self.loader,
      spawner: self.spawner,
      clock: self.clock,
      listener: self.listener,
      empty_when: self.empty_when,
    }
  }
}

// --- Build Methods ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds the cache.
  ///
  /// # Errors
  ///
  /// Fails if the loader or an interval is missing, an interval is zero, or
  /// `max_entries` is zero.
  pub fn build(mut self) -> Result<RefreshingCache<K, V, H>, BuildError> {
    let (loader, refresh_after_write, expire_after_write) = self.validate()?;

    if expire_after_write <= refresh_after_write {
      tracing::warn!(
        ?refresh_after_write,
        ?expire_after_write,
        "expire_after_write is not longer than refresh_after_write; entries will never be served stale"
      );
    }

    let store = ShardedStore::new(self.shards, self.hasher.clone());
    let pending_loads = (0..store.shard_count())
      .map(|_| Mutex::new(HashMap::with_hasher(self.hasher.clone())))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    let spawner = self.spawner.unwrap_or_else(|| pool::shared() as Arc<dyn TaskSpawner>);

    let shared = CacheShared {
      store,
      pending_loads,
      lru: self.max_entries.map(|_| Mutex::new(LruList::new())),
      max_entries: self.max_entries,
      refresh_after_write,
      expire_after_write,
      loader,
      spawner,
      clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
      listener: self.listener,
      empty_when: self.empty_when,
    };

    Ok(RefreshingCache {
      shared: Arc::new(shared),
    })
  }

  /// Validates the builder configuration, handing back the loader and the
  /// two intervals.
  fn validate(&mut self) -> Result<(Box<dyn Loader<K, V>>, Duration, Duration), BuildError> {
    let loader = self.loader.take().ok_or(BuildError::MissingLoader)?;
    let refresh = self
      .refresh_after_write
      .ok_or(BuildError::MissingInterval("refresh_after_write"))?;
    let expire = self
      .expire_after_write
      .ok_or(BuildError::MissingInterval("expire_after_write"))?;
    if refresh.is_zero() {
      return Err(BuildError::ZeroInterval("refresh_after_write"));
    }
    if expire.is_zero() {
      return Err(BuildError::ZeroInterval("expire_after_write"));
    }
    if self.max_entries == Some(0) {
      return Err(BuildError::ZeroMaxEntries);
    }
    Ok((loader, refresh, expire))
  }
}

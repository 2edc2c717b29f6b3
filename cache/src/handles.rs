use crate::error::LoadError;
use crate::shared::CacheShared;

use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// A thread-safe loading cache that refreshes entries in the background.
///
/// Each entry moves through three states measured from the time its value
/// was established:
///
/// - younger than `refresh_after_write`: served as is;
/// - between `refresh_after_write` and `expire_after_write`: served as is
///   while one background reload runs on the cache's spawner;
/// - older than `expire_after_write`: dropped and loaded again on the
///   caller's thread.
///
/// Concurrent misses for the same key share a single loader call. A reload
/// that fails or comes back empty keeps the old value and does not reset its
/// age, so it is retried on the next access.
///
/// Cloning the handle is cheap; clones share the same entries.
#[derive(Debug)]
pub struct RefreshingCache<K, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Clone for RefreshingCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K, V, H> RefreshingCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns the value for `key`, computing it if necessary.
  ///
  /// Blocks only when there is no usable value: the first caller runs the
  /// loader on its own thread and any concurrent callers for the same key
  /// wait for that result. A stale value is returned immediately.
  ///
  /// # Errors
  ///
  /// Returns a [`LoadError`] when the loader fails, returns no value, or
  /// panics during a cold load. Nothing is cached in that case; the next
  /// call tries again.
  pub fn get(&self, key: &K) -> Result<Arc<V>, LoadError> {
    self.shared.get(key)
  }

  /// Removes the entry for `key`, returning `true` if one was present.
  ///
  /// A load or reload already running for the key is not interrupted and
  /// may store its result afterwards.
  pub fn invalidate(&self, key: &K) -> bool {
    self.shared.invalidate(key)
  }

  /// Removes all entries from the cache.
  pub fn invalidate_all(&self) {
    self.shared.invalidate_all();
  }

  /// Schedules a background reload of `key` regardless of its age.
  ///
  /// Returns `false` if the key is not cached or a reload is already
  /// running. Missing keys are not loaded.
  pub fn refresh(&self, key: &K) -> bool {
    self.shared.refresh(key)
  }

  /// Drops every expired entry now.
  ///
  /// Writes already reclaim expired entries of the shard they touch, so this
  /// is only needed to free memory in a cache that has stopped loading.
  pub fn cleanup(&self) {
    self.shared.cleanup();
  }

  /// The number of entries currently stored. Expired entries count until a
  /// read, a write to their shard, or `cleanup` reclaims them.
  pub fn entry_count(&self) -> usize {
    self.shared.store.len()
  }

  pub fn refresh_after_write(&self) -> Duration {
    self.shared.refresh_after_write
  }

  pub fn expire_after_write(&self) -> Duration {
    self.shared.expire_after_write
  }

  pub fn max_entries(&self) -> Option<usize> {
    self.shared.max_entries
  }
}

use crate::entry::CacheEntry;

use core::fmt;
use std::collections::{HashMap, VecDeque};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// One lock's worth of the store.
///
/// Every write is also recorded in `write_order`. Since all entries share
/// one `expire_after_write`, the front of that queue is always the next
/// entry to expire, so reclaiming expired entries only visits those that
/// actually expired. Records for keys that were rewritten or removed since
/// are skipped when they reach the front.
pub(crate) struct Shard<K, V, H> {
  map: HashMap<K, Arc<CacheEntry<V>>, H>,
  write_order: VecDeque<(K, u64)>,
}

impl<K, V, H> Shard<K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher,
{
  fn new(hasher: H) -> Self {
    Self {
      map: HashMap::with_hasher(hasher),
      write_order: VecDeque::new(),
    }
  }

  #[inline]
  pub(crate) fn get(&self, key: &K) -> Option<&Arc<CacheEntry<V>>> {
    self.map.get(key)
  }

  pub(crate) fn insert(&mut self, key: K, entry: Arc<CacheEntry<V>>) -> Option<Arc<CacheEntry<V>>> {
    self.write_order.push_back((key.clone(), entry.written_at()));
    self.map.insert(key, entry)
  }

  pub(crate) fn remove(&mut self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.map.remove(key)
  }

  pub(crate) fn len(&self) -> usize {
    self.map.len()
  }

  pub(crate) fn keys(&self) -> impl Iterator<Item = &K> {
    self.map.keys()
  }

  /// Empties the shard, returning the keys that were present.
  pub(crate) fn drain_keys(&mut self) -> Vec<K> {
    self.write_order.clear();
    self.map.drain().map(|(key, _)| key).collect()
  }

  /// Removes every entry that is expired at `now`, returning their keys.
  pub(crate) fn remove_expired(&mut self, now: u64, expire: u64) -> Vec<K> {
    let mut expired = Vec::new();
    while let Some((_, written_at)) = self.write_order.front() {
      if now.saturating_sub(*written_at) < expire {
        break;
      }
      let Some((key, written_at)) = self.write_order.pop_front() else {
        break;
      };
      // A different write time means this record was superseded.
      if self.map.get(&key).is_some_and(|entry| entry.written_at() == written_at) {
        self.map.remove(&key);
        expired.push(key);
      }
    }
    expired
  }
}

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// The key to entry mapping, partitioned into independently locked shards.
///
/// Operations on different keys rarely contend for the same lock, and no
/// operation ever locks more than one shard at a time except `iter_shards`
/// users, which take them one after another.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<RwLock<Shard<K, V, H>>>]>,
  pub(crate) hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  /// Creates a store with `num_shards` shards. `num_shards` must be a
  /// power of two.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    debug_assert!(num_shards.is_power_of_two());
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(RwLock::new(Shard::new(hasher.clone()))))
      .collect::<Vec<_>>();

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
    }
  }

  #[inline]
  pub(crate) fn shard_count(&self) -> usize {
    self.shards.len()
  }

  #[inline]
  pub(crate) fn shard_index(&self, key: &K) -> usize {
    hash_key(&self.hasher, key) as usize & (self.shards.len() - 1)
  }

  /// Returns the lock guarding the shard that owns `key`.
  #[inline]
  pub(crate) fn shard(&self, key: &K) -> &RwLock<Shard<K, V, H>> {
    &self.shards[self.shard_index(key)]
  }

  /// Clones the entry for `key` out of its shard, holding the read lock only
  /// for the lookup.
  #[inline]
  pub(crate) fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.shard(key).read().get(key).cloned()
  }

  /// Returns an iterator over all the shard locks.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &RwLock<Shard<K, V, H>>> {
    self.shards.iter().map(|padded| &**padded)
  }

  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(|shard| shard.read().len()).sum()
  }
}

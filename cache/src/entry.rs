use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where an entry sits in its lifecycle relative to the cache's intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
  /// Younger than `refresh_after_write`. Served as is.
  Fresh,
  /// Past `refresh_after_write` but younger than `expire_after_write`.
  /// Served as is while a background reload runs.
  Stale,
  /// Past `expire_after_write`. Must be loaded again before it is served.
  Expired,
}

/// A value in the cache together with the time it was established.
///
/// The value and its write time never change after construction. A reload
/// replaces the whole record in the store, so readers always see a matching
/// pair.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  value: Arc<V>,
  /// Clock reading, in nanoseconds, when the computation that produced
  /// `value` started.
  written_at: u64,
  /// Set while a background reload for this record is in flight.
  refreshing: AtomicBool,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: Arc<V>, written_at: u64) -> Self {
    Self {
      value,
      written_at,
      refreshing: AtomicBool::new(false),
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn written_at(&self) -> u64 {
    self.written_at
  }

  /// Classifies the entry at `now`.
  ///
  /// Expiry is checked first, so an `expire` interval at or below `refresh`
  /// means entries go straight from fresh to expired.
  #[inline]
  pub(crate) fn freshness(&self, now: u64, refresh: u64, expire: u64) -> Freshness {
    let age = now.saturating_sub(self.written_at);
    if age >= expire {
      Freshness::Expired
    } else if age >= refresh {
      Freshness::Stale
    } else {
      Freshness::Fresh
    }
  }

  /// Claims the right to reload this entry. Only the first caller wins until
  /// `end_refresh` is called.
  #[inline]
  pub(crate) fn try_begin_refresh(&self) -> bool {
    self
      .refreshing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  #[inline]
  pub(crate) fn end_refresh(&self) {
    self.refreshing.store(false, Ordering::Release);
  }

  #[cfg(test)]
  pub(crate) fn is_refreshing(&self) -> bool {
    self.refreshing.load(Ordering::Acquire)
  }
}

use crate::error::ReloadError;

use std::fmt;

/// Describes the reason an entry was removed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
  /// The entry was removed due to exceeding `max_entries`.
  Capacity,
  /// The entry outlived `expire_after_write` and was dropped on access.
  Expired,
  /// The entry was removed by `invalidate` or `invalidate_all`.
  Invalidated,
}

impl fmt::Display for RemovalCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemovalCause::Capacity => write!(f, "evicted due to capacity"),
      RemovalCause::Expired => write!(f, "evicted due to expiration"),
      RemovalCause::Invalidated => write!(f, "manually invalidated"),
    }
  }
}

/// An observability hook for the cache's background activity.
///
/// Reload outcomes are reported from the worker that ran the reload. Removals
/// are reported from the thread that performed them. Implementations should
/// be fast and must not call back into the cache for the same key.
pub trait CacheListener<K>: Send + Sync {
  /// A background reload failed or produced an empty value. The previous
  /// value is still being served.
  fn on_reload_failure(&self, key: &K, error: &ReloadError);

  /// A background reload replaced the value for `key`.
  fn on_reload_success(&self, _key: &K) {}

  /// An entry was removed from the cache.
  fn on_removal(&self, _key: &K, _cause: RemovalCause) {}
}

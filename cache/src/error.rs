use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A boxed error returned by a loader.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// No loader was configured. A refreshing cache cannot compute values
  /// without one.
  #[error("a loader is required to build a refreshing cache")]
  MissingLoader,
  /// A required interval was never set.
  #[error("`{0}` must be configured")]
  MissingInterval(&'static str),
  /// An interval was configured as zero.
  #[error("`{0}` must be greater than zero")]
  ZeroInterval(&'static str),
  /// `max_entries` was set to zero. Leave it unset for an unbounded cache.
  #[error("max_entries cannot be zero")]
  ZeroMaxEntries,
}

/// The error returned by `get` when no value could be established for a key.
///
/// Every caller waiting on the same cold load receives a clone of the same
/// error. Failures are never cached: the next `get` calls the loader again.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
  /// The loader returned an error.
  #[error("loader failed: {0}")]
  Failed(Arc<dyn StdError + Send + Sync + 'static>),
  /// The loader reported that there is no value for the key.
  #[error("loader returned no value")]
  Empty,
  /// The loader panicked while computing the value.
  #[error("loader panicked")]
  Panicked,
}

impl LoadError {
  pub(crate) fn failed(error: BoxError) -> Self {
    LoadError::Failed(Arc::from(error))
  }
}

/// Why a background reload did not replace the cached value.
///
/// Reload errors never reach callers of `get`. They are logged and handed to
/// the cache's [`CacheListener`](crate::CacheListener), if any.
#[derive(Debug, Error)]
pub enum ReloadError {
  /// The loader returned an error.
  #[error("reload failed: {0}")]
  Failed(BoxError),
  /// The loader returned no value, or a value the cache treats as empty.
  #[error("reload produced an empty value")]
  Empty,
  /// The loader panicked.
  #[error("reload panicked")]
  Panicked,
}

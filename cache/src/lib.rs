//! An in-process loading cache that keeps hot entries warm by reloading them
//! in the background instead of on the caller's thread.
//!
//! # Features
//! - **Refresh after write**: once an entry is older than its refresh
//!   interval, the next read returns it immediately and schedules one
//!   background reload.
//! - **Expire after write**: entries older than the expire interval are
//!   dropped and loaded again synchronously.
//! - **Single flight**: concurrent misses for a key share one loader call;
//!   concurrent stale reads schedule one reload.
//! - **Last known good**: a reload that fails or comes back empty never
//!   replaces a cached value and does not reset its age.
//! - **Shared worker pool**: reloads run on a lazily started, process-wide
//!   pool of 8 threads unless a cache brings its own [`TaskSpawner`].
//!
//! ```
//! use fibre_refresh::CacheBuilder;
//! use std::time::Duration;
//!
//! let cache = CacheBuilder::<u64, String>::new()
//!   .loader(|id: &u64| -> Result<Option<String>, std::io::Error> {
//!     Ok(Some(format!("profile-{id}")))
//!   })
//!   .refresh_after_write(Duration::from_secs(30))
//!   .expire_after_write(Duration::from_secs(300))
//!   .build()
//!   .unwrap();
//!
//! assert_eq!(*cache.get(&1).unwrap(), "profile-1");
//! ```

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod error;
pub mod handles;
pub mod listener;
pub mod loader;
pub mod pool;
pub mod runtime;
pub mod time;

// Internal, crate-only modules
mod entry;
mod policy;
mod shared;
mod store;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use config::CacheConfig;
pub use error::{BoxError, BuildError, LoadError, ReloadError};
pub use handles::RefreshingCache;
pub use listener::{CacheListener, RemovalCause};
pub use loader::Loader;
pub use pool::WorkerPool;
pub use runtime::{Task, TaskSpawner};
pub use time::{Clock, ManualClock, SystemClock};

#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;

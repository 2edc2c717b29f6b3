use crate::error::{BoxError, LoadError};

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, Thread};

/// Computes the value for a key.
///
/// Returning `Ok(None)` means "no value right now". On a cold load that is
/// reported to callers as [`LoadError::Empty`]; on a background reload the
/// previously cached value is kept.
///
/// Any `Fn(&K) -> Result<Option<V>, E>` closure is a loader, as long as `E`
/// converts into a boxed error.
pub trait Loader<K, V>: Send + Sync + 'static {
  fn load(&self, key: &K) -> Result<Option<V>, BoxError>;
}

impl<K, V, E, F> Loader<K, V> for F
where
  F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
  E: Into<BoxError>,
{
  fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
    self(key).map_err(Into::into)
  }
}

/// The internal state of a value being loaded.
pub(crate) enum State<V> {
  Computing,
  Complete(Result<Arc<V>, LoadError>),
}

/// The internal, mutex-protected core of the LoadFuture.
struct Inner<V> {
  state: State<V>,
  waiters: VecDeque<Thread>,
}

/// A cold load in progress. The leader completes it; every other caller
/// for the same key parks on it and receives the same outcome.
pub(crate) struct LoadFuture<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  /// Creates a new `LoadFuture` in the "Computing" state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Completes the future with the load's outcome, waking all waiters.
  pub(crate) fn complete(&self, outcome: Result<Arc<V>, LoadError>) {
    let mut inner = self.inner.lock();
    inner.state = State::Complete(outcome);
    for waiter in inner.waiters.drain(..) {
      waiter.unpark();
    }
  }

  /// Blocks the current thread until the future is completed.
  pub(crate) fn wait(&self) -> Result<Arc<V>, LoadError> {
    let mut inner = self.inner.lock();
    loop {
      match &inner.state {
        State::Complete(outcome) => return outcome.clone(),
        State::Computing => {
          inner.waiters.push_back(thread::current());
          drop(inner); // Unlock before parking.
          thread::park();
          // Parking can wake spuriously, so the state is checked again.
          inner = self.inner.lock();
        }
      }
    }
  }
}

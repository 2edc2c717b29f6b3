use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// The single, static reference point for all `SystemClock` readings.
// It is initialized lazily on its first use.
static CLOCK_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// A monotonic time source for the cache.
///
/// Readings are durations since an arbitrary, fixed epoch. Only differences
/// between readings are meaningful.
pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> Duration;
}

/// The default clock, backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now(&self) -> Duration {
    Instant::now().saturating_duration_since(*CLOCK_EPOCH)
  }
}

/// A clock that only moves when told to.
///
/// Useful for exercising refresh and expiry deterministically.
#[derive(Default)]
pub struct ManualClock {
  nanos: AtomicU64,
}

impl ManualClock {
  /// Creates a clock reading zero.
  pub fn new() -> Self {
    Self::default()
  }

  /// Moves the clock forward by `by`.
  pub fn advance(&self, by: Duration) {
    self.nanos.fetch_add(as_nanos(by), Ordering::SeqCst);
  }

  /// Sets the clock to an absolute reading.
  pub fn set(&self, to: Duration) {
    self.nanos.store(as_nanos(to), Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Duration {
    Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
  }
}

impl fmt::Debug for ManualClock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManualClock").field("now", &self.now()).finish()
  }
}

/// Converts a duration to whole nanoseconds, saturating at `u64::MAX`.
#[inline]
pub(crate) fn as_nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Reads a clock as nanoseconds since its epoch.
#[inline]
pub(crate) fn now_nanos(clock: &dyn Clock) -> u64 {
  as_nanos(clock.now())
}

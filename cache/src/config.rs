use std::time::Duration;

/// Timing and sizing for a [`RefreshingCache`](crate::RefreshingCache).
///
/// With the `serde` feature this can be read from any serde format.
/// Durations are written in humantime notation, e.g. `"30s"` or `"5m"`:
///
/// ```
/// # #[cfg(feature = "serde")]
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use fibre_refresh::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(
///   r#"{ "refresh_after_write": "10s", "expire_after_write": "1m", "max_entries": 1000 }"#,
/// )?;
/// assert_eq!(config.max_entries, Some(1000));
/// # Ok(())
/// # }
/// # #[cfg(not(feature = "serde"))]
/// # fn main() {}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct CacheConfig {
  /// Age after which an access triggers a background reload.
  #[cfg_attr(feature = "serde", serde(with = "humantime_duration"))]
  pub refresh_after_write: Duration,
  /// Age after which an entry is dropped and must be loaded synchronously.
  /// Should be longer than `refresh_after_write`.
  #[cfg_attr(feature = "serde", serde(with = "humantime_duration"))]
  pub expire_after_write: Duration,
  /// Soft cap on the number of entries.
  #[cfg_attr(feature = "serde", serde(default))]
  pub max_entries: Option<usize>,
  /// Number of lock shards. Rounded up to a power of two.
  #[cfg_attr(feature = "serde", serde(default))]
  pub shards: Option<usize>,
}

impl CacheConfig {
  pub fn new(refresh_after_write: Duration, expire_after_write: Duration) -> Self {
    Self {
      refresh_after_write,
      expire_after_write,
      max_entries: None,
      shards: None,
    }
  }

  pub fn with_max_entries(mut self, max_entries: usize) -> Self {
    self.max_entries = Some(max_entries);
    self
  }
}

#[cfg(feature = "serde")]
mod humantime_duration {
  use serde::{de, Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub(super) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
  }

  pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(de::Error::custom)
  }
}

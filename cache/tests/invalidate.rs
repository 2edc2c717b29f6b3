mod common;

use common::{harness, harness_with, Next};
use fibre_refresh::RemovalCause;

#[test]
fn test_invalidate_removes_one_key() {
  let h = harness(10, 20, Next::Value(1));
  h.cache.get(&"a").unwrap();
  h.cache.get(&"b").unwrap();

  assert!(h.cache.invalidate(&"a"));
  assert!(!h.cache.invalidate(&"a"), "a second invalidate finds nothing");
  assert_eq!(h.cache.entry_count(), 1);
  assert_eq!(h.listener.removals(), vec![("a", RemovalCause::Invalidated)]);

  // The next read is a cold load.
  h.cache.get(&"a").unwrap();
  assert_eq!(h.script.calls(), 3);
}

#[test]
fn test_invalidate_all_clears_every_entry() {
  let h = harness_with(10, 20, Next::Value(1), |builder| builder.max_entries(10));
  for key in ["a", "b", "c"] {
    h.cache.get(&key).unwrap();
  }

  h.cache.invalidate_all();

  assert_eq!(h.cache.entry_count(), 0);
  let mut removed: Vec<_> = h.listener.removals().into_iter().map(|(key, _)| key).collect();
  removed.sort_unstable();
  assert_eq!(removed, vec!["a", "b", "c"]);

  // The recency list was cleared as well, so refilling does not evict.
  for key in ["d", "e", "f"] {
    h.cache.get(&key).unwrap();
  }
  assert_eq!(h.cache.entry_count(), 3);
  assert!(h
    .listener
    .removals()
    .iter()
    .all(|(_, cause)| *cause == RemovalCause::Invalidated));
}

#[test]
fn test_reload_in_flight_repopulates_an_invalidated_key() {
  let h = harness(10, 20, Next::Value(1));
  h.cache.get(&"a").unwrap();

  // 1. A stale read queues a reload.
  h.script.set(Next::Value(2));
  h.at(12);
  h.cache.get(&"a").unwrap();

  // 2. The key is invalidated before the reload runs.
  assert!(h.cache.invalidate(&"a"));
  assert_eq!(h.cache.entry_count(), 0);

  // 3. The reload still stores its result.
  h.spawner.run_all();
  assert_eq!(h.cache.entry_count(), 1);
  let calls = h.script.calls();
  assert_eq!(*h.cache.get(&"a").unwrap(), 2);
  assert_eq!(h.script.calls(), calls);
}

#[test]
fn test_expired_entries_are_reported_on_access() {
  let h = harness(10, 20, Next::Value(1));
  h.cache.get(&"a").unwrap();

  // With no reads or writes, nothing has reclaimed the entry yet.
  h.at(30);
  assert_eq!(h.cache.entry_count(), 1);

  h.cache.get(&"a").unwrap();
  assert_eq!(h.listener.removals(), vec![("a", RemovalCause::Expired)]);
  assert_eq!(h.cache.entry_count(), 1);
}

fn leaked_keys(prefix: &str, count: usize) -> Vec<&'static str> {
  (0..count)
    .map(|i| &*Box::leak(format!("{prefix}-{i}").into_boxed_str()))
    .collect()
}

#[test]
fn test_writes_reclaim_expired_keys_that_are_never_read() {
  // One shard, so every write sweeps the whole cache.
  let h = harness_with(10, 20, Next::Value(1), |builder| builder.shards(1));
  for key in leaked_keys("old", 200) {
    h.cache.get(&key).unwrap();
  }
  assert_eq!(h.cache.entry_count(), 200);

  // 1. An hour later, only new keys are loaded.
  h.at(3600);
  for key in leaked_keys("new", 10) {
    h.cache.get(&key).unwrap();
  }

  // 2. The old entries are gone without ever being read again.
  assert_eq!(h.cache.entry_count(), 10);
  let removals = h.listener.removals();
  assert_eq!(removals.len(), 200);
  assert!(removals
    .iter()
    .all(|(key, cause)| key.starts_with("old-") && *cause == RemovalCause::Expired));
}

#[test]
fn test_sweep_keeps_entries_that_are_not_yet_expired() {
  let h = harness_with(10, 20, Next::Value(1), |builder| builder.shards(1).max_entries(10));
  h.cache.get(&"early").unwrap();
  h.at(15);
  h.cache.get(&"late").unwrap();

  // At t=25 only the t=0 entry has expired.
  h.at(25);
  h.cache.get(&"trigger").unwrap();

  assert_eq!(h.listener.removals(), vec![("early", RemovalCause::Expired)]);
  assert_eq!(h.cache.entry_count(), 2);

  // "early" also left the recency list: filling up to the cap evicts nothing.
  for key in leaked_keys("fill", 8) {
    h.cache.get(&key).unwrap();
  }
  assert_eq!(h.cache.entry_count(), 10);
  assert_eq!(h.listener.removals().len(), 1);
}

#[test]
fn test_cleanup_drops_all_expired_entries() {
  let h = harness(10, 20, Next::Value(1));
  for key in leaked_keys("key", 50) {
    h.cache.get(&key).unwrap();
  }

  // Nothing has expired yet.
  h.at(19);
  h.cache.cleanup();
  assert_eq!(h.cache.entry_count(), 50);

  h.at(20);
  h.cache.cleanup();
  assert_eq!(h.cache.entry_count(), 0);
  assert_eq!(h.listener.removals().len(), 50);
}

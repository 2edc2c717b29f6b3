use std::hash::{BuildHasher, Hash};

use ahash::RandomState;
use generational_arena::{Arena, Index};
use std::collections::HashMap;

#[derive(Debug)]
struct Node<K> {
  key: K,
  next: Option<Index>,
  prev: Option<Index>,
}

/// Recency order for the `max_entries` cap.
///
/// Nodes live in a generational arena and are linked head (most recently
/// used) to tail (least recently used); `lookup` maps a key to its node.
#[derive(Debug)]
pub(crate) struct LruList<K, S = RandomState> {
  nodes: Arena<Node<K>>,
  lookup: HashMap<K, Index, S>,
  head: Option<Index>,
  tail: Option<Index>,
}

impl<K: Eq + Hash + Clone> LruList<K> {
  pub(crate) fn new() -> Self {
    Self::with_hasher(RandomState::new())
  }
}

impl<K: Eq + Hash + Clone, S: BuildHasher> LruList<K, S> {
  pub(crate) fn with_hasher(hasher: S) -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::with_hasher(hasher),
      head: None,
      tail: None,
    }
  }

  // Unlinks a node without removing it from the arena or the lookup map.
  fn unlink(&mut self, index: Index) {
    let (prev, next) = {
      let node = &self.nodes[index];
      (node.prev, node.next)
    };

    match prev {
      Some(prev) => self.nodes[prev].next = next,
      None => self.head = next,
    }
    match next {
      Some(next) => self.nodes[next].prev = prev,
      None => self.tail = prev,
    }
  }

  // Links a node that is already in the arena at the head.
  fn link_front(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head {
      self.nodes[old_head].prev = Some(index);
    }
    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.lookup.len()
  }

  pub(crate) fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  /// Inserts `key` as the most recently used, or moves it there if present.
  pub(crate) fn push_front(&mut self, key: K) {
    if let Some(&index) = self.lookup.get(&key) {
      if self.head != Some(index) {
        self.unlink(index);
        self.link_front(index);
      }
      return;
    }

    let index = self.nodes.insert(Node {
      key: key.clone(),
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.link_front(index);
  }

  /// Marks `key` as most recently used. Unknown keys are ignored.
  pub(crate) fn touch(&mut self, key: &K) {
    if let Some(&index) = self.lookup.get(key) {
      if self.head != Some(index) {
        self.unlink(index);
        self.link_front(index);
      }
    }
  }

  /// Removes and returns the least recently used key.
  pub(crate) fn pop_back(&mut self) -> Option<K> {
    let tail = self.tail?;
    self.unlink(tail);
    let node = self.nodes.remove(tail)?;
    self.lookup.remove(&node.key);
    Some(node.key)
  }

  pub(crate) fn remove(&mut self, key: &K) -> bool {
    match self.lookup.remove(key) {
      Some(index) => {
        self.unlink(index);
        self.nodes.remove(index);
        true
      }
      None => false,
    }
  }

  // A helper for tests, to get the order of keys from head to tail.
  #[cfg(test)]
  fn keys_as_vec(&self) -> Vec<K> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}

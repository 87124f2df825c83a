//! Identifier-based merge of a base collection with authoritative updates.
//!
//! One rule serves both sides of the sync path: folding a fresh network
//! fetch into the cached collection without discarding locally-added items
//! the queue has not flushed yet, and the queue's optimistic application of
//! an enqueued operation so the UI reflects it before the round trip ends.

use std::collections::HashSet;

use crate::types::Trackable;

/// Merge `updates` into `base`.
///
/// An update replaces the base item with the same id in place; updates whose
/// id is not in `base` are prepended (collections are newest-first) keeping
/// the updates' own relative order. Untouched base items keep their order.
pub fn merge<T: Trackable>(base: Vec<T>, updates: Vec<T>) -> Vec<T> {
  if updates.is_empty() {
    return base;
  }

  let base_ids: HashSet<i64> = base.iter().map(Trackable::id).collect();

  let mut merged: Vec<T> = Vec::with_capacity(base.len() + updates.len());
  let mut fresh: Vec<T> = Vec::new();
  let mut replacements: Vec<T> = Vec::new();

  for update in updates {
    if base_ids.contains(&update.id()) {
      replacements.push(update);
    } else {
      fresh.push(update);
    }
  }

  merged.extend(fresh);
  for item in base {
    match replacements.iter().position(|u| u.id() == item.id()) {
      Some(idx) => merged.push(replacements.swap_remove(idx)),
      None => merged.push(item),
    }
  }

  merged
}

/// Drop the item with the given id, keeping everything else in order.
pub fn remove_by_id<T: Trackable>(items: Vec<T>, id: i64) -> Vec<T> {
  items.into_iter().filter(|item| item.id() != id).collect()
}

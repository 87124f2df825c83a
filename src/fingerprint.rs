//! Cheap, lossy change signatures for the synchronized collections.
//!
//! A fingerprint is `(count, max(lastModified), sum(id))` formatted into one
//! string. It is O(n) with no allocation per item, which is the point: the
//! background refresh path computes it on every poll to decide whether a
//! re-render is warranted, so a deep comparison is off the table. The
//! signature is lossy - two datasets can in principle collide - and stays
//! lossy on purpose; it reliably catches additions, removals, and edits to
//! the tracked timestamp, which is what the views care about.

use std::collections::HashSet;
use std::hash::Hasher;

use chrono::DateTime;
use twox_hash::XxHash64;

use crate::types::{Dataset, Task, Trackable};

/// Fingerprint of one collection: `"{count}:{max_modified_ms}:{id_sum}"`.
pub fn collection_fingerprint<T: Trackable>(items: &[T]) -> String {
  let count = items.len();
  let mut max_modified: i64 = 0;
  let mut id_sum: i64 = 0;

  for item in items {
    id_sum = id_sum.wrapping_add(item.id());
    let ts = item.modified_at().map(parse_millis).unwrap_or(0);
    if ts > max_modified {
      max_modified = ts;
    }
  }

  format!("{}:{}:{}", count, max_modified, id_sum)
}

/// Fingerprint of the whole dataset; a background refresh whose dataset
/// fingerprint matches the served snapshot is a no-op and skips the
/// refresh callback entirely.
pub fn dataset_fingerprint(dataset: &Dataset) -> String {
  format!(
    "t{}|p{}|f{}",
    collection_fingerprint(&dataset.tasks),
    collection_fingerprint(&dataset.projects),
    collection_fingerprint(&dataset.feedback)
  )
}

/// Visibility filters the calendar applies before rendering.
#[derive(Debug, Clone, Default)]
pub struct CalendarFilter {
  /// Restrict to these project ids; `None` shows every project.
  pub selected_projects: Option<HashSet<i64>>,
  /// Whether backlog tasks appear on the calendar.
  pub include_backlog: bool,
}

impl CalendarFilter {
  fn admits(&self, task: &Task) -> bool {
    if !task.has_date() {
      return false;
    }
    if !self.include_backlog && task.in_backlog {
      return false;
    }
    match &self.selected_projects {
      Some(selected) => task.project_id.is_some_and(|p| selected.contains(&p)),
      None => true,
    }
  }
}

/// Fingerprint restricted to calendar-visible tasks.
///
/// The calendar is the most expensive view to redraw, so its signature
/// folds a rolling hash of each item's start/end date, title, and status -
/// an edit to an unrelated field (description, tags) leaves it unchanged,
/// while moving a task or renaming it does not. The modified timestamp is
/// deliberately left out here: every edit bumps it, and the whole point of
/// this variant is to sit still when none of the calendar-relevant fields
/// moved.
pub fn calendar_fingerprint(tasks: &[Task], filter: &CalendarFilter) -> String {
  let mut count = 0usize;
  let mut id_sum: i64 = 0;
  let mut hasher = XxHash64::with_seed(0);

  for task in tasks {
    if !filter.admits(task) {
      continue;
    }
    count += 1;
    id_sum = id_sum.wrapping_add(task.id);
    fold(&mut hasher, task.start_date.as_deref());
    fold(&mut hasher, task.due_date.as_deref());
    fold(&mut hasher, task.title.as_deref());
    fold(&mut hasher, task.status.as_deref());
  }

  format!("{}:{}:{:016x}", count, id_sum, hasher.finish())
}

fn fold(hasher: &mut XxHash64, value: Option<&str>) {
  hasher.write(value.unwrap_or("").as_bytes());
  // Field separator so ("ab", "") and ("a", "b") hash differently.
  hasher.write_u8(0x1f);
}

/// Parse an ISO-8601 timestamp into epoch milliseconds; anything missing or
/// unparseable counts as 0 rather than failing the whole fingerprint.
fn parse_millis(raw: &str) -> i64 {
  DateTime::parse_from_rfc3339(raw)
    .map(|dt| dt.timestamp_millis())
    .unwrap_or(0)
}

//! In-memory rotation queue
//!
//! Min-priority queue of pending rotations with at most one item per role.
//! Not durable: it is rebuilt from the stored static roles at startup.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Pending rotation of one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Role name
    pub name: String,
    /// Due time as Unix seconds
    pub priority: i64,
    /// WAL record left by an earlier unfinished attempt
    pub wal_id: Option<String>,
    /// Consecutive failed attempts
    pub attempt: u32,
}

impl QueueItem {
    /// Fresh item due at `due`
    pub fn new(name: impl Into<String>, due: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            priority: due.timestamp(),
            wal_id: None,
            attempt: 0,
        }
    }

    /// Same item, due at `due`
    pub fn due_at(mut self, due: DateTime<Utc>) -> Self {
        self.priority = due.timestamp();
        self
    }

    /// Due time as a timestamp
    pub fn due(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.priority, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the item is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.priority <= now.timestamp()
    }
}

#[derive(Default)]
struct Inner {
    // (priority, name) orders ties by name
    order: BTreeSet<(i64, String)>,
    items: HashMap<String, QueueItem>,
}

impl Inner {
    fn remove(&mut self, name: &str) -> Option<QueueItem> {
        let item = self.items.remove(name)?;
        self.order.remove(&(item.priority, item.name.clone()));
        Some(item)
    }
}

/// Priority queue of pending rotations
#[derive(Default)]
pub struct RotationQueue {
    inner: Mutex<Inner>,
}

impl RotationQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item, replacing any item with the same name
    ///
    /// Returns the replaced item.
    pub fn push(&self, item: QueueItem) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        let replaced = inner.remove(&item.name);
        inner.order.insert((item.priority, item.name.clone()));
        inner.items.insert(item.name.clone(), item);
        replaced
    }

    /// Remove and return the earliest item if it is due at `now`
    pub fn pop_if_due(&self, now: DateTime<Utc>) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        let (priority, name) = inner.order.first()?.clone();
        if priority > now.timestamp() {
            return None;
        }
        inner.remove(&name)
    }

    /// Remove and return the item for `name` regardless of due time
    pub fn pop_by_name(&self, name: &str) -> Option<QueueItem> {
        self.inner.lock().remove(name)
    }

    /// Pop every item due at `now`, earliest first
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<QueueItem> {
        std::iter::from_fn(|| self.pop_if_due(now)).collect()
    }

    /// Copy of the item for `name`
    pub fn get(&self, name: &str) -> Option<QueueItem> {
        self.inner.lock().items.get(name).cloned()
    }

    /// Whether `name` has a pending item
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().items.contains_key(name)
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Drop every item
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.items.clear();
    }
}

impl std::fmt::Debug for RotationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_push_replaces_by_name() {
        let queue = RotationQueue::new();
        assert_eq!(queue.push(QueueItem::new("a", at(10))), None);

        let replaced = queue.push(QueueItem::new("a", at(20))).unwrap();
        assert_eq!(replaced.priority, at(10).timestamp());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get("a").unwrap().due(), at(20));
    }

    #[test]
    fn test_pop_if_due_returns_earliest_only_when_due() {
        let queue = RotationQueue::new();
        queue.push(QueueItem::new("late", at(30)));
        queue.push(QueueItem::new("early", at(10)));

        assert_eq!(queue.pop_if_due(at(5)), None);
        assert_eq!(queue.pop_if_due(at(10)).unwrap().name, "early");
        assert_eq!(queue.pop_if_due(at(10)), None);
        assert_eq!(queue.pop_if_due(at(31)).unwrap().name, "late");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_due_handles_backlog() {
        let queue = RotationQueue::new();
        for (name, secs) in [("c", 3), ("a", 1), ("b", 2), ("future", 100)] {
            queue.push(QueueItem::new(name, at(secs)));
        }

        let drained: Vec<String> = queue
            .drain_due(at(50))
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(queue.contains("future"));
    }

    #[test]
    fn test_pop_by_name_ignores_due_time() {
        let queue = RotationQueue::new();
        queue.push(QueueItem::new("a", at(1000)));
        assert_eq!(queue.pop_by_name("a").unwrap().name, "a");
        assert_eq!(queue.pop_by_name("a"), None);
        assert_eq!(queue.pop_if_due(at(2000)), None);
    }

    #[test]
    fn test_replacing_keeps_order_consistent() {
        let queue = RotationQueue::new();
        queue.push(QueueItem::new("a", at(1)));
        queue.push(QueueItem::new("b", at(2)));
        // move a behind b
        queue.push(QueueItem::new("a", at(3)));

        assert_eq!(queue.pop_if_due(at(10)).unwrap().name, "b");
        assert_eq!(queue.pop_if_due(at(10)).unwrap().name, "a");
    }

    #[test]
    fn test_item_helpers() {
        let now = at(0);
        let item = QueueItem::new("a", now).due_at(now + TimeDelta::seconds(5));
        assert!(!item.is_due(now));
        assert!(item.is_due(now + TimeDelta::seconds(5)));
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Registry for in-flight queries with per-entry deadlines.
//
// The registry itself holds no timer: the owning driver arms a single
// `sleep_until(next_deadline())` and calls `expire` when it fires, so there
// is one timer per transport regardless of the number of outstanding
// queries.

use std::time::Duration;

use tokio::time::Instant;

struct Entry<T> {
    deadline: Instant,
    data: T,
}

/// Pending-query registry.
///
/// Every entry is inserted with `deadline = now + ttl` and leaves exactly
/// once: matched by a predicate, expired, or cleared. Removal order is not
/// preserved (swap-remove); the expected outstanding count is small, so
/// linear scans are fine.
pub struct PendingQueue<T> {
    ttl: Duration,
    entries: Vec<Entry<T>>,
}

impl<T> PendingQueue<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert with a fresh deadline.
    pub fn push(&mut self, data: T) {
        self.entries.push(Entry {
            deadline: Instant::now() + self.ttl,
            data,
        });
    }

    /// Remove and return at most one entry matching the predicate.
    pub fn drop_where(&mut self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        let index = self.entries.iter().position(|entry| predicate(&entry.data))?;
        Some(self.entries.swap_remove(index).data)
    }

    /// Empty the registry, returning every entry so callers can be notified.
    pub fn clear(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|entry| entry.data).collect()
    }

    /// The nearest deadline; `Some` iff entries remain.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.deadline).min()
    }

    /// Remove and return every entry whose deadline has elapsed.
    pub fn expire(&mut self, now: Instant) -> Vec<T> {
        let mut expired = Vec::new();
        let mut index = 0;

        while index < self.entries.len() {
            if self.entries[index].deadline <= now {
                expired.push(self.entries.swap_remove(index).data);
            } else {
                index += 1;
            }
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_removes_only_the_match() {
        let mut queue = PendingQueue::new(Duration::from_secs(60));
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.drop_where(|v| *v == 2), Some(2));
        assert_eq!(queue.len(), 2);
        assert!(queue.next_deadline().is_some());

        assert_eq!(queue.drop_where(|v| *v == 2), None);
    }

    #[test]
    fn deadline_disarms_when_empty() {
        let mut queue = PendingQueue::new(Duration::from_secs(60));
        assert!(queue.next_deadline().is_none());

        queue.push(1);
        assert!(queue.next_deadline().is_some());

        queue.drop_where(|_| true);
        assert!(queue.next_deadline().is_none());
    }

    #[test]
    fn expire_removes_only_elapsed_entries() {
        let mut stale = PendingQueue::new(Duration::ZERO);
        stale.push("a");
        stale.push("b");

        let mut fresh = PendingQueue::new(Duration::from_secs(60));
        fresh.push("c");

        let now = Instant::now();
        let mut expired = stale.expire(now);
        expired.sort();

        assert_eq!(expired, vec!["a", "b"]);
        assert!(stale.is_empty());
        assert!(stale.next_deadline().is_none());

        assert!(fresh.expire(now).is_empty());
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn expired_entry_is_reported_exactly_once() {
        let mut queue = PendingQueue::new(Duration::ZERO);
        queue.push(7);

        let now = Instant::now();
        assert_eq!(queue.expire(now), vec![7]);
        assert!(queue.expire(now).is_empty());
        assert_eq!(queue.drop_where(|_| true), None);
    }

    #[test]
    fn clear_returns_everything() {
        let mut queue = PendingQueue::new(Duration::from_secs(60));
        queue.push(1);
        queue.push(2);

        let mut cleared = queue.clear();
        cleared.sort();

        assert_eq!(cleared, vec![1, 2]);
        assert!(queue.is_empty());
        assert!(queue.next_deadline().is_none());
    }
}

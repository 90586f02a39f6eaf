// src/engine/results.rs

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::types::TaskExecutionResult;

#[derive(Debug)]
struct Stored {
    seq: u64,
    inserted: Instant,
    result: TaskExecutionResult,
}

/// Finished results, bounded by count and age.
///
/// Inserting beyond `max_results` drops the oldest entry. Entries older than
/// `ttl` are invisible to lookups and removed by [`evict_expired`].
///
/// [`evict_expired`]: ResultStore::evict_expired
#[derive(Debug)]
pub struct ResultStore {
    max_results: usize,
    ttl: Duration,
    next_seq: u64,
    entries: HashMap<String, Stored>,
    /// Insertion order; stale `(id, seq)` pairs are skipped lazily.
    order: VecDeque<(String, u64)>,
}

impl ResultStore {
    pub fn new(max_results: usize, ttl: Duration) -> Self {
        Self {
            max_results: max_results.max(1),
            ttl,
            next_seq: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Store `result`, replacing any earlier result for the same task id.
    pub fn insert(&mut self, result: TaskExecutionResult) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = result.task_id.clone();
        self.order.push_back((id.clone(), seq));
        self.entries.insert(
            id,
            Stored {
                seq,
                inserted: Instant::now(),
                result,
            },
        );

        while self.entries.len() > self.max_results {
            if !self.pop_oldest() {
                break;
            }
        }
        self.compact_order();
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskExecutionResult> {
        self.entries
            .get(task_id)
            .filter(|s| s.inserted.elapsed() < self.ttl)
            .map(|s| &s.result)
    }

    /// Remove every entry older than the TTL. Returns how many were removed.
    pub fn evict_expired(&mut self) -> usize {
        let mut removed = 0;
        while let Some((id, seq)) = self.order.front() {
            match self.entries.get(id) {
                Some(s) if s.seq == *seq => {
                    if s.inserted.elapsed() < self.ttl {
                        break;
                    }
                    self.entries.remove(id);
                    removed += 1;
                }
                _ => {}
            }
            self.order.pop_front();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn pop_oldest(&mut self) -> bool {
        while let Some((id, seq)) = self.order.pop_front() {
            if self.entries.get(&id).is_some_and(|s| s.seq == seq) {
                self.entries.remove(&id);
                return true;
            }
        }
        false
    }

    /// Keep `order` from growing without bound when ids are re-inserted.
    fn compact_order(&mut self) {
        if self.order.len() > self.entries.len() * 2 + 16 {
            let entries = &self.entries;
            self.order
                .retain(|(id, seq)| entries.get(id).is_some_and(|s| s.seq == *seq));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpret::{ClientError, ErrorCode};
    use chrono::Utc;

    fn result(id: &str) -> TaskExecutionResult {
        TaskExecutionResult::rejected(
            id,
            "c",
            Utc::now(),
            ClientError::new(ErrorCode::Unknown, "x", "c"),
        )
    }

    #[test]
    fn max_count_drops_oldest() {
        let mut store = ResultStore::new(2, Duration::from_secs(60));
        store.insert(result("a"));
        store.insert(result("b"));
        store.insert(result("c"));
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn reinsert_refreshes_position() {
        let mut store = ResultStore::new(2, Duration::from_secs(60));
        store.insert(result("a"));
        store.insert(result("b"));
        store.insert(result("a"));
        store.insert(result("c"));
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());

        for _ in 0..100 {
            store.insert(result("a"));
        }
        assert_eq!(store.len(), 2);
        assert!(store.order.len() <= store.entries.len() * 2 + 16);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry() {
        let mut store = ResultStore::new(10, Duration::from_secs(5));
        store.insert(result("old"));
        tokio::time::advance(Duration::from_secs(3)).await;
        store.insert(result("new"));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
        assert_eq!(store.evict_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}

//! Retry queue: persistent queue for failed actions.
//!
//! Exponential backoff with jitter. The queue lives in memory and is
//! flushed to a JSON file after every mutation, so it survives restarts.
//! Scheduling uses absolute wall-clock epoch times because the deadline
//! must hold across processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::core::error::DcpError;
use crate::core::state::atomic_write;
use crate::core::time::now_epoch;

pub const RETRY_QUEUE_FILE: &str = "retry_queue.json";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_MAX_DELAY_SECS: f64 = 60.0;

/// Fraction of the backoff delay used as the jitter window.
const JITTER_FACTOR: f64 = 0.3;

/// A single item in the retry queue. The `id` is stable across
/// re-enqueues of the same action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryItem {
    pub id: String,
    pub action_id: String,
    pub adapter: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub next_retry_at: f64,
    #[serde(default = "now_epoch")]
    pub created_at: f64,
    #[serde(default)]
    pub last_error: String,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl RetryItem {
    /// Whether all retry attempts have been used.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Whether it is time to retry this item.
    pub fn ready(&self) -> bool {
        now_epoch() >= self.next_retry_at
    }

    /// Schedule the next retry: `min(base * 2^(attempt-1), max)` plus a
    /// uniform jitter in `[0, 0.3 * delay]`.
    fn schedule_retry(&mut self, base_delay: f64, max_delay: f64) {
        self.attempt += 1;
        let delay = (base_delay * 2f64.powi(self.attempt as i32 - 1)).min(max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..=delay * JITTER_FACTOR);
        self.next_retry_at = now_epoch() + delay + jitter;
        debug!(
            "Retry item '{}' scheduled: attempt {}/{}, delay {:.1}s",
            self.id,
            self.attempt,
            self.max_attempts,
            delay + jitter
        );
    }
}

/// Persistent retry queue with exponential backoff.
#[derive(Debug)]
pub struct RetryQueue {
    path: Option<PathBuf>,
    items: BTreeMap<String, RetryItem>,
    max_attempts: u32,
    base_delay: f64,
    max_delay: f64,
}

impl RetryQueue {
    /// In-memory queue with no persistence. Used by tests and health
    /// checks that only need the API surface.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            items: BTreeMap::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY_SECS,
            max_delay: DEFAULT_MAX_DELAY_SECS,
        }
    }

    /// Queue persisted at `path`; loads any existing items, discarding
    /// unreadable entries with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut queue = Self {
            path: Some(path),
            ..Self::in_memory()
        };
        queue.load();
        queue
    }

    /// Default queue path for a project root.
    pub fn default_path(project_root: &Path) -> PathBuf {
        project_root
            .join(crate::core::state::STATE_DIR)
            .join(RETRY_QUEUE_FILE)
    }

    pub fn with_backoff(mut self, base_delay: f64, max_delay: f64) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn ready_count(&self) -> usize {
        self.items
            .values()
            .filter(|i| i.ready() && !i.exhausted())
            .count()
    }

    pub fn exhausted_count(&self) -> usize {
        self.items.values().filter(|i| i.exhausted()).count()
    }

    pub fn get(&self, id: &str) -> Option<&RetryItem> {
        self.items.get(id)
    }

    /// Add an item, or re-schedule the existing one with the same id.
    pub fn enqueue(
        &mut self,
        id: &str,
        action_id: &str,
        adapter: &str,
        error: &str,
        params: Map<String, Value>,
    ) -> RetryItem {
        let base = self.base_delay;
        let max = self.max_delay;
        let item = if let Some(item) = self.items.get_mut(id) {
            item.last_error = error.to_string();
            item.schedule_retry(base, max);
            item.clone()
        } else {
            let mut item = RetryItem {
                id: id.to_string(),
                action_id: action_id.to_string(),
                adapter: adapter.to_string(),
                params,
                attempt: 0,
                max_attempts: self.max_attempts,
                next_retry_at: 0.0,
                created_at: now_epoch(),
                last_error: error.to_string(),
            };
            item.schedule_retry(base, max);
            self.items.insert(id.to_string(), item.clone());
            item
        };

        self.save();
        item
    }

    /// Items ready to retry, sorted ascending by deadline.
    pub fn dequeue_ready(&self) -> Vec<RetryItem> {
        let mut ready: Vec<RetryItem> = self
            .items
            .values()
            .filter(|i| i.ready() && !i.exhausted())
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            a.next_retry_at
                .partial_cmp(&b.next_retry_at)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ready
    }

    /// Remove an item after a successful retry.
    pub fn complete(&mut self, id: &str) {
        self.items.remove(id);
        self.save();
    }

    /// Record a retry failure. An exhausted item stays in place for
    /// `remove_exhausted` to drain.
    pub fn fail(&mut self, id: &str, error: &str) -> Option<RetryItem> {
        let base = self.base_delay;
        let max = self.max_delay;
        let item = self.items.get_mut(id)?;
        item.last_error = error.to_string();
        if item.exhausted() {
            warn!(
                "Retry item '{}' exhausted after {} attempts",
                id, item.attempt
            );
            let snapshot = item.clone();
            self.save();
            return Some(snapshot);
        }
        item.schedule_retry(base, max);
        let snapshot = item.clone();
        self.save();
        Some(snapshot)
    }

    /// Remove and return all exhausted items.
    pub fn remove_exhausted(&mut self) -> Vec<RetryItem> {
        let exhausted_ids: Vec<String> = self
            .items
            .values()
            .filter(|i| i.exhausted())
            .map(|i| i.id.clone())
            .collect();
        let mut removed = Vec::new();
        for id in &exhausted_ids {
            if let Some(item) = self.items.remove(id) {
                removed.push(item);
            }
        }
        if !removed.is_empty() {
            self.save();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.save();
    }

    /// Queue status summary.
    pub fn get_status(&self) -> serde_json::Value {
        json!({
            "total": self.size(),
            "ready": self.ready_count(),
            "exhausted": self.exhausted_count(),
            "items": self.items.values().collect::<Vec<_>>(),
        })
    }

    fn save(&self) {
        let Some(path) = &self.path else { return };
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Cannot create retry queue directory: {}", e);
                return;
            }
        }
        let items: Vec<&RetryItem> = self.items.values().collect();
        let content = match serde_json::to_string_pretty(&items) {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(e) => {
                warn!("Cannot serialize retry queue: {}", e);
                return;
            }
        };
        if let Err(e) = atomic_write(path, &content) {
            warn!("Failed to persist retry queue to {}: {}", path.display(), e);
        }
    }

    fn load(&mut self) {
        let Some(path) = &self.path else { return };
        if !path.is_file() {
            return;
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read retry queue {}: {}", path.display(), e);
                return;
            }
        };
        let entries: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to load retry queue: {}", e);
                return;
            }
        };
        for entry in entries {
            match serde_json::from_value::<RetryItem>(entry) {
                Ok(item) => {
                    self.items.insert(item.id.clone(), item);
                }
                Err(e) => warn!("Discarding unreadable retry item: {}", e),
            }
        }
        info!(
            "Loaded {} retry items from {}",
            self.items.len(),
            path.display()
        );
    }
}

/// Expected backoff delay before jitter for a given attempt (1-indexed).
pub fn backoff_delay(base_delay: f64, max_delay: f64, attempt: u32) -> f64 {
    (base_delay * 2f64.powi(attempt as i32 - 1)).min(max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        assert_eq!(backoff_delay(1.0, 60.0, 1), 1.0);
        assert_eq!(backoff_delay(1.0, 60.0, 2), 2.0);
        assert_eq!(backoff_delay(1.0, 60.0, 3), 4.0);
        assert_eq!(backoff_delay(1.0, 60.0, 7), 60.0);
    }

    #[test]
    fn test_enqueue_schedules_with_bounded_jitter() {
        let mut q = RetryQueue::in_memory();
        let before = now_epoch();
        let item = q.enqueue("r1", "op:api:test", "shell", "boom", Map::new());
        assert_eq!(item.attempt, 1);
        let delay = item.next_retry_at - before;
        // base delay 1s plus jitter in [0, 0.3]; allow a little slack
        // for the clock reads on either side.
        assert!(delay >= 0.9, "delay too small: {delay}");
        assert!(delay <= 1.5, "delay too large: {delay}");
    }

    #[test]
    fn test_reenqueue_increments_attempt() {
        let mut q = RetryQueue::in_memory();
        q.enqueue("r1", "a", "shell", "e1", Map::new());
        let item = q.enqueue("r1", "a", "shell", "e2", Map::new());
        assert_eq!(item.attempt, 2);
        assert_eq!(item.last_error, "e2");
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn test_successive_deadlines_respect_backoff() {
        let mut q = RetryQueue::in_memory().with_max_attempts(10);
        let first = q.enqueue("r1", "a", "shell", "e", Map::new());
        let second = q.enqueue("r1", "a", "shell", "e", Map::new());
        // Second deadline is at least base*2 after roughly the first
        // scheduling instant, so the deadlines differ by at least the
        // un-jittered increment minus first-attempt jitter headroom.
        assert!(second.next_retry_at > first.next_retry_at);
    }

    #[test]
    fn test_dequeue_ready_filters_and_sorts() {
        let mut q = RetryQueue::in_memory();
        q.enqueue("r1", "a", "shell", "e", Map::new());
        // Not ready yet: deadline is about a second out.
        assert!(q.dequeue_ready().is_empty());

        // Force readiness.
        q.items.get_mut("r1").unwrap().next_retry_at = now_epoch() - 1.0;
        let ready = q.dequeue_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "r1");
    }

    #[test]
    fn test_complete_removes() {
        let mut q = RetryQueue::in_memory();
        q.enqueue("r1", "a", "shell", "e", Map::new());
        q.complete("r1");
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_fail_exhausts_then_remove_exhausted_drains() {
        let mut q = RetryQueue::in_memory().with_max_attempts(2);
        q.enqueue("r1", "a", "shell", "e", Map::new()); // attempt 1
        q.enqueue("r1", "a", "shell", "e", Map::new()); // attempt 2, exhausted
        let item = q.fail("r1", "still broken").unwrap();
        assert!(item.exhausted());
        assert_eq!(q.size(), 1);

        let drained = q.remove_exhausted();
        assert_eq!(drained.len(), 1);
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("retry_queue.json");

        {
            let mut q = RetryQueue::open(&path);
            q.enqueue("r1", "op:api:test", "shell", "boom", Map::new());
        }

        let q = RetryQueue::open(&path);
        assert_eq!(q.size(), 1);
        let item = q.get("r1").unwrap();
        assert_eq!(item.action_id, "op:api:test");
        assert_eq!(item.attempt, 1);
    }

    #[test]
    fn test_load_discards_unreadable_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("retry_queue.json");
        std::fs::write(
            &path,
            r#"[{"id": "ok", "action_id": "a", "adapter": "shell"}, {"bogus": true}]"#,
        )
        .unwrap();

        let q = RetryQueue::open(&path);
        assert_eq!(q.size(), 1);
        assert!(q.get("ok").is_some());
    }

    #[test]
    fn test_status_summary() {
        let mut q = RetryQueue::in_memory();
        q.enqueue("r1", "a", "shell", "e", Map::new());
        let status = q.get_status();
        assert_eq!(status["total"], 1);
        assert_eq!(status["exhausted"], 0);
    }
}

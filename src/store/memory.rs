use crate::store::{CounterStore, StoreError, WindowCounts};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// In-process counter store with the same window and TTL semantics as the
/// Redis adapter. Used by tests and single-instance development setups;
/// it shares nothing across processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: Mutex<HashMap<String, KeyWindow>>,
}

#[derive(Debug)]
struct KeyWindow {
    stamps: Vec<u64>,
    expires_at: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Prune expired entries in place and return the remaining count.
/// A key whose TTL has elapsed is treated as absent.
fn prune_and_count(
    keys: &mut HashMap<String, KeyWindow>,
    key: &str,
    now: u64,
    window_start: u64,
) -> u64 {
    match keys.get_mut(key) {
        Some(window) if window.expires_at <= now => {
            keys.remove(key);
            0
        }
        Some(window) => {
            window.stamps.retain(|&stamp| stamp > window_start);
            window.stamps.len() as u64
        }
        None => 0,
    }
}

fn append(keys: &mut HashMap<String, KeyWindow>, key: &str, now: u64, window_seconds: u64) {
    let window = keys.entry(key.to_string()).or_insert_with(|| KeyWindow {
        stamps: Vec::new(),
        expires_at: 0,
    });
    window.stamps.push(now);
    window.expires_at = now + window_seconds;
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn record(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        now: u64,
        window_seconds: u64,
    ) -> Result<WindowCounts, StoreError> {
        let window_start = now.saturating_sub(window_seconds);
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);

        let subject = prune_and_count(&mut keys, subject_key, now, window_start);
        let endpoint = prune_and_count(&mut keys, endpoint_key, now, window_start);

        append(&mut keys, subject_key, now, window_seconds);
        append(&mut keys, endpoint_key, now, window_seconds);

        Ok(WindowCounts { subject, endpoint })
    }

    async fn observe(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        now: u64,
        window_seconds: u64,
    ) -> Result<WindowCounts, StoreError> {
        let window_start = now.saturating_sub(window_seconds);
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);

        let subject = prune_and_count(&mut keys, subject_key, now, window_start);
        let endpoint = prune_and_count(&mut keys, endpoint_key, now, window_start);

        Ok(WindowCounts { subject, endpoint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBJECT: &str = "rate_limit:user:mem";
    const ENDPOINT: &str = "rate_limit:endpoint:mem";

    #[tokio::test]
    async fn test_record_counts_exclude_current_request() {
        let store = MemoryStore::new();

        let counts = store.record(SUBJECT, ENDPOINT, 1_000, 60).await.unwrap();
        assert_eq!(counts, WindowCounts { subject: 0, endpoint: 0 });

        let counts = store.record(SUBJECT, ENDPOINT, 1_001, 60).await.unwrap();
        assert_eq!(counts, WindowCounts { subject: 1, endpoint: 1 });
    }

    #[tokio::test]
    async fn test_entries_at_window_edge_are_pruned() {
        let store = MemoryStore::new();

        store.record(SUBJECT, ENDPOINT, 1_000, 60).await.unwrap();

        // stamp 1000 sits exactly on window_start at now = 1060 and is dropped
        let counts = store.observe(SUBJECT, ENDPOINT, 1_060, 60).await.unwrap();
        assert_eq!(counts.subject, 0);

        // just inside the window it still counts
        let store = MemoryStore::new();
        store.record(SUBJECT, ENDPOINT, 1_000, 60).await.unwrap();
        let counts = store.observe(SUBJECT, ENDPOINT, 1_059, 60).await.unwrap();
        assert_eq!(counts.subject, 1);
    }

    #[tokio::test]
    async fn test_key_expires_one_window_after_last_write() {
        let store = MemoryStore::new();

        store.record(SUBJECT, ENDPOINT, 1_000, 60).await.unwrap();

        // TTL elapsed, the key is gone entirely
        let counts = store.observe(SUBJECT, ENDPOINT, 1_060, 60).await.unwrap();
        assert_eq!(counts, WindowCounts { subject: 0, endpoint: 0 });
    }

    #[tokio::test]
    async fn test_observe_has_no_side_effects() {
        let store = MemoryStore::new();

        store.record(SUBJECT, ENDPOINT, 1_000, 60).await.unwrap();

        for _ in 0..3 {
            let counts = store.observe(SUBJECT, ENDPOINT, 1_010, 60).await.unwrap();
            assert_eq!(counts.subject, 1);
        }
    }
}

//! In-process store for single-node deployments and tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::lock::{rw_read, rw_write};
use super::store::{KeyValueStore, StoreError};

const LOCK_TARGET: &str = "cache::memory";
/// Expired entries are swept from the map once every this many inserts.
const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Hash map store with per-entry expiry. Expired entries are invisible to
/// reads and scans; they are dropped when overwritten, deleted, or swept.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    inserts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        rw_read(&self.entries, LOCK_TARGET, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        rw_read(&self.entries, LOCK_TARGET, "contains")
            .get(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Inserts raw bytes directly, bypassing serialization.
    pub fn insert_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        let sweep = (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0;
        let mut entries = rw_write(&self.entries, LOCK_TARGET, "insert");
        if sweep {
            entries.retain(|_, entry| entry.is_live(now));
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let entries = rw_read(&self.entries, LOCK_TARGET, "get");
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.insert_raw(key, value, ttl);
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let entries = rw_read(&self.entries, LOCK_TARGET, "scan");
        Ok(entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn bulk_delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, LOCK_TARGET, "bulk_delete");
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some_and(|entry| entry.is_live(now)) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Redis-compatible glob subset: `*`, `?` and backslash escapes.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern = pattern.as_bytes();
    let key = key.as_bytes();
    let (mut p, mut k) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    backtrack = Some((p, k));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    k += 1;
                    continue;
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == key[k] {
                        p += 2;
                        k += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == key[k] {
                        p += 1;
                        k += 1;
                        continue;
                    }
                }
            }
        }
        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                k = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

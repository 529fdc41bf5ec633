//! In-process accelerator for config loads, source validation and lookups.
//!
//! Entries are sized by their serialized JSON length. The cache never holds
//! more than `max_bytes`; room for a new entry is made by evicting the least
//! recently used entries first. Expiry is checked lazily on read.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_CEILING_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub hit_count: u64,
    size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    used_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.used_bytes -= entry.size;
        Some(entry)
    }
}

pub struct MemoryCache {
    state: Mutex<CacheState>,
    max_bytes: usize,
}

impl MemoryCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                used_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_bytes,
        }
    }

    /// Ceiling is a tenth of the process memory limit.
    pub fn for_memory_limit(memory_limit_bytes: Option<u64>) -> Self {
        let max_bytes = memory_limit_bytes
            .map(|limit| (limit / 10) as usize)
            .unwrap_or(DEFAULT_CEILING_BYTES);
        Self::new(max_bytes)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn cache_key(namespace: &str, key: &str) -> String {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        format!("{}:{:016x}", namespace, hasher.finish())
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let cache_key = Self::cache_key(namespace, key);
        let now = Utc::now();
        let mut guard = self.state();
        let state = &mut *guard;

        let expired = match state.entries.get_mut(&cache_key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) if entry.expires_at <= now => true,
            Some(entry) => {
                entry.last_access = now;
                entry.hit_count += 1;
                false
            }
        };

        if expired {
            debug!("Cache entry {} expired", cache_key);
            state.remove(&cache_key);
            state.misses += 1;
            return None;
        }

        let value = state.entries.peek(&cache_key).map(|e| e.value.clone())?;
        match serde_json::from_value(value) {
            Ok(v) => {
                state.hits += 1;
                Some(v)
            }
            Err(e) => {
                warn!("Cache entry {} has unexpected shape, dropping it: {}", cache_key, e);
                state.remove(&cache_key);
                state.misses += 1;
                None
            }
        }
    }

    /// Returns false when the value is too large or no room could be made.
    pub fn set<T: Serialize>(&self, namespace: &str, key: &str, value: &T, ttl: Duration) -> bool {
        let cache_key = Self::cache_key(namespace, key);
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("Value for {} is not cacheable: {}", cache_key, e);
                return false;
            }
        };
        let size = value.to_string().len() + cache_key.len();

        if size > self.max_bytes / 4 {
            debug!("Rejecting cache entry {} ({} bytes, ceiling {})", cache_key, size, self.max_bytes);
            return false;
        }

        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(365));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut state = self.state();
        state.remove(&cache_key);

        while state.used_bytes + size > self.max_bytes {
            match state.entries.pop_lru() {
                Some((victim, entry)) => {
                    debug!("Evicting cache entry {} ({} bytes)", victim, entry.size);
                    state.used_bytes -= entry.size;
                    state.evictions += 1;
                }
                None => return false,
            }
        }

        state.used_bytes += size;
        state.entries.push(
            cache_key,
            CacheEntry {
                value,
                expires_at,
                created_at: now,
                last_access: now,
                hit_count: 0,
                size,
            },
        );
        true
    }

    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let cache_key = Self::cache_key(namespace, key);
        self.state().remove(&cache_key).is_some()
    }

    pub fn flush_namespace(&self, namespace: &str) -> usize {
        let prefix = format!("{}:", namespace);
        let mut state = self.state();
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn flush(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.used_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            entries: state.entries.len(),
            used_bytes: state.used_bytes,
            max_bytes: self.max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

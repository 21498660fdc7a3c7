// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`VolatileCache`] with per-entry TTL.
//!
//! Used when no Redis URL is configured and in tests. Expired entries are
//! dropped lazily on access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::traits::{CacheStats, StorageError, VolatileCache};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: &[u8], ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Number of live (unexpired) entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn adjust(&self, key: &str, delta: i64) -> Result<Option<i64>, StorageError> {
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(None),
            Entry::Occupied(occupied) if occupied.get().is_expired() => {
                occupied.remove();
                Ok(None)
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let current = parse_counter(&entry.value).ok_or_else(|| {
                    StorageError::Backend(format!("value at '{}' is not an integer", key))
                })?;
                let next = current.wrapping_add(delta);
                entry.value = next.to_string().into_bytes();
                Ok(Some(next))
            }
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

#[async_trait]
impl VolatileCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let live = self
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired()).then(|| entry.value.clone()));
        let found = match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, e| e.is_expired());
                None
            }
            None => None,
        };
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(found)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StorageError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(CacheEntry::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<Option<i64>, StorageError> {
        self.adjust(key, delta as i64)
    }

    async fn decrement(&self, key: &str, delta: u64) -> Result<Option<i64>, StorageError> {
        self.adjust(key, -(delta as i64))
    }

    async fn flush_all(&self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, StorageError> {
        let (items, bytes) = self
            .entries
            .iter()
            .filter(|e| !e.is_expired())
            .fold((0u64, 0u64), |(n, b), e| (n + 1, b + (e.key().len() + e.value.len()) as u64));
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            items,
            bytes,
        })
    }
}

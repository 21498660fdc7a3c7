// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search Result Cache
//!
//! Keeps the keys matched by recent searches in process, tagged with the
//! generation number of the kind at the time the search ran. Every
//! sanctioned mutation of a kind bumps its generation in the shared cache,
//! so an entry whose generation no longer matches is stale and dropped.
//!
//! ```text
//! Search arrives
//!       │
//!       ▼
//! ┌─────────────────────────────────────┐
//! │ key = (kind, fingerprint, page)     │
//! │ check: cached_generation == current │
//! └─────────────────────────────────────┘
//!       │
//!       ├─→ Hit + generation matches → fetch cached keys
//!       │
//!       └─→ Miss OR stale → run query, cache keys
//! ```
//!
//! Bounded by max entries with oldest-first eviction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::entity::Key;
use super::SearchQuery;

/// One cached page of one query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PageKey {
    kind: String,
    fingerprint: u64,
    limit: usize,
    offset: usize,
}

impl PageKey {
    fn of(query: &SearchQuery, limit: usize, offset: usize) -> Self {
        Self {
            kind: query.kind().to_string(),
            fingerprint: query.fingerprint(),
            limit,
            offset,
        }
    }
}

#[derive(Debug)]
struct CachedPage {
    generation: u64,
    keys: Vec<Key>,
}

pub struct SearchCache {
    pages: DashMap<PageKey, CachedPage>,
    /// First-insertion order of live pages, oldest at the front
    arrivals: Mutex<VecDeque<PageKey>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that found a page from an older generation
    pub stale: u64,
    pub entry_count: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl SearchCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            pages: DashMap::new(),
            arrivals: Mutex::new(VecDeque::new()),
            capacity: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    /// Cached keys for a query page, if cached at `generation`.
    ///
    /// A page from another generation counts as stale and a miss; it stays
    /// in place until the rerun overwrites it.
    pub fn get(&self, query: &SearchQuery, limit: usize, offset: usize, generation: u64) -> Option<Vec<Key>> {
        let found = self
            .pages
            .get(&PageKey::of(query, limit, offset))
            .map(|page| (page.generation == generation).then(|| page.keys.clone()));

        match found {
            Some(Some(keys)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(keys)
            }
            Some(None) => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, query: &SearchQuery, limit: usize, offset: usize, generation: u64, keys: Vec<Key>) {
        let key = PageKey::of(query, limit, offset);
        let page = CachedPage { generation, keys };

        // Overwriting keeps the page's place in line.
        if let Some(mut existing) = self.pages.get_mut(&key) {
            *existing = page;
            return;
        }

        let mut arrivals = self.arrivals.lock();
        while self.pages.len() >= self.capacity {
            let Some(oldest) = arrivals.pop_front() else { break };
            self.pages.remove(&oldest);
        }
        if self.pages.insert(key.clone(), page).is_none() {
            arrivals.push_back(key);
        }
    }

    pub fn stats(&self) -> SearchCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        SearchCacheStats {
            hits,
            misses,
            stale: self.stale.load(Ordering::Relaxed),
            entry_count: self.pages.len(),
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
        }
    }

    pub fn clear(&self) {
        let mut arrivals = self.arrivals.lock();
        self.pages.clear();
        arrivals.clear();
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

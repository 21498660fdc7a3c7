// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query execution with an in-process result cache.
//!
//! ```text
//! query(q, limit, offset)
//!       │
//!       ├─→ Read generation Gen_{kind} from the shared cache
//!       │
//!       ├─→ SearchCache hit at that generation?
//!       │        └─→ Reload entities by key, recheck filters, return
//!       │
//!       └─→ EntityStore::fetch(q + one filter per token)
//!                └─→ Cache keys tagged with the generation
//! ```
//!
//! Every sanctioned write bumps the kind's generation, so cached pages
//! from before the write are never served. If the generation cannot be
//! read the result cache is bypassed.

use tracing::{debug, info, warn};

use crate::entity::{Entity, Key};
use crate::metrics;
use crate::search::{SearchCacheStats, SearchQuery};
use crate::storage::StorageError;

use super::Datastore;

/// Query results with metadata.
#[derive(Debug, Clone)]
pub struct SearchResults {
    /// Matching entities in query order
    pub entities: Vec<Entity>,
    /// Whether the key list came from the result cache
    pub cached: bool,
    /// Search text was given but every term was a stop word or too short
    pub degenerate: bool,
}

impl Datastore {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Search
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run `query`, returning at most `limit` matches after skipping `offset`.
    ///
    /// A degenerate search (text that tokenizes to nothing) runs as the bare
    /// filtered query and matches everything the filters allow.
    #[tracing::instrument(skip(self, query), fields(kind = query.kind()))]
    pub async fn query(
        &self,
        query: &SearchQuery,
        limit: usize,
        offset: usize,
    ) -> Result<SearchResults, StorageError> {
        let _timer = metrics::LatencyTimer::new("search", "query");
        let degenerate = query.is_degenerate();
        if degenerate {
            info!(
                text = query.search_text().unwrap_or_default(),
                "Search text has no indexable terms, running unfiltered"
            );
            metrics::record_degenerate_search(query.kind());
        } else if query.search_text().is_some() && !self.indexer.is_searchable(query.kind()) {
            warn!("Search terms on a kind that is never indexed match nothing");
        }

        let generation = self.generations.current(query.kind()).await;

        if let Some(generation) = generation {
            if let Some(keys) = self.search_cache.get(query, limit, offset, generation) {
                if let Some(entities) = self.reload(query, &keys).await? {
                    debug!(results = entities.len(), "Search served from cache");
                    self.record_search(true, entities.len());
                    return Ok(SearchResults {
                        entities,
                        cached: true,
                        degenerate,
                    });
                }
                debug!("Cached search keys no longer match, rerunning query");
            }
        }

        let entities = self
            .store
            .fetch(&query.to_entity_query(), limit, offset)
            .await?;
        if let Some(generation) = generation {
            let keys = entities.iter().map(|e| e.key.clone()).collect();
            self.search_cache.insert(query, limit, offset, generation, keys);
        }

        self.record_search(false, entities.len());
        Ok(SearchResults {
            entities,
            cached: false,
            degenerate,
        })
    }

    /// Load cached keys, or `None` if any entity vanished or stopped matching.
    async fn reload(
        &self,
        query: &SearchQuery,
        keys: &[Key],
    ) -> Result<Option<Vec<Entity>>, StorageError> {
        let filters = query.to_entity_query();
        let mut entities = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.get(key).await? {
                Some(entity) if filters.matches(&entity) => entities.push(entity),
                _ => return Ok(None),
            }
        }
        Ok(Some(entities))
    }

    fn record_search(&self, cached: bool, results: usize) {
        metrics::record_search_cache(cached);
        metrics::record_search_results(results);
        let stats = self.search_cache.stats();
        metrics::set_search_cache_stats(stats.entry_count, stats.hit_rate);
    }

    #[must_use]
    pub fn search_cache_stats(&self) -> SearchCacheStats {
        self.search_cache.stats()
    }
}

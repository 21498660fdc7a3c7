// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache administration.

use serde::Serialize;
use tracing::info;

use crate::search::SearchCacheStats;
use crate::storage::{CacheStats, StorageError};

use super::Datastore;

/// Shared cache and in-process search cache statistics together.
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub cache: CacheStats,
    pub search: SearchCacheStats,
}

impl Datastore {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Administration
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn cache_stats(&self) -> Result<CacheReport, StorageError> {
        Ok(CacheReport {
            cache: self.cache.stats().await?,
            search: self.search_cache.stats(),
        })
    }

    /// Empty the shared cache and this process's search result cache.
    ///
    /// Counter totals, listings and search generations are all rebuilt
    /// on their next read.
    pub async fn flush_cache(&self) -> Result<(), StorageError> {
        self.search_cache.clear();
        self.cache.flush_all().await?;
        info!("Flushed caches");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::DatastoreConfig;
    use crate::entity::{Entity, Key};
    use crate::list_cache::EntityProjection;
    use crate::search::QueryBuilder;
    use crate::storage::{InMemoryCache, InMemoryStore};

    use super::*;

    #[tokio::test]
    async fn test_flush_clears_both_caches() {
        let cache = Arc::new(InMemoryCache::new());
        let mut ds = Datastore::new(DatastoreConfig::default(), Arc::new(InMemoryStore::new()), cache.clone());
        ds.register_list("Tag", EntityProjection::all());
        ds.put(Entity::new(Key::new("Tag", "rust"))).await.unwrap();
        ds.list("Tag", false).await.unwrap();
        let query = QueryBuilder::new("Tag").build().unwrap();
        ds.query(&query, 10, 0).await.unwrap();

        let report = ds.cache_stats().await.unwrap();
        assert!(report.cache.items >= 2);
        assert_eq!(report.search.entry_count, 1);

        ds.flush_cache().await.unwrap();
        assert!(cache.is_empty());
        let report = ds.cache_stats().await.unwrap();
        assert_eq!(report.cache.items, 0);
        assert_eq!(report.search.entry_count, 0);
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let ds = Datastore::new(
            DatastoreConfig::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryCache::new()),
        );
        let json = serde_json::to_value(ds.cache_stats().await.unwrap()).unwrap();
        assert!(json["cache"]["items"].is_u64());
        assert!(json["search"]["hit_rate"].is_f64());
    }
}

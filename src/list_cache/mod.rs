// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cached "all entities of kind K" listings.
//!
//! `list(kind)` serves a [`ListSnapshot`] from the shared cache under
//! `PS_{kind}_ALL`, or rebuilds it from the store (up to the configured
//! fetch limit) and caches it without TTL. The entry lives until the next
//! sanctioned mutation of the kind calls [`ListCache::invalidate`] and bumps
//! the kind's generation.
//!
//! Snapshots carry the generation read before their rows were fetched and
//! are served only while it is still current. A rebuild that overlaps a
//! write therefore never leaves pre-write rows behind: either the write's
//! bump lands before the rebuild re-checks the generation and the snapshot
//! is not stored, or it lands after and the stored snapshot is rejected on
//! the next read.
//!
//! A missing, unreadable or stale entry is always safe to rebuild. Records
//! come back in the store's natural fetch order.

pub mod projection;
pub mod snapshot;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::entity::Key;
use crate::metrics;
use crate::storage::{EntityQuery, EntityStore, KindGenerations, StorageError, VolatileCache};

pub use projection::{EntityProjection, Projection, ProjectionRegistry, WithCounter};
pub use snapshot::{ListSnapshot, ProjectedRecord, SnapshotError};

pub struct ListCache {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn VolatileCache>,
    generations: KindGenerations,
    projections: ProjectionRegistry,
    fetch_limit: usize,
}

impl ListCache {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn VolatileCache>,
        generations: KindGenerations,
        fetch_limit: usize,
    ) -> Self {
        Self {
            store,
            cache,
            generations,
            projections: ProjectionRegistry::new(),
            fetch_limit,
        }
    }

    pub fn cache_key(kind: &str) -> String {
        format!("PS_{}_ALL", kind)
    }

    pub fn register(&mut self, kind: impl Into<String>, projection: Arc<dyn Projection>) {
        self.projections.register(kind, projection);
    }

    /// Whether `kind` has a registered projection.
    pub fn participates(&self, kind: &str) -> bool {
        self.projections.contains(kind)
    }

    /// Counter owned by the entity at `key`, per its kind's projection.
    pub fn owned_counter(&self, key: &Key) -> Option<String> {
        self.projections.get(&key.kind)?.owned_counter(key)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list(&self, kind: &str, force_fresh: bool) -> Result<Vec<ProjectedRecord>, StorageError> {
        let projection = self
            .projections
            .get(kind)
            .ok_or_else(|| StorageError::UnregisteredKind(kind.to_string()))?;
        let _timer = metrics::LatencyTimer::new("list_cache", "list");
        let key = Self::cache_key(kind);
        let generation = self.generations.current(kind).await;

        if !force_fresh {
            match self.cache.get(&key).await {
                Ok(Some(bytes)) => match ListSnapshot::decode(&bytes, kind) {
                    Ok(snapshot) if Some(snapshot.generation) == generation => {
                        debug!(records = snapshot.records.len(), "List served from cache");
                        metrics::record_cache_lookup("list", true);
                        return Ok(snapshot.records);
                    }
                    Ok(snapshot) => {
                        debug!(cached = snapshot.generation, ?generation, "List snapshot is stale");
                        metrics::record_cache_lookup("list", false);
                    }
                    Err(e) => {
                        warn!(error = %e, "Discarding unreadable list snapshot");
                        metrics::record_cache_corruption("list");
                        if let Err(e) = self.cache.delete(&key).await {
                            warn!(error = %e, "Failed to delete list snapshot");
                        }
                    }
                },
                Ok(None) => metrics::record_cache_lookup("list", false),
                Err(e) => {
                    warn!(error = %e, "Cache read failed, rebuilding list");
                    metrics::record_cache_error("list_get");
                }
            }
        }

        let entities = self
            .store
            .fetch(&EntityQuery::new(kind), self.fetch_limit, 0)
            .await?;
        let mut records = Vec::with_capacity(entities.len());
        for entity in &entities {
            records.push(projection.project(entity).await?);
        }
        metrics::record_list_rebuild(kind, records.len());

        let Some(generation) = generation else {
            return Ok(records);
        };
        if self.generations.current(kind).await != Some(generation) {
            debug!(generation, "Kind changed during rebuild, not caching");
            return Ok(records);
        }

        let snapshot = ListSnapshot::new(kind, generation, records);
        match snapshot.encode() {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(&key, &bytes, None).await {
                    warn!(error = %e, "Failed to cache list snapshot");
                    metrics::record_cache_error("list_set");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode list snapshot"),
        }
        Ok(snapshot.records)
    }

    /// Drop the cached listing of `kind`. Never fails; errors are logged.
    ///
    /// Callers also bump the kind's generation; deleting alone cannot stop
    /// a rebuild already in flight from storing pre-write rows.
    pub async fn invalidate(&self, kind: &str) {
        metrics::record_invalidation(kind);
        if let Err(e) = self.cache.delete(&Self::cache_key(kind)).await {
            warn!(kind, error = %e, "Failed to invalidate list snapshot");
            metrics::record_cache_error("list_invalidate");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Value};
    use crate::storage::{InMemoryCache, InMemoryStore};
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        cache: Arc<InMemoryCache>,
        generations: KindGenerations,
        lists: ListCache,
    }

    fn fixture(fetch_limit: usize) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let generations = KindGenerations::new(cache.clone());
        let mut lists = ListCache::new(store.clone(), cache.clone(), generations.clone(), fetch_limit);
        lists.register("Tag", Arc::new(EntityProjection::all().with_key_name("name")));
        Fixture {
            store,
            cache,
            generations,
            lists,
        }
    }

    async fn put_tag(store: &InMemoryStore, name: &str) {
        store
            .put(&Entity::new(Key::new("Tag", name)).with("color", Value::from("blue")))
            .await
            .unwrap();
    }

    fn names(records: &[ProjectedRecord]) -> Vec<String> {
        records
            .iter()
            .filter_map(|r| r.get("name").and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_unregistered_kind_errors() {
        let f = fixture(1000);
        let err = f.lists.list("Article", false).await.unwrap_err();
        assert!(matches!(err, StorageError::UnregisteredKind(kind) if kind == "Article"));
    }

    #[tokio::test]
    async fn test_list_builds_and_caches_without_ttl() {
        let f = fixture(1000);
        put_tag(&f.store, "rust").await;
        put_tag(&f.store, "db").await;

        let records = f.lists.list("Tag", false).await.unwrap();
        assert_eq!(names(&records), vec!["db", "rust"]);
        assert_eq!(records[0].get("color"), Some(&json!("blue")));

        let cached = f.cache.get("PS_Tag_ALL").await.unwrap().unwrap();
        let snapshot = ListSnapshot::decode(&cached, "Tag").unwrap();
        assert_eq!(snapshot.records, records);
        assert_eq!(Some(snapshot.generation), f.generations.current("Tag").await);
    }

    #[tokio::test]
    async fn test_cached_listing_served_until_invalidated() {
        let f = fixture(1000);
        put_tag(&f.store, "rust").await;
        f.lists.list("Tag", false).await.unwrap();

        // Written behind the list cache's back
        put_tag(&f.store, "go").await;
        assert_eq!(names(&f.lists.list("Tag", false).await.unwrap()), vec!["rust"]);
        assert_eq!(names(&f.lists.list("Tag", true).await.unwrap()), vec!["go", "rust"]);

        put_tag(&f.store, "zig").await;
        f.lists.invalidate("Tag").await;
        assert_eq!(names(&f.lists.list("Tag", false).await.unwrap()), vec!["go", "rust", "zig"]);
    }

    #[tokio::test]
    async fn test_snapshot_from_older_generation_is_rebuilt() {
        let f = fixture(1000);
        put_tag(&f.store, "rust").await;
        f.lists.list("Tag", false).await.unwrap();

        // Snapshot survives but the kind moved on
        put_tag(&f.store, "go").await;
        f.generations.bump("Tag").await;
        assert_eq!(names(&f.lists.list("Tag", false).await.unwrap()), vec!["go", "rust"]);

        let current = f.generations.current("Tag").await.unwrap();
        let cached = f.cache.get("PS_Tag_ALL").await.unwrap().unwrap();
        assert_eq!(ListSnapshot::decode(&cached, "Tag").unwrap().generation, current);
    }

    #[tokio::test]
    async fn test_flushed_generation_rejects_old_snapshot() {
        let f = fixture(1000);
        put_tag(&f.store, "rust").await;
        f.lists.list("Tag", false).await.unwrap();

        put_tag(&f.store, "go").await;
        f.cache.delete("Gen_Tag").await.unwrap();
        assert_eq!(names(&f.lists.list("Tag", false).await.unwrap()), vec!["go", "rust"]);
    }

    #[tokio::test]
    async fn test_fetch_limit_bounds_listing() {
        let f = fixture(2);
        for name in ["a", "b", "c"] {
            put_tag(&f.store, name).await;
        }
        assert_eq!(f.lists.list("Tag", false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_rebuilds() {
        let f = fixture(1000);
        put_tag(&f.store, "rust").await;
        f.cache
            .set("PS_Tag_ALL", b"[{'name': u'rust'}]", None)
            .await
            .unwrap();

        assert_eq!(names(&f.lists.list("Tag", false).await.unwrap()), vec!["rust"]);
        let cached = f.cache.get("PS_Tag_ALL").await.unwrap().unwrap();
        assert!(ListSnapshot::decode(&cached, "Tag").is_ok());
    }

    #[tokio::test]
    async fn test_participation() {
        let f = fixture(1000);
        assert!(f.lists.participates("Tag"));
        assert!(!f.lists.participates("Article"));
        assert_eq!(f.lists.owned_counter(&Key::new("Tag", "rust")), None);
    }
}

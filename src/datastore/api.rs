// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity reads and sanctioned writes.
//!
//! Every write here follows the same order:
//! - rebuild the search index property (searchable kinds only)
//! - persist through the store
//! - purge the kind's cached listing and bump its search generation
//!
//! The purge runs whether or not the store call succeeded. A failed write
//! costs one rebuild; a skipped purge could serve stale data indefinitely.

use tracing::{debug, warn};

use crate::entity::{Entity, Key};
use crate::list_cache::ProjectedRecord;
use crate::metrics;
use crate::storage::StorageError;

use super::Datastore;

impl Datastore {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Entity reads & writes
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn get(&self, key: &Key) -> Result<Option<Entity>, StorageError> {
        let _timer = metrics::LatencyTimer::new("datastore", "get");
        self.store.get(key).await
    }

    /// Persist `entity`, reindexing it first when its kind is searchable.
    #[tracing::instrument(skip(self, entity), fields(key = %entity.key))]
    pub async fn put(&self, mut entity: Entity) -> Result<Key, StorageError> {
        let _timer = metrics::LatencyTimer::new("datastore", "put");
        if let Some(tokens) = self.indexer.index(&mut entity) {
            debug!(tokens, "Reindexed before write");
            metrics::record_index_tokens(entity.kind(), tokens);
        }

        let result = self.store.put(&entity).await;
        self.after_mutation(entity.kind()).await;
        record_outcome("put", &result);
        result
    }

    /// Delete the entity at `key` along with any counter it owns.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &Key) -> Result<(), StorageError> {
        let _timer = metrics::LatencyTimer::new("datastore", "delete");
        if let Some(counter) = self.lists.owned_counter(key) {
            match self.counter.delete(&counter).await {
                Ok(shards) => debug!(counter, shards, "Deleted owned counter"),
                Err(e) => warn!(counter, error = %e, "Failed to delete owned counter"),
            }
        }

        let result = self.store.delete(key).await;
        self.after_mutation(&key.kind).await;
        record_outcome("delete", &result);
        result
    }

    /// Existing entity at `key`, or `init` inserted atomically.
    #[tracing::instrument(skip(self, init), fields(key = %key))]
    pub async fn get_or_insert(&self, key: &Key, mut init: Entity) -> Result<Entity, StorageError> {
        let _timer = metrics::LatencyTimer::new("datastore", "get_or_insert");
        init.key = key.clone();
        self.indexer.index(&mut init);

        let result = self.store.get_or_insert(key, init).await;
        self.after_mutation(&key.kind).await;
        record_outcome("get_or_insert", &result);
        result
    }

    /// Cached listing of every entity of `kind`.
    pub async fn list(&self, kind: &str, force_fresh: bool) -> Result<Vec<ProjectedRecord>, StorageError> {
        self.lists.list(kind, force_fresh).await
    }
}

fn record_outcome<T>(operation: &str, result: &Result<T, StorageError>) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_operation("datastore", operation, status);
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::entity::{Entity, Key};
use super::query::EntityQuery;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Entity not found")]
    NotFound,
    /// A single-entity transaction lost a race with a concurrent writer.
    #[error("Transaction failed for '{key}': {reason}")]
    TransactionFailed { key: String, reason: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Kind '{0}' has no registered list projection")]
    UnregisteredKind(String),
}

impl StorageError {
    /// True for failures that are expected under write contention.
    pub fn is_contention(&self) -> bool {
        matches!(self, StorageError::TransactionFailed { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Read-modify-write body of a single-entity transaction.
///
/// Receives the current entity (if any) and returns the entity to commit.
/// Stores may invoke it more than once, so it must be free of side effects.
pub type TransactionFn = dyn Fn(Option<Entity>) -> Entity + Send + Sync;

/// Durable key-value entity store.
///
/// Single-key operations are strongly consistent; `fetch` may be eventually
/// consistent.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Entity>, StorageError>;
    async fn put(&self, entity: &Entity) -> Result<Key, StorageError>;
    async fn delete(&self, key: &Key) -> Result<(), StorageError>;

    /// Atomically read, transform and write back one entity.
    ///
    /// Fails with [`StorageError::TransactionFailed`] if another writer
    /// committed the same key between the read and the write.
    async fn run_in_transaction(
        &self,
        key: &Key,
        mutate: &TransactionFn,
    ) -> Result<Entity, StorageError>;

    /// Run a query, skipping `offset` matches and returning at most `limit`.
    async fn fetch(
        &self,
        query: &EntityQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Entity>, StorageError>;

    /// Return the existing entity at `key`, or store and return `init`.
    async fn get_or_insert(&self, key: &Key, init: Entity) -> Result<Entity, StorageError> {
        let mutate = move |existing: Option<Entity>| existing.unwrap_or_else(|| init.clone());
        self.run_in_transaction(key, &mutate).await
    }
}

/// Cache statistics as reported by the backing cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub items: u64,
    pub bytes: u64,
}

/// Shared, best-effort, TTL-bounded cache visible to every process.
///
/// Counter values are stored as ASCII decimal signed integers.
#[async_trait]
pub trait VolatileCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Store only if absent. Returns whether the value was stored.
    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StorageError>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Atomically add `delta` to an integer value.
    ///
    /// Returns `None` when the key is absent; the key is never created.
    async fn increment(&self, key: &str, delta: u64) -> Result<Option<i64>, StorageError>;

    /// Atomically subtract `delta` from an integer value (may go negative).
    async fn decrement(&self, key: &str, delta: u64) -> Result<Option<i64>, StorageError>;

    async fn flush_all(&self) -> Result<(), StorageError>;
    async fn stats(&self) -> Result<CacheStats, StorageError>;
}

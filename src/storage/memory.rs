// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`EntityStore`] backed by a `DashMap`.
//!
//! Every committed write stamps the entity with a fresh version from a
//! store-wide sequence. Transactions read `(entity, version)`, run the
//! mutation, and commit only if the version is unchanged, so concurrent
//! writers to one key race exactly like they would against the real store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::entity::{Entity, Key};
use super::query::EntityQuery;
use super::traits::{EntityStore, StorageError, TransactionFn};

#[derive(Debug, Clone)]
struct Versioned {
    entity: Entity,
    version: u64,
}

pub struct InMemoryStore {
    data: DashMap<Key, Versioned>,
    sequence: AtomicU64,
    /// Remaining transactions per kind that will be forced to fail (contention simulation)
    injected_failures: DashMap<String, usize>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            sequence: AtomicU64::new(0),
            injected_failures: DashMap::new(),
        }
    }

    /// Get current entity count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Make the next `count` transactions on entities of `kind` fail as if
    /// they lost a race.
    pub fn fail_next_transactions(&self, kind: &str, count: usize) {
        self.injected_failures.insert(kind.to_string(), count);
    }

    fn next_version(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_injected_failure(&self, kind: &str) -> bool {
        match self.injected_failures.get_mut(kind) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Entity>, StorageError> {
        Ok(self.data.get(key).map(|r| r.entity.clone()))
    }

    async fn put(&self, entity: &Entity) -> Result<Key, StorageError> {
        let version = self.next_version();
        self.data.insert(
            entity.key.clone(),
            Versioned {
                entity: entity.clone(),
                version,
            },
        );
        Ok(entity.key.clone())
    }

    async fn delete(&self, key: &Key) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn run_in_transaction(
        &self,
        key: &Key,
        mutate: &TransactionFn,
    ) -> Result<Entity, StorageError> {
        let (current, read_version) = match self.data.get(key) {
            Some(r) => (Some(r.entity.clone()), r.version),
            None => (None, 0),
        };

        let mut next = mutate(current);
        next.key = key.clone();

        // Let concurrent writers interleave between read and commit.
        tokio::task::yield_now().await;

        if self.take_injected_failure(&key.kind) {
            return Err(StorageError::TransactionFailed {
                key: key.to_string(),
                reason: "injected contention".into(),
            });
        }

        let conflict = || StorageError::TransactionFailed {
            key: key.to_string(),
            reason: "concurrent modification".into(),
        };

        match self.data.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().version != read_version {
                    debug!(key = %key, "Transaction conflict");
                    return Err(conflict());
                }
                let version = self.next_version();
                occupied.insert(Versioned {
                    entity: next.clone(),
                    version,
                });
            }
            Entry::Vacant(vacant) => {
                if read_version != 0 {
                    // Deleted since we read it
                    return Err(conflict());
                }
                let version = self.next_version();
                vacant.insert(Versioned {
                    entity: next.clone(),
                    version,
                });
            }
        }
        Ok(next)
    }

    async fn fetch(
        &self,
        query: &EntityQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Entity>, StorageError> {
        let candidates: Vec<Entity> = self
            .data
            .iter()
            .filter(|r| r.key().kind == query.kind)
            .map(|r| r.value().entity.clone())
            .collect();
        Ok(query.evaluate(candidates, limit, offset))
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cached listings stay correct when rebuilds overlap sanctioned writes.
//!
//! Run with: `cargo test --test list_invalidation`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use datastore_ext::list_cache::EntityProjection;
use datastore_ext::storage::{
    EntityQuery, EntityStore, InMemoryCache, InMemoryStore, StorageError, TransactionFn,
};
use datastore_ext::{Datastore, DatastoreConfig, Entity, Key};

/// Store that can hold one `fetch` between reading rows and returning them.
struct GatedStore {
    inner: InMemoryStore,
    armed: AtomicBool,
    fetched: Notify,
    release: Notify,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            armed: AtomicBool::new(false),
            fetched: Notify::new(),
            release: Notify::new(),
        }
    }

    fn hold_next_fetch(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityStore for GatedStore {
    async fn get(&self, key: &Key) -> Result<Option<Entity>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, entity: &Entity) -> Result<Key, StorageError> {
        self.inner.put(entity).await
    }

    async fn delete(&self, key: &Key) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn run_in_transaction(&self, key: &Key, mutate: &TransactionFn) -> Result<Entity, StorageError> {
        self.inner.run_in_transaction(key, mutate).await
    }

    async fn fetch(&self, query: &EntityQuery, limit: usize, offset: usize) -> Result<Vec<Entity>, StorageError> {
        let rows = self.inner.fetch(query, limit, offset).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.fetched.notify_one();
            self.release.notified().await;
        }
        Ok(rows)
    }
}

fn tag_datastore(store: Arc<dyn EntityStore>) -> Datastore {
    let mut ds = Datastore::new(DatastoreConfig::default(), store, Arc::new(InMemoryCache::new()));
    ds.register_list("Tag", EntityProjection::all().with_key_name("name"));
    ds
}

fn tag(name: &str) -> Entity {
    Entity::new(Key::new("Tag", name))
}

// =============================================================================
// Interleaved rebuild and write
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_during_rebuild_does_not_leave_old_listing() {
    let store = Arc::new(GatedStore::new());
    let ds = Arc::new(tag_datastore(store.clone()));
    ds.put(tag("rust")).await.unwrap();

    store.hold_next_fetch();
    let reader = {
        let ds = ds.clone();
        tokio::spawn(async move { ds.list("Tag", false).await })
    };

    // Reader has its pre-write rows in hand
    store.fetched.notified().await;
    ds.put(tag("go")).await.unwrap();
    store.release.notify_one();

    let in_flight = reader.await.unwrap().unwrap();
    assert_eq!(in_flight.len(), 1);

    assert_eq!(ds.list("Tag", false).await.unwrap().len(), 2);
    assert_eq!(ds.list("Tag", false).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forced_rebuild_during_write_does_not_leave_old_listing() {
    let store = Arc::new(GatedStore::new());
    let ds = Arc::new(tag_datastore(store.clone()));
    ds.put(tag("rust")).await.unwrap();
    ds.list("Tag", false).await.unwrap();

    store.hold_next_fetch();
    let reader = {
        let ds = ds.clone();
        tokio::spawn(async move { ds.list("Tag", true).await })
    };

    store.fetched.notified().await;
    ds.delete(&Key::new("Tag", "rust")).await.unwrap();
    store.release.notify_one();
    reader.await.unwrap().unwrap();

    assert!(ds.list("Tag", false).await.unwrap().is_empty());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_and_writers_settle_on_store_contents() {
    let store = Arc::new(InMemoryStore::new());
    let ds = Arc::new(tag_datastore(store.clone()));

    let mut handles = Vec::new();
    for task in 0..8 {
        let ds = ds.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..20 {
                if task % 2 == 0 {
                    ds.put(tag(&format!("t{}-{}", task, i))).await.unwrap();
                } else {
                    ds.list("Tag", false).await.unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.len(), 80);
    assert_eq!(ds.list("Tag", false).await.unwrap().len(), 80);
}

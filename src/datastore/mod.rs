// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sanctioned access path to the store.
//!
//! [`Datastore`] ties the primitives together so that every write keeps the
//! derived state consistent:
//!
//! ```text
//! put(entity)
//!   │
//!   ├─→ SearchIndexer      rebuild __searchable_text_index
//!   ├─→ EntityStore        persist
//!   ├─→ ListCache          purge PS_{kind}_ALL
//!   └─→ generation bump    stale listings and search results for the kind
//! ```
//!
//! Writes made directly against the store bypass all of this; cached
//! listings and search results then stay stale until the next sanctioned
//! write or a forced read.
//!
//! # Example
//!
//! ```rust
//! use datastore_ext::{Datastore, DatastoreConfig, Entity, Key, Value};
//! use datastore_ext::list_cache::{EntityProjection, WithCounter};
//! use datastore_ext::search::{QueryBuilder, SearchableKind};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut datastore = Datastore::connect(DatastoreConfig::default()).await?;
//! datastore.register_searchable(SearchableKind::new("Article").unsearchable(["permalink"]));
//! let tags = WithCounter::new(EntityProjection::all().with_key_name("name"), datastore.counter(), "Tag");
//! datastore.register_list("Tag", tags);
//!
//! datastore
//!     .put(Entity::new(Key::new("Article", "fox")).with("title", Value::from("The Quick Brown Fox")))
//!     .await?;
//! datastore.put(Entity::new(Key::new("Tag", "animals"))).await?;
//! datastore.counter().increment("Taganimals").await;
//!
//! let query = QueryBuilder::new("Article").search("quick fox").build()?;
//! assert_eq!(datastore.query(&query, 10, 0).await?.entities.len(), 1);
//! assert_eq!(datastore.list("Tag", false).await?[0].get("count"), Some(&serde_json::json!(1)));
//! # Ok(())
//! # }
//! ```

mod admin;
mod api;
mod search_api;

use std::sync::Arc;

use tracing::info;

use crate::config::DatastoreConfig;
use crate::counter::ShardedCounter;
use crate::list_cache::{ListCache, Projection};
use crate::search::{SearchCache, SearchIndexer, SearchableKind};
use crate::storage::{
    EntityStore, InMemoryCache, InMemoryStore, KindGenerations, RedisCache, SqlStore, StorageError,
    VolatileCache,
};

pub use admin::CacheReport;
pub use search_api::SearchResults;

pub struct Datastore {
    config: DatastoreConfig,
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn VolatileCache>,
    counter: Arc<ShardedCounter>,
    lists: ListCache,
    indexer: SearchIndexer,
    search_cache: SearchCache,
    generations: KindGenerations,
}

impl Datastore {
    pub fn new(config: DatastoreConfig, store: Arc<dyn EntityStore>, cache: Arc<dyn VolatileCache>) -> Self {
        let counter = Arc::new(ShardedCounter::new(store.clone(), cache.clone(), &config));
        let generations = KindGenerations::new(cache.clone());
        let lists = ListCache::new(store.clone(), cache.clone(), generations.clone(), config.list_fetch_limit);
        let search_cache = SearchCache::new(config.search_cache_max_entries);
        Self {
            config,
            store,
            cache,
            counter,
            lists,
            indexer: SearchIndexer::new(),
            search_cache,
            generations,
        }
    }

    /// Build from configuration: SQL and Redis when their URLs are set,
    /// in-process collaborators otherwise.
    #[tracing::instrument(
        skip(config),
        fields(has_sql = config.sql_url.is_some(), has_redis = config.redis_url.is_some())
    )]
    pub async fn connect(config: DatastoreConfig) -> Result<Self, StorageError> {
        let store: Arc<dyn EntityStore> = match config.sql_url.as_deref() {
            Some(url) => Arc::new(SqlStore::new(url).await?),
            None => Arc::new(InMemoryStore::new()),
        };
        let cache: Arc<dyn VolatileCache> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisCache::with_prefix(url, config.redis_prefix.as_deref()).await?),
            None => Arc::new(InMemoryCache::new()),
        };

        info!("Datastore connected");

        Ok(Self::new(config, store, cache))
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn VolatileCache> {
        &self.cache
    }

    /// Shared sharded counter.
    pub fn counter(&self) -> Arc<ShardedCounter> {
        self.counter.clone()
    }

    pub fn lists(&self) -> &ListCache {
        &self.lists
    }

    pub fn indexer(&self) -> &SearchIndexer {
        &self.indexer
    }

    pub fn register_searchable(&mut self, kind: SearchableKind) {
        self.indexer.register(kind);
    }

    /// Make `kind` take part in list caching.
    pub fn register_list<P: Projection + 'static>(&mut self, kind: impl Into<String>, projection: P) {
        self.lists.register(kind, Arc::new(projection));
    }

    /// Purge derived state of `kind` after a sanctioned mutation.
    async fn after_mutation(&self, kind: &str) {
        if self.lists.participates(kind) {
            self.lists.invalidate(kind).await;
        }
        // Absent is fine: the next reader seeds a fresh random generation.
        self.generations.bump(kind).await;
    }
}

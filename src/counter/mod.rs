// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sharded counter.
//!
//! A logical counter is the sum of many [`CounterShard`] records. Each
//! update picks one shard uniformly at random and adjusts it in a
//! single-entity transaction, so concurrent writers usually land on
//! different records. When a transaction loses a race the counter first
//! adopts any wider count another process has persisted, then widens (see
//! [`ShardGrowth`]) and the update is re-attempted over more shards.
//!
//! The shared cache holds an advisory total under `"Counter" + name`. It is
//! nudged with the cache's own atomic increment after every update attempt
//! and recomputed from the shards on a miss or a forced read.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use datastore_ext::{DatastoreConfig, ShardedCounter};
//! use datastore_ext::storage::{InMemoryCache, InMemoryStore};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let counter = ShardedCounter::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryCache::new()),
//!     &DatastoreConfig::default(),
//! );
//!
//! assert!(counter.increment("hits").await.applied);
//! assert_eq!(counter.get("hits", true).await.unwrap(), 1);
//! # }
//! ```

pub mod growth;
pub mod shard;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::config::DatastoreConfig;
use crate::entity::{Entity, Value};
use crate::metrics;
use crate::storage::{EntityQuery, EntityStore, StorageError, VolatileCache};

pub use growth::{AttemptOutcome, NextStep, ShardGrowth};
pub use shard::CounterShard;

/// Result of one increment or decrement.
///
/// Contention that outlasts shard growth is an expected outcome, reported
/// here rather than as an error. Callers decide whether it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    /// Whether a shard write committed.
    pub applied: bool,
    /// Cached total after the cache adjustment, if a total was cached.
    pub cached_total: Option<i64>,
    /// Shard count in effect when the update finished.
    pub shard_count: usize,
}

pub struct ShardedCounter {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn VolatileCache>,
    growth: ShardGrowth,
    default_shards: usize,
    cache_ttl: Duration,
    /// Shard counts already loaded or grown by this process.
    shard_counts: DashMap<String, usize>,
}

impl ShardedCounter {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn VolatileCache>,
        config: &DatastoreConfig,
    ) -> Self {
        let growth = ShardGrowth::new(config.shard_growth_step, config.max_shards);
        Self {
            store,
            cache,
            growth,
            default_shards: growth.clamp(config.default_shards),
            cache_ttl: config.counter_cache_ttl(),
            shard_counts: DashMap::new(),
        }
    }

    /// Cache key of a counter's advisory total.
    pub fn cache_key(name: &str) -> String {
        format!("Counter{}", name)
    }

    pub async fn increment(&self, name: &str) -> CounterUpdate {
        self.apply(name, 1).await
    }

    pub async fn decrement(&self, name: &str) -> CounterUpdate {
        self.apply(name, -1).await
    }

    /// Current shard count for `name`, loading the persisted value on first use.
    pub async fn shard_count(&self, name: &str) -> usize {
        if let Some(count) = self.shard_counts.get(name).map(|r| *r) {
            return count;
        }

        let persisted = self.persisted_shard_count(name).await;
        let loaded = self
            .growth
            .clamp(persisted.unwrap_or(self.default_shards).max(self.default_shards));
        self.raise_local(name, loaded)
    }

    async fn persisted_shard_count(&self, name: &str) -> Option<usize> {
        match self.store.get(&shard::config_key(name)).await {
            Ok(entity) => entity.as_ref().and_then(shard::persisted_shards),
            Err(e) => {
                warn!(counter = name, error = %e, "Failed to load shard count");
                None
            }
        }
    }

    /// Adopt a wider shard count persisted by another process.
    async fn refresh_shard_count(&self, name: &str, current: usize) -> usize {
        match self.persisted_shard_count(name).await {
            Some(persisted) if persisted > current => {
                debug!(persisted, current, "Adopting persisted shard count");
                self.raise_local(name, self.growth.clamp(persisted))
            }
            _ => current,
        }
    }

    #[tracing::instrument(skip(self, name), fields(counter = name))]
    async fn apply(&self, name: &str, delta: i64) -> CounterUpdate {
        let operation = if delta > 0 { "increment" } else { "decrement" };
        let _timer = metrics::LatencyTimer::new("counter", operation);
        let mut shard_count = self.shard_count(name).await;

        let applied = loop {
            let index = pick_shard(shard_count);
            let key = CounterShard::key(name, index);
            let counter_name = name.to_string();
            let mutate = move |existing: Option<Entity>| {
                let mut shard = existing
                    .as_ref()
                    .and_then(CounterShard::from_entity)
                    .unwrap_or_else(|| CounterShard::new(counter_name.as_str()));
                shard.count += delta;
                shard.to_entity(index)
            };

            let outcome = match self.store.run_in_transaction(&key, &mutate).await {
                Ok(_) => AttemptOutcome::Committed,
                Err(e) if e.is_contention() => {
                    debug!(shard = %key, shard_count, "Shard transaction contended");
                    metrics::record_shard_contention(name);
                    AttemptOutcome::Contended
                }
                Err(e) => {
                    error!(shard = %key, error = %e, "Shard transaction failed");
                    break false;
                }
            };

            if outcome == AttemptOutcome::Contended {
                shard_count = self.refresh_shard_count(name, shard_count).await;
            }
            match self.growth.next(shard_count, outcome) {
                NextStep::Done => break true,
                NextStep::Retry { shard_count: wider } => {
                    shard_count = self.grow(name, wider).await;
                }
                NextStep::Exhausted => {
                    error!(shard_count, "Counter update gave up at maximum shard count");
                    break false;
                }
            }
        };

        let status = if applied { "success" } else { "error" };
        metrics::record_operation("counter", operation, status);

        let cached_total = self.adjust_cache(name, delta).await;
        CounterUpdate {
            applied,
            cached_total,
            shard_count,
        }
    }

    /// Raise the shard count locally and persist it for other processes.
    async fn grow(&self, name: &str, target: usize) -> usize {
        let shard_count = self.raise_local(name, target);
        info!(counter = name, shard_count, "Growing counter shards");

        let counter_name = name.to_string();
        let raise = move |existing: Option<Entity>| shard::raise_shards(existing, &counter_name, target);
        if let Err(e) = self.store.run_in_transaction(&shard::config_key(name), &raise).await {
            // Another process raising it concurrently is fine; it only grows.
            warn!(counter = name, error = %e, "Failed to persist shard count");
        }
        shard_count
    }

    fn raise_local(&self, name: &str, target: usize) -> usize {
        let shard_count = *self
            .shard_counts
            .entry(name.to_string())
            .and_modify(|n| *n = (*n).max(target))
            .or_insert(target);
        metrics::set_shard_count(name, shard_count);
        shard_count
    }

    async fn adjust_cache(&self, name: &str, delta: i64) -> Option<i64> {
        let key = Self::cache_key(name);
        let result = if delta >= 0 {
            self.cache.increment(&key, delta.unsigned_abs()).await
        } else {
            self.cache.decrement(&key, delta.unsigned_abs()).await
        };
        match result {
            Ok(total) => total,
            Err(e) => {
                warn!(counter = name, error = %e, "Failed to adjust cached total");
                metrics::record_cache_error("counter_adjust");
                None
            }
        }
    }

    /// Total of counter `name`.
    ///
    /// Served from the cache unless `force_fresh`; otherwise, or on a miss,
    /// the shards are summed and the cache is refreshed.
    #[tracing::instrument(skip(self, name), fields(counter = name))]
    pub async fn get(&self, name: &str, force_fresh: bool) -> Result<i64, StorageError> {
        let key = Self::cache_key(name);

        if !force_fresh {
            match self.cache.get(&key).await {
                Ok(Some(bytes)) => match parse_total(&bytes) {
                    Some(total) => {
                        metrics::record_cache_lookup("counter", true);
                        return Ok(total);
                    }
                    None => {
                        warn!(counter = name, "Discarding unreadable cached total");
                        metrics::record_cache_corruption("counter");
                        if let Err(e) = self.cache.delete(&key).await {
                            warn!(counter = name, error = %e, "Failed to delete cached total");
                        }
                    }
                },
                Ok(None) => metrics::record_cache_lookup("counter", false),
                Err(e) => {
                    warn!(counter = name, error = %e, "Cache read failed, summing shards");
                    metrics::record_cache_error("counter_get");
                }
            }
        }

        let total = self.sum_shards(name).await?;
        if let Err(e) = self
            .cache
            .set(&key, total.to_string().as_bytes(), Some(self.cache_ttl))
            .await
        {
            warn!(counter = name, error = %e, "Failed to cache counter total");
            metrics::record_cache_error("counter_set");
        }
        Ok(total)
    }

    async fn load_shards(&self, name: &str) -> Result<Vec<Entity>, StorageError> {
        let query = EntityQuery::new(shard::SHARD_KIND).filter_eq("name", Value::from(name));
        self.store.fetch(&query, self.growth.max, 0).await
    }

    async fn sum_shards(&self, name: &str) -> Result<i64, StorageError> {
        let shards = self.load_shards(name).await?;
        Ok(shards
            .iter()
            .filter_map(CounterShard::from_entity)
            .map(|s| s.count)
            .sum())
    }

    /// Delete every shard of `name`, its cached total and its shard-count record.
    ///
    /// Not atomic across shards: on partial failure the remaining shards
    /// are left in place and a repeat call finishes the job. Returns the
    /// number of shards removed.
    #[tracing::instrument(skip(self, name), fields(counter = name))]
    pub async fn delete(&self, name: &str) -> Result<usize, StorageError> {
        let shards = self.load_shards(name).await?;

        let mut removed = 0;
        for entity in &shards {
            match self.store.delete(&entity.key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(shard = %entity.key, error = %e, "Failed to delete shard"),
            }
        }

        if let Err(e) = self.cache.delete(&Self::cache_key(name)).await {
            warn!(error = %e, "Failed to delete cached total");
        }
        self.store.delete(&shard::config_key(name)).await?;
        self.shard_counts.remove(name);

        info!(removed, remaining = shards.len() - removed, "Deleted counter");
        Ok(removed)
    }
}

/// Uniform shard index in `1..=shard_count`.
fn pick_shard(shard_count: usize) -> usize {
    rand::rng().random_range(1..=shard_count.max(1))
}

fn parse_total(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

pub mod traits;
pub mod query;
pub mod generation;
pub mod memory;
pub mod memory_cache;
pub mod redis;
pub mod sql;

pub use traits::{CacheStats, EntityStore, StorageError, TransactionFn, VolatileCache};
pub use generation::KindGenerations;
pub use query::{EntityQuery, Filter, FilterOperator, SortDirection, SortOrder};
pub use memory::InMemoryStore;
pub use memory_cache::InMemoryCache;
pub use redis::RedisCache;
pub use sql::SqlStore;

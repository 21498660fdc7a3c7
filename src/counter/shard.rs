// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stored records behind a sharded counter.

use crate::entity::{Entity, Key, Value};

/// Kind of the per-shard partial count records.
pub const SHARD_KIND: &str = "CounterShard";

/// Kind of the per-counter record holding its persisted shard count.
pub const CONFIG_KIND: &str = "Counter";

/// One independently writable slice of a logical counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterShard {
    pub name: String,
    pub count: i64,
}

impl CounterShard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: 0,
        }
    }

    /// `"Shard" + counter_name + shard_index`
    pub fn key(counter_name: &str, index: usize) -> Key {
        Key::new(SHARD_KIND, format!("Shard{}{}", counter_name, index))
    }

    /// Returns `None` for entities that are not shards.
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        if entity.kind() != SHARD_KIND {
            return None;
        }
        Some(Self {
            name: entity.get_str("name")?.to_string(),
            count: entity.get_int("count").unwrap_or(0),
        })
    }

    pub fn to_entity(&self, index: usize) -> Entity {
        Entity::new(Self::key(&self.name, index))
            .with("name", Value::from(self.name.as_str()))
            .with("count", Value::Int(self.count))
    }
}

pub fn config_key(counter_name: &str) -> Key {
    Key::new(CONFIG_KIND, counter_name)
}

/// Persisted shard count, if the record holds one.
pub fn persisted_shards(entity: &Entity) -> Option<usize> {
    entity
        .get_int("num_shards")
        .and_then(|n| usize::try_from(n).ok())
}

/// Config record carrying `num_shards`, never lowering an existing value.
pub fn raise_shards(existing: Option<Entity>, counter_name: &str, target: usize) -> Entity {
    let mut entity = existing.unwrap_or_else(|| Entity::new(config_key(counter_name)));
    let current = persisted_shards(&entity).unwrap_or(0);
    entity.set("num_shards", Value::Int(current.max(target) as i64));
    entity
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-kind projections from entities to flat list records.
//!
//! Each kind that takes part in list caching registers one [`Projection`]
//! in a [`ProjectionRegistry`]. Values are converted to plain JSON:
//!
//! | Value         | JSON                                  |
//! |---------------|---------------------------------------|
//! | `Timestamp`   | `"YYYY-MM-DD HH:MM:SS"` (UTC)         |
//! | `Key`         | `"kind:name"`                         |
//! | `Bytes`       | omitted                               |
//! | `List`        | array of converted elements           |
//! | anything else | the natural JSON scalar               |

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;

use crate::counter::ShardedCounter;
use crate::entity::{Entity, Key, Value};
use crate::search::INDEX_PROPERTY;
use crate::storage::StorageError;
use super::snapshot::ProjectedRecord;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[async_trait]
pub trait Projection: Send + Sync {
    async fn project(&self, entity: &Entity) -> Result<ProjectedRecord, StorageError>;

    /// Name of the counter owned by the entity at `key`, if any.
    ///
    /// Deleting the entity through the facade deletes that counter too.
    fn owned_counter(&self, _key: &Key) -> Option<String> {
        None
    }
}

/// JSON form of a property value; `None` for values that are omitted.
pub fn to_json(value: &Value) -> Option<serde_json::Value> {
    use serde_json::Value as Json;

    Some(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Str(s) | Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(_) => return None,
        Value::Timestamp(millis) => match DateTime::from_timestamp_millis(*millis) {
            Some(at) => Json::String(at.format(TIMESTAMP_FORMAT).to_string()),
            None => Json::Null,
        },
        Value::Key(key) => Json::String(key.to_string()),
        Value::List(items) => Json::Array(items.iter().filter_map(to_json).collect()),
    })
}

/// Every stored property (minus exclusions), optionally plus the key name.
#[derive(Debug, Clone, Default)]
pub struct EntityProjection {
    exclude: HashSet<String>,
    key_name_field: Option<String>,
}

impl EntityProjection {
    pub fn all() -> Self {
        Self::default()
    }

    /// Leave properties out of the record
    pub fn exclude<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(properties.into_iter().map(Into::into));
        self
    }

    /// Also emit the entity's key name under `field`
    pub fn with_key_name(mut self, field: impl Into<String>) -> Self {
        self.key_name_field = Some(field.into());
        self
    }

    fn record(&self, entity: &Entity) -> ProjectedRecord {
        let mut record = ProjectedRecord::new(entity.key.to_string());
        for (name, value) in &entity.properties {
            if name == INDEX_PROPERTY || self.exclude.contains(name) {
                continue;
            }
            if let Some(json) = to_json(value) {
                record.fields.insert(name.clone(), json);
            }
        }
        if let Some(field) = &self.key_name_field {
            record
                .fields
                .insert(field.clone(), serde_json::Value::String(entity.key.name.clone()));
        }
        record
    }
}

#[async_trait]
impl Projection for EntityProjection {
    async fn project(&self, entity: &Entity) -> Result<ProjectedRecord, StorageError> {
        Ok(self.record(entity))
    }
}

/// Adds the value of a counter owned by each entity.
///
/// The counter is named `prefix + key name` (the `Tag` pattern: tag `rust`
/// owns counter `Tagrust`).
pub struct WithCounter<P> {
    inner: P,
    counter: Arc<ShardedCounter>,
    prefix: String,
    field: String,
}

impl<P: Projection> WithCounter<P> {
    pub fn new(inner: P, counter: Arc<ShardedCounter>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            counter,
            prefix: prefix.into(),
            field: "count".to_string(),
        }
    }

    /// Emit the counter value under `field` instead of `count`
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    fn counter_name(&self, key: &Key) -> String {
        format!("{}{}", self.prefix, key.name)
    }
}

#[async_trait]
impl<P: Projection> Projection for WithCounter<P> {
    async fn project(&self, entity: &Entity) -> Result<ProjectedRecord, StorageError> {
        let mut record = self.inner.project(entity).await?;
        let total = self.counter.get(&self.counter_name(&entity.key), false).await?;
        record.fields.insert(self.field.clone(), serde_json::Value::from(total));
        Ok(record)
    }

    fn owned_counter(&self, key: &Key) -> Option<String> {
        Some(self.counter_name(key))
    }
}

/// Explicit kind → projection lookup table.
#[derive(Default)]
pub struct ProjectionRegistry {
    projections: HashMap<String, Arc<dyn Projection>>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, projection: Arc<dyn Projection>) {
        self.projections.insert(kind.into(), projection);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Projection>> {
        self.projections.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.projections.contains_key(kind)
    }
}

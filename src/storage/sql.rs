// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL-backed [`EntityStore`] (SQLite or MySQL through the sqlx `Any` driver).
//!
//! One row per entity, properties serialized as JSON:
//! ```sql
//! CREATE TABLE entities (
//!   kind    VARCHAR(191) NOT NULL,
//!   name    VARCHAR(191) NOT NULL,
//!   version BIGINT NOT NULL,
//!   body    LONGTEXT NOT NULL,     -- JSON map of property name -> Value
//!   PRIMARY KEY (kind, name)
//! )
//! ```
//!
//! Transactions are optimistic: the row's `version` is read with the body
//! and the write is conditional on it being unchanged. A lost race shows
//! up as zero affected rows and is reported as
//! [`StorageError::TransactionFailed`].
//!
//! `fetch` loads the kind's rows and evaluates the query in process with
//! the same evaluator as the in-memory store, so list-membership filters
//! behave identically on both backends.

use std::collections::BTreeMap;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::debug;

use crate::entity::{Entity, Key, Value};
use crate::resilience::retry::{retry, RetryConfig};
use super::query::EntityQuery;
use super::traits::{EntityStore, StorageError, TransactionFn};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Connect with startup-mode retry and create the table if needed.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 20 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self { pool, is_sqlite };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, name)
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                kind VARCHAR(191) NOT NULL,
                name VARCHAR(191) NOT NULL,
                version BIGINT NOT NULL,
                body LONGTEXT NOT NULL,
                PRIMARY KEY (kind, name)
            )
            "#
        };

        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    fn encode_body(entity: &Entity) -> Result<String, StorageError> {
        Ok(serde_json::to_string(&entity.properties)?)
    }

    fn decode_row(row: &AnyRow) -> Result<(Entity, i64), StorageError> {
        let kind = read_text(row, "kind")?;
        let name = read_text(row, "name")?;
        let version: i64 = row.try_get("version").map_err(backend)?;
        let body = read_text(row, "body")?;

        let properties: BTreeMap<String, Value> = serde_json::from_str(&body)?;
        let mut entity = Entity::new(Key::new(kind, name));
        entity.properties = properties;
        Ok((entity, version))
    }

    async fn read_versioned(&self, key: &Key) -> Result<Option<(Entity, i64)>, StorageError> {
        let row = sqlx::query("SELECT kind, name, version, body FROM entities WHERE kind = ? AND name = ?")
            .bind(&key.kind)
            .bind(&key.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(Self::decode_row).transpose()
    }

    /// Write `entity` only if the stored version still equals `read_version`
    /// (`None` meaning the row must not exist yet).
    async fn commit(&self, entity: &Entity, read_version: Option<i64>) -> Result<(), StorageError> {
        let body = Self::encode_body(entity)?;

        let result = match read_version {
            Some(version) => sqlx::query(
                "UPDATE entities SET version = version + 1, body = ? WHERE kind = ? AND name = ? AND version = ?",
            )
            .bind(body)
            .bind(&entity.key.kind)
            .bind(&entity.key.name)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(backend)?,
            None => {
                let sql = if self.is_sqlite {
                    "INSERT INTO entities (kind, name, version, body) VALUES (?, ?, 1, ?) ON CONFLICT (kind, name) DO NOTHING"
                } else {
                    "INSERT IGNORE INTO entities (kind, name, version, body) VALUES (?, ?, 1, ?)"
                };
                sqlx::query(sql)
                    .bind(&entity.key.kind)
                    .bind(&entity.key.name)
                    .bind(body)
                    .execute(&self.pool)
                    .await
                    .map_err(backend)?
            }
        };

        if result.rows_affected() == 0 {
            debug!(key = %entity.key, "Transaction conflict");
            return Err(StorageError::TransactionFailed {
                key: entity.key.to_string(),
                reason: "concurrent modification".into(),
            });
        }
        Ok(())
    }
}

/// TEXT columns come back as `String` on SQLite and as bytes on MySQL.
fn read_text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    row.try_get::<String, _>(column)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .ok_or_else(|| StorageError::Backend(format!("column '{}' is not text", column)))
}

#[async_trait]
impl EntityStore for SqlStore {
    async fn get(&self, key: &Key) -> Result<Option<Entity>, StorageError> {
        Ok(self.read_versioned(key).await?.map(|(entity, _)| entity))
    }

    async fn put(&self, entity: &Entity) -> Result<Key, StorageError> {
        let body = Self::encode_body(entity)?;
        let sql = if self.is_sqlite {
            "INSERT INTO entities (kind, name, version, body) VALUES (?, ?, 1, ?) \
             ON CONFLICT (kind, name) DO UPDATE SET version = entities.version + 1, body = excluded.body"
        } else {
            "INSERT INTO entities (kind, name, version, body) VALUES (?, ?, 1, ?) \
             ON DUPLICATE KEY UPDATE version = version + 1, body = VALUES(body)"
        };

        sqlx::query(sql)
            .bind(&entity.key.kind)
            .bind(&entity.key.name)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(entity.key.clone())
    }

    async fn delete(&self, key: &Key) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM entities WHERE kind = ? AND name = ?")
            .bind(&key.kind)
            .bind(&key.name)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, mutate), fields(key = %key))]
    async fn run_in_transaction(
        &self,
        key: &Key,
        mutate: &TransactionFn,
    ) -> Result<Entity, StorageError> {
        let (current, read_version) = match self.read_versioned(key).await? {
            Some((entity, version)) => (Some(entity), Some(version)),
            None => (None, None),
        };

        let mut next = mutate(current);
        next.key = key.clone();

        self.commit(&next, read_version).await?;
        Ok(next)
    }

    #[tracing::instrument(skip(self, query), fields(kind = %query.kind))]
    async fn fetch(
        &self,
        query: &EntityQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Entity>, StorageError> {
        let rows = sqlx::query("SELECT kind, name, version, body FROM entities WHERE kind = ?")
            .bind(&query.kind)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let candidates = rows
            .iter()
            .map(|row| Self::decode_row(row).map(|(entity, _)| entity))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(query.evaluate(candidates, limit, offset))
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Versioned wire format of a cached list.
//!
//! ```json
//! {
//!   "format_version": 2,
//!   "kind": "Tag",
//!   "generation": 4711,
//!   "records": [
//!     {"key": "Tag:rust", "fields": {"name": "rust", "count": 12}}
//!   ]
//! }
//! ```
//!
//! Anything that does not decode cleanly, carries another version, or
//! belongs to another kind is rejected and treated as a cache miss. The
//! `generation` is the kind's `Gen_{kind}` value read before the rows were
//! fetched; a snapshot is only served while that generation is current.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 2;

/// Flat, JSON-ready projection of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedRecord {
    /// `"kind:name"` of the source entity
    pub key: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl ProjectedRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unsupported snapshot format version {0}")]
    UnsupportedVersion(u32),
    #[error("Snapshot is for kind '{found}', expected '{expected}'")]
    KindMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSnapshot {
    pub format_version: u32,
    pub kind: String,
    pub generation: u64,
    pub records: Vec<ProjectedRecord>,
}

impl ListSnapshot {
    pub fn new(kind: impl Into<String>, generation: u64, records: Vec<ProjectedRecord>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            kind: kind.into(),
            generation,
            records,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a snapshot of `expected_kind`.
    pub fn decode(bytes: &[u8], expected_kind: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_slice(bytes)?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.format_version));
        }
        if snapshot.kind != expected_kind {
            return Err(SnapshotError::KindMismatch {
                expected: expected_kind.to_string(),
                found: snapshot.kind,
            });
        }
        Ok(snapshot)
    }
}

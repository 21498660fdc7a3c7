// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Searchable kinds and the on-write index hook.
//!
//! A kind registered here gets its hidden token property rebuilt from
//! scratch every time one of its entities is written:
//!
//! ```text
//! Article { title: "Sharded Counters", tags: ["datastore"], num_comments: 4 }
//!   → __searchable_text_index = ["counters", "datastore", "sharded"]
//! ```
//!
//! Only `Str`/`Text` values and lists made entirely of them are indexed.
//! Numbers, bytes, keys and timestamps are skipped without complaint.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::entity::{Entity, Value};
use super::tokenizer::tokenize;

/// Hidden multi-valued property holding an entity's token set.
pub const INDEX_PROPERTY: &str = "__searchable_text_index";

/// Indexing rules for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchableKind {
    pub kind: String,
    /// String properties left out of the index.
    pub unsearchable: HashSet<String>,
}

impl SearchableKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            unsearchable: HashSet::new(),
        }
    }

    /// Exclude properties from indexing
    pub fn unsearchable<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unsearchable.extend(properties.into_iter().map(Into::into));
        self
    }

    fn indexes(&self, property: &str) -> bool {
        property != INDEX_PROPERTY && !self.unsearchable.contains(property)
    }

    /// Token set of every eligible property of `entity`.
    pub fn tokens(&self, entity: &Entity) -> BTreeSet<String> {
        let mut tokens = BTreeSet::new();
        for (name, value) in &entity.properties {
            if !self.indexes(name) {
                continue;
            }
            for text in searchable_strings(value) {
                tokens.extend(tokenize(text));
            }
        }
        tokens
    }

    /// Replace the entity's hidden token property with a fresh one.
    ///
    /// The property is omitted entirely when there are no tokens.
    pub fn index_entity(&self, entity: &mut Entity) -> usize {
        entity.remove(INDEX_PROPERTY);
        let tokens = self.tokens(entity);
        let count = tokens.len();
        if count > 0 {
            let values = tokens.into_iter().map(Value::Str).collect();
            entity.set(INDEX_PROPERTY, Value::List(values));
        }
        debug!(key = %entity.key, tokens = count, "Indexed entity");
        count
    }
}

/// Plain string values, or every element of a list made only of strings.
fn searchable_strings(value: &Value) -> Vec<&str> {
    match value {
        Value::Str(s) | Value::Text(s) => vec![s.as_str()],
        Value::List(items) => items
            .iter()
            .map(Value::as_str)
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Registry of searchable kinds.
#[derive(Debug, Default)]
pub struct SearchIndexer {
    kinds: HashMap<String, SearchableKind>,
}

impl SearchIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: SearchableKind) {
        self.kinds.insert(kind.kind.clone(), kind);
    }

    pub fn is_searchable(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Rebuild the token property if the entity's kind is searchable.
    pub fn index(&self, entity: &mut Entity) -> Option<usize> {
        let kind = self.kinds.get(entity.kind())?;
        Some(kind.index_entity(entity))
    }
}

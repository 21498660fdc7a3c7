// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full-text search over ordinary entity properties.
//!
//! # Architecture
//!
//! ```text
//! write path:  Entity ──→ SearchIndexer ──→ __searchable_text_index = tokens
//!                               │
//!                           tokenize()
//!                               │
//! read path:   QueryBuilder.search(text) ──→ one `= token` filter per token
//! ```
//!
//! There is no ranking, phrase matching, stemming or partial-term matching.
//! A result matches when its token set contains every query token.
//!
//! # Registration
//!
//! ```rust
//! use datastore_ext::search::{SearchIndexer, SearchableKind};
//!
//! let mut indexer = SearchIndexer::new();
//! indexer.register(
//!     SearchableKind::new("Article")
//!         .unsearchable(["permalink", "legacy_id", "article_type", "excerpt", "html", "format"]),
//! );
//! assert!(indexer.is_searchable("Article"));
//! ```

mod index_manager;
mod query_builder;
mod search_cache;
pub mod tokenizer;

use thiserror::Error;

pub use index_manager::{SearchIndexer, SearchableKind, INDEX_PROPERTY};
pub use query_builder::{QueryBuilder, SearchQuery};
pub use search_cache::{SearchCache, SearchCacheStats};
pub use tokenizer::{tokenize, tokens_to_string};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The hidden index property may only be filtered through `search()`.
    #[error("'{0}' is a reserved property name and cannot be filtered or sorted on directly")]
    ReservedProperty(String),
}

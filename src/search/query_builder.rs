// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query builder with full-text search.
//!
//! `search(text)` composes with ordinary filters and sort orders. The text
//! is tokenized when the query is turned into a store query, and each token
//! becomes an equality filter on the hidden index property. Equality on a
//! list property means membership and filters are conjunctive, so a match
//! is an entity whose token set contains every query token.
//!
//! # Example
//!
//! ```rust
//! use datastore_ext::search::QueryBuilder;
//! use datastore_ext::Value;
//!
//! let query = QueryBuilder::new("Article")
//!     .filter_eq("published", Value::Bool(true))
//!     .search("quick fox")
//!     .order_desc("published_at")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(query.to_entity_query().filters.len(), 3);
//! ```
//!
//! A search whose text reduces to no tokens (only stop words or very short
//! words) adds no filters and so matches like an unfiltered listing. This
//! is expected; [`SearchQuery::is_degenerate`] reports it.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::entity::Value;
use crate::storage::{EntityQuery, Filter, FilterOperator, SortDirection, SortOrder};
use super::index_manager::INDEX_PROPERTY;
use super::tokenizer::tokenize;
use super::QueryError;

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    kind: String,
    filters: Vec<Filter>,
    orders: Vec<SortOrder>,
    search_text: Option<String>,
}

impl QueryBuilder {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
            orders: Vec::new(),
            search_text: None,
        }
    }

    pub fn filter_eq(self, property: impl Into<String>, value: Value) -> Self {
        self.filter(property, FilterOperator::Equal, value)
    }

    pub fn filter(mut self, property: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        self.filters.push(Filter::new(property, operator, value));
        self
    }

    pub fn order_asc(mut self, property: impl Into<String>) -> Self {
        self.orders.push(SortOrder {
            property: property.into(),
            direction: SortDirection::Ascending,
        });
        self
    }

    pub fn order_desc(mut self, property: impl Into<String>) -> Self {
        self.orders.push(SortOrder {
            property: property.into(),
            direction: SortDirection::Descending,
        });
        self
    }

    /// Full-text search; replaces any earlier search text.
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }

    /// Fails if a filter or sort order names the hidden index property.
    pub fn build(self) -> Result<SearchQuery, QueryError> {
        let reserved = self
            .filters
            .iter()
            .map(|f| f.property.as_str())
            .chain(self.orders.iter().map(|o| o.property.as_str()))
            .any(|property| property == INDEX_PROPERTY);
        if reserved {
            return Err(QueryError::ReservedProperty(INDEX_PROPERTY.to_string()));
        }

        let mut base = EntityQuery::new(self.kind);
        base.filters = self.filters;
        base.orders = self.orders;
        Ok(SearchQuery {
            base,
            search_text: self.search_text,
        })
    }
}

/// A validated query, possibly carrying search text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    base: EntityQuery,
    search_text: Option<String>,
}

impl SearchQuery {
    pub fn kind(&self) -> &str {
        &self.base.kind
    }

    pub fn search_text(&self) -> Option<&str> {
        self.search_text.as_deref()
    }

    /// Tokens the search text contributes as filters.
    pub fn search_terms(&self) -> BTreeSet<String> {
        self.search_text.as_deref().map(tokenize).unwrap_or_default()
    }

    /// Search text was given but contributes no filters.
    pub fn is_degenerate(&self) -> bool {
        self.search_text.is_some() && self.search_terms().is_empty()
    }

    /// Store query with one membership filter per search token.
    pub fn to_entity_query(&self) -> EntityQuery {
        self.search_terms()
            .into_iter()
            .fold(self.base.clone(), |query, token| {
                query.filter_eq(INDEX_PROPERTY, Value::Str(token))
            })
    }

    /// Stable identity of the store query this resolves to.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        format!("{:?}", self.to_entity_query()).hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_filters(query: &EntityQuery) -> Vec<String> {
        query
            .filters
            .iter()
            .filter(|f| f.property == INDEX_PROPERTY)
            .filter_map(|f| f.value.as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_search_adds_one_filter_per_token() {
        let query = QueryBuilder::new("Article").search("Quick quick FOX!").build().unwrap();
        let store_query = query.to_entity_query();
        assert_eq!(index_filters(&store_query), vec!["fox", "quick"]);
        assert!(store_query
            .filters
            .iter()
            .all(|f| f.operator == FilterOperator::Equal));
    }

    #[test]
    fn test_search_composes_with_filters_and_orders() {
        let query = QueryBuilder::new("Article")
            .filter("num_comments", FilterOperator::GreaterThan, Value::Int(2))
            .order_asc("title")
            .search("datastore")
            .build()
            .unwrap();
        let store_query = query.to_entity_query();
        assert_eq!(store_query.kind, "Article");
        assert_eq!(store_query.filters.len(), 2);
        assert_eq!(store_query.orders.len(), 1);
    }

    #[test]
    fn test_stop_words_only_degenerates() {
        let query = QueryBuilder::new("Article").search("the").build().unwrap();
        assert!(query.is_degenerate());
        assert!(query.to_entity_query().filters.is_empty());
    }

    #[test]
    fn test_no_search_is_not_degenerate() {
        let query = QueryBuilder::new("Article").build().unwrap();
        assert!(!query.is_degenerate());
        assert_eq!(query.search_text(), None);
    }

    #[test]
    fn test_reserved_property_rejected_in_filter() {
        let err = QueryBuilder::new("Article")
            .filter_eq(INDEX_PROPERTY, Value::from("fox"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains(INDEX_PROPERTY));
    }

    #[test]
    fn test_reserved_property_rejected_in_order() {
        let result = QueryBuilder::new("Article").order_desc(INDEX_PROPERTY).build();
        assert!(matches!(result, Err(QueryError::ReservedProperty(_))));
    }

    #[test]
    fn test_fingerprint_tracks_tokens_not_spelling() {
        let a = QueryBuilder::new("Article").search("Quick, Fox").build().unwrap();
        let b = QueryBuilder::new("Article").search("fox quick the").build().unwrap();
        let c = QueryBuilder::new("Article").search("fox").build().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}

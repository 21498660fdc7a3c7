// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store-level query model and the in-process evaluator shared by every
//! [`EntityStore`](super::EntityStore) implementation.
//!
//! Semantics follow the key-value store being modelled:
//! - equality against a list property matches if any element is equal
//! - range operators against a list match if any element satisfies them
//! - all filters are conjunctive
//! - natural order is key order; sort orders are applied on top
//! - `offset` then `limit` are applied last

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Value};

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl FilterOperator {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            FilterOperator::Equal => ordering == Ordering::Equal,
            FilterOperator::LessThan => ordering == Ordering::Less,
            FilterOperator::LessThanOrEqual => ordering != Ordering::Greater,
            FilterOperator::GreaterThan => ordering == Ordering::Greater,
            FilterOperator::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterOperator::Equal => write!(f, "="),
            FilterOperator::LessThan => write!(f, "<"),
            FilterOperator::LessThanOrEqual => write!(f, "<="),
            FilterOperator::GreaterThan => write!(f, ">"),
            FilterOperator::GreaterThanOrEqual => write!(f, ">="),
        }
    }
}

/// `property <op> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl Filter {
    pub fn new(property: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            property: property.into(),
            operator,
            value,
        }
    }

    pub fn eq(property: impl Into<String>, value: Value) -> Self {
        Self::new(property, FilterOperator::Equal, value)
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        match entity.get(&self.property) {
            None => false,
            Some(Value::List(items)) => items.iter().any(|item| self.matches_scalar(item)),
            Some(value) => self.matches_scalar(value),
        }
    }

    fn matches_scalar(&self, value: &Value) -> bool {
        value
            .compare(&self.value)
            .is_some_and(|ordering| self.operator.accepts(ordering))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub property: String,
    pub direction: SortDirection,
}

/// A query over one kind: conjunctive filters plus sort orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityQuery {
    pub kind: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub orders: Vec<SortOrder>,
}

impl EntityQuery {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
            orders: Vec::new(),
        }
    }

    /// Add an equality filter.
    #[must_use]
    pub fn filter_eq(mut self, property: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::eq(property, value));
        self
    }

    #[must_use]
    pub fn filter(mut self, property: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        self.filters.push(Filter::new(property, operator, value));
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        entity.kind() == self.kind && self.filters.iter().all(|f| f.matches(entity))
    }

    /// Filter, order and paginate a set of candidate entities.
    ///
    /// Candidates of other kinds are ignored.
    pub fn evaluate<I>(&self, candidates: I, limit: usize, offset: usize) -> Vec<Entity>
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut matched: Vec<Entity> = candidates
            .into_iter()
            .filter(|e| self.matches(e))
            .collect();

        matched.sort_by(|a, b| self.compare(a, b));
        matched.into_iter().skip(offset).take(limit).collect()
    }

    fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
        for order in &self.orders {
            let ordering = compare_property(a, b, &order.property);
            let ordering = match order.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.key.cmp(&b.key)
    }
}

/// Missing properties sort first.
fn compare_property(a: &Entity, b: &Entity, property: &str) -> Ordering {
    match (sort_value(a, property), sort_value(b, property)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => sort_order(x, y),
    }
}

/// Lists sort by their smallest element, as the store's index would.
fn sort_value<'a>(entity: &'a Entity, property: &str) -> Option<&'a Value> {
    match entity.get(property)? {
        Value::List(items) => items.iter().min_by(|x, y| sort_order(x, y)),
        value => Some(value),
    }
}

/// Total order used for sorting.
///
/// A property may hold values of different types on different entities, so
/// values group by type family first:
/// null < bool < number < timestamp < string < bytes < key < list.
/// Ints and floats share the number family and interleave by magnitude,
/// NaN sorting above every other number.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    let family = family_rank(a).cmp(&family_rank(b));
    if family != Ordering::Equal {
        return family;
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Key(x), Value::Key(y)) => x.cmp(y),
        (Value::List(x), Value::List(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| sort_order(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => number_order(a, b),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

fn family_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::Timestamp(_) => 3,
        Value::Str(_) | Value::Text(_) => 4,
        Value::Bytes(_) => 5,
        Value::Key(_) => 6,
        Value::List(_) => 7,
    }
}

/// Orders by `(magnitude, int before float, exact int)`; the exact int
/// breaks ties between large ints that round to the same `f64`.
fn number_order(a: &Value, b: &Value) -> Ordering {
    fn parts(value: &Value) -> (f64, u8, i64) {
        match value {
            Value::Int(i) => (*i as f64, 0, *i),
            Value::Float(f) => (*f, 1, 0),
            _ => (0.0, 2, 0),
        }
    }
    let (xf, xt, xi) = parts(a);
    let (yf, yt, yi) = parts(b);
    xf.total_cmp(&yf).then(xt.cmp(&yt)).then(xi.cmp(&yi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Key;

    fn article(name: &str, comments: i64, tags: Vec<&str>) -> Entity {
        Entity::new(Key::new("Article", name))
            .with("num_comments", Value::Int(comments))
            .with("tags", Value::from(tags))
    }

    #[test]
    fn test_equality_on_list_is_membership() {
        let e = article("a", 1, vec!["rust", "db"]);
        assert!(Filter::eq("tags", Value::from("rust")).matches(&e));
        assert!(!Filter::eq("tags", Value::from("go")).matches(&e));
    }

    #[test]
    fn test_missing_property_never_matches() {
        let e = article("a", 1, vec![]);
        assert!(!Filter::eq("title", Value::from("x")).matches(&e));
    }

    #[test]
    fn test_range_filters() {
        let e = article("a", 5, vec![]);
        assert!(Filter::new("num_comments", FilterOperator::GreaterThan, Value::Int(4)).matches(&e));
        assert!(Filter::new("num_comments", FilterOperator::LessThanOrEqual, Value::Int(5)).matches(&e));
        assert!(!Filter::new("num_comments", FilterOperator::LessThan, Value::Int(5)).matches(&e));
    }

    #[test]
    fn test_type_mismatch_never_matches() {
        let e = article("a", 5, vec![]);
        assert!(!Filter::eq("num_comments", Value::from("5")).matches(&e));
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let e = article("a", 1, vec!["rust", "db"]);
        let q = EntityQuery::new("Article")
            .filter_eq("tags", Value::from("rust"))
            .filter_eq("tags", Value::from("db"));
        assert!(q.matches(&e));

        let q = q.filter_eq("tags", Value::from("go"));
        assert!(!q.matches(&e));
    }

    #[test]
    fn test_kind_must_match() {
        let e = article("a", 1, vec![]);
        assert!(!EntityQuery::new("Comment").matches(&e));
    }

    #[test]
    fn test_natural_order_is_key_order_and_pagination() {
        let candidates = vec![
            article("c", 1, vec![]),
            article("a", 1, vec![]),
            article("b", 1, vec![]),
        ];
        let q = EntityQuery::new("Article");
        let page = q.evaluate(candidates, 2, 1);
        let names: Vec<_> = page.iter().map(|e| e.key.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_sort_descending() {
        let candidates = vec![
            article("a", 1, vec![]),
            article("b", 9, vec![]),
            article("c", 5, vec![]),
        ];
        let mut q = EntityQuery::new("Article");
        q.orders.push(SortOrder {
            property: "num_comments".into(),
            direction: SortDirection::Descending,
        });
        let names: Vec<_> = q
            .evaluate(candidates, 10, 0)
            .into_iter()
            .map(|e| e.key.name)
            .collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    fn ranked(name: &str, rank: Value) -> Entity {
        Entity::new(Key::new("Post", name)).with("rank", rank)
    }

    #[test]
    fn test_sort_over_mixed_types_groups_by_family() {
        let candidates = vec![
            ranked("a", Value::from("beta")),
            ranked("b", Value::Int(3)),
            ranked("c", Value::Float(f64::NAN)),
            ranked("d", Value::Bool(true)),
            ranked("e", Value::Float(1.5)),
            ranked("f", Value::from("alpha")),
            ranked("g", Value::Int(-2)),
            ranked("h", Value::Null),
            Entity::new(Key::new("Post", "i")),
        ];
        let mut q = EntityQuery::new("Post");
        q.orders.push(SortOrder {
            property: "rank".into(),
            direction: SortDirection::Ascending,
        });
        let names: Vec<_> = q
            .evaluate(candidates, 20, 0)
            .into_iter()
            .map(|e| e.key.name)
            .collect();
        assert_eq!(names, vec!["i", "h", "d", "g", "e", "b", "c", "f", "a"]);
    }

    #[test]
    fn test_sort_order_is_total_on_numbers() {
        let big = 1i64 << 53;
        let values = [
            Value::Int(big + 1),
            Value::Float(big as f64),
            Value::Int(big),
            Value::Float(f64::NAN),
            Value::Float(-0.0),
            Value::Int(0),
            Value::Float(0.0),
        ];
        for x in &values {
            assert_eq!(sort_order(x, x), Ordering::Equal);
            for y in &values {
                assert_eq!(sort_order(x, y), sort_order(y, x).reverse());
                for z in &values {
                    if sort_order(x, y).is_le() && sort_order(y, z).is_le() {
                        assert!(sort_order(x, z).is_le(), "{:?} <= {:?} <= {:?}", x, y, z);
                    }
                }
            }
        }
        assert_eq!(sort_order(&Value::Int(big), &Value::Int(big + 1)), Ordering::Less);
    }

    #[test]
    fn test_list_sorts_by_smallest_element_across_types() {
        let candidates = vec![
            ranked("a", Value::List(vec![Value::from("x"), Value::Int(9)])),
            ranked("b", Value::List(vec![Value::Int(4), Value::Int(2)])),
        ];
        let mut q = EntityQuery::new("Post");
        q.orders.push(SortOrder {
            property: "rank".into(),
            direction: SortDirection::Ascending,
        });
        let names: Vec<_> = q
            .evaluate(candidates, 10, 0)
            .into_iter()
            .map(|e| e.key.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}

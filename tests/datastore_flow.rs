// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end flows through the `Datastore` facade on a SQLite store.
//!
//! Run with: `cargo test --test datastore_flow`

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use datastore_ext::list_cache::{EntityProjection, WithCounter};
use datastore_ext::search::{SearchableKind, INDEX_PROPERTY};
use datastore_ext::storage::{EntityStore, InMemoryCache, SqlStore, VolatileCache};
use datastore_ext::{Datastore, DatastoreConfig, Entity, Key, QueryBuilder, QueryError, RequestTimings, Value};

struct Blog {
    _dir: TempDir,
    store: Arc<SqlStore>,
    cache: Arc<InMemoryCache>,
    ds: Datastore,
}

async fn blog() -> Blog {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("blog.db").display());
    let store = Arc::new(SqlStore::new(&url).await.unwrap());
    let cache = Arc::new(InMemoryCache::new());

    let mut ds = Datastore::new(DatastoreConfig::default(), store.clone(), cache.clone());
    ds.register_searchable(
        SearchableKind::new("Article").unsearchable(["permalink", "html", "format", "article_type"]),
    );
    let tags = WithCounter::new(EntityProjection::all().with_key_name("name"), ds.counter(), "Tag");
    ds.register_list("Tag", tags);
    ds.register_list("Article", EntityProjection::all().exclude(["html", "body"]));

    Blog {
        _dir: dir,
        store,
        cache,
        ds,
    }
}

fn article(permalink: &str, title: &str, body: &str, tags: Vec<&str>) -> Entity {
    Entity::new(Key::new("Article", permalink))
        .with("title", Value::from(title))
        .with("body", Value::Text(body.to_string()))
        .with("permalink", Value::from(permalink))
        .with("tags", Value::from(tags))
        .with("published", Value::Timestamp(1_234_567_890_000))
}

/// Publishing bumps each tag's counter, as the blog's article handler does.
async fn publish(blog: &Blog, entity: Entity) {
    let tags: Vec<String> = match entity.get("tags") {
        Some(Value::List(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    };
    blog.ds.put(entity).await.unwrap();
    for tag in tags {
        blog.ds
            .get_or_insert(&Key::new("Tag", tag.as_str()), Entity::new(Key::new("Tag", tag.as_str())))
            .await
            .unwrap();
        assert!(blog.ds.counter().increment(&format!("Tag{}", tag)).await.applied);
    }
}

fn names(entities: &[Entity]) -> Vec<&str> {
    entities.iter().map(|e| e.key.name.as_str()).collect()
}

#[tokio::test]
async fn publish_search_and_list() {
    let blog = blog().await;
    publish(
        &blog,
        article("sharded-counters", "Sharded Counters", "Spreading writes across shards.", vec!["datastore", "rust"]),
    )
    .await;
    publish(
        &blog,
        article("full-text", "Full Text Search", "Tokens stored on every entity.", vec!["search", "rust"]),
    )
    .await;

    // The permalink is unsearchable, the body and tags are not
    let stored = blog.store.get(&Key::new("Article", "full-text")).await.unwrap().unwrap();
    let Some(Value::List(tokens)) = stored.get(INDEX_PROPERTY) else {
        panic!("missing index property");
    };
    assert!(tokens.contains(&Value::from("tokens")));
    assert!(tokens.contains(&Value::from("rust")));

    let query = QueryBuilder::new("Article").search("RUST shards").build().unwrap();
    assert_eq!(names(&blog.ds.query(&query, 10, 0).await.unwrap().entities), vec!["sharded-counters"]);

    let query = QueryBuilder::new("Article").search("rust").order_asc("title").build().unwrap();
    assert_eq!(
        names(&blog.ds.query(&query, 10, 0).await.unwrap().entities),
        vec!["full-text", "sharded-counters"]
    );

    let tags = blog.ds.list("Tag", false).await.unwrap();
    let counts: Vec<_> = tags.iter().map(|r| (r.get("name").cloned(), r.get("count").cloned())).collect();
    assert_eq!(
        counts,
        vec![
            (Some(json!("datastore")), Some(json!(1))),
            (Some(json!("rust")), Some(json!(2))),
            (Some(json!("search")), Some(json!(1))),
        ]
    );

    let articles = blog.ds.list("Article", false).await.unwrap();
    assert_eq!(articles[0].get("published"), Some(&json!("2009-02-13 23:31:30")));
    assert_eq!(articles[0].get("body"), None);
    assert_eq!(articles[0].get(INDEX_PROPERTY), None);
}

#[tokio::test]
async fn edits_invalidate_listing_and_search() {
    let blog = blog().await;
    publish(&blog, article("draft", "First Draft", "Rough notes.", vec![])).await;

    let listed = blog.ds.list("Article", false).await.unwrap();
    assert_eq!(listed[0].get("title"), Some(&json!("First Draft")));
    let query = QueryBuilder::new("Article").search("draft").build().unwrap();
    assert_eq!(blog.ds.query(&query, 10, 0).await.unwrap().entities.len(), 1);

    blog.ds
        .put(article("draft", "Final Version", "Polished prose.", vec![]))
        .await
        .unwrap();

    let listed = blog.ds.list("Article", false).await.unwrap();
    assert_eq!(listed[0].get("title"), Some(&json!("Final Version")));
    let results = blog.ds.query(&query, 10, 0).await.unwrap();
    assert!(!results.cached);
    assert!(results.entities.is_empty());
}

#[tokio::test]
async fn deleting_a_tag_deletes_its_counter() {
    let blog = blog().await;
    publish(&blog, article("a", "Alpha", "One.", vec!["rust"])).await;
    publish(&blog, article("b", "Beta", "Two.", vec!["rust"])).await;
    assert_eq!(blog.ds.counter().get("Tagrust", true).await.unwrap(), 2);

    blog.ds.delete(&Key::new("Tag", "rust")).await.unwrap();
    assert!(blog.ds.list("Tag", false).await.unwrap().is_empty());
    assert_eq!(blog.ds.counter().get("Tagrust", true).await.unwrap(), 0);
}

#[tokio::test]
async fn stop_word_search_returns_everything() {
    let blog = blog().await;
    publish(&blog, article("a", "Alpha", "One.", vec![])).await;
    publish(&blog, article("b", "Beta", "Two.", vec![])).await;

    let query = QueryBuilder::new("Article").search("the of and").build().unwrap();
    let results = blog.ds.query(&query, 10, 0).await.unwrap();
    assert!(results.degenerate);
    assert_eq!(results.entities.len(), 2);
}

#[tokio::test]
async fn reserved_property_rejected() {
    let err = QueryBuilder::new("Article")
        .filter_eq(INDEX_PROPERTY, Value::from("rust"))
        .build()
        .unwrap_err();
    assert_eq!(err, QueryError::ReservedProperty(INDEX_PROPERTY.to_string()));
}

#[tokio::test]
async fn flush_rebuilds_everything_from_the_store() {
    let blog = blog().await;
    publish(&blog, article("a", "Alpha", "One.", vec!["rust"])).await;
    blog.ds.list("Tag", false).await.unwrap();

    blog.ds.flush_cache().await.unwrap();
    assert!(blog.cache.get("PS_Tag_ALL").await.unwrap().is_none());

    let tags = blog.ds.list("Tag", false).await.unwrap();
    assert_eq!(tags[0].get("count"), Some(&json!(1)));
    assert!(blog.ds.cache_stats().await.unwrap().cache.items >= 1);
}

#[tokio::test]
async fn request_timings_alongside_cached_reads() {
    let blog = blog().await;
    publish(&blog, article("a", "Alpha", "One.", vec!["rust"])).await;
    let timings = RequestTimings::new();

    for _ in 0..3 {
        let _run = timings.start("/tag/rust?page=1").unwrap();
        let key = datastore_ext::ListCache::cache_key("Tag");
        if blog.cache.get(&key).await.unwrap().is_none() {
            timings.record_full_render("/tag/rust");
        }
        blog.ds.list("Tag", false).await.unwrap();
    }

    let report = timings.report();
    assert_eq!(report.total_runs, 3);
    assert_eq!(report.paths[0].path, "/tag/rust");
    assert_eq!(report.total_full_renders, 1);
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Walkthrough of the datastore extensions on in-process backends.
//!
//! Run with: `cargo run --example blog_walkthrough`
//!
//! Set `SQL_URL` / `REDIS_URL` to run against real backends instead.

use datastore_ext::list_cache::{EntityProjection, WithCounter};
use datastore_ext::search::SearchableKind;
use datastore_ext::{Datastore, DatastoreConfig, Entity, Key, QueryBuilder, RequestTimings, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and connect
    // ─────────────────────────────────────────────────────────────────────────
    let config = DatastoreConfig {
        sql_url: std::env::var("SQL_URL").ok(),
        redis_url: std::env::var("REDIS_URL").ok(),
        redis_prefix: Some("blog:".into()),
        ..Default::default()
    };
    let mut datastore = Datastore::connect(config).await?;

    datastore.register_searchable(
        SearchableKind::new("Article").unsearchable(["permalink", "html", "format", "article_type"]),
    );
    let tags = WithCounter::new(EntityProjection::all().with_key_name("name"), datastore.counter(), "Tag");
    datastore.register_list("Tag", tags);
    let timings = RequestTimings::new();

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Publish a few articles, counting their tags
    // ─────────────────────────────────────────────────────────────────────────
    let articles = [
        ("sharded-counters", "Sharded Counters Under Load", vec!["datastore", "scaling"]),
        ("list-caching", "Caching Whole Listings", vec!["datastore", "caching"]),
        ("token-search", "Full Text Search Without a Search Engine", vec!["search"]),
    ];
    for (permalink, title, tags) in articles {
        let _run = timings.start("/admin/entry");
        let article = Entity::new(Key::new("Article", permalink))
            .with("title", Value::from(title))
            .with("permalink", Value::from(permalink))
            .with("tags", Value::from(tags.clone()));
        datastore.put(article).await?;

        for tag in tags {
            datastore
                .get_or_insert(&Key::new("Tag", tag), Entity::new(Key::new("Tag", tag)))
                .await?;
            let update = datastore.counter().increment(&format!("Tag{}", tag)).await;
            if !update.applied {
                println!("   tag counter {} gave up at {} shards", tag, update.shard_count);
            }
        }
        println!("Published {}", permalink);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Search
    // ─────────────────────────────────────────────────────────────────────────
    for text in ["datastore", "search engine", "the"] {
        let _run = timings.start("/search");
        let query = QueryBuilder::new("Article").search(text).build()?;
        let results = datastore.query(&query, 10, 0).await?;
        let found: Vec<_> = results.entities.iter().map(|e| e.key.name.as_str()).collect();
        println!(
            "search {:?}: {:?}{}",
            text,
            found,
            if results.degenerate { " (no indexable terms)" } else { "" }
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Tag cloud from the list cache
    // ─────────────────────────────────────────────────────────────────────────
    for _ in 0..2 {
        let _run = timings.start("/tags");
        for record in datastore.list("Tag", false).await? {
            let field = |name| record.get(name).cloned().unwrap_or_default();
            println!("   {} ({})", field("name"), field("count"));
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Reports
    // ─────────────────────────────────────────────────────────────────────────
    println!("\nCache: {}", serde_json::to_string_pretty(&datastore.cache_stats().await?)?);
    println!("Timings: {}", serde_json::to_string_pretty(&timings.report())?);

    Ok(())
}

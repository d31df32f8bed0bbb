use chrono::{Duration, Utc};

use super::support::{create_app, create_app_with, FakeCompletion};
use crate::ai::cache::{CacheEntry, CacheStore, SqliteCacheStore};
use crate::ai::AiError;
use crate::bookmarks::BookmarkCreate;
use crate::db::Database;

fn add(app: &crate::app::App, title: &str, url: &str, description: &str) -> u64 {
    app.bookmarks
        .create(BookmarkCreate {
            title: Some(title.to_string()),
            description: Some(description.to_string()),
            url: url.to_string(),
            ..Default::default()
        })
        .unwrap()
        .id
}

#[test]
pub fn test_tag_bookmark_uses_cache() {
    let (app, _tmp) = create_app();
    let backend = FakeCompletion::new("Rust, Systems Programming, rust");
    let app = app.with_completion(backend.clone());

    let id = add(&app, "The Rust Book", "https://doc.rust-lang.org/book", "");

    let first = app.tag_bookmark(id, false, true).unwrap();
    assert_eq!(first.tags, vec!["rust", "systems-programming"]);
    assert!(!first.applied);

    let second = app.tag_bookmark(id, false, true).unwrap();
    assert_eq!(second.tags, first.tags);
    assert_eq!(backend.calls(), 1);

    let stats = app.cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);

    // tags were not stored without --apply
    assert!(app.bookmark(id).unwrap().tags.is_empty());
}

#[test]
pub fn test_identical_content_shares_cached_tags() {
    let (app, _tmp) = create_app();
    let backend = FakeCompletion::new("rust");
    let app = app.with_completion(backend.clone());

    let a = add(&app, "Rust", "https://rust-lang.org", "home");
    let b = add(&app, "  RUST", "https://rust-lang.org", "Home  ");

    app.tag_bookmark(a, false, true).unwrap();
    assert_eq!(app.tag_bookmark(b, false, true).unwrap().tags, vec!["rust"]);
    assert_eq!(backend.calls(), 1);
}

#[test]
pub fn test_no_cache_bypasses_lookup() {
    let (app, _tmp) = create_app();
    let backend = FakeCompletion::new("rust");
    let app = app.with_completion(backend.clone());
    let id = add(&app, "Rust", "https://rust-lang.org", "");

    app.tag_bookmark(id, false, true).unwrap();
    app.tag_bookmark(id, false, false).unwrap();
    assert_eq!(backend.calls(), 2);
}

#[test]
pub fn test_cache_disabled_in_config() {
    let (app, _tmp) = create_app_with(|config| config.tagging.cache_enabled = false);
    let backend = FakeCompletion::new("rust");
    let app = app.with_completion(backend.clone());
    let id = add(&app, "Rust", "https://rust-lang.org", "");

    app.tag_bookmark(id, false, true).unwrap();
    app.tag_bookmark(id, false, true).unwrap();
    assert_eq!(backend.calls(), 2);
    assert!(!app.status().cache_enabled);
}

#[test]
pub fn test_apply_stores_tags() {
    let (app, _tmp) = create_app();
    let app = app.with_completion(FakeCompletion::new("web dev, javascript"));
    let id = add(&app, "MDN", "https://developer.mozilla.org", "Docs");

    let outcome = app.tag_bookmark(id, true, true).unwrap();
    assert!(outcome.applied);
    assert_eq!(
        app.bookmark(id).unwrap().tags,
        vec!["web-dev", "javascript"]
    );
}

#[test]
pub fn test_tag_unknown_bookmark() {
    let (app, _tmp) = create_app();
    let app = app.with_completion(FakeCompletion::new("rust"));
    assert!(matches!(
        app.tag_bookmark(404, false, true),
        Err(AiError::NotFound(404))
    ));
}

#[test]
pub fn test_unconfigured_backend_is_not_available() {
    let (app, _tmp) = create_app();
    let id = add(&app, "Rust", "https://rust-lang.org", "");

    assert!(matches!(
        app.tag_bookmark(id, false, true),
        Err(AiError::NotAvailable)
    ));
    assert!(matches!(
        app.describe_bookmark(id),
        Err(AiError::NotAvailable)
    ));

    let status = app.status();
    assert!(!status.backend.available);
    assert!(status.backend.mode.is_none());
    assert!(!status.purge_configured);
}

#[test]
pub fn test_cache_cleanup_uses_retention() {
    let (app, tmp) = create_app_with(|config| config.tagging.retention_days = 30);

    // a second connection to the same file, to plant an old entry
    let db = std::sync::Arc::new(Database::open(&tmp.path().join("bbai.db")).unwrap());
    let store = SqliteCacheStore::new(db);
    for (hash, age_days) in [("old", 45), ("recent", 10)] {
        store
            .upsert(&CacheEntry {
                content_hash: hash.to_string(),
                tags: vec!["x".to_string()],
                model_version: "m".to_string(),
                created_at: Utc::now() - Duration::days(age_days),
                used_count: 1,
            })
            .unwrap();
    }

    assert_eq!(app.cache_cleanup(None), 1);
    assert_eq!(app.cache_cleanup(Some(5)), 1);
    assert_eq!(app.cache_cleanup(None), 0);
}

#[test]
pub fn test_embed_search_and_similar() {
    let (app, _tmp) = create_app();
    let rust = add(&app, "Rust book", "https://doc.rust-lang.org", "");
    let async_rust = add(&app, "Async Rust", "https://rust-lang.github.io/async-book", "");
    let cooking = add(&app, "Cooking", "https://food.example.com", "recipes");

    let result = app.search.reindex(true).unwrap();
    assert_eq!(result.embedded, 3);
    assert_eq!(app.bookmark(rust).unwrap().embedding.map(|e| e.len()), Some(4));

    let found = app.search.search("learning rust", 10, None).unwrap();
    let ids = found.iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids, vec![rust, async_rust]);

    let similar = app.search.similar(cooking, 1).unwrap();
    assert_eq!(similar.len(), 1);
    assert!(similar[0].similarity < 0.1);

    // deleting a bookmark takes its embedding with it
    app.bookmarks.delete(rust).unwrap();
    let found = app.search.search("rust", 10, None).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, async_rust);
}

//! Integration tests for the ingestion-to-serving flow.
//!
//! These tests build a synthetic multi-source archive tree on disk, run the
//! scanner passes over it, and verify what the store, cache views, and page
//! assembly serve afterwards.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use feedvault::cache::{CacheService, SortOrder};
use feedvault::config::Config;
use feedvault::scanner::Scanner;
use feedvault::source::SourceKind;
use feedvault::store::Store;
use feedvault::views::Views;

fn archive_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.roots.x = dir.path().join("x");
    config.paths.roots.bsky = dir.path().join("bsky");
    config.paths.roots.reddit = dir.path().join("reddit");
    config.paths.roots.fa = dir.path().join("fa");
    config
}

fn write_json(path: &Path, value: &serde_json::Value) {
    fs::write(path, value.to_string()).unwrap();
}

/// An X account with two posts (one a reply), one media file, and a
/// Bluesky account with a quote post.
fn create_test_archive(dir: &TempDir) {
    let alice = dir.path().join("x/alice");
    fs::create_dir_all(&alice).unwrap();
    write_json(
        &alice.join("1846740334567001_1.json"),
        &serde_json::json!({
            "tweet_id": "1846740334567001",
            "content": "First post about rust archives",
            "author": {"name": "Alice", "nick": "Alice", "profile_image": "https://img/a.jpg"},
            "date": "2024-10-01 09:00:00",
            "favorite_count": 10,
            "retweet_count": 2,
            "reply_count": 1
        }),
    );
    write_json(
        &alice.join("1846740334567002_1.json"),
        &serde_json::json!({
            "tweet_id": "1846740334567002",
            "content": "Replying to bob about archives",
            "author": {"name": "Alice", "nick": "Alice", "profile_image": "https://img/a.jpg"},
            "date": "2024-10-02 09:00:00",
            "favorite_count": 3,
            "retweet_count": 0,
            "reply_count": 0,
            "reply_id": "1846740334560000",
            "reply_to": "Bob"
        }),
    );
    fs::write(alice.join("1846740334567001_1.mp4"), b"fake video").unwrap();

    let bsky = dir.path().join("bsky/alice.bsky.social");
    fs::create_dir_all(&bsky).unwrap();
    write_json(
        &bsky.join("2024-10-03T10-00-00_3kaaa111_text.json"),
        &serde_json::json!({
            "post_id": "3kaaa111",
            "text": "crossposting from the butterfly site",
            "author": {
                "handle": "alice.bsky.social",
                "displayName": "Alice",
                "did": "did:plc:alice1",
                "avatar": "https://img/a.jpg"
            },
            "user": {"banner": "https://img/b.jpg", "description": "hi"},
            "date": "2024-10-03 10:00:00",
            "likeCount": 7,
            "repostCount": 1,
            "replyCount": 0
        }),
    );

    let pics = dir.path().join("reddit/pics");
    fs::create_dir_all(&pics).unwrap();
    write_json(
        &pics.join("1abc2d.json"),
        &serde_json::json!({
            "id": "1abc2d",
            "title": "A mountain",
            "selftext": "",
            "subreddit": "pics",
            "created_utc": 1_700_000_000.0,
            "score": 900,
            "num_comments": 12,
            "author": "hiker42"
        }),
    );
    // Media whose post was never downloaded.
    fs::write(pics.join("zz9xy1_1.mp4"), b"fake video").unwrap();
}

fn scan_everything(store: &Store, config: &Config) {
    let scanner = Scanner::new(store, config).without_remote_metadata();
    for kind in [SourceKind::X, SourceKind::Bsky, SourceKind::Reddit] {
        scanner.scan_all(kind, None).unwrap();
    }
}

#[test]
fn full_ingestion_pipeline() {
    let dir = TempDir::new().unwrap();
    create_test_archive(&dir);
    let config = archive_config(&dir);
    let store = Store::open_memory().unwrap();

    scan_everything(&store, &config);

    // Users from all three sources.
    let alice = store.load_user("alice@x", true).unwrap().unwrap();
    assert_eq!(alice.nick, "Alice");
    let bsky_alice = store
        .load_user("alice.bsky.social@bsky", true)
        .unwrap()
        .unwrap();
    assert_eq!(bsky_alice.udid, "did:plc:alice1");
    let pics = store.load_user("pics@reddit", true).unwrap().unwrap();
    // Reddit user rows derive from the subreddit name, not the sidecar.
    assert_eq!(pics.user_name, "pics");
    assert!(pics.description.starts_with("Reddit subreddit pics."));

    // Posts landed with per-source semantics intact.
    let reply = store.load_post("1846740334567002", true).unwrap().unwrap();
    assert!(reply.is_reply);
    assert_eq!(reply.reply_to, "1846740334560000@bob");
    let reddit_post = store.load_post("1abc2d", true).unwrap().unwrap();
    assert_eq!(reddit_post.real_user, "hiker42");
    assert_eq!(reddit_post.likes, 900);

    // The orphan media synthesized its own post.
    let orphan_media = store.load_media("zz9xy1_1", true).unwrap().unwrap();
    let orphan_post = store.load_post(&orphan_media.post_id, true).unwrap().unwrap();
    assert_eq!(orphan_post.text_content, "zz9xy1_1.mp4");
    assert_eq!(
        orphan_post.url,
        "https://reddit.com/r/pics/comments/zz9xy1"
    );
}

#[test]
fn rescanning_is_idempotent() {
    let dir = TempDir::new().unwrap();
    create_test_archive(&dir);
    let config = archive_config(&dir);
    let store = Store::open_memory().unwrap();

    scan_everything(&store, &config);
    let before = store
        .query_rows(feedvault::store::Table::Posts, &[], false, None)
        .unwrap();
    let post_before = store.load_post("1846740334567001", true).unwrap().unwrap();

    scan_everything(&store, &config);
    let after = store
        .query_rows(feedvault::store::Table::Posts, &[], false, None)
        .unwrap();
    let post_after = store.load_post("1846740334567001", true).unwrap().unwrap();

    assert_eq!(before.len(), after.len());
    assert_eq!(post_before.text_content, post_after.text_content);
    assert_eq!(post_before.time, post_after.time);
    assert_eq!(post_before.likes, post_after.likes);
}

#[test]
fn cache_views_and_pages_serve_scanned_content() {
    let dir = TempDir::new().unwrap();
    create_test_archive(&dir);
    let config = archive_config(&dir);
    let store = Store::open_memory().unwrap();
    scan_everything(&store, &config);

    let cache = CacheService::new();
    cache.run_cycle(&store);
    assert!(!cache.is_dirty());

    let views = Views::new(&store, &cache, 30);
    let page = views.timeline(SortOrder::New, 0).unwrap();
    assert!(page.total >= 4);
    // Newest first across sources.
    let times: Vec<&str> = page.items.iter().map(|v| v.post.time.as_str()).collect();
    let mut sorted = times.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(times, sorted);

    // Text search spans sources and is cached per token set.
    let hits = store.query_posts_by_text("archives").unwrap();
    assert_eq!(hits.len(), 2);
    let hits = store.query_posts_by_text("butterfly site").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "3kaaa111");

    // Video search flows through the owning post's text.
    let media_hits = store.query_media_by_text("rust").unwrap();
    assert_eq!(media_hits, vec!["1846740334567001_1".to_string()]);
}

#[test]
fn favorites_survive_content_rescans() {
    let dir = TempDir::new().unwrap();
    create_test_archive(&dir);
    let config = archive_config(&dir);
    let store = Store::open_memory().unwrap();
    scan_everything(&store, &config);

    assert!(store.toggle_favorite("1abc2d").unwrap());
    scan_everything(&store, &config);
    assert!(store.is_favorite("1abc2d").unwrap());

    let cache = CacheService::new();
    cache.run_cycle(&store);
    let views = Views::new(&store, &cache, 30);
    let favorites = views.favorites(0).unwrap();
    assert_eq!(favorites.total, 1);
    assert_eq!(favorites.items[0].post.post_id, "1abc2d");
    assert!(favorites.items[0].fav);
}

#[test]
fn flagged_accounts_are_visible_after_rescan() {
    let dir = TempDir::new().unwrap();
    create_test_archive(&dir);
    let config = archive_config(&dir);
    let store = Store::open_memory().unwrap();
    scan_everything(&store, &config);

    store.flag_user("alice", SourceKind::X).unwrap();
    // A bulk rescan must not clear the flag: existing users are skipped.
    let scanner = Scanner::new(&store, &config).without_remote_metadata();
    scanner.scan_users(SourceKind::X, None).unwrap();
    assert!(store.load_user("alice@x", true).unwrap().unwrap().flagged);
}

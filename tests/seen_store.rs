// tests/seen_store.rs
//
// Persistence discipline of the dedup store: load-at-startup, flush-on-
// change, graceful degradation on a bad backing file.

use pain_listener::SeenStore;
use tempfile::tempdir;

#[test]
fn survives_restart_via_flush_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data").join("seen_posts.json");

    let first = SeenStore::load(&path, 100);
    assert!(first.is_empty());
    first.record("aaa");
    first.record("bbb");
    first.flush().unwrap();

    let second = SeenStore::load(&path, 100);
    assert_eq!(second.len(), 2);
    assert!(second.has("aaa"));
    assert!(second.has("bbb"));
    assert!(!second.has("ccc"));
}

#[test]
fn corrupt_snapshot_degrades_to_empty_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seen_posts.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = SeenStore::load(&path, 100);
    assert!(store.is_empty());

    // The degraded store still works and can overwrite the bad file.
    store.record("xyz");
    store.flush().unwrap();
    let reloaded = SeenStore::load(&path, 100);
    assert!(reloaded.has("xyz"));
}

#[test]
fn eviction_order_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seen_posts.json");

    let store = SeenStore::load(&path, 10);
    for i in 0..10 {
        store.record(&format!("id{i}"));
    }
    store.flush().unwrap();

    // Reload with a smaller ceiling: the oldest entries must go first.
    let shrunk = SeenStore::load(&path, 4);
    assert_eq!(shrunk.len(), 4);
    assert!(!shrunk.has("id0"));
    assert!(!shrunk.has("id5"));
    assert!(shrunk.has("id6"));
    assert!(shrunk.has("id9"));
}

#[test]
fn double_record_then_flush_stores_one_entry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seen_posts.json");

    let store = SeenStore::load(&path, 100);
    store.record("dup");
    store.record("dup");
    store.flush().unwrap();

    let reloaded = SeenStore::load(&path, 100);
    assert_eq!(reloaded.len(), 1);
}

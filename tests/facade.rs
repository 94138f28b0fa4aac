//! Integration tests for the `Cache` façade.

use hybrid_blob_cache::{Cache, CacheConfig, CacheMode};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Widget {
    name: String,
    count: u32,
}

fn open_cache(mode: CacheMode) -> (Cache, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::new(dir.path()).mode(mode);
    (Cache::open(config).unwrap(), dir)
}

#[test]
fn set_and_get_object_round_trips() {
    let (cache, _dir) = open_cache(CacheMode::Mix);
    let widget = Widget {
        name: "sprocket".into(),
        count: 3,
    };
    cache.set_object("w1", &widget, None).unwrap();

    assert!(cache.contains_object("w1"));
    let (loaded, extended): (Widget, _) = cache.object("w1").unwrap().unwrap();
    assert_eq!(loaded, widget);
    assert_eq!(extended, None);
}

#[test]
fn large_values_spill_to_external_file() {
    let (cache, dir) = open_cache(CacheMode::Mix);
    let big = "x".repeat(30_000);
    cache.set_object("big", &big, None).unwrap();

    let data_dir = dir.path().join("data");
    let has_blob = std::fs::read_dir(&data_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.path().is_file());
    assert!(has_blob);

    let (loaded, _): (String, _) = cache.object("big").unwrap().unwrap();
    assert_eq!(loaded, big);
}

#[test]
fn remove_object_and_remove_all_objects() {
    let (cache, _dir) = open_cache(CacheMode::Mix);
    cache.set_object("a", &1u32, None).unwrap();
    cache.set_object("b", &2u32, None).unwrap();

    cache.remove_object("a").unwrap();
    assert!(!cache.contains_object("a"));
    assert!(cache.contains_object("b"));

    cache.remove_all_objects().unwrap();
    assert!(!cache.contains_object("b"));
    assert_eq!(cache.total_count().unwrap(), 0);
}

#[test]
fn trim_to_count_enforces_limit() {
    let (cache, _dir) = open_cache(CacheMode::Mix);
    for i in 0..5 {
        cache.set_object(&format!("k{i}"), &i, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    cache.trim_to_count(2).unwrap();
    assert_eq!(cache.total_count().unwrap(), 2);
}

#[tokio::test]
async fn async_variants_match_sync_behavior() {
    let (cache, _dir) = open_cache(CacheMode::Mix);
    cache
        .set_object_async("k", 42u32, None)
        .await
        .unwrap();

    assert!(cache.contains_object_async("k").await);
    let (loaded, _): (u32, _) = cache.object_async("k").await.unwrap().unwrap();
    assert_eq!(loaded, 42);

    cache.remove_object_async("k").await.unwrap();
    assert!(!cache.contains_object_async("k").await);
}

#[tokio::test]
async fn auto_trim_task_can_be_shut_down() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::new(dir.path())
        .mode(CacheMode::Mix)
        .max_count(1)
        .trim_interval(std::time::Duration::from_millis(50));
    let cache = Cache::open(config).unwrap();

    cache.set_object("a", &1u32, None).unwrap();
    cache.set_object("b", &2u32, None).unwrap();

    let handle = cache.spawn_auto_trim();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    handle.shutdown();

    assert_eq!(cache.total_count().unwrap(), 1);
}

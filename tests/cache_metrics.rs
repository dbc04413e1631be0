use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use encore::application::pagination::PageParams;
use encore::cache::{
    CacheConfig, CacheLayer, Entity, KeyValueStore, ListFilters, MemoryStore, StoreError,
};
use metrics_util::debugging::DebuggingRecorder;

/// Reads miss and every write fails.
struct BrokenStore;

#[async_trait]
impl KeyValueStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::unavailable("connection reset"))
    }

    async fn set_with_expiry(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection reset"))
    }

    async fn scan(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::unavailable("connection reset"))
    }

    async fn bulk_delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Err(StoreError::unavailable("connection reset"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::unavailable("connection reset"))
    }

    fn backend(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let cache = CacheLayer::new(CacheConfig::in_memory(), Arc::new(MemoryStore::new()));
    let page = PageParams::new(1, 10).unwrap();
    let key = cache
        .keys()
        .list_key(Entity::Albums, page, &ListFilters::new(), None)
        .unwrap();

    for _ in 0..2 {
        let value: Vec<u32> = cache
            .reads()
            .read_through(Entity::Albums, &key, || async { Ok::<_, String>(vec![1, 2]) })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2]);
    }

    let report = cache
        .invalidator()
        .invalidate(Entity::Albums, None)
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);

    let broken = CacheLayer::new(CacheConfig::in_memory(), Arc::new(BrokenStore));
    let value: Vec<u32> = broken
        .reads()
        .read_through(Entity::Albums, &key, || async { Ok::<_, String>(vec![3]) })
        .await
        .unwrap();
    assert_eq!(value, vec![3]);
    broken.invalidator().album_written(1).await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "encore_cache_hit_total",
        "encore_cache_miss_total",
        "encore_cache_store_error_total",
        "encore_cache_invalidated_keys_total",
        "encore_cache_invalidate_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}

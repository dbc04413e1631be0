//! Read-through access to cached payloads.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::keys::{CacheKey, Entity};
use super::store::KeyValueStore;

const METRIC_CACHE_HIT: &str = "encore_cache_hit_total";
const METRIC_CACHE_MISS: &str = "encore_cache_miss_total";
const METRIC_CACHE_STORE_ERROR: &str = "encore_cache_store_error_total";

pub struct CacheAccessor {
    store: Arc<dyn KeyValueStore>,
    config: Arc<CacheConfig>,
}

impl CacheAccessor {
    pub fn new(store: Arc<dyn KeyValueStore>, config: Arc<CacheConfig>) -> Self {
        Self { store, config }
    }

    pub fn ttl_for(&self, entity: Entity) -> Duration {
        self.config.ttl_for(entity)
    }

    /// Returns the cached value under `key`, or computes it with `produce`
    /// and caches it for the entity's TTL.
    pub async fn read_through<T, E, F, Fut>(
        &self,
        entity: Entity,
        key: &CacheKey,
        produce: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ttl = self.ttl_for(entity);
        self.read_through_with_ttl(entity, key, ttl, produce).await
    }

    /// Store failures and undecodable payloads count as misses. Errors from
    /// `produce` are returned as-is and nothing is cached.
    pub async fn read_through_with_ttl<T, E, F, Fut>(
        &self,
        entity: Entity,
        key: &CacheKey,
        ttl: Duration,
        produce: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let label = entity.namespace();

        match self.store.get(key.as_str()).await {
            Ok(Some(payload)) => match serde_json::from_slice::<T>(&payload) {
                Ok(value) => {
                    counter!(METRIC_CACHE_HIT, "entity" => label).increment(1);
                    debug!(target: "encore::cache", entity = label, key = %key, "cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        target: "encore::cache",
                        entity = label,
                        key = %key,
                        error = %err,
                        "discarding undecodable cache payload"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                counter!(METRIC_CACHE_STORE_ERROR, "entity" => label, "op" => "get").increment(1);
                warn!(
                    target: "encore::cache",
                    entity = label,
                    key = %key,
                    error = %err,
                    "cache read failed; serving from the database"
                );
            }
        }

        counter!(METRIC_CACHE_MISS, "entity" => label).increment(1);
        let value = produce().await?;

        match serde_json::to_vec(&value) {
            Ok(payload) => self.populate(entity, key, payload, ttl).await,
            Err(err) => warn!(
                target: "encore::cache",
                entity = label,
                key = %key,
                error = %err,
                "cache payload could not be serialized"
            ),
        }

        Ok(value)
    }

    async fn populate(&self, entity: Entity, key: &CacheKey, payload: Vec<u8>, ttl: Duration) {
        let label = entity.namespace();
        let store = Arc::clone(&self.store);
        let owned_key = key.as_str().to_owned();

        // Spawned so a cancelled request still completes a write already issued.
        let write =
            tokio::spawn(async move { store.set_with_expiry(&owned_key, payload, ttl).await });

        match write.await {
            Ok(Ok(())) => {
                debug!(
                    target: "encore::cache",
                    entity = label,
                    key = %key,
                    ttl_secs = ttl.as_secs(),
                    "cache populated"
                );
            }
            Ok(Err(err)) => {
                counter!(METRIC_CACHE_STORE_ERROR, "entity" => label, "op" => "set").increment(1);
                warn!(
                    target: "encore::cache",
                    entity = label,
                    key = %key,
                    error = %err,
                    "cache write failed"
                );
            }
            Err(err) => {
                warn!(
                    target: "encore::cache",
                    entity = label,
                    key = %key,
                    error = %err,
                    "cache write task aborted"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::application::pagination::PageParams;
    use crate::cache::keys::{KeySchema, ListFilters};
    use crate::cache::memory::MemoryStore;

    fn accessor(store: Arc<MemoryStore>) -> CacheAccessor {
        CacheAccessor::new(store, Arc::new(CacheConfig::in_memory()))
    }

    fn blogs_key() -> CacheKey {
        KeySchema::default()
            .list_key(
                Entity::Blogs,
                PageParams::new(1, 10).unwrap(),
                &ListFilters::new(),
                None,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let store = Arc::new(MemoryStore::new());
        let accessor = accessor(store.clone());
        let calls = AtomicUsize::new(0);
        let key = blogs_key();

        for _ in 0..2 {
            let value: Vec<i64> = accessor
                .read_through(Entity::Blogs, &key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.contains(key.as_str()));
    }

    #[tokio::test]
    async fn producer_errors_propagate_and_are_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let accessor = accessor(store.clone());
        let key = blogs_key();

        let result: Result<Vec<i64>, &str> = accessor
            .read_through(Entity::Blogs, &key, || async { Err("database down") })
            .await;
        assert_eq!(result, Err("database down"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_is_treated_as_miss_and_overwritten() {
        let store = Arc::new(MemoryStore::new());
        let key = blogs_key();
        store.insert_raw(key.as_str(), b"not json".to_vec(), Duration::from_secs(60));
        let accessor = accessor(store.clone());

        let value: Vec<i64> = accessor
            .read_through(Entity::Blogs, &key, || async {
                Ok::<_, std::convert::Infallible>(vec![7])
            })
            .await
            .unwrap();
        assert_eq!(value, vec![7]);
        assert_eq!(
            store.get(key.as_str()).await.unwrap(),
            Some(b"[7]".to_vec())
        );
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        tokio::time::pause();
        let store = Arc::new(MemoryStore::new());
        let accessor = accessor(store);
        let key = blogs_key();
        let calls = AtomicUsize::new(0);
        let produce = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::convert::Infallible>(1_u8)
        };

        accessor
            .read_through_with_ttl(Entity::Blogs, &key, Duration::from_secs(5), produce)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        accessor
            .read_through_with_ttl(Entity::Blogs, &key, Duration::from_secs(5), produce)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

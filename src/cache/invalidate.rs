//! Pattern-based invalidation triggered by writes.
//!
//! Each invalidation resolves the patterns a write could have made stale,
//! scans the store for every match, and deletes the union in one call.
//! Every failure is logged and counted here. Writes call the per-entity
//! helpers after their transaction commits; those helpers swallow the error
//! so a committed mutation is never reported as failed because the cache was
//! unreachable.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::keys::{Entity, InvalidationPattern, KeySchema};
use super::store::{KeyValueStore, StoreError};
use crate::domain::entities::RecordId;

const METRIC_INVALIDATED_KEYS: &str = "encore_cache_invalidated_keys_total";
const METRIC_INVALIDATE_MS: &str = "encore_cache_invalidate_ms";
const METRIC_CACHE_STORE_ERROR: &str = "encore_cache_store_error_total";

/// Outcome of one invalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub patterns: Vec<String>,
    pub matched: usize,
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Record(Entity, Option<RecordId>),
    Namespace(Entity),
    Viewer(Entity, RecordId),
}

#[derive(Clone)]
pub struct Invalidator {
    store: Arc<dyn KeyValueStore>,
    schema: Arc<KeySchema>,
}

impl Invalidator {
    pub fn new(store: Arc<dyn KeyValueStore>, schema: Arc<KeySchema>) -> Self {
        Self { store, schema }
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Removes the entity's cached listings and, when `id` is given, the
    /// record's detail entries, together with the listings of every entity
    /// whose payloads embed this one. For owner-partitioned entities without
    /// a detail cache, `id` selects the owner's partition.
    #[instrument(skip(self))]
    pub async fn invalidate(
        &self,
        entity: Entity,
        id: Option<RecordId>,
    ) -> Result<InvalidationReport, StoreError> {
        self.apply(Target::Record(entity, id)).await
    }

    fn record_patterns(&self, entity: Entity, id: Option<RecordId>) -> Vec<InvalidationPattern> {
        let mut patterns = self.schema.invalidation_patterns(entity, id);
        for dependent in entity.dependents() {
            let pattern = self.schema.list_pattern(*dependent);
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        patterns
    }

    /// Removes every cached listing and detail entry of `entity`.
    #[instrument(skip(self))]
    pub async fn invalidate_all(&self, entity: Entity) -> Result<InvalidationReport, StoreError> {
        self.apply(Target::Namespace(entity)).await
    }

    async fn apply(&self, target: Target) -> Result<InvalidationReport, StoreError> {
        let (entity, patterns) = match target {
            Target::Record(entity, id) => (entity, self.record_patterns(entity, id)),
            Target::Namespace(entity) => {
                let mut patterns = vec![self.schema.list_pattern(entity)];
                if let Ok(details) = self.schema.detail_patterns(entity, None) {
                    patterns.extend(details);
                }
                (entity, patterns)
            }
            Target::Viewer(entity, viewer) => (
                entity,
                self.schema
                    .viewer_patterns(entity, viewer)
                    .unwrap_or_default(),
            ),
        };
        self.purge(entity, &patterns).await
    }

    async fn purge(
        &self,
        entity: Entity,
        patterns: &[InvalidationPattern],
    ) -> Result<InvalidationReport, StoreError> {
        let started_at = Instant::now();
        let label = entity.namespace();

        let (keys, deleted) = match self.scan_and_delete(patterns).await {
            Ok(outcome) => outcome,
            Err(err) => {
                counter!(METRIC_CACHE_STORE_ERROR, "entity" => label, "op" => "invalidate")
                    .increment(1);
                warn!(
                    target: "encore::cache",
                    entity = label,
                    patterns = ?patterns.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    error = %err,
                    "cache invalidation failed; entries will expire by TTL"
                );
                return Err(err);
            }
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        counter!(METRIC_INVALIDATED_KEYS, "entity" => label).increment(deleted);
        histogram!(METRIC_INVALIDATE_MS, "entity" => label).record(elapsed_ms);

        let report = InvalidationReport {
            patterns: patterns.iter().map(ToString::to_string).collect(),
            matched: keys.len(),
            deleted,
        };
        info!(
            target: "encore::cache",
            entity = label,
            patterns = ?report.patterns,
            matched = report.matched,
            deleted = report.deleted,
            elapsed_ms,
            "cache invalidated"
        );
        Ok(report)
    }

    async fn scan_and_delete(
        &self,
        patterns: &[InvalidationPattern],
    ) -> Result<(Vec<String>, u64), StoreError> {
        let mut matched = BTreeSet::new();
        for pattern in patterns {
            matched.extend(self.store.scan(pattern.as_str()).await?);
        }
        let keys: Vec<String> = matched.into_iter().collect();
        let deleted = if keys.is_empty() {
            0
        } else {
            self.store.bulk_delete(&keys).await?
        };
        Ok((keys, deleted))
    }

    /// Runs `targets` in order on a detached task and waits for it, so the
    /// deletes finish even if the calling request is dropped. A failed
    /// target does not stop the ones after it.
    async fn run_best_effort(&self, targets: Vec<Target>) {
        let this = self.clone();
        let task = tokio::spawn(async move {
            for target in targets {
                if this.apply(target).await.is_err() {
                    debug!(
                        target: "encore::cache",
                        scope = ?target,
                        "continuing after failed invalidation"
                    );
                }
            }
        });
        if let Err(err) = task.await {
            warn!(target: "encore::cache", error = %err, "cache invalidation task aborted");
        }
    }

    /// Best-effort [`Invalidator::invalidate`].
    pub async fn invalidate_best_effort(&self, entity: Entity, id: Option<RecordId>) {
        self.run_best_effort(vec![Target::Record(entity, id)]).await;
    }

    /// Best-effort [`Invalidator::invalidate_all`].
    pub async fn entity_reset(&self, entity: Entity) {
        self.run_best_effort(vec![Target::Namespace(entity)]).await;
    }

    pub async fn blog_written(&self, blog_id: RecordId) {
        self.invalidate_best_effort(Entity::Blogs, Some(blog_id)).await;
    }

    pub async fn journal_written(&self, journal_id: RecordId) {
        self.invalidate_best_effort(Entity::Journals, Some(journal_id))
            .await;
    }

    /// A track changed; album details embed track counts, so each album the
    /// track belonged to before or after the write is cleared too.
    pub async fn music_written(
        &self,
        music_id: RecordId,
        albums: impl IntoIterator<Item = RecordId>,
    ) {
        let mut targets = vec![Target::Record(Entity::Music, Some(music_id))];
        let albums: BTreeSet<RecordId> = albums.into_iter().collect();
        targets.extend(
            albums
                .into_iter()
                .map(|album| Target::Record(Entity::Albums, Some(album))),
        );
        self.run_best_effort(targets).await;
    }

    pub async fn album_written(&self, album_id: RecordId) {
        self.invalidate_best_effort(Entity::Albums, Some(album_id)).await;
    }

    pub async fn playlist_written(&self, playlist_id: RecordId) {
        self.invalidate_best_effort(Entity::Playlists, Some(playlist_id))
            .await;
    }

    /// `follower` started or stopped following `followed`. Followers-only
    /// posts change visibility for the follower, so their cached post views
    /// go as well.
    pub async fn follow_changed(&self, follower: RecordId, followed: RecordId) {
        self.run_best_effort(vec![
            Target::Record(Entity::Followers, Some(followed)),
            Target::Record(Entity::Following, Some(follower)),
            Target::Viewer(Entity::Posts, follower),
        ])
        .await;
    }

    pub async fn post_written(&self, post_id: RecordId) {
        self.invalidate_best_effort(Entity::Posts, Some(post_id)).await;
    }

    /// Clears the comment, every comment listing and the parent post, whose
    /// cached payloads carry a comment count.
    pub async fn comment_written(&self, comment_id: RecordId, post_id: RecordId) {
        self.run_best_effort(vec![
            Target::Record(Entity::Comments, Some(comment_id)),
            Target::Record(Entity::Posts, Some(post_id)),
        ])
        .await;
    }

    pub async fn reply_written(&self, reply_id: RecordId, comment_id: RecordId) {
        self.run_best_effort(vec![
            Target::Record(Entity::Replies, Some(reply_id)),
            Target::Record(Entity::Comments, Some(comment_id)),
        ])
        .await;
    }

    pub async fn notifications_changed(&self, recipient: RecordId) {
        self.invalidate_best_effort(Entity::Notifications, Some(recipient))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::pagination::PageParams;
    use crate::cache::keys::{CacheKey, ListFilters};
    use crate::cache::memory::MemoryStore;

    fn page(index: u32) -> PageParams {
        PageParams::new(index, 10).unwrap()
    }

    async fn seed(store: &MemoryStore, keys: &[CacheKey]) {
        for key in keys {
            store
                .set_with_expiry(key.as_str(), b"{}".to_vec(), Duration::from_secs(60))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn invalidate_removes_lists_and_record_details_only() {
        let store = Arc::new(MemoryStore::new());
        let schema = Arc::new(KeySchema::default());
        let filters = ListFilters::new().with("author", Some(1));

        let blog_pages = vec![
            schema.list_key(Entity::Blogs, page(1), &ListFilters::new(), None).unwrap(),
            schema.list_key(Entity::Blogs, page(2), &filters, None).unwrap(),
        ];
        let blog_5 = schema.detail_key(Entity::Blogs, 5, None).unwrap();
        let blog_6 = schema.detail_key(Entity::Blogs, 6, None).unwrap();
        let journal_page = schema
            .list_key(Entity::Journals, page(1), &ListFilters::new(), None)
            .unwrap();

        seed(&store, &blog_pages).await;
        seed(&store, &[blog_5.clone(), blog_6.clone(), journal_page.clone()]).await;

        let invalidator = Invalidator::new(store.clone(), schema);
        let report = invalidator.invalidate(Entity::Blogs, Some(5)).await.unwrap();

        assert_eq!(report.deleted, 3);
        assert_eq!(report.matched, 3);
        assert!(!store.contains(blog_5.as_str()));
        assert!(blog_pages.iter().all(|key| !store.contains(key.as_str())));
        assert!(store.contains(blog_6.as_str()));
        assert!(store.contains(journal_page.as_str()));
    }

    #[tokio::test]
    async fn zero_matches_is_not_an_error() {
        let invalidator = Invalidator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(KeySchema::default()),
        );
        let report = invalidator.invalidate(Entity::Music, None).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(
            report.patterns,
            vec![
                "encore:music:list:*".to_string(),
                "encore:albums:list:*".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn invalidating_a_track_clears_album_listings_too() {
        let store = Arc::new(MemoryStore::new());
        let schema = Arc::new(KeySchema::default());
        let track_7 = schema.detail_key(Entity::Music, 7, None).unwrap();
        let albums_page = schema
            .list_key(Entity::Albums, page(1), &ListFilters::new(), None)
            .unwrap();
        let album_2 = schema.detail_key(Entity::Albums, 2, None).unwrap();
        seed(&store, &[track_7.clone(), albums_page.clone(), album_2.clone()]).await;

        let report = Invalidator::new(store.clone(), schema)
            .invalidate(Entity::Music, Some(7))
            .await
            .unwrap();

        assert_eq!(report.deleted, 2);
        assert!(report.patterns.contains(&"encore:albums:list:*".to_string()));
        assert!(!store.contains(track_7.as_str()));
        assert!(!store.contains(albums_page.as_str()));
        assert!(store.contains(album_2.as_str()));
    }

    #[tokio::test]
    async fn follow_change_clears_both_partitions() {
        let store = Arc::new(MemoryStore::new());
        let schema = Arc::new(KeySchema::default());
        let none = ListFilters::new();
        let followers_of_2 = schema
            .scoped_list_key(Entity::Followers, 2, page(1), &none, None)
            .unwrap();
        let following_of_1 = schema
            .scoped_list_key(Entity::Following, 1, page(1), &none, None)
            .unwrap();
        let followers_of_3 = schema
            .scoped_list_key(Entity::Followers, 3, page(1), &none, None)
            .unwrap();
        seed(
            &store,
            &[
                followers_of_2.clone(),
                following_of_1.clone(),
                followers_of_3.clone(),
            ],
        )
        .await;

        Invalidator::new(store.clone(), schema)
            .follow_changed(1, 2)
            .await;

        assert!(!store.contains(followers_of_2.as_str()));
        assert!(!store.contains(following_of_1.as_str()));
        assert!(store.contains(followers_of_3.as_str()));
    }

    #[tokio::test]
    async fn music_write_clears_album_listings_and_touched_albums() {
        let store = Arc::new(MemoryStore::new());
        let schema = Arc::new(KeySchema::default());
        let albums_page = schema
            .list_key(Entity::Albums, page(1), &ListFilters::new(), None)
            .unwrap();
        let album_3 = schema.detail_key(Entity::Albums, 3, None).unwrap();
        let album_4 = schema.detail_key(Entity::Albums, 4, None).unwrap();
        seed(&store, &[albums_page.clone(), album_3.clone(), album_4.clone()]).await;

        Invalidator::new(store.clone(), schema)
            .music_written(10, [3])
            .await;

        assert!(!store.contains(albums_page.as_str()));
        assert!(!store.contains(album_3.as_str()));
        assert!(store.contains(album_4.as_str()));
    }

    struct FailingScanStore {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KeyValueStore for FailingScanStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
            self.calls.lock().unwrap().push(pattern.to_string());
            Err(StoreError::unavailable("connection refused"))
        }

        async fn bulk_delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn best_effort_helpers_swallow_store_failures() {
        let store = Arc::new(FailingScanStore {
            calls: Mutex::new(Vec::new()),
        });
        let invalidator = Invalidator::new(store.clone(), Arc::new(KeySchema::default()));

        assert!(invalidator.invalidate(Entity::Posts, Some(1)).await.is_err());
        invalidator.comment_written(4, 1).await;

        let calls = store.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "encore:posts:list:*".to_string(),
                "encore:comments:list:*".to_string(),
                "encore:posts:list:*".to_string(),
            ]
        );
    }
}

use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::application::access::require_actor;
use crate::application::error::ServiceError;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::repos::{MusicChanges, MusicFilter, MusicRepo, NewMusic};
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{MusicRecord, RecordId};
use crate::domain::validation::{
    NAME_MAX_CHARS, TITLE_MAX_CHARS, URL_MAX_CHARS, positive_duration, required_text,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMusicCommand {
    pub title: String,
    pub artist: String,
    pub album_id: Option<RecordId>,
    pub duration_secs: i32,
    pub audio_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMusicCommand {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_id: Option<RecordId>,
    pub duration_secs: Option<i32>,
    pub audio_url: Option<String>,
}

pub struct MusicService {
    repo: Arc<dyn MusicRepo>,
    cache: CacheLayer,
}

impl MusicService {
    pub fn new(repo: Arc<dyn MusicRepo>, cache: CacheLayer) -> Self {
        Self { repo, cache }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: PageParams,
        filter: MusicFilter,
    ) -> Result<PageEnvelope<MusicRecord>, ServiceError> {
        let filters = ListFilters::new()
            .with("album", filter.album)
            .with("artist", filter.artist.as_deref())
            .with("search", filter.search.as_deref());
        let key = self
            .cache
            .keys()
            .list_key(Entity::Music, page, &filters, None)?;

        self.cache
            .reads()
            .read_through(Entity::Music, &key, || async {
                let rows = self
                    .repo
                    .find_page(&filter, page.offset(), page.limit())
                    .await?;
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn detail(&self, id: RecordId) -> Result<MusicRecord, ServiceError> {
        let key = self.cache.keys().detail_key(Entity::Music, id, None)?;
        self.cache
            .reads()
            .read_through(Entity::Music, &key, || async {
                let music = self.repo.find_by_id(id).await?;
                music.ok_or_else(|| ServiceError::not_found("music"))
            })
            .await
    }

    #[instrument(skip(self, command))]
    pub async fn create(
        &self,
        viewer: Option<RecordId>,
        command: CreateMusicCommand,
    ) -> Result<MusicRecord, ServiceError> {
        require_actor(viewer)?;
        let music = NewMusic {
            title: required_text("title", &command.title, TITLE_MAX_CHARS)?,
            artist: required_text("artist", &command.artist, NAME_MAX_CHARS)?,
            album_id: command.album_id,
            duration_secs: positive_duration("durationSecs", command.duration_secs)?,
            audio_url: required_text("audioUrl", &command.audio_url, URL_MAX_CHARS)?,
        };

        let created = self.repo.create(music).await?;
        self.cache
            .invalidator()
            .music_written(created.id, created.album_id)
            .await;
        Ok(created)
    }

    #[instrument(skip(self, command))]
    pub async fn update(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
        command: UpdateMusicCommand,
    ) -> Result<MusicRecord, ServiceError> {
        require_actor(viewer)?;
        let previous_album = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("music"))?
            .album_id;

        let changes = MusicChanges {
            title: command
                .title
                .as_deref()
                .map(|title| required_text("title", title, TITLE_MAX_CHARS))
                .transpose()?,
            artist: command
                .artist
                .as_deref()
                .map(|artist| required_text("artist", artist, NAME_MAX_CHARS))
                .transpose()?,
            album_id: command.album_id,
            duration_secs: command
                .duration_secs
                .map(|secs| positive_duration("durationSecs", secs))
                .transpose()?,
            audio_url: command
                .audio_url
                .as_deref()
                .map(|url| required_text("audioUrl", url, URL_MAX_CHARS))
                .transpose()?,
        };

        let updated = self
            .repo
            .update(id, changes)
            .await?
            .ok_or_else(|| ServiceError::not_found("music"))?;
        let invalidator = self.cache.invalidator();
        invalidator
            .music_written(id, previous_album.into_iter().chain(updated.album_id))
            .await;
        // Playlist details embed their tracks.
        invalidator.entity_reset(Entity::Playlists).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        require_actor(viewer)?;
        let existing = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("music"))?;
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("music"));
        }
        let invalidator = self.cache.invalidator();
        invalidator.music_written(id, existing.album_id).await;
        invalidator.entity_reset(Entity::Playlists).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::OffsetDateTime;

    use super::*;
    use crate::application::repos::{RepoError, RowPage};

    #[derive(Default)]
    struct StubMusicRepo {
        tracks: Mutex<Vec<MusicRecord>>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl MusicRepo for StubMusicRepo {
        async fn find_page(
            &self,
            filter: &MusicFilter,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<MusicRecord>, RepoError> {
            let rows: Vec<_> = self
                .tracks
                .lock()
                .unwrap()
                .iter()
                .filter(|track| filter.album.is_none_or(|album| track.album_id == Some(album)))
                .cloned()
                .collect();
            let total = rows.len() as u64;
            Ok(RowPage::new(rows, total))
        }

        async fn find_by_id(&self, id: RecordId) -> Result<Option<MusicRecord>, RepoError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .tracks
                .lock()
                .unwrap()
                .iter()
                .find(|track| track.id == id)
                .cloned())
        }

        async fn create(&self, new: NewMusic) -> Result<MusicRecord, RepoError> {
            let mut tracks = self.tracks.lock().unwrap();
            let record = MusicRecord {
                id: tracks.len() as RecordId + 1,
                title: new.title,
                artist: new.artist,
                album_id: new.album_id,
                duration_secs: new.duration_secs,
                audio_url: new.audio_url,
                created_at: OffsetDateTime::UNIX_EPOCH,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            };
            tracks.push(record.clone());
            Ok(record)
        }

        async fn update(
            &self,
            id: RecordId,
            changes: MusicChanges,
        ) -> Result<Option<MusicRecord>, RepoError> {
            let mut tracks = self.tracks.lock().unwrap();
            let Some(track) = tracks.iter_mut().find(|track| track.id == id) else {
                return Ok(None);
            };
            if let Some(album_id) = changes.album_id {
                track.album_id = Some(album_id);
            }
            Ok(Some(track.clone()))
        }

        async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
            let mut tracks = self.tracks.lock().unwrap();
            let before = tracks.len();
            tracks.retain(|track| track.id != id);
            Ok(before != tracks.len())
        }
    }

    fn command(album_id: Option<RecordId>) -> CreateMusicCommand {
        CreateMusicCommand {
            title: "Song".to_string(),
            artist: "Band".to_string(),
            album_id,
            duration_secs: 200,
            audio_url: "https://cdn.example/song.mp3".to_string(),
        }
    }

    #[tokio::test]
    async fn moving_a_track_clears_both_album_details() {
        let cache = CacheLayer::in_memory();
        let service = MusicService::new(Arc::new(StubMusicRepo::default()), cache.clone());
        let track = service.create(Some(1), command(Some(1))).await.unwrap();

        let album_1 = cache.keys().detail_key(Entity::Albums, 1, None).unwrap();
        let album_2 = cache.keys().detail_key(Entity::Albums, 2, None).unwrap();
        let album_3 = cache.keys().detail_key(Entity::Albums, 3, None).unwrap();
        for key in [&album_1, &album_2, &album_3] {
            cache
                .store()
                .set_with_expiry(key.as_str(), b"{}".to_vec(), std::time::Duration::from_secs(60))
                .await
                .unwrap();
        }

        service
            .update(
                Some(1),
                track.id,
                UpdateMusicCommand {
                    album_id: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let store = cache.store();
        assert_eq!(store.get(album_1.as_str()).await.unwrap(), None);
        assert_eq!(store.get(album_2.as_str()).await.unwrap(), None);
        assert!(store.get(album_3.as_str()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn detail_is_served_from_cache_after_first_read() {
        let repo = Arc::new(StubMusicRepo::default());
        let service = MusicService::new(repo.clone(), CacheLayer::in_memory());
        let track = service.create(Some(1), command(None)).await.unwrap();

        service.detail(track.id).await.unwrap();
        service.detail(track.id).await.unwrap();
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_positive_durations_are_rejected() {
        let service = MusicService::new(Arc::new(StubMusicRepo::default()), CacheLayer::in_memory());
        let mut bad = command(None);
        bad.duration_secs = 0;
        assert!(service.create(Some(1), bad).await.is_err());
    }
}

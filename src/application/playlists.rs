use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::application::access::{ensure_owner, require_actor};
use crate::application::error::ServiceError;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::repos::{NewPlaylist, PlaylistChanges, PlaylistFilter, PlaylistsRepo};
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{PlaylistDetail, PlaylistRecord, RecordId};
use crate::domain::error::DomainError;
use crate::domain::validation::{BODY_MAX_CHARS, NAME_MAX_CHARS, optional_text, required_text};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlaylistCommand {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_public")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlaylistCommand {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTrackCommand {
    pub music_id: RecordId,
}

/// Playlists may be private to their owner, so cached payloads are keyed per
/// viewer.
pub struct PlaylistsService {
    repo: Arc<dyn PlaylistsRepo>,
    cache: CacheLayer,
}

impl PlaylistsService {
    pub fn new(repo: Arc<dyn PlaylistsRepo>, cache: CacheLayer) -> Self {
        Self { repo, cache }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        viewer: Option<RecordId>,
        page: PageParams,
        filter: PlaylistFilter,
    ) -> Result<PageEnvelope<PlaylistRecord>, ServiceError> {
        let filters = ListFilters::new()
            .with("owner", filter.owner)
            .with("search", filter.search.as_deref());
        let key = self
            .cache
            .keys()
            .list_key(Entity::Playlists, page, &filters, viewer)?;

        self.cache
            .reads()
            .read_through(Entity::Playlists, &key, || async {
                let rows = self
                    .repo
                    .find_page(&filter, viewer, page.offset(), page.limit())
                    .await?;
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn detail(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
    ) -> Result<PlaylistDetail, ServiceError> {
        let key = self
            .cache
            .keys()
            .detail_key(Entity::Playlists, id, viewer)?;
        self.cache
            .reads()
            .read_through(Entity::Playlists, &key, || async {
                let playlist = self
                    .repo
                    .find_by_id(id, viewer)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("playlist"))?;
                let tracks = self.repo.tracks(id).await?;
                Ok::<_, ServiceError>(PlaylistDetail { playlist, tracks })
            })
            .await
    }

    #[instrument(skip(self, command))]
    pub async fn create(
        &self,
        viewer: Option<RecordId>,
        command: CreatePlaylistCommand,
    ) -> Result<PlaylistRecord, ServiceError> {
        let owner_id = require_actor(viewer)?;
        let playlist = NewPlaylist {
            owner_id,
            name: required_text("name", &command.name, NAME_MAX_CHARS)?,
            description: optional_text(
                "description",
                command.description.as_deref(),
                BODY_MAX_CHARS,
            )?,
            is_public: command.is_public,
        };
        let created = self.repo.create(playlist).await?;
        self.cache.invalidator().playlist_written(created.id).await;
        Ok(created)
    }

    #[instrument(skip(self, command))]
    pub async fn update(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
        command: UpdatePlaylistCommand,
    ) -> Result<PlaylistRecord, ServiceError> {
        self.authorize(viewer, id).await?;
        let changes = PlaylistChanges {
            name: command
                .name
                .as_deref()
                .map(|name| required_text("name", name, NAME_MAX_CHARS))
                .transpose()?,
            description: optional_text(
                "description",
                command.description.as_deref(),
                BODY_MAX_CHARS,
            )?,
            is_public: command.is_public,
        };
        let updated = self
            .repo
            .update(id, changes)
            .await?
            .ok_or_else(|| ServiceError::not_found("playlist"))?;
        self.cache.invalidator().playlist_written(id).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        self.authorize(viewer, id).await?;
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("playlist"));
        }
        self.cache.invalidator().playlist_written(id).await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn add_track(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
        music_id: RecordId,
    ) -> Result<(), ServiceError> {
        self.authorize(viewer, id).await?;
        if !self.repo.add_track(id, music_id).await? {
            return Err(DomainError::validation("track is already in the playlist").into());
        }
        self.cache.invalidator().playlist_written(id).await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_track(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
        music_id: RecordId,
    ) -> Result<(), ServiceError> {
        self.authorize(viewer, id).await?;
        if !self.repo.remove_track(id, music_id).await? {
            return Err(ServiceError::not_found("playlist track"));
        }
        self.cache.invalidator().playlist_written(id).await;
        Ok(())
    }

    async fn authorize(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        let actor = require_actor(viewer)?;
        let playlist = self
            .repo
            .find_by_id(id, Some(actor))
            .await?
            .ok_or_else(|| ServiceError::not_found("playlist"))?;
        ensure_owner("playlist", playlist.owner_id, actor)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::OffsetDateTime;

    use super::*;
    use crate::application::repos::{RepoError, RowPage};
    use crate::domain::entities::MusicRecord;

    #[derive(Default)]
    struct StubPlaylistsRepo {
        playlists: Mutex<Vec<PlaylistRecord>>,
        tracks: Mutex<Vec<(RecordId, RecordId)>>,
    }

    fn visible(viewer: Option<RecordId>, playlist: &PlaylistRecord) -> bool {
        playlist.is_public || viewer == Some(playlist.owner_id)
    }

    fn track(id: RecordId) -> MusicRecord {
        MusicRecord {
            id,
            title: format!("track {id}"),
            artist: "artist".to_string(),
            album_id: None,
            duration_secs: 100,
            audio_url: "https://cdn.example/a.mp3".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[async_trait]
    impl PlaylistsRepo for StubPlaylistsRepo {
        async fn find_page(
            &self,
            _filter: &PlaylistFilter,
            viewer: Option<RecordId>,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<PlaylistRecord>, RepoError> {
            let rows: Vec<_> = self
                .playlists
                .lock()
                .unwrap()
                .iter()
                .filter(|playlist| visible(viewer, playlist))
                .cloned()
                .collect();
            let total = rows.len() as u64;
            Ok(RowPage::new(rows, total))
        }

        async fn find_by_id(
            &self,
            id: RecordId,
            viewer: Option<RecordId>,
        ) -> Result<Option<PlaylistRecord>, RepoError> {
            Ok(self
                .playlists
                .lock()
                .unwrap()
                .iter()
                .find(|playlist| playlist.id == id && visible(viewer, playlist))
                .cloned())
        }

        async fn tracks(&self, playlist_id: RecordId) -> Result<Vec<MusicRecord>, RepoError> {
            Ok(self
                .tracks
                .lock()
                .unwrap()
                .iter()
                .filter(|(playlist, _)| *playlist == playlist_id)
                .map(|(_, music)| track(*music))
                .collect())
        }

        async fn create(&self, new: NewPlaylist) -> Result<PlaylistRecord, RepoError> {
            let mut playlists = self.playlists.lock().unwrap();
            let record = PlaylistRecord {
                id: playlists.len() as RecordId + 1,
                owner_id: new.owner_id,
                name: new.name,
                description: new.description,
                is_public: new.is_public,
                track_count: 0,
                created_at: OffsetDateTime::UNIX_EPOCH,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            };
            playlists.push(record.clone());
            Ok(record)
        }

        async fn update(
            &self,
            id: RecordId,
            _changes: PlaylistChanges,
        ) -> Result<Option<PlaylistRecord>, RepoError> {
            self.find_by_id(id, None).await
        }

        async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
            let mut playlists = self.playlists.lock().unwrap();
            let before = playlists.len();
            playlists.retain(|playlist| playlist.id != id);
            Ok(before != playlists.len())
        }

        async fn add_track(
            &self,
            playlist_id: RecordId,
            music_id: RecordId,
        ) -> Result<bool, RepoError> {
            let mut tracks = self.tracks.lock().unwrap();
            if tracks.contains(&(playlist_id, music_id)) {
                return Ok(false);
            }
            tracks.push((playlist_id, music_id));
            Ok(true)
        }

        async fn remove_track(
            &self,
            playlist_id: RecordId,
            music_id: RecordId,
        ) -> Result<bool, RepoError> {
            let mut tracks = self.tracks.lock().unwrap();
            let before = tracks.len();
            tracks.retain(|entry| *entry != (playlist_id, music_id));
            Ok(before != tracks.len())
        }
    }

    #[tokio::test]
    async fn adding_a_track_refreshes_every_viewers_detail() {
        let service = PlaylistsService::new(
            Arc::new(StubPlaylistsRepo::default()),
            CacheLayer::in_memory(),
        );
        let playlist = service
            .create(
                Some(1),
                CreatePlaylistCommand {
                    name: "Road trip".to_string(),
                    description: None,
                    is_public: true,
                },
            )
            .await
            .unwrap();

        assert!(service.detail(None, playlist.id).await.unwrap().tracks.is_empty());
        assert!(service.detail(Some(2), playlist.id).await.unwrap().tracks.is_empty());

        service.add_track(Some(1), playlist.id, 10).await.unwrap();

        assert_eq!(service.detail(None, playlist.id).await.unwrap().tracks.len(), 1);
        assert_eq!(service.detail(Some(2), playlist.id).await.unwrap().tracks.len(), 1);
    }

    #[tokio::test]
    async fn only_the_owner_may_change_tracks() {
        let service = PlaylistsService::new(
            Arc::new(StubPlaylistsRepo::default()),
            CacheLayer::in_memory(),
        );
        let playlist = service
            .create(
                Some(1),
                CreatePlaylistCommand {
                    name: "Mine".to_string(),
                    description: None,
                    is_public: true,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            service.add_track(Some(2), playlist.id, 10).await,
            Err(ServiceError::Domain(DomainError::NotOwner { .. }))
        ));
        service.add_track(Some(1), playlist.id, 10).await.unwrap();
        assert!(matches!(
            service.add_track(Some(1), playlist.id, 10).await,
            Err(ServiceError::Domain(DomainError::Validation { .. }))
        ));
    }
}

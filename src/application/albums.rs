use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::application::access::require_actor;
use crate::application::error::ServiceError;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::repos::{AlbumChanges, AlbumFilter, AlbumsRepo, NewAlbum};
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{AlbumRecord, RecordId};
use crate::domain::validation::{
    NAME_MAX_CHARS, TITLE_MAX_CHARS, URL_MAX_CHARS, optional_text, required_text,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlbumCommand {
    pub title: String,
    pub artist: String,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAlbumCommand {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub cover_url: Option<String>,
}

pub struct AlbumsService {
    repo: Arc<dyn AlbumsRepo>,
    cache: CacheLayer,
}

impl AlbumsService {
    pub fn new(repo: Arc<dyn AlbumsRepo>, cache: CacheLayer) -> Self {
        Self { repo, cache }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: PageParams,
        filter: AlbumFilter,
    ) -> Result<PageEnvelope<AlbumRecord>, ServiceError> {
        let filters = ListFilters::new()
            .with("artist", filter.artist.as_deref())
            .with("search", filter.search.as_deref());
        let key = self
            .cache
            .keys()
            .list_key(Entity::Albums, page, &filters, None)?;

        self.cache
            .reads()
            .read_through(Entity::Albums, &key, || async {
                let rows = self
                    .repo
                    .find_page(&filter, page.offset(), page.limit())
                    .await?;
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn detail(&self, id: RecordId) -> Result<AlbumRecord, ServiceError> {
        let key = self.cache.keys().detail_key(Entity::Albums, id, None)?;
        self.cache
            .reads()
            .read_through(Entity::Albums, &key, || async {
                let album = self.repo.find_by_id(id).await?;
                album.ok_or_else(|| ServiceError::not_found("album"))
            })
            .await
    }

    #[instrument(skip(self, command))]
    pub async fn create(
        &self,
        viewer: Option<RecordId>,
        command: CreateAlbumCommand,
    ) -> Result<AlbumRecord, ServiceError> {
        require_actor(viewer)?;
        let album = NewAlbum {
            title: required_text("title", &command.title, TITLE_MAX_CHARS)?,
            artist: required_text("artist", &command.artist, NAME_MAX_CHARS)?,
            cover_url: optional_text("coverUrl", command.cover_url.as_deref(), URL_MAX_CHARS)?,
        };
        let created = self.repo.create(album).await?;
        self.cache.invalidator().album_written(created.id).await;
        Ok(created)
    }

    #[instrument(skip(self, command))]
    pub async fn update(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
        command: UpdateAlbumCommand,
    ) -> Result<AlbumRecord, ServiceError> {
        require_actor(viewer)?;
        let changes = AlbumChanges {
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
            cover_url: optional_text("coverUrl", command.cover_url.as_deref(), URL_MAX_CHARS)?,
        };
        let updated = self
            .repo
            .update(id, changes)
            .await?
            .ok_or_else(|| ServiceError::not_found("album"))?;
        self.cache.invalidator().album_written(id).await;
        Ok(updated)
    }

    /// Tracks of a deleted album are kept and detached from it, so every
    /// cached track is cleared as well.
    #[instrument(skip(self))]
    pub async fn delete(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        require_actor(viewer)?;
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("album"));
        }
        let invalidator = self.cache.invalidator();
        invalidator.album_written(id).await;
        invalidator.entity_reset(Entity::Music).await;
        Ok(())
    }
}

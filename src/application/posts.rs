use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::application::access::{ensure_owner, require_actor};
use crate::application::error::ServiceError;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::repos::{NewPost, PostChanges, PostFilter, PostsRepo};
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{PostRecord, RecordId};
use crate::domain::types::PostVisibility;
use crate::domain::validation::{BODY_MAX_CHARS, required_text};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostCommand {
    pub body: String,
    #[serde(default = "default_visibility")]
    pub visibility: PostVisibility,
}

fn default_visibility() -> PostVisibility {
    PostVisibility::Public
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostCommand {
    pub body: Option<String>,
    pub visibility: Option<PostVisibility>,
}

/// Social posts. Visibility depends on the follow graph, so every cached
/// payload is keyed per viewer.
pub struct PostsService {
    repo: Arc<dyn PostsRepo>,
    cache: CacheLayer,
}

impl PostsService {
    pub fn new(repo: Arc<dyn PostsRepo>, cache: CacheLayer) -> Self {
        Self { repo, cache }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        viewer: Option<RecordId>,
        page: PageParams,
        filter: PostFilter,
    ) -> Result<PageEnvelope<PostRecord>, ServiceError> {
        let filters = ListFilters::new().with("author", filter.author);
        let key = self
            .cache
            .keys()
            .list_key(Entity::Posts, page, &filters, viewer)?;

        self.cache
            .reads()
            .read_through(Entity::Posts, &key, || async {
                let rows = self
                    .repo
                    .find_page(&filter, viewer, page.offset(), page.limit())
                    .await?;
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    /// The post as `viewer` may see it; hidden posts are reported as missing.
    #[instrument(skip(self))]
    pub async fn detail(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
    ) -> Result<PostRecord, ServiceError> {
        let key = self.cache.keys().detail_key(Entity::Posts, id, viewer)?;
        self.cache
            .reads()
            .read_through(Entity::Posts, &key, || async {
                let post = self.repo.find_by_id(id, viewer).await?;
                post.ok_or_else(|| ServiceError::not_found("post"))
            })
            .await
    }

    #[instrument(skip(self, command))]
    pub async fn create(
        &self,
        viewer: Option<RecordId>,
        command: CreatePostCommand,
    ) -> Result<PostRecord, ServiceError> {
        let author_id = require_actor(viewer)?;
        let post = NewPost {
            author_id,
            body: required_text("body", &command.body, BODY_MAX_CHARS)?,
            visibility: command.visibility,
        };
        let created = self.repo.create(post).await?;
        self.cache.invalidator().post_written(created.id).await;
        Ok(created)
    }

    #[instrument(skip(self, command))]
    pub async fn update(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
        command: UpdatePostCommand,
    ) -> Result<PostRecord, ServiceError> {
        self.authorize(viewer, id).await?;
        let changes = PostChanges {
            body: command
                .body
                .as_deref()
                .map(|body| required_text("body", body, BODY_MAX_CHARS))
                .transpose()?,
            visibility: command.visibility,
        };
        let updated = self
            .repo
            .update(id, changes)
            .await?
            .ok_or_else(|| ServiceError::not_found("post"))?;
        self.cache.invalidator().post_written(id).await;
        Ok(updated)
    }

    /// Comments and replies go with the post.
    #[instrument(skip(self))]
    pub async fn delete(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        self.authorize(viewer, id).await?;
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("post"));
        }
        let invalidator = self.cache.invalidator();
        invalidator.post_written(id).await;
        invalidator.entity_reset(Entity::Comments).await;
        invalidator.entity_reset(Entity::Replies).await;
        Ok(())
    }

    async fn authorize(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        let actor = require_actor(viewer)?;
        let post = self
            .repo
            .find_by_id(id, Some(actor))
            .await?
            .ok_or_else(|| ServiceError::not_found("post"))?;
        ensure_owner("post", post.author_id, actor)
    }
}

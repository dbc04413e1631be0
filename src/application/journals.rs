use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::application::access::{ensure_owner, require_actor};
use crate::application::error::ServiceError;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::repos::{JournalChanges, JournalFilter, JournalsRepo, NewJournal};
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{JournalRecord, RecordId};
use crate::domain::validation::{BODY_MAX_CHARS, TITLE_MAX_CHARS, required_text};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJournalCommand {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJournalCommand {
    pub title: Option<String>,
    pub body: Option<String>,
    pub is_private: Option<bool>,
}

/// Journals may be private, so cached pages are keyed per viewer.
pub struct JournalsService {
    repo: Arc<dyn JournalsRepo>,
    cache: CacheLayer,
}

impl JournalsService {
    pub fn new(repo: Arc<dyn JournalsRepo>, cache: CacheLayer) -> Self {
        Self { repo, cache }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        viewer: Option<RecordId>,
        page: PageParams,
        filter: JournalFilter,
    ) -> Result<PageEnvelope<JournalRecord>, ServiceError> {
        let filters = ListFilters::new()
            .with("author", filter.author)
            .with("search", filter.search.as_deref());
        let key = self
            .cache
            .keys()
            .list_key(Entity::Journals, page, &filters, viewer)?;

        self.cache
            .reads()
            .read_through(Entity::Journals, &key, || async {
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
    ) -> Result<JournalRecord, ServiceError> {
        let key = self
            .cache
            .keys()
            .detail_key(Entity::Journals, id, viewer)?;
        self.cache
            .reads()
            .read_through(Entity::Journals, &key, || async {
                let journal = self.repo.find_by_id(id, viewer).await?;
                journal.ok_or_else(|| ServiceError::not_found("journal"))
            })
            .await
    }

    #[instrument(skip(self, command))]
    pub async fn create(
        &self,
        viewer: Option<RecordId>,
        command: CreateJournalCommand,
    ) -> Result<JournalRecord, ServiceError> {
        let author_id = require_actor(viewer)?;
        let journal = NewJournal {
            author_id,
            title: required_text("title", &command.title, TITLE_MAX_CHARS)?,
            body: required_text("body", &command.body, BODY_MAX_CHARS)?,
            is_private: command.is_private,
        };

        let created = self.repo.create(journal).await?;
        self.cache.invalidator().journal_written(created.id).await;
        Ok(created)
    }

    #[instrument(skip(self, command))]
    pub async fn update(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
        command: UpdateJournalCommand,
    ) -> Result<JournalRecord, ServiceError> {
        let actor = self.authorize(viewer, id).await?;
        let changes = JournalChanges {
            title: command
                .title
                .as_deref()
                .map(|title| required_text("title", title, TITLE_MAX_CHARS))
                .transpose()?,
            body: command
                .body
                .as_deref()
                .map(|body| required_text("body", body, BODY_MAX_CHARS))
                .transpose()?,
            is_private: command.is_private,
        };

        let updated = self
            .repo
            .update(id, changes)
            .await?
            .ok_or_else(|| ServiceError::not_found("journal"))?;
        tracing::debug!(actor, journal = id, "journal updated");
        self.cache.invalidator().journal_written(id).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        self.authorize(viewer, id).await?;
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("journal"));
        }
        self.cache.invalidator().journal_written(id).await;
        Ok(())
    }

    async fn authorize(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
    ) -> Result<RecordId, ServiceError> {
        let actor = require_actor(viewer)?;
        let existing = self
            .repo
            .find_by_id(id, Some(actor))
            .await?
            .ok_or_else(|| ServiceError::not_found("journal"))?;
        ensure_owner("journal", existing.author_id, actor)?;
        Ok(actor)
    }
}

use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::application::access::{ensure_owner, require_actor};
use crate::application::error::ServiceError;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::repos::{BlogChanges, BlogFilter, BlogsRepo, NewBlog};
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{BlogRecord, RecordId};
use crate::domain::validation::{
    BODY_MAX_CHARS, NAME_MAX_CHARS, TITLE_MAX_CHARS, optional_text, required_text,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlogCommand {
    pub title: String,
    pub category: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlogCommand {
    pub title: Option<String>,
    pub category: Option<String>,
    pub body: Option<String>,
}

pub struct BlogsService {
    repo: Arc<dyn BlogsRepo>,
    cache: CacheLayer,
}

impl BlogsService {
    pub fn new(repo: Arc<dyn BlogsRepo>, cache: CacheLayer) -> Self {
        Self { repo, cache }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: PageParams,
        filter: BlogFilter,
    ) -> Result<PageEnvelope<BlogRecord>, ServiceError> {
        let filters = ListFilters::new()
            .with("author", filter.author)
            .with("category", filter.category.as_deref())
            .with("search", filter.search.as_deref());
        let key = self
            .cache
            .keys()
            .list_key(Entity::Blogs, page, &filters, None)?;

        self.cache
            .reads()
            .read_through(Entity::Blogs, &key, || async {
                let rows = self
                    .repo
                    .find_page(&filter, page.offset(), page.limit())
                    .await?;
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn detail(&self, id: RecordId) -> Result<BlogRecord, ServiceError> {
        let key = self.cache.keys().detail_key(Entity::Blogs, id, None)?;
        self.cache
            .reads()
            .read_through(Entity::Blogs, &key, || async {
                let blog = self.repo.find_by_id(id).await?;
                blog.ok_or_else(|| ServiceError::not_found("blog"))
            })
            .await
    }

    #[instrument(skip(self, command))]
    pub async fn create(
        &self,
        viewer: Option<RecordId>,
        command: CreateBlogCommand,
    ) -> Result<BlogRecord, ServiceError> {
        let author_id = require_actor(viewer)?;
        let blog = NewBlog {
            author_id,
            title: required_text("title", &command.title, TITLE_MAX_CHARS)?,
            category: optional_text("category", command.category.as_deref(), NAME_MAX_CHARS)?,
            body: required_text("body", &command.body, BODY_MAX_CHARS)?,
        };

        let created = self.repo.create(blog).await?;
        self.cache.invalidator().blog_written(created.id).await;
        Ok(created)
    }

    #[instrument(skip(self, command))]
    pub async fn update(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
        command: UpdateBlogCommand,
    ) -> Result<BlogRecord, ServiceError> {
        let actor = require_actor(viewer)?;
        let existing = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("blog"))?;
        ensure_owner("blog", existing.author_id, actor)?;

        let changes = BlogChanges {
            title: command
                .title
                .as_deref()
                .map(|title| required_text("title", title, TITLE_MAX_CHARS))
                .transpose()?,
            category: optional_text("category", command.category.as_deref(), NAME_MAX_CHARS)?,
            body: command
                .body
                .as_deref()
                .map(|body| required_text("body", body, BODY_MAX_CHARS))
                .transpose()?,
        };

        let updated = self
            .repo
            .update(id, changes)
            .await?
            .ok_or_else(|| ServiceError::not_found("blog"))?;
        self.cache.invalidator().blog_written(id).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, viewer: Option<RecordId>, id: RecordId) -> Result<(), ServiceError> {
        let actor = require_actor(viewer)?;
        let existing = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("blog"))?;
        ensure_owner("blog", existing.author_id, actor)?;

        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("blog"));
        }
        self.cache.invalidator().blog_written(id).await;
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
    use crate::domain::error::DomainError;

    #[derive(Default)]
    struct StubBlogsRepo {
        blogs: Mutex<Vec<BlogRecord>>,
        page_queries: AtomicUsize,
    }

    fn blog(id: RecordId, author_id: RecordId, title: &str) -> BlogRecord {
        BlogRecord {
            id,
            author_id,
            title: title.to_string(),
            category: None,
            body: "body".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[async_trait]
    impl BlogsRepo for StubBlogsRepo {
        async fn find_page(
            &self,
            filter: &BlogFilter,
            offset: i64,
            limit: i64,
        ) -> Result<RowPage<BlogRecord>, RepoError> {
            self.page_queries.fetch_add(1, Ordering::SeqCst);
            let blogs = self.blogs.lock().unwrap();
            let matching: Vec<_> = blogs
                .iter()
                .filter(|blog| filter.author.is_none_or(|author| blog.author_id == author))
                .cloned()
                .collect();
            let total = matching.len() as u64;
            let rows = matching
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
            Ok(RowPage::new(rows, total))
        }

        async fn find_by_id(&self, id: RecordId) -> Result<Option<BlogRecord>, RepoError> {
            Ok(self
                .blogs
                .lock()
                .unwrap()
                .iter()
                .find(|blog| blog.id == id)
                .cloned())
        }

        async fn create(&self, new: NewBlog) -> Result<BlogRecord, RepoError> {
            let mut blogs = self.blogs.lock().unwrap();
            let mut record = blog(blogs.len() as RecordId + 1, new.author_id, &new.title);
            record.category = new.category;
            record.body = new.body;
            blogs.push(record.clone());
            Ok(record)
        }

        async fn update(
            &self,
            id: RecordId,
            changes: BlogChanges,
        ) -> Result<Option<BlogRecord>, RepoError> {
            let mut blogs = self.blogs.lock().unwrap();
            let Some(existing) = blogs.iter_mut().find(|blog| blog.id == id) else {
                return Ok(None);
            };
            if let Some(title) = changes.title {
                existing.title = title;
            }
            Ok(Some(existing.clone()))
        }

        async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
            let mut blogs = self.blogs.lock().unwrap();
            let before = blogs.len();
            blogs.retain(|blog| blog.id != id);
            Ok(blogs.len() != before)
        }
    }

    fn service(repo: Arc<StubBlogsRepo>) -> BlogsService {
        BlogsService::new(repo, CacheLayer::in_memory())
    }

    #[tokio::test]
    async fn list_is_cached_until_a_write_invalidates_it() {
        let repo = Arc::new(StubBlogsRepo::default());
        repo.blogs.lock().unwrap().push(blog(1, 7, "first"));
        let service = service(repo.clone());
        let page = PageParams::new(1, 10).unwrap();

        let first = service.list(page, BlogFilter::default()).await.unwrap();
        let second = service.list(page, BlogFilter::default()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.page_queries.load(Ordering::SeqCst), 1);

        service
            .create(
                Some(7),
                CreateBlogCommand {
                    title: "second".to_string(),
                    category: None,
                    body: "text".to_string(),
                },
            )
            .await
            .unwrap();

        let third = service.list(page, BlogFilter::default()).await.unwrap();
        assert_eq!(third.total_records, 2);
        assert_eq!(repo.page_queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn detail_miss_for_unknown_id_is_not_cached() {
        let repo = Arc::new(StubBlogsRepo::default());
        let service = service(repo.clone());

        let err = service.detail(9).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::NotFound { entity: "blog" })
        ));

        repo.blogs.lock().unwrap().push(blog(9, 1, "late"));
        assert_eq!(service.detail(9).await.unwrap().title, "late");
    }

    #[tokio::test]
    async fn update_refreshes_cached_detail() {
        let repo = Arc::new(StubBlogsRepo::default());
        repo.blogs.lock().unwrap().push(blog(3, 5, "old"));
        let service = service(repo);

        assert_eq!(service.detail(3).await.unwrap().title, "old");
        service
            .update(
                Some(5),
                3,
                UpdateBlogCommand {
                    title: Some("new".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(service.detail(3).await.unwrap().title, "new");
    }

    #[tokio::test]
    async fn writes_require_the_author() {
        let repo = Arc::new(StubBlogsRepo::default());
        repo.blogs.lock().unwrap().push(blog(3, 5, "mine"));
        let service = service(repo);

        assert!(matches!(
            service.delete(None, 3).await,
            Err(ServiceError::Unauthenticated)
        ));
        assert!(matches!(
            service.delete(Some(6), 3).await,
            Err(ServiceError::Domain(DomainError::NotOwner { .. }))
        ));
        service.delete(Some(5), 3).await.unwrap();
    }

    #[tokio::test]
    async fn blank_titles_are_rejected() {
        let service = service(Arc::new(StubBlogsRepo::default()));
        let err = service
            .create(
                Some(1),
                CreateBlogCommand {
                    title: "   ".to_string(),
                    category: None,
                    body: "text".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::Validation { .. })
        ));
    }
}

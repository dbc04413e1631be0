//! Comments on posts and replies to comments.
//!
//! Comment and reply pages are shared by every viewer, so they are only served
//! after the parent post has been checked against the viewer through its own
//! (viewer-keyed) cache entry.

use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::application::access::{ensure_owner, require_actor};
use crate::application::error::ServiceError;
use crate::application::notifications::NotificationsService;
use crate::application::pagination::{PageEnvelope, PageParams};
use crate::application::posts::PostsService;
use crate::application::repos::{CommentsRepo, NewComment, NewReply, RepliesRepo};
use crate::cache::{CacheLayer, Entity, ListFilters};
use crate::domain::entities::{CommentRecord, RecordId, ReplyRecord};
use crate::domain::types::NotificationKind;
use crate::domain::validation::{BODY_MAX_CHARS, required_text};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentCommand {
    pub body: String,
}

pub struct CommentsService {
    comments: Arc<dyn CommentsRepo>,
    replies: Arc<dyn RepliesRepo>,
    posts: Arc<PostsService>,
    notifications: Arc<NotificationsService>,
    cache: CacheLayer,
}

impl CommentsService {
    pub fn new(
        comments: Arc<dyn CommentsRepo>,
        replies: Arc<dyn RepliesRepo>,
        posts: Arc<PostsService>,
        notifications: Arc<NotificationsService>,
        cache: CacheLayer,
    ) -> Self {
        Self {
            comments,
            replies,
            posts,
            notifications,
            cache,
        }
    }

    #[instrument(skip(self))]
    pub async fn list_for_post(
        &self,
        viewer: Option<RecordId>,
        post_id: RecordId,
        page: PageParams,
    ) -> Result<PageEnvelope<CommentRecord>, ServiceError> {
        self.posts.detail(viewer, post_id).await?;
        let key = self.cache.keys().scoped_list_key(
            Entity::Comments,
            post_id,
            page,
            &ListFilters::new(),
            None,
        )?;

        self.cache
            .reads()
            .read_through(Entity::Comments, &key, || async {
                let rows = self
                    .comments
                    .find_page(post_id, page.offset(), page.limit())
                    .await?;
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn comment(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
    ) -> Result<CommentRecord, ServiceError> {
        let comment = self.cached_comment(id).await?;
        self.posts.detail(viewer, comment.post_id).await?;
        Ok(comment)
    }

    #[instrument(skip(self, command))]
    pub async fn add_comment(
        &self,
        viewer: Option<RecordId>,
        post_id: RecordId,
        command: CreateCommentCommand,
    ) -> Result<CommentRecord, ServiceError> {
        let author_id = require_actor(viewer)?;
        let post = self.posts.detail(viewer, post_id).await?;
        let comment = NewComment {
            post_id,
            author_id,
            body: required_text("body", &command.body, BODY_MAX_CHARS)?,
        };

        let created = self.comments.create(comment).await?;
        self.cache
            .invalidator()
            .comment_written(created.id, post_id)
            .await;

        if post.author_id != author_id {
            self.notifications
                .notify(
                    post.author_id,
                    author_id,
                    NotificationKind::Comment,
                    Some(created.id),
                )
                .await;
        }
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn delete_comment(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
    ) -> Result<(), ServiceError> {
        let actor = require_actor(viewer)?;
        let comment = self
            .comments
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("comment"))?;
        ensure_owner("comment", comment.author_id, actor)?;

        if !self.comments.delete(id).await? {
            return Err(ServiceError::not_found("comment"));
        }
        let invalidator = self.cache.invalidator();
        invalidator.comment_written(id, comment.post_id).await;
        invalidator.entity_reset(Entity::Replies).await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_replies(
        &self,
        viewer: Option<RecordId>,
        comment_id: RecordId,
        page: PageParams,
    ) -> Result<PageEnvelope<ReplyRecord>, ServiceError> {
        self.comment(viewer, comment_id).await?;
        let key = self.cache.keys().scoped_list_key(
            Entity::Replies,
            comment_id,
            page,
            &ListFilters::new(),
            None,
        )?;

        self.cache
            .reads()
            .read_through(Entity::Replies, &key, || async {
                let rows = self
                    .replies
                    .find_page(comment_id, page.offset(), page.limit())
                    .await?;
                Ok::<_, ServiceError>(PageEnvelope::for_page(page, rows.total, rows.rows))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn reply(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
    ) -> Result<ReplyRecord, ServiceError> {
        let key = self.cache.keys().detail_key(Entity::Replies, id, None)?;
        let reply = self
            .cache
            .reads()
            .read_through(Entity::Replies, &key, || async {
                let reply = self.replies.find_by_id(id).await?;
                reply.ok_or_else(|| ServiceError::not_found("reply"))
            })
            .await?;
        self.comment(viewer, reply.comment_id).await?;
        Ok(reply)
    }

    #[instrument(skip(self, command))]
    pub async fn add_reply(
        &self,
        viewer: Option<RecordId>,
        comment_id: RecordId,
        command: CreateCommentCommand,
    ) -> Result<ReplyRecord, ServiceError> {
        let author_id = require_actor(viewer)?;
        let comment = self.comment(viewer, comment_id).await?;
        let reply = NewReply {
            comment_id,
            author_id,
            body: required_text("body", &command.body, BODY_MAX_CHARS)?,
        };

        let created = self.replies.create(reply).await?;
        self.cache
            .invalidator()
            .reply_written(created.id, comment_id)
            .await;

        if comment.author_id != author_id {
            self.notifications
                .notify(
                    comment.author_id,
                    author_id,
                    NotificationKind::Reply,
                    Some(created.id),
                )
                .await;
        }
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn delete_reply(
        &self,
        viewer: Option<RecordId>,
        id: RecordId,
    ) -> Result<(), ServiceError> {
        let actor = require_actor(viewer)?;
        let reply = self
            .replies
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("reply"))?;
        ensure_owner("reply", reply.author_id, actor)?;

        if !self.replies.delete(id).await? {
            return Err(ServiceError::not_found("reply"));
        }
        self.cache
            .invalidator()
            .reply_written(id, reply.comment_id)
            .await;
        Ok(())
    }

    async fn cached_comment(&self, id: RecordId) -> Result<CommentRecord, ServiceError> {
        let key = self.cache.keys().detail_key(Entity::Comments, id, None)?;
        self.cache
            .reads()
            .read_through(Entity::Comments, &key, || async {
                let comment = self.comments.find_by_id(id).await?;
                comment.ok_or_else(|| ServiceError::not_found("comment"))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::OffsetDateTime;

    use super::*;
    use crate::application::repos::{
        NewNotification, NewPost, NotificationsRepo, PostChanges, PostFilter, PostsRepo,
        RepoError, RowPage,
    };
    use crate::domain::entities::{NotificationRecord, PostRecord};
    use crate::domain::error::DomainError;
    use crate::domain::types::PostVisibility;

    /// One in-memory thread: posts, their comments and replies, and the
    /// notifications they raise.
    #[derive(Default)]
    struct StubThread {
        posts: Mutex<Vec<PostRecord>>,
        comments: Mutex<Vec<CommentRecord>>,
        replies: Mutex<Vec<ReplyRecord>>,
        notifications: Mutex<Vec<NotificationRecord>>,
    }

    impl StubThread {
        fn with_post(author_id: RecordId, visibility: PostVisibility) -> Arc<Self> {
            let thread = Self::default();
            thread.posts.lock().unwrap().push(PostRecord {
                id: 1,
                author_id,
                body: "post".to_string(),
                visibility,
                comment_count: 0,
                created_at: OffsetDateTime::UNIX_EPOCH,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            });
            Arc::new(thread)
        }

        fn counted(&self, mut post: PostRecord) -> PostRecord {
            post.comment_count = self
                .comments
                .lock()
                .unwrap()
                .iter()
                .filter(|comment| comment.post_id == post.id)
                .count() as i64;
            post
        }
    }

    #[async_trait]
    impl PostsRepo for StubThread {
        async fn find_page(
            &self,
            _filter: &PostFilter,
            _viewer: Option<RecordId>,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<PostRecord>, RepoError> {
            Ok(RowPage::new(Vec::new(), 0))
        }

        async fn find_by_id(
            &self,
            id: RecordId,
            viewer: Option<RecordId>,
        ) -> Result<Option<PostRecord>, RepoError> {
            let found = self.posts.lock().unwrap().iter().find(|post| {
                post.id == id
                    && (post.visibility == PostVisibility::Public
                        || viewer == Some(post.author_id))
            })
            .cloned();
            Ok(found.map(|post| self.counted(post)))
        }

        async fn create(&self, _post: NewPost) -> Result<PostRecord, RepoError> {
            Err(RepoError::Persistence("unused".to_string()))
        }

        async fn update(
            &self,
            _id: RecordId,
            _changes: PostChanges,
        ) -> Result<Option<PostRecord>, RepoError> {
            Ok(None)
        }

        async fn delete(&self, _id: RecordId) -> Result<bool, RepoError> {
            Ok(false)
        }
    }

    #[async_trait]
    impl CommentsRepo for StubThread {
        async fn find_page(
            &self,
            post_id: RecordId,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<CommentRecord>, RepoError> {
            let rows: Vec<_> = self
                .comments
                .lock()
                .unwrap()
                .iter()
                .filter(|comment| comment.post_id == post_id)
                .cloned()
                .collect();
            let total = rows.len() as u64;
            Ok(RowPage::new(rows, total))
        }

        async fn find_by_id(&self, id: RecordId) -> Result<Option<CommentRecord>, RepoError> {
            Ok(self
                .comments
                .lock()
                .unwrap()
                .iter()
                .find(|comment| comment.id == id)
                .cloned())
        }

        async fn create(&self, new: NewComment) -> Result<CommentRecord, RepoError> {
            let mut comments = self.comments.lock().unwrap();
            let record = CommentRecord {
                id: comments.len() as RecordId + 1,
                post_id: new.post_id,
                author_id: new.author_id,
                body: new.body,
                reply_count: 0,
                created_at: OffsetDateTime::UNIX_EPOCH,
            };
            comments.push(record.clone());
            Ok(record)
        }

        async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
            let mut comments = self.comments.lock().unwrap();
            let before = comments.len();
            comments.retain(|comment| comment.id != id);
            Ok(comments.len() != before)
        }
    }

    #[async_trait]
    impl RepliesRepo for StubThread {
        async fn find_page(
            &self,
            comment_id: RecordId,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<ReplyRecord>, RepoError> {
            let rows: Vec<_> = self
                .replies
                .lock()
                .unwrap()
                .iter()
                .filter(|reply| reply.comment_id == comment_id)
                .cloned()
                .collect();
            let total = rows.len() as u64;
            Ok(RowPage::new(rows, total))
        }

        async fn find_by_id(&self, id: RecordId) -> Result<Option<ReplyRecord>, RepoError> {
            Ok(self
                .replies
                .lock()
                .unwrap()
                .iter()
                .find(|reply| reply.id == id)
                .cloned())
        }

        async fn create(&self, new: NewReply) -> Result<ReplyRecord, RepoError> {
            let mut replies = self.replies.lock().unwrap();
            let record = ReplyRecord {
                id: replies.len() as RecordId + 1,
                comment_id: new.comment_id,
                author_id: new.author_id,
                body: new.body,
                created_at: OffsetDateTime::UNIX_EPOCH,
            };
            replies.push(record.clone());
            Ok(record)
        }

        async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
            let mut replies = self.replies.lock().unwrap();
            let before = replies.len();
            replies.retain(|reply| reply.id != id);
            Ok(replies.len() != before)
        }
    }

    #[async_trait]
    impl NotificationsRepo for StubThread {
        async fn find_page(
            &self,
            recipient: RecordId,
            _unread_only: bool,
            _offset: i64,
            _limit: i64,
        ) -> Result<RowPage<NotificationRecord>, RepoError> {
            let rows: Vec<_> = self
                .notifications
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.recipient_id == recipient)
                .cloned()
                .collect();
            let total = rows.len() as u64;
            Ok(RowPage::new(rows, total))
        }

        async fn create(
            &self,
            new: NewNotification,
        ) -> Result<NotificationRecord, RepoError> {
            let mut rows = self.notifications.lock().unwrap();
            let record = NotificationRecord {
                id: rows.len() as RecordId + 1,
                recipient_id: new.recipient_id,
                actor_id: new.actor_id,
                kind: new.kind,
                subject_id: new.subject_id,
                is_read: false,
                created_at: OffsetDateTime::UNIX_EPOCH,
            };
            rows.push(record.clone());
            Ok(record)
        }

        async fn mark_read(&self, _id: RecordId, _recipient: RecordId) -> Result<bool, RepoError> {
            Ok(false)
        }

        async fn delete(&self, _id: RecordId, _recipient: RecordId) -> Result<bool, RepoError> {
            Ok(false)
        }
    }

    struct Services {
        posts: Arc<PostsService>,
        comments: CommentsService,
        notifications: Arc<NotificationsService>,
    }

    fn services(thread: Arc<StubThread>) -> Services {
        let cache = CacheLayer::in_memory();
        let posts = Arc::new(PostsService::new(thread.clone(), cache.clone()));
        let notifications = Arc::new(NotificationsService::new(thread.clone(), cache.clone()));
        let comments = CommentsService::new(
            thread.clone(),
            thread,
            Arc::clone(&posts),
            Arc::clone(&notifications),
            cache,
        );
        Services {
            posts,
            comments,
            notifications,
        }
    }

    fn body(text: &str) -> CreateCommentCommand {
        CreateCommentCommand {
            body: text.to_string(),
        }
    }

    fn first_page() -> PageParams {
        PageParams::new(1, 10).unwrap()
    }

    #[tokio::test]
    async fn comment_refreshes_post_count_and_notifies_the_author() {
        let thread = StubThread::with_post(1, PostVisibility::Public);
        let s = services(thread);

        assert_eq!(s.posts.detail(Some(2), 1).await.unwrap().comment_count, 0);
        let inbox = s.notifications.list(Some(1), first_page(), false).await.unwrap();
        assert_eq!(inbox.total_records, 0);

        s.comments.add_comment(Some(2), 1, body("nice")).await.unwrap();

        assert_eq!(s.posts.detail(Some(2), 1).await.unwrap().comment_count, 1);
        let inbox = s.notifications.list(Some(1), first_page(), false).await.unwrap();
        assert_eq!(inbox.total_records, 1);
        assert_eq!(inbox.items[0].kind, NotificationKind::Comment);
        assert_eq!(inbox.items[0].actor_id, 2);
    }

    #[tokio::test]
    async fn commenting_on_your_own_post_is_silent() {
        let thread = StubThread::with_post(1, PostVisibility::Public);
        let s = services(thread.clone());

        s.comments.add_comment(Some(1), 1, body("bump")).await.unwrap();
        assert!(thread.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn threads_on_hidden_posts_are_hidden() {
        let thread = StubThread::with_post(1, PostVisibility::Private);
        let s = services(thread);

        s.comments.add_comment(Some(1), 1, body("note")).await.unwrap();
        assert_eq!(
            s.comments
                .list_for_post(Some(1), 1, first_page())
                .await
                .unwrap()
                .total_records,
            1
        );
        assert!(matches!(
            s.comments.list_for_post(Some(2), 1, first_page()).await,
            Err(ServiceError::Domain(DomainError::NotFound { entity: "post" }))
        ));
        assert!(matches!(
            s.comments.comment(None, 1).await,
            Err(ServiceError::Domain(DomainError::NotFound { entity: "post" }))
        ));
    }

    #[tokio::test]
    async fn replies_refresh_the_comment_listing() {
        let thread = StubThread::with_post(1, PostVisibility::Public);
        let s = services(thread);
        let comment = s.comments.add_comment(Some(2), 1, body("first")).await.unwrap();

        let replies = s
            .comments
            .list_replies(None, comment.id, first_page())
            .await
            .unwrap();
        assert_eq!(replies.total_records, 0);

        let reply = s
            .comments
            .add_reply(Some(1), comment.id, body("thanks"))
            .await
            .unwrap();
        let replies = s
            .comments
            .list_replies(None, comment.id, first_page())
            .await
            .unwrap();
        assert_eq!(replies.items, vec![reply.clone()]);

        assert!(matches!(
            s.comments.delete_reply(Some(2), reply.id).await,
            Err(ServiceError::Domain(DomainError::NotOwner { entity: "reply" }))
        ));
        s.comments.delete_reply(Some(1), reply.id).await.unwrap();
        assert_eq!(
            s.comments
                .list_replies(None, comment.id, first_page())
                .await
                .unwrap()
                .total_records,
            0
        );
    }
}

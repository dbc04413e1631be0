//! Comments on posts and replies to comments. Deleting a comment removes its
//! replies through the foreign key cascade.

use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    application::repos::{
        CommentsRepo, NewComment, NewReply, RepliesRepo, RepoError, RowPage,
    },
    domain::entities::{CommentRecord, RecordId, ReplyRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(FromRow)]
struct CommentRow {
    id: i64,
    post_id: i64,
    author_id: i64,
    body: String,
    reply_count: i64,
    created_at: OffsetDateTime,
}

impl From<CommentRow> for CommentRecord {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            author_id: row.author_id,
            body: row.body,
            reply_count: row.reply_count,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ReplyRow {
    id: i64,
    comment_id: i64,
    author_id: i64,
    body: String,
    created_at: OffsetDateTime,
}

impl From<ReplyRow> for ReplyRecord {
    fn from(row: ReplyRow) -> Self {
        Self {
            id: row.id,
            comment_id: row.comment_id,
            author_id: row.author_id,
            body: row.body,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl CommentsRepo for PostgresRepositories {
    async fn find_page(
        &self,
        post_id: RecordId,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<CommentRecord>, RepoError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT c.id, c.post_id, c.author_id, c.body,
                   (SELECT COUNT(*) FROM replies r WHERE r.comment_id = c.id) AS reply_count,
                   c.created_at
            FROM comments c
            WHERE c.post_id = $1
            ORDER BY c.created_at ASC, c.id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(post_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(RowPage::new(
            rows.into_iter().map(Into::into).collect(),
            u64::try_from(total).unwrap_or(0),
        ))
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<CommentRecord>, RepoError> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT c.id, c.post_id, c.author_id, c.body,
                   (SELECT COUNT(*) FROM replies r WHERE r.comment_id = c.id) AS reply_count,
                   c.created_at
            FROM comments c
            WHERE c.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, comment: NewComment) -> Result<CommentRecord, RepoError> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            INSERT INTO comments (post_id, author_id, body)
            VALUES ($1, $2, $3)
            RETURNING id, post_id, author_id, body, 0::BIGINT AS reply_count, created_at
            "#,
        )
        .bind(comment.post_id)
        .bind(comment.author_id)
        .bind(comment.body)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RepliesRepo for PostgresRepositories {
    async fn find_page(
        &self,
        comment_id: RecordId,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<ReplyRecord>, RepoError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replies WHERE comment_id = $1")
            .bind(comment_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let rows = sqlx::query_as::<_, ReplyRow>(
            r#"
            SELECT id, comment_id, author_id, body, created_at
            FROM replies
            WHERE comment_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(comment_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(RowPage::new(
            rows.into_iter().map(Into::into).collect(),
            u64::try_from(total).unwrap_or(0),
        ))
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<ReplyRecord>, RepoError> {
        let row = sqlx::query_as::<_, ReplyRow>(
            "SELECT id, comment_id, author_id, body, created_at FROM replies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, reply: NewReply) -> Result<ReplyRecord, RepoError> {
        let row = sqlx::query_as::<_, ReplyRow>(
            r#"
            INSERT INTO replies (comment_id, author_id, body)
            VALUES ($1, $2, $3)
            RETURNING id, comment_id, author_id, body, created_at
            "#,
        )
        .bind(reply.comment_id)
        .bind(reply.author_id)
        .bind(reply.body)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM replies WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{NewPost, PostChanges, PostFilter, PostsRepo, RepoError, RowPage},
    domain::{
        entities::{PostRecord, RecordId},
        types::PostVisibility,
    },
};

use super::{PostgresRepositories, map_sqlx_error, push_page};

const POST_COLUMNS: &str = r#"
    p.id, p.author_id, p.body, p.visibility,
    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count,
    p.created_at, p.updated_at
"#;

#[derive(FromRow)]
struct PostRow {
    id: i64,
    author_id: i64,
    body: String,
    visibility: PostVisibility,
    comment_count: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            body: row.body,
            visibility: row.visibility,
            comment_count: row.comment_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Public posts, followers-only posts when `viewer` follows the author, and
/// every post the viewer wrote.
fn push_visibility(qb: &mut QueryBuilder<'_, Postgres>, viewer: Option<RecordId>) {
    qb.push(" AND (p.visibility = 'public'::post_visibility OR p.author_id = ")
        .push_bind(viewer)
        .push(
            " OR (p.visibility = 'followers'::post_visibility AND EXISTS \
             (SELECT 1 FROM follows f WHERE f.followed_id = p.author_id AND f.follower_id = ",
        )
        .push_bind(viewer)
        .push(")))");
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &PostFilter, viewer: Option<RecordId>) {
    push_visibility(qb, viewer);
    if let Some(author) = filter.author {
        qb.push(" AND p.author_id = ").push_bind(author);
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn find_page(
        &self,
        filter: &PostFilter,
        viewer: Option<RecordId>,
        offset: i64,
        limit: i64,
    ) -> Result<RowPage<PostRecord>, RepoError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM posts p WHERE TRUE");
        push_filter(&mut count, filter, viewer);
        let total = self.count(count).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {POST_COLUMNS} FROM posts p WHERE TRUE"));
        push_filter(&mut qb, filter, viewer);
        qb.push(" ORDER BY p.created_at DESC, p.id DESC");
        push_page(&mut qb, offset, limit);

        let rows = qb
            .build_query_as::<PostRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(RowPage::new(rows.into_iter().map(Into::into).collect(), total))
    }

    async fn find_by_id(
        &self,
        id: RecordId,
        viewer: Option<RecordId>,
    ) -> Result<Option<PostRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = "));
        qb.push_bind(id);
        push_visibility(&mut qb, viewer);

        let row = qb
            .build_query_as::<PostRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, post: NewPost) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (author_id, body, visibility)
            VALUES ($1, $2, $3)
            RETURNING id, author_id, body, visibility,
                0::BIGINT AS comment_count, created_at, updated_at
            "#,
        )
        .bind(post.author_id)
        .bind(post.body)
        .bind(post.visibility)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: RecordId,
        changes: PostChanges,
    ) -> Result<Option<PostRecord>, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            UPDATE posts
            SET body = COALESCE($2, body),
                visibility = COALESCE($3, visibility),
                updated_at = now()
            WHERE id = $1
            RETURNING id, author_id, body, visibility,
                (SELECT COUNT(*) FROM comments c WHERE c.post_id = posts.id) AS comment_count,
                created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.body)
        .bind(changes.visibility)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: RecordId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
